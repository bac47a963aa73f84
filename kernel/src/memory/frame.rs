//! Physical Frame Descriptor
//!
//! Each physical frame has one [`Frame`] descriptor, owned by the frame
//! allocator. The memory-failure core never owns frames: it reads their
//! state, flips flag bits with atomic operations and transiently pins them.
//!
//! # Concurrency
//!
//! The pin count and flag word are the only state changed without a
//! dedicated lock. Every test-and-set/test-and-clear here may race with an
//! independent poison or pin change on another CPU, and callers are written
//! to tolerate that. The owner field sits behind a short spin lock because
//! it is a multi-word value.
//!
//! The frame lock is the `LOCKED` flag bit itself, acquired by spinning on a
//! test-and-set, and released when the [`FrameLock`] guard drops.

#![deny(missing_docs)]

use core::hint;
use core::ops::Deref;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use spin::Mutex;

use super::{AnonVmaId, MappingId, NodeId, Pfn};

bitflags! {
    /// Role and state flags of a physical frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u32 {
        /// Frame lock is held
        const LOCKED      = 1 << 0;
        /// An I/O error occurred on the frame
        const ERROR       = 1 << 1;
        /// Recently referenced
        const REFERENCED  = 1 << 2;
        /// Contents are valid
        const UPTODATE    = 1 << 3;
        /// Contents differ from backing store
        const DIRTY       = 1 << 4;
        /// Frame is on the reclaim list (LRU)
        const LRU         = 1 << 5;
        /// Frame is on the active half of the reclaim list
        const ACTIVE      = 1 << 6;
        /// Frame is owned by the slab allocator
        const SLAB        = 1 << 7;
        /// Frame is reserved by the kernel
        const RESERVED    = 1 << 8;
        /// Filesystem private metadata is attached
        const PRIVATE     = 1 << 9;
        /// Write-back to backing store is in flight
        const WRITEBACK   = 1 << 10;
        /// Frame is part of a compound (huge) page
        const COMPOUND    = 1 << 11;
        /// Frame is in the swap cache
        const SWAPCACHE   = 1 << 12;
        /// Frame is backed by swap
        const SWAPBACKED  = 1 << 13;
        /// Frame is on the unevictable reclaim list
        const UNEVICTABLE = 1 << 14;
        /// Frame is mlocked by some mapping
        const MLOCKED     = 1 << 15;
        /// Frame is poisoned (confirmed, contained corruption)
        const HWPOISON    = 1 << 16;
        /// Frame content is shared by deduplication (KSM)
        const KSM         = 1 << 17;
    }
}

/// Reverse-mapping owner of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMapping {
    /// No owner; the frame was truncated or never attached
    #[default]
    Detached,
    /// Anonymous memory
    Anon {
        /// Anonymous mapping group the frame belongs to
        anon_vma: AnonVmaId,
        /// Page offset used to locate the frame inside a region
        index: u64,
    },
    /// File-backed page cache
    File {
        /// Owning file mapping
        mapping: MappingId,
        /// Page offset inside the file
        index: u64,
    },
}

impl FrameMapping {
    /// Page offset of the frame, if it has an owner
    pub const fn index(&self) -> Option<u64> {
        match self {
            Self::Detached => None,
            Self::Anon { index, .. } | Self::File { index, .. } => Some(*index),
        }
    }

    /// Owning file mapping, if file-backed
    pub const fn file_mapping(&self) -> Option<MappingId> {
        match self {
            Self::File { mapping, .. } => Some(*mapping),
            _ => None,
        }
    }
}

/// Physical frame descriptor
#[derive(Debug)]
pub struct Frame {
    /// Frame number (stable identity)
    pfn: Pfn,
    /// NUMA node the frame belongs to
    node: NodeId,
    /// Role and state flags
    flags: AtomicU32,
    /// Pin count
    refcount: AtomicU32,
    /// Number of page-table entries referencing the frame
    mapcount: AtomicU32,
    /// Reverse-mapping owner
    mapping: Mutex<FrameMapping>,
}

impl Frame {
    /// Create a free, unpinned frame descriptor
    pub const fn new(pfn: Pfn, node: NodeId) -> Self {
        Self {
            pfn,
            node,
            flags: AtomicU32::new(0),
            refcount: AtomicU32::new(0),
            mapcount: AtomicU32::new(0),
            mapping: Mutex::new(FrameMapping::Detached),
        }
    }

    /// Frame number
    pub const fn pfn(&self) -> Pfn {
        self.pfn
    }

    /// NUMA node
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Snapshot of the flag word
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Check whether all of `flags` are set
    pub fn contains(&self, flags: FrameFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Set `flags`
    pub fn set_flags(&self, flags: FrameFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear `flags`
    pub fn clear_flags(&self, flags: FrameFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Set `flags`, returning whether they were all set before
    pub fn test_and_set(&self, flags: FrameFlags) -> bool {
        let old = self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
        old & flags.bits() == flags.bits()
    }

    /// Clear `flags`, returning whether any of them was set before
    pub fn test_and_clear(&self, flags: FrameFlags) -> bool {
        let old = self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
        old & flags.bits() != 0
    }

    /// Frame carries the poison flag
    pub fn is_poisoned(&self) -> bool {
        self.contains(FrameFlags::HWPOISON)
    }

    /// Current pin count
    pub fn ref_count(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Take a pin unconditionally
    pub fn get(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Take a pin unless the count is zero
    pub fn get_unless_zero(&self) -> bool {
        self.refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count != 0).then(|| count + 1)
            })
            .is_ok()
    }

    /// Drop a pin, returning the remaining count
    pub fn put(&self) -> u32 {
        match self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    /// Number of page-table entries referencing the frame
    pub fn map_count(&self) -> u32 {
        self.mapcount.load(Ordering::Acquire)
    }

    /// Frame is mapped into at least one address space
    pub fn is_mapped(&self) -> bool {
        self.map_count() > 0
    }

    /// Account one more page-table entry
    pub fn inc_map_count(&self) {
        self.mapcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Account one page-table entry fewer
    pub fn dec_map_count(&self) {
        let _ = self
            .mapcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }

    /// Reverse-mapping owner
    pub fn mapping(&self) -> FrameMapping {
        *self.mapping.lock()
    }

    /// Replace the reverse-mapping owner
    pub fn set_mapping(&self, mapping: FrameMapping) {
        *self.mapping.lock() = mapping;
    }

    /// Frame holds anonymous memory
    pub fn is_anon(&self) -> bool {
        matches!(self.mapping(), FrameMapping::Anon { .. })
    }

    /// Filesystem private metadata is attached
    pub fn has_private(&self) -> bool {
        self.contains(FrameFlags::PRIVATE)
    }

    /// Acquire the frame lock, spinning until it is free
    pub fn lock(&self) -> FrameLock<'_> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.contains(FrameFlags::LOCKED) {
                hint::spin_loop();
            }
        }
    }

    /// Try to acquire the frame lock without waiting
    pub fn try_lock(&self) -> Option<FrameLock<'_>> {
        (!self.test_and_set(FrameFlags::LOCKED)).then(|| FrameLock { frame: self })
    }

    /// Wait for in-flight write-back to finish
    pub fn wait_on_writeback(&self) {
        while self.contains(FrameFlags::WRITEBACK) {
            hint::spin_loop();
        }
    }
}

/// Frame lock guard, released on drop
#[derive(Debug)]
pub struct FrameLock<'a> {
    frame: &'a Frame,
}

impl<'a> FrameLock<'a> {
    /// Locked frame
    pub const fn frame(&self) -> &'a Frame {
        self.frame
    }
}

impl Deref for FrameLock<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame
    }
}

impl Drop for FrameLock<'_> {
    fn drop(&mut self) {
        self.frame.clear_flags(FrameFlags::LOCKED);
    }
}

/// A pin on a frame, released on drop unless retained
#[derive(Debug)]
pub struct PinnedFrame<'a> {
    frame: &'a Frame,
}

impl<'a> PinnedFrame<'a> {
    /// Take a new pin on `frame`
    pub fn pin(frame: &'a Frame) -> Self {
        frame.get();
        Self { frame }
    }

    /// Take ownership of a pin the caller already holds
    pub const fn adopt(frame: &'a Frame) -> Self {
        Self { frame }
    }

    /// Pinned frame
    pub const fn frame(&self) -> &'a Frame {
        self.frame
    }

    /// Keep the pin for good: a poisoned frame must not return to the
    /// allocator until it is unpoisoned, which drops this pin.
    pub fn retain(self) -> &'a Frame {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Deref for PinnedFrame<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame
    }
}

impl Drop for PinnedFrame<'_> {
    fn drop(&mut self) {
        self.frame.put();
    }
}
