//! Platform Abstraction Layer
//!
//! The memory-failure core reasons about frames that are visible to several
//! unrelated subsystems at once. It does not implement any of them. This
//! module defines the narrow interfaces it consumes from each collaborator
//! and bundles them behind a single [`Platform`] trait, so the core stays
//! generic over the kernel it is linked into.
//!
//! # Collaborators
//!
//! - **Frame allocator**: frame lookup, free-list queries, allocation
//!   exclusion, replacement frames, per-CPU buffer drains
//! - **Page cache**: reclaim-list isolation, hole punching, invalidation,
//!   private metadata, mapping error state, swap cache
//! - **Reverse mapping**: task list, anonymous and file mapping indexes,
//!   page-table teardown
//! - **Signal delivery**: advisory and forced-fatal signals
//! - **Migration engine**: live page migration
//!
//! # Design Principles
//!
//! - Interfaces are as narrow as the core needs, nothing more
//! - Lock-scoped traversals are expressed as callbacks, so a collaborator
//!   never hands out a guard the core could hold across unrelated work
//! - Lock order is fixed: task list before any mapping-specific lock

#![deny(missing_docs)]

use thiserror::Error;

use crate::arch::TrapContext;
use crate::memory::{
    AnonVmaId, Frame, MappingId, NodeId, Pfn, UnmapFlags, UnmapStatus, VirtualAddress,
    VirtualMemoryArea,
};
use crate::process::{SignalResult, Task};

#[cfg(feature = "std")]
pub mod host;

/// Physical frame allocator
pub trait FrameAllocator {
    /// Descriptor of frame `pfn`, `None` if no such frame exists
    fn frame(&self, pfn: Pfn) -> Option<&Frame>;

    /// Check the allocator's own free lists for `frame`
    fn is_frame_free(&self, frame: &Frame) -> bool;

    /// Stop the allocator from handing out or merging `frame`.
    ///
    /// Must always be paired with [`FrameAllocator::restore`].
    fn exclude_from_allocation(&self, frame: &Frame);

    /// Undo [`FrameAllocator::exclude_from_allocation`]
    fn restore(&self, frame: &Frame);

    /// Allocate a replacement frame on `node`
    fn allocate_replacement(&self, node: NodeId) -> Option<Pfn>;

    /// Flush per-CPU buffers of frames waiting to join the reclaim list
    fn drain_lru_lists(&self);

    /// Flush per-CPU buffers of freed frames back to the free lists
    fn drain_frame_buffers(&self);

    /// Run one slab shrinking pass, returning the number of objects freed
    fn shrink_slab_caches(&self) -> usize;
}

/// Hole punching errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PunchError {
    /// The filesystem has no hole-punch operation
    #[error("hole punching not supported")]
    Unsupported,
    /// The filesystem refused to remove the frame
    #[error("hole punch failed: {0}")]
    Failed(i32),
}

/// Page cache, reclaim list and swap cache
pub trait PageCache {
    /// Take `frame` off the reclaim list, adding one pin for the caller
    fn isolate_lru(&self, frame: &Frame) -> bool;

    /// Remove `frame` from its file mapping, leaving a hole
    fn punch_hole(&self, mapping: MappingId, frame: &Frame) -> Result<(), PunchError>;

    /// Drop a clean, unmapped frame from the page cache
    fn invalidate(&self, frame: &Frame) -> bool;

    /// Release filesystem metadata attached to `frame`
    fn release_private_metadata(&self, frame: &Frame) -> bool;

    /// Record an I/O error on `mapping`, reported by later sync operations
    fn mark_mapping_io_error(&self, mapping: MappingId);

    /// Whether `mapping` can report dirty state for write-back
    fn can_writeback_dirty(&self, mapping: MappingId) -> bool;

    /// Evict `frame` from the swap cache
    fn delete_from_swap_cache(&self, frame: &Frame) -> bool;
}

/// Reverse-mapping index
///
/// The traversal methods invoke the callback while holding the relevant
/// lock. Callers nest them task list first.
pub trait ReverseMap {
    /// Process type recorded in victim lists
    type Task: Task;

    /// Run `f` over every task while holding the task-list lock
    fn with_tasks(&self, f: &mut dyn FnMut(&[Self::Task]));

    /// Run `f` over the regions of anonymous mapping group `anon_vma` while
    /// holding its lock. Returns `false` if the group no longer exists.
    fn with_anon_vmas(&self, anon_vma: AnonVmaId, f: &mut dyn FnMut(&[VirtualMemoryArea])) -> bool;

    /// Run `f` over the regions of `mapping` overlapping page offset `pgoff`
    /// while holding the mapping's index lock
    fn with_file_vmas(&self, mapping: MappingId, pgoff: u64, f: &mut dyn FnMut(&[VirtualMemoryArea]));

    /// Whether a page-table entry in `vma` currently maps `frame`
    fn frame_mapped_in(&self, frame: &Frame, vma: &VirtualMemoryArea) -> bool;

    /// Remove page-table entries referencing `frame`
    fn try_to_unmap(&self, frame: &Frame, flags: UnmapFlags) -> UnmapStatus;

    /// Clear dirty bits in page-table entries mapping `frame`, returning
    /// whether any was set
    fn mkclean(&self, frame: &Frame) -> bool;
}

/// Signal delivery
pub trait SignalDelivery<T: Task> {
    /// Queue a catchable bus error carrying the corrupted address
    fn send_advisory(&self, task: &T, addr: VirtualAddress, trap: &TrapContext) -> SignalResult<()>;

    /// Kill `task` with an uncatchable signal
    fn send_forced_fatal(&self, task: &T);
}

/// Migration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MigrateError {
    /// Some frames could not be migrated
    #[error("{0} frames not migrated")]
    NotMigrated(usize),
    /// Migration aborted
    #[error("migration failed")]
    Failed,
}

/// Live page migration engine
pub trait Migrator {
    /// Move the contents and mappings of isolated `frames` onto frames
    /// obtained from `new_frame`. Frames that could not be moved are put
    /// back on the reclaim list. A moved frame whose last reference is gone
    /// returns to the allocator.
    fn migrate(
        &self,
        frames: &[&Frame],
        new_frame: &dyn Fn(&Frame) -> Option<Pfn>,
    ) -> Result<(), MigrateError>;
}

/// The full set of collaborators the memory-failure core runs against
pub trait Platform {
    /// Process type
    type Task: Task;
    /// Frame allocator
    type Allocator: FrameAllocator;
    /// Page cache
    type PageCache: PageCache;
    /// Reverse-mapping index
    type ReverseMap: ReverseMap<Task = Self::Task>;
    /// Signal delivery
    type Signals: SignalDelivery<Self::Task>;
    /// Migration engine
    type Migrator: Migrator;

    /// Frame allocator
    fn allocator(&self) -> &Self::Allocator;

    /// Page cache
    fn page_cache(&self) -> &Self::PageCache;

    /// Reverse-mapping index
    fn reverse_map(&self) -> &Self::ReverseMap;

    /// Signal delivery
    fn signals(&self) -> &Self::Signals;

    /// Migration engine
    fn migrator(&self) -> &Self::Migrator;
}
