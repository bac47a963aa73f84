//! Soft-Offline Migrator
//!
//! Takes a frame out of service before it fails. The frame is still
//! readable, so nobody is killed: its contents are either dropped (clean,
//! unmapped cache) or moved to a replacement frame on the same node. The
//! frame is then poisoned. A frame still in use keeps one pin so it does
//! not return to the allocator; a free one is poisoned while excluded from
//! allocation, and the allocator skips it from then on.
//!
//! ```text
//! already poisoned? -> AlreadyPoisoned
//! pin ----> free -------------------------------------> poison
//!   |
//!   +-> not on reclaim list -> shake -> re-pin -> free -> poison
//!   |                                        \-> still not listed -> Unsupported
//!   +-> lock, wait write-back, poisoned meanwhile? -> AlreadyPoisoned
//!   +-> invalidate ----------------------------------> poison, keep pin
//!   +-> unpin -> isolate -> migrate -> re-pin -> free -> poison
//!                                            \-> held -> poison, keep pin
//! ```
//!
//! Concurrent containment of the same frame is detected through the poison
//! flag, checked under the frame lock.

#![deny(missing_docs)]

use super::failure::MemoryFailure;
use super::guard::{self, AcquireFlags, Acquired};
use super::{Frame, FrameFlags, MemoryError, MemoryResult, Pfn, PinnedFrame};
use crate::debug_print;
use crate::platform::{FrameAllocator, MigrateError, Migrator, PageCache, Platform};

impl<P: Platform> MemoryFailure<'_, P> {
    /// Vacate and poison frame `pfn` without killing anyone.
    pub fn soft_offline(&self, pfn: Pfn, flags: AcquireFlags) -> MemoryResult<()> {
        let frame = self.frame(pfn)?;

        if frame.is_poisoned() {
            debug_print!(DEBUG, "soft offline: {} page already poisoned", pfn);
            return Err(MemoryError::AlreadyPoisoned);
        }

        let acquire_flags = (flags & AcquireFlags::ALREADY_PINNED) | AcquireFlags::POISON_IF_FREE;
        let mut pinned = match self.acquire_for_offline(frame, acquire_flags)? {
            Some(pinned) => pinned,
            None => return self.offline_free(frame),
        };

        if !frame.contains(FrameFlags::LRU) {
            drop(pinned);
            self.shake_frame(frame, true);

            // Did it turn free?
            pinned = match self.acquire_for_offline(frame, AcquireFlags::POISON_IF_FREE)? {
                Some(pinned) => pinned,
                None => return self.offline_free(frame),
            };
        }

        if !frame.contains(FrameFlags::LRU) {
            debug_print!(
                DEBUG,
                "soft_offline: {}: unknown non LRU page type {:#x}",
                pfn,
                frame.flags().bits()
            );
            return Err(MemoryError::UnsupportedPageType);
        }

        let invalidated = {
            let _lock = frame.lock();
            frame.wait_on_writeback();

            // Serialized against memory failure handling by the frame lock
            if frame.is_poisoned() {
                debug_print!(DEBUG, "soft offline: {} page already poisoned", pfn);
                return Err(MemoryError::AlreadyPoisoned);
            }

            // Works for clean, unmapped cache frames
            self.platform().page_cache().invalidate(frame)
        };

        if invalidated {
            debug_print!(DEBUG, "soft_offline: {}: invalidated", pfn);
            return self.offline_pinned(pinned);
        }

        // Migration wants no extra pins. The frame may be reallocated
        // meanwhile, but then isolation fails.
        drop(pinned);
        self.migrate_frame(frame)?;

        // The last reference usually went with the migration
        match self.acquire_for_offline(frame, AcquireFlags::POISON_IF_FREE)? {
            Some(pinned) => self.offline_pinned(pinned),
            None => self.offline_free(frame),
        }
    }

    /// Pin `frame` for offlining. `None` means it is free and was poisoned
    /// while excluded from allocation.
    fn acquire_for_offline<'f>(
        &self,
        frame: &'f Frame,
        flags: AcquireFlags,
    ) -> MemoryResult<Option<PinnedFrame<'f>>> {
        match guard::acquire(self.platform().allocator(), frame, flags)? {
            Acquired::Pinned(pinned) => Ok(Some(pinned)),
            Acquired::Free => Ok(None),
        }
    }

    fn migrate_frame(&self, frame: &Frame) -> MemoryResult<()> {
        let pfn = frame.pfn();

        if !self.platform().page_cache().isolate_lru(frame) {
            debug_print!(
                DEBUG,
                "soft offline: {}: isolation failed, page count {}, type {:#x}",
                pfn,
                frame.ref_count(),
                frame.flags().bits()
            );
            return Err(MemoryError::MigrationFailed);
        }

        let allocator = self.platform().allocator();
        let new_frame = |old: &Frame| allocator.allocate_replacement(old.node());

        self.platform()
            .migrator()
            .migrate(&[frame], &new_frame)
            .map_err(|err| {
                debug_print!(
                    DEBUG,
                    "soft offline: {}: migration failed {}, type {:#x}",
                    pfn,
                    err,
                    frame.flags().bits()
                );
                match err {
                    MigrateError::NotMigrated(count) if count > 0 => MemoryError::Io,
                    _ => MemoryError::MigrationFailed,
                }
            })
    }

    /// Poison a frame still in use. The pin is kept for as long as the
    /// frame stays poisoned.
    fn offline_pinned(&self, pinned: PinnedFrame<'_>) -> MemoryResult<()> {
        if !self.ledger().poison(&pinned) {
            debug_print!(DEBUG, "soft offline: {} page already poisoned", pinned.pfn());
            return Err(MemoryError::AlreadyPoisoned);
        }
        pinned.retain();
        Ok(())
    }

    /// Count a free frame the guard poisoned while it was excluded from
    /// allocation.
    fn offline_free(&self, frame: &Frame) -> MemoryResult<()> {
        self.ledger().record(frame);
        Ok(())
    }
}
