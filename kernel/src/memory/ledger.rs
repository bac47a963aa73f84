//! Poison Ledger
//!
//! Counts the frames currently quarantined because of memory corruption.
//! The per-frame half of the ledger is the `HWPOISON` flag in the frame
//! descriptor; this module owns the global count and keeps the two in step.
//!
//! The ledger is created once at system start and handed to every
//! [`MemoryFailure`] handle by reference. Diagnostics read it through
//! [`PoisonLedger::count`].
//!
//! # Unpoison
//!
//! [`MemoryFailure::unpoison`] reverses poisoning in software only. It does
//! not repair the underlying hardware condition. It reopens the frame to the
//! allocator and is meant for error-injection testing.

#![deny(missing_docs)]

use core::sync::atomic::{AtomicUsize, Ordering};

use super::failure::MemoryFailure;
use super::{Frame, FrameFlags, MemoryError, MemoryResult, Pfn};
use crate::debug_print;
use crate::platform::{FrameAllocator, Platform};

/// Process-wide count of poisoned frames
#[derive(Debug, Default)]
pub struct PoisonLedger {
    poisoned: AtomicUsize,
}

impl PoisonLedger {
    /// Create an empty ledger
    pub const fn new() -> Self {
        Self {
            poisoned: AtomicUsize::new(0),
        }
    }

    /// Number of frames currently counted as poisoned
    pub fn count(&self) -> usize {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Poison `frame` unless it already is. Returns `true` and counts the
    /// frame only if this call set the flag.
    pub fn poison(&self, frame: &Frame) -> bool {
        if frame.test_and_set(FrameFlags::HWPOISON) {
            return false;
        }
        self.poisoned.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Count `frame` and set its poison flag. The flag may already have been
    /// set while the frame sat excluded from allocation.
    pub fn record(&self, frame: &Frame) {
        self.poisoned.fetch_add(1, Ordering::AcqRel);
        frame.set_flags(FrameFlags::HWPOISON);
    }

    /// Clear the poison flag of `frame`. Returns `true` and uncounts the
    /// frame only if this call cleared the flag.
    pub fn clear(&self, frame: &Frame) -> bool {
        if !frame.test_and_clear(FrameFlags::HWPOISON) {
            return false;
        }
        let _ = self
            .poisoned
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        true
    }
}

impl<P: Platform> MemoryFailure<'_, P> {
    /// Software-unpoison frame `pfn`.
    ///
    /// Succeeds without effect if the frame is not poisoned. A free frame
    /// only has its flag cleared; an in-use frame also loses the pin retained
    /// when it was poisoned.
    pub fn unpoison(&self, pfn: Pfn) -> MemoryResult<()> {
        let frame = self
            .platform()
            .allocator()
            .frame(pfn)
            .ok_or(MemoryError::InvalidFrame)?;

        if !frame.is_poisoned() {
            debug_print!(DEBUG, "MCE: Page was already unpoisoned {}", pfn);
            return Ok(());
        }

        if !frame.get_unless_zero() {
            self.ledger().clear(frame);
            debug_print!(DEBUG, "MCE: Software-unpoisoned free page {}", pfn);
            return Ok(());
        }

        let freeit = {
            let _lock = frame.lock();
            // Racy: the flag is set outside the frame lock. A frame that
            // slips through stays caught on its way back to the free lists.
            let cleared = self.ledger().clear(frame);
            if cleared {
                debug_print!(DEBUG, "MCE: Software-unpoisoned page {}", pfn);
            }
            cleared
        };

        frame.put();
        if freeit {
            frame.put();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NodeId;

    #[test]
    fn poison_counts_once() {
        let ledger = PoisonLedger::new();
        let frame = Frame::new(Pfn::new(1), NodeId::new(0));

        assert!(ledger.poison(&frame));
        assert!(!ledger.poison(&frame));
        assert_eq!(ledger.count(), 1);
        assert!(frame.is_poisoned());
    }

    #[test]
    fn clear_uncounts_once() {
        let ledger = PoisonLedger::new();
        let frame = Frame::new(Pfn::new(1), NodeId::new(0));
        ledger.record(&frame);

        assert!(ledger.clear(&frame));
        assert!(!ledger.clear(&frame));
        assert_eq!(ledger.count(), 0);
    }
}

#[cfg(all(test, feature = "std"))]
mod unpoison_tests {
    use super::*;
    use crate::memory::{AnonVmaId, Config};
    use crate::platform::host::HostPlatform;

    #[test]
    fn invalid_frame_is_rejected() {
        let host = HostPlatform::new(4);
        let ledger = PoisonLedger::new();
        let mf = MemoryFailure::new(&host, &ledger, Config::default());
        assert_eq!(mf.unpoison(Pfn::new(99)), Err(MemoryError::InvalidFrame));
    }

    #[test]
    fn free_frame_only_loses_flag() {
        let host = HostPlatform::new(4);
        let ledger = PoisonLedger::new();
        let frame = host.frame(Pfn::new(1)).unwrap();
        ledger.record(frame);

        let mf = MemoryFailure::new(&host, &ledger, Config::default());
        assert_eq!(mf.unpoison(Pfn::new(1)), Ok(()));
        assert!(!frame.is_poisoned());
        assert_eq!(ledger.count(), 0);
        assert_eq!(frame.ref_count(), 0);
    }

    #[test]
    fn pinned_frame_releases_retained_pin_once() {
        let host = HostPlatform::new(4);
        let ledger = PoisonLedger::new();
        let frame = host.add_anon_page(Pfn::new(2), AnonVmaId::new(1), 0).unwrap();
        frame.get();
        ledger.record(frame);

        let mf = MemoryFailure::new(&host, &ledger, Config::default());
        assert_eq!(mf.unpoison(Pfn::new(2)), Ok(()));
        assert_eq!(mf.unpoison(Pfn::new(2)), Ok(()));
        assert_eq!(frame.ref_count(), 0);
        assert_eq!(ledger.count(), 0);
        assert!(!frame.contains(FrameFlags::LOCKED));
    }
}
