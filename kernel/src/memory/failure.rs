//! Memory-Failure Service
//!
//! [`MemoryFailure`] is the handle through which the fault orchestrator
//! drives the core. It borrows the platform collaborators and the poison
//! ledger, and carries the tunables in [`Config`]. The operations are spread
//! over the component modules:
//!
//! - [`MemoryFailure::handle`] (here): asynchronous containment
//! - [`MemoryFailure::classify_and_recover`] (recovery)
//! - [`MemoryFailure::collect_victims`] (collect)
//! - [`MemoryFailure::contain_user_mappings`] (teardown)
//! - [`MemoryFailure::soft_offline`] (soft_offline)
//! - [`MemoryFailure::unpoison`] (ledger)
//!
//! # Containment Flow
//!
//! ```text
//! poison + count -> pin (guard) -> shake if not cached -> lock
//!   -> wait write-back -> unmap + notify -> classify -> recover
//! ```
//!
//! The pin taken on a poisoned frame is never released here. It keeps the
//! frame out of the allocator until [`MemoryFailure::unpoison`] drops it.

#![deny(missing_docs)]

use super::guard::{self, AcquireFlags, Acquired};
use super::{Frame, FrameFlags, MemoryError, MemoryResult, Outcome, Pfn, PoisonLedger};
use crate::arch::TrapContext;
use crate::debug_print;
use crate::platform::{FrameAllocator, Platform};

/// Default number of attempts to remove all page-table entries of a frame
pub const DEFAULT_UNMAP_RETRIES: usize = 5;

/// Default bound on slab shrinking passes while shaking a frame
pub const DEFAULT_MAX_SHRINK_PASSES: usize = 16;

/// A shrink pass freeing this many objects or fewer ends shaking
const SHRINK_PROGRESS_THRESHOLD: usize = 10;

/// Memory-failure tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Notify processes early unless they chose otherwise
    pub early_kill: bool,
    /// Attempts to remove all page-table entries of a frame; at least one
    /// is always made
    pub unmap_retries: usize,
    /// Bound on slab shrinking passes while shaking a frame
    pub max_shrink_passes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            early_kill: false,
            unmap_retries: DEFAULT_UNMAP_RETRIES,
            max_shrink_passes: DEFAULT_MAX_SHRINK_PASSES,
        }
    }
}

/// Memory-failure handling service
pub struct MemoryFailure<'a, P: Platform> {
    platform: &'a P,
    ledger: &'a PoisonLedger,
    config: Config,
}

impl<'a, P: Platform> MemoryFailure<'a, P> {
    /// Create a handle over `platform` and `ledger`
    pub const fn new(platform: &'a P, ledger: &'a PoisonLedger, config: Config) -> Self {
        Self { platform, ledger, config }
    }

    /// Platform collaborators
    pub const fn platform(&self) -> &'a P {
        self.platform
    }

    /// Poison ledger
    pub const fn ledger(&self) -> &'a PoisonLedger {
        self.ledger
    }

    /// Tunables
    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn frame(&self, pfn: Pfn) -> MemoryResult<&'a Frame> {
        self.platform.allocator().frame(pfn).ok_or_else(|| {
            debug_print!(ERROR, "MCE {}: memory outside kernel control", pfn);
            MemoryError::InvalidFrame
        })
    }

    /// Contain a frame hardware reported as corrupted.
    ///
    /// Returns the recovery outcome on success. Every path after the frame
    /// is pinned keeps the pin.
    pub fn handle(&self, pfn: Pfn, trap: &TrapContext, flags: AcquireFlags) -> MemoryResult<Outcome> {
        let frame = self.frame(pfn)?;

        if !self.ledger.poison(frame) {
            debug_print!(ERROR, "MCE {}: already hardware poisoned", pfn);
            return Err(MemoryError::AlreadyPoisoned);
        }

        let acquire_flags = flags & AcquireFlags::ALREADY_PINNED;
        let pinned = match guard::acquire(self.platform.allocator(), frame, acquire_flags) {
            Ok(Acquired::Pinned(pinned)) => pinned,
            Ok(Acquired::Free) => {
                action_result(frame, "free buddy", Outcome::Delayed);
                return Ok(Outcome::Delayed);
            }
            Err(err) => {
                action_result(frame, "high order kernel", Outcome::Ignored);
                return Err(err);
            }
        };

        if !frame.flags().intersects(FrameFlags::LRU | FrameFlags::SWAPCACHE) {
            self.shake_frame(frame, false);
        }

        let lock = frame.lock();

        // Unpoison raced with us and took our pin along with its own
        if !frame.is_poisoned() {
            debug_print!(ERROR, "MCE {}: just unpoisoned", pfn);
            pinned.retain();
            return Ok(Outcome::Ignored);
        }

        frame.wait_on_writeback();

        if let Err(err) = self.contain_user_mappings(&lock, trap).into_result() {
            debug_print!(ERROR, "MCE {}: cannot unmap page, give up", pfn);
            pinned.retain();
            return Err(err);
        }

        if frame.contains(FrameFlags::LRU)
            && !frame.contains(FrameFlags::SWAPCACHE)
            && frame.mapping().index().is_none()
        {
            action_result(frame, "already truncated LRU", Outcome::Ignored);
            pinned.retain();
            return Ok(Outcome::Ignored);
        }

        let recovery = self.classify_and_recover(&pinned);
        drop(lock);
        pinned.retain();
        recovery.into_result()
    }

    /// Drain caches holding `frame` in the hope it becomes reclaim-listed
    /// or free. Slab shrinking only runs when `access` is set, since it
    /// touches unrelated caches.
    pub fn shake_frame(&self, frame: &Frame, access: bool) {
        let allocator = self.platform.allocator();

        if !frame.contains(FrameFlags::SLAB) {
            allocator.drain_lru_lists();
            if frame.contains(FrameFlags::LRU) {
                return;
            }
            allocator.drain_frame_buffers();
            if frame.contains(FrameFlags::LRU) || allocator.is_frame_free(frame) {
                return;
            }
        }

        if access {
            for _ in 0..self.config.max_shrink_passes {
                let freed = allocator.shrink_slab_caches();
                if frame.ref_count() == 0 || freed <= SHRINK_PROGRESS_THRESHOLD {
                    break;
                }
            }
        }
    }
}

/// Log the outcome of a recovery step for `frame`
pub(crate) fn action_result(frame: &Frame, msg: &str, outcome: Outcome) {
    let dirty = if frame.contains(FrameFlags::DIRTY) { "dirty " } else { "" };
    debug_print!(ERROR, "MCE {}: {}{} page recovery: {}", frame.pfn(), dirty, msg, outcome);
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::memory::{AnonVmaId, MappingId, VirtualAddress};
    use crate::platform::host::{HostPlatform, HostTask};
    use crate::process::{EarlyKill, MmId, ProcessId};

    fn service<'a>(host: &'a HostPlatform, ledger: &'a PoisonLedger) -> MemoryFailure<'a, HostPlatform> {
        MemoryFailure::new(host, ledger, Config::default())
    }

    #[test]
    fn invalid_frame_is_rejected() {
        let host = HostPlatform::new(4);
        let ledger = PoisonLedger::new();
        let mf = service(&host, &ledger);
        assert_eq!(
            mf.handle(Pfn::new(40), &TrapContext::injected(), AcquireFlags::empty()),
            Err(MemoryError::InvalidFrame)
        );
        assert_eq!(ledger.count(), 0);
    }

    #[test]
    fn second_report_is_already_poisoned() {
        let host = HostPlatform::new(4);
        let ledger = PoisonLedger::new();
        let mf = service(&host, &ledger);
        let trap = TrapContext::injected();

        assert_eq!(mf.handle(Pfn::new(1), &trap, AcquireFlags::empty()), Ok(Outcome::Delayed));
        assert_eq!(
            mf.handle(Pfn::new(1), &trap, AcquireFlags::empty()),
            Err(MemoryError::AlreadyPoisoned)
        );
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn slab_frame_is_ignored_and_pinned() {
        let host = HostPlatform::new(4);
        let ledger = PoisonLedger::new();
        let frame = host.add_kernel_page(Pfn::new(2), FrameFlags::SLAB).unwrap();
        let mf = service(&host, &ledger);

        assert_eq!(
            mf.handle(Pfn::new(2), &TrapContext::injected(), AcquireFlags::empty()),
            Err(MemoryError::UnsupportedPageType)
        );
        assert!(frame.is_poisoned());
        assert_eq!(frame.ref_count(), 2);
        assert_eq!(ledger.count(), 1);
        assert_eq!(host.stats().lru_drains, 0);
    }

    #[test]
    fn ambiguous_frame_surfaces_error() {
        let host = HostPlatform::new(4);
        let ledger = PoisonLedger::new();
        host.add_anon_page(Pfn::new(3), AnonVmaId::new(1), 0).unwrap();
        let mf = service(&host, &ledger);

        assert_eq!(
            mf.handle(Pfn::new(3), &TrapContext::injected(), AcquireFlags::empty()),
            Err(MemoryError::AmbiguousFreeState)
        );
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn dirty_anon_frame_kills_early_task() {
        let host = HostPlatform::new(8);
        let ledger = PoisonLedger::new();
        let task = HostTask::new(ProcessId::new(20), "db", MmId::new(20)).with_policy(EarlyKill::Early);
        host.add_task(task.clone());
        let anon = AnonVmaId::new(7);
        let addr = host.add_anon_vma(anon, MmId::new(20), VirtualAddress::new(0x1000_0000), 4, 0);
        let frame = host.add_anon_page(Pfn::new(5), anon, 2).unwrap();
        host.map_page(Pfn::new(5), MmId::new(20), addr_of(addr, 2), true);

        let mf = service(&host, &ledger);
        assert_eq!(
            mf.handle(Pfn::new(5), &TrapContext::injected(), AcquireFlags::empty()),
            Ok(Outcome::Recovered)
        );

        let signals = host.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].pid, ProcessId::new(20));
        assert_eq!(frame.map_count(), 0);
        assert_eq!(frame.ref_count(), 1);
        assert_eq!(task.pins(), 2);
    }

    #[test]
    fn clean_file_frame_dropped_without_signals() {
        let host = HostPlatform::new(8);
        let ledger = PoisonLedger::new();
        let task = HostTask::new(ProcessId::new(21), "reader", MmId::new(21)).with_policy(EarlyKill::Early);
        host.add_task(task);
        let mapping = MappingId::new(3);
        let start = host.add_file_vma(mapping, MmId::new(21), VirtualAddress::new(0x2000_0000), 8, 0);
        let frame = host.add_file_page(Pfn::new(6), mapping, 1).unwrap();
        host.map_page(Pfn::new(6), MmId::new(21), addr_of(start, 1), false);

        let mf = service(&host, &ledger);
        assert_eq!(
            mf.handle(Pfn::new(6), &TrapContext::injected(), AcquireFlags::empty()),
            Ok(Outcome::Recovered)
        );
        assert!(host.signals().is_empty());
        assert!(!host.in_page_cache(Pfn::new(6)));
        assert_eq!(frame.ref_count(), 1);
    }

    #[test]
    fn unmap_failure_gives_up() {
        let host = HostPlatform::new(8);
        let ledger = PoisonLedger::new();
        let anon = AnonVmaId::new(1);
        let start = host.add_anon_vma(anon, MmId::new(30), VirtualAddress::new(0x1000), 1, 0);
        host.add_anon_page(Pfn::new(4), anon, 0).unwrap();
        host.map_page(Pfn::new(4), MmId::new(30), start, false);
        host.fail_unmap_always();

        let mf = service(&host, &ledger);
        assert_eq!(
            mf.handle(Pfn::new(4), &TrapContext::injected(), AcquireFlags::empty()),
            Err(MemoryError::TeardownIncomplete)
        );
        assert_eq!(host.stats().unmap_attempts, DEFAULT_UNMAP_RETRIES);
    }

    #[test]
    fn unpoisoned_while_waiting_for_lock_is_ignored() {
        let host = HostPlatform::new(8);
        let ledger = PoisonLedger::new();
        let task = HostTask::new(ProcessId::new(22), "racer", MmId::new(22)).with_policy(EarlyKill::Early);
        host.add_task(task);
        let anon = AnonVmaId::new(2);
        let start = host.add_anon_vma(anon, MmId::new(22), VirtualAddress::new(0x3000_0000), 1, 0);
        let frame = host.add_anon_page(Pfn::new(4), anon, 0).unwrap();
        host.map_page(Pfn::new(4), MmId::new(22), start, true);

        let outcome = std::thread::scope(|scope| {
            let lock = frame.lock();
            let worker = scope.spawn(|| {
                service(&host, &ledger).handle(Pfn::new(4), &TrapContext::injected(), AcquireFlags::empty())
            });

            while frame.ref_count() < 2 {
                std::hint::spin_loop();
            }
            // Unpoison clears the flag and drops the quarantine pin
            assert!(ledger.clear(frame));
            frame.put();
            drop(lock);
            worker.join().unwrap()
        });

        assert_eq!(outcome, Ok(Outcome::Ignored));
        assert_eq!(ledger.count(), 0);
        assert!(!frame.is_poisoned());
        assert_eq!(frame.ref_count(), 1);
        assert_eq!(frame.map_count(), 1);
        assert!(host.signals().is_empty());
        assert_eq!(host.stats().unmap_attempts, 0);
    }

    #[test]
    fn shake_stops_once_frame_is_listed() {
        let host = HostPlatform::new(8);
        let ledger = PoisonLedger::new();
        let frame = host.add_anon_page(Pfn::new(3), AnonVmaId::new(1), 0).unwrap();
        host.park_on_lru_buffer(Pfn::new(3));

        let mf = service(&host, &ledger);
        mf.shake_frame(frame, true);
        assert!(frame.contains(FrameFlags::LRU));
        let stats = host.stats();
        assert_eq!(stats.lru_drains, 1);
        assert_eq!(stats.buffer_drains, 0);
        assert_eq!(stats.shrink_passes, 0);
    }

    #[test]
    fn shake_shrinks_slab_only_on_access() {
        let host = HostPlatform::new(8);
        let ledger = PoisonLedger::new();
        let frame = host.add_kernel_page(Pfn::new(2), FrameFlags::SLAB).unwrap();
        host.queue_shrink_results(&[500, 200, 4]);

        let mf = service(&host, &ledger);
        mf.shake_frame(frame, false);
        assert_eq!(host.stats().shrink_passes, 0);

        mf.shake_frame(frame, true);
        let stats = host.stats();
        assert_eq!(stats.shrink_passes, 3);
        assert_eq!(stats.lru_drains, 0);
    }

    fn addr_of(start: VirtualAddress, page: usize) -> VirtualAddress {
        VirtualAddress::new(start.as_usize() + page * crate::memory::PAGE_SIZE)
    }
}
