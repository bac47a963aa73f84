//! Mapping Teardown & Notifier
//!
//! Removes every user page-table entry of a poisoned frame, then tells the
//! tasks that mapped it. Steps, in order:
//!
//! 1. Kernel frames and frames nobody maps need nothing
//! 2. Compound and deduplicated frames are refused
//! 3. Swap-cache frames keep their swap entries intact
//! 4. Dirty bits are promoted from page-table entries to the frame; a frame
//!    that turns out clean, or whose mapping cannot report dirtiness, is
//!    dropped without telling anyone
//! 5. Victims are collected while the reverse-mapping links still exist
//! 6. Page-table entries are removed, retrying a bounded number of times
//! 7. Victims of a dirty frame are signalled
//!
//! Signal delivery failures are logged and otherwise ignored. The result
//! only reports whether teardown itself succeeded.

#![deny(missing_docs)]

use bitflags::bitflags;

use super::collect::{Notice, VictimList};
use super::failure::MemoryFailure;
use super::{FrameFlags, FrameLock, MemoryError, MemoryResult, Pfn};
use crate::arch::TrapContext;
use crate::debug_print;
use crate::platform::{PageCache, Platform, ReverseMap, SignalDelivery};
use crate::process::Task;

bitflags! {
    /// Modes for removing page-table entries
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UnmapFlags: u32 {
        /// Remove the entries
        const UNMAP           = 1 << 0;
        /// Unmap even from mlocked regions
        const IGNORE_MLOCK    = 1 << 1;
        /// Unmap even recently accessed entries
        const IGNORE_ACCESS   = 1 << 2;
        /// Do not turn removed entries into poison markers
        const IGNORE_HWPOISON = 1 << 3;
    }
}

/// Result of one unmap attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapStatus {
    /// No entry references the frame any more
    Success,
    /// Entries remain; a retry may succeed
    Again,
    /// Entries remain
    Fail,
}

/// Result of [`MemoryFailure::contain_user_mappings`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownResult {
    /// No user mapping references the frame
    Success,
    /// No safe teardown strategy exists for the frame
    NotAttempted,
    /// Entries remained after every retry
    Incomplete,
}

impl TeardownResult {
    /// Whether the frame is free of user mappings
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Map onto a result
    pub const fn into_result(self) -> MemoryResult<()> {
        match self {
            Self::Success => Ok(()),
            Self::NotAttempted => Err(MemoryError::UnsupportedPageType),
            Self::Incomplete => Err(MemoryError::TeardownIncomplete),
        }
    }
}

impl<P: Platform> MemoryFailure<'_, P> {
    /// Remove user mappings of a locked, pinned frame and notify victims.
    pub fn contain_user_mappings(&self, frame: &FrameLock<'_>, trap: &TrapContext) -> TeardownResult {
        let pfn = frame.pfn();
        let flags = frame.flags();
        let rmap = self.platform().reverse_map();

        if flags.intersects(FrameFlags::RESERVED | FrameFlags::SLAB) {
            return TeardownResult::Success;
        }

        // Swap-cache frames nobody maps are always killed late, on fault
        if !frame.is_mapped() {
            return TeardownResult::Success;
        }

        if flags.intersects(FrameFlags::COMPOUND | FrameFlags::KSM) {
            return TeardownResult::NotAttempted;
        }

        let mut ttu = UnmapFlags::UNMAP | UnmapFlags::IGNORE_MLOCK | UnmapFlags::IGNORE_ACCESS;

        if flags.contains(FrameFlags::SWAPCACHE) {
            debug_print!(ERROR, "MCE {}: keeping poisoned page in swap cache", pfn);
            ttu |= UnmapFlags::IGNORE_HWPOISON;
        }

        // A file mapping that cannot report dirtiness counts as clean
        let mut kill = true;
        let clean_file = frame.mapping().file_mapping().filter(|_| !flags.contains(FrameFlags::DIRTY));
        if let Some(mapping) = clean_file {
            let promoted = self.platform().page_cache().can_writeback_dirty(mapping) && rmap.mkclean(frame);
            if promoted {
                frame.set_flags(FrameFlags::DIRTY);
            } else {
                kill = false;
                ttu |= UnmapFlags::IGNORE_HWPOISON;
                debug_print!(
                    INFO,
                    "MCE {}: corrupted page was clean: dropped without side effects",
                    pfn
                );
            }
        }

        let victims = if kill {
            self.collect_victims(frame)
        } else {
            VictimList::new()
        };

        let mut status = UnmapStatus::Fail;
        for _ in 0..self.config().unmap_retries.max(1) {
            status = rmap.try_to_unmap(frame, ttu);
            if status == UnmapStatus::Success {
                break;
            }
            debug_print!(DEBUG, "MCE {}: try_to_unmap retry needed {:?}", pfn, status);
        }

        let failed = status != UnmapStatus::Success;
        if failed {
            debug_print!(
                ERROR,
                "MCE {}: failed to unmap page (mapcount={})",
                pfn,
                frame.map_count()
            );
        }

        self.notify_victims(victims, frame.contains(FrameFlags::DIRTY), failed, pfn, trap);

        if failed {
            TeardownResult::Incomplete
        } else {
            TeardownResult::Success
        }
    }

    /// Signal every victim when `dirty`, then release them all
    fn notify_victims(
        &self,
        victims: VictimList<P::Task>,
        dirty: bool,
        teardown_failed: bool,
        pfn: Pfn,
        trap: &TrapContext,
    ) {
        let signals = self.platform().signals();

        for victim in victims {
            if !dirty {
                continue;
            }
            let task = &victim.task;
            match victim.notice(teardown_failed) {
                Notice::ForcedFatal => {
                    debug_print!(
                        ERROR,
                        "MCE {}: forcibly killing {}:{} because of failure to unmap corrupted page",
                        pfn,
                        task.name(),
                        task.pid()
                    );
                    signals.send_forced_fatal(task);
                }
                Notice::Advisory(addr) => {
                    debug_print!(
                        ERROR,
                        "MCE {}: Killing {}:{} early due to hardware memory corruption",
                        pfn,
                        task.name(),
                        task.pid()
                    );
                    if let Err(err) = signals.send_advisory(task, addr, trap) {
                        debug_print!(
                            ERROR,
                            "MCE {}: Cannot send advisory machine check signal to {}:{}: {}",
                            pfn,
                            task.name(),
                            task.pid(),
                            err
                        );
                    }
                }
            }
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::memory::{AnonVmaId, Config, MappingId, PoisonLedger, VirtualAddress, PAGE_SIZE};
    use crate::platform::host::{HostPlatform, HostTask, Signal};
    use crate::platform::FrameAllocator;
    use crate::process::{EarlyKill, MmId, ProcessId};

    const BASE: usize = 0x5000_0000;

    fn early(pid: u32) -> HostTask {
        HostTask::new(ProcessId::new(pid), "victim", MmId::new(pid)).with_policy(EarlyKill::Early)
    }

    /// One anonymous frame at index 0, mapped by `pids` at `BASE`
    fn anon_setup(host: &HostPlatform, pfn: u64, pids: &[u32], dirty: bool) {
        let anon = AnonVmaId::new(1);
        let frame = host.add_anon_page(Pfn::new(pfn), anon, 0).unwrap();
        if dirty {
            frame.set_flags(FrameFlags::DIRTY);
        }
        for &pid in pids {
            host.add_task(early(pid));
            host.add_anon_vma(anon, MmId::new(pid), VirtualAddress::new(BASE), 1, 0);
            host.map_page(Pfn::new(pfn), MmId::new(pid), VirtualAddress::new(BASE), dirty);
        }
    }

    fn contain(host: &HostPlatform, pfn: u64) -> TeardownResult {
        let ledger = PoisonLedger::new();
        let mf = MemoryFailure::new(host, &ledger, Config::default());
        let frame = host.frame(Pfn::new(pfn)).unwrap();
        let lock = frame.lock();
        mf.contain_user_mappings(&lock, &TrapContext::injected())
    }

    #[test]
    fn kernel_and_unmapped_frames_need_nothing() {
        let host = HostPlatform::new(8);
        host.add_kernel_page(Pfn::new(1), FrameFlags::SLAB).unwrap();
        host.add_anon_page(Pfn::new(2), AnonVmaId::new(1), 0).unwrap();

        assert_eq!(contain(&host, 1), TeardownResult::Success);
        assert_eq!(contain(&host, 2), TeardownResult::Success);
        assert_eq!(host.stats().unmap_attempts, 0);
    }

    #[test]
    fn deduplicated_frame_is_refused() {
        let host = HostPlatform::new(8);
        anon_setup(&host, 3, &[10], true);
        host.frame(Pfn::new(3)).unwrap().set_flags(FrameFlags::KSM);

        let result = contain(&host, 3);
        assert_eq!(result, TeardownResult::NotAttempted);
        assert_eq!(result.into_result(), Err(MemoryError::UnsupportedPageType));
        assert!(host.signals().is_empty());
    }

    #[test]
    fn dirty_frame_victims_get_advisory() {
        let host = HostPlatform::new(8);
        anon_setup(&host, 3, &[10, 11], true);

        assert_eq!(contain(&host, 3), TeardownResult::Success);
        let signals = host.signals();
        assert_eq!(signals.len(), 2);
        for record in &signals {
            assert!(matches!(
                record.signal,
                Signal::Advisory { addr, .. } if addr == VirtualAddress::new(BASE)
            ));
        }
    }

    #[test]
    fn transient_unmap_failures_are_retried() {
        let host = HostPlatform::new(8);
        anon_setup(&host, 3, &[10], true);
        host.fail_unmap_attempts(3);

        assert_eq!(contain(&host, 3), TeardownResult::Success);
        assert_eq!(host.stats().unmap_attempts, 4);
        assert!(matches!(host.signals()[0].signal, Signal::Advisory { .. }));
    }

    #[test]
    fn failed_unmap_forces_kill() {
        let host = HostPlatform::new(8);
        anon_setup(&host, 3, &[10], true);
        host.fail_unmap_always();

        assert_eq!(contain(&host, 3), TeardownResult::Incomplete);
        let signals = host.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal, Signal::ForcedFatal);
    }

    #[test]
    fn unresolved_address_forces_kill() {
        let host = HostPlatform::new(8);
        let anon = AnonVmaId::new(2);
        host.add_task(early(40));
        host.add_anon_vma(anon, MmId::new(40), VirtualAddress::new(BASE), 2, 0);
        host.add_anon_page(Pfn::new(4), anon, 9).unwrap();
        host.map_page(Pfn::new(4), MmId::new(40), VirtualAddress::new(BASE + PAGE_SIZE), true);

        assert_eq!(contain(&host, 4), TeardownResult::Success);
        assert_eq!(host.signals()[0].signal, Signal::ForcedFatal);
    }

    #[test]
    fn clean_anon_frame_victims_are_released_silently() {
        let host = HostPlatform::new(8);
        let task = early(10);
        anon_setup(&host, 3, &[], false);
        host.add_task(task.clone());
        host.add_anon_vma(AnonVmaId::new(1), MmId::new(10), VirtualAddress::new(BASE), 1, 0);
        host.map_page(Pfn::new(3), MmId::new(10), VirtualAddress::new(BASE), false);

        assert_eq!(contain(&host, 3), TeardownResult::Success);
        assert!(host.signals().is_empty());
        assert_eq!(task.pins(), 2);
    }

    #[test]
    fn clean_file_frame_dropped_without_markers() {
        let host = HostPlatform::new(8);
        let mapping = MappingId::new(5);
        host.add_task(early(50));
        host.add_file_vma(mapping, MmId::new(50), VirtualAddress::new(BASE), 1, 0);
        let frame = host.add_file_page(Pfn::new(5), mapping, 0).unwrap();
        host.map_page(Pfn::new(5), MmId::new(50), VirtualAddress::new(BASE), false);
        frame.set_flags(FrameFlags::HWPOISON);

        assert_eq!(contain(&host, 5), TeardownResult::Success);
        assert!(host.signals().is_empty());
        assert!(host.poison_markers().is_empty());
    }

    #[test]
    fn dirty_pte_is_promoted_to_frame() {
        let host = HostPlatform::new(8);
        let mapping = MappingId::new(5);
        host.add_task(early(50));
        host.add_file_vma(mapping, MmId::new(50), VirtualAddress::new(BASE), 1, 0);
        let frame = host.add_file_page(Pfn::new(5), mapping, 0).unwrap();
        host.map_page(Pfn::new(5), MmId::new(50), VirtualAddress::new(BASE), true);
        frame.set_flags(FrameFlags::HWPOISON);

        assert_eq!(contain(&host, 5), TeardownResult::Success);
        assert!(frame.contains(FrameFlags::DIRTY));
        assert_eq!(host.signals().len(), 1);
        assert_eq!(host.poison_markers().len(), 1);
    }

    #[test]
    fn unreportable_dirty_state_counts_as_clean() {
        let host = HostPlatform::new(8);
        let mapping = MappingId::new(6);
        host.set_writeback_capable(mapping, false);
        host.add_task(early(60));
        host.add_file_vma(mapping, MmId::new(60), VirtualAddress::new(BASE), 1, 0);
        let frame = host.add_file_page(Pfn::new(6), mapping, 0).unwrap();
        host.map_page(Pfn::new(6), MmId::new(60), VirtualAddress::new(BASE), true);
        frame.set_flags(FrameFlags::HWPOISON);

        assert_eq!(contain(&host, 6), TeardownResult::Success);
        assert!(!frame.contains(FrameFlags::DIRTY));
        assert!(!frame.is_mapped());
        assert!(host.signals().is_empty());
        assert!(host.poison_markers().is_empty());
    }

    #[test]
    fn zero_retries_still_unmaps_once() {
        let host = HostPlatform::new(8);
        anon_setup(&host, 3, &[10], true);
        let ledger = PoisonLedger::new();
        let config = Config {
            unmap_retries: 0,
            ..Config::default()
        };
        let mf = MemoryFailure::new(&host, &ledger, config);
        let lock = host.frame(Pfn::new(3)).unwrap().lock();

        assert_eq!(
            mf.contain_user_mappings(&lock, &TrapContext::injected()),
            TeardownResult::Success
        );
        assert_eq!(host.stats().unmap_attempts, 1);
        assert!(matches!(host.signals()[0].signal, Signal::Advisory { .. }));
    }

    #[test]
    fn swap_cache_frame_keeps_swap_entries() {
        let host = HostPlatform::new(8);
        anon_setup(&host, 3, &[10], true);
        host.add_to_swap_cache(Pfn::new(3));
        let frame = host.frame(Pfn::new(3)).unwrap();
        frame.set_flags(FrameFlags::HWPOISON);

        assert_eq!(contain(&host, 3), TeardownResult::Success);
        assert!(host.poison_markers().is_empty());
        assert!(frame.contains(FrameFlags::SWAPCACHE));
    }

    #[test]
    fn refused_advisory_does_not_stop_others() {
        let host = HostPlatform::new(8);
        anon_setup(&host, 3, &[10, 11], true);
        host.refuse_signals_for(ProcessId::new(10));

        assert_eq!(contain(&host, 3), TeardownResult::Success);
        let signals = host.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].pid, ProcessId::new(11));
    }
}
