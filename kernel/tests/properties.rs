//! Property tests for classification, victim selection and unpoison

use proptest::prelude::*;

use hwpoison::memory::{
    classify, AcquireFlags, FrameFlags, Handler, MappingId, Notice, Pfn, Victim, VirtualAddress, STATE_RULES,
};
use hwpoison::platform::host::{HostPlatform, HostTask};
use hwpoison::platform::FrameAllocator;
use hwpoison::process::{task_early_kill, EarlyKill, MmId, ProcessId};
use hwpoison::{Config, MemoryFailure, PoisonLedger};

fn any_flags() -> impl Strategy<Value = FrameFlags> {
    any::<u32>().prop_map(FrameFlags::from_bits_truncate)
}

fn any_policy() -> impl Strategy<Value = EarlyKill> {
    prop_oneof![Just(EarlyKill::Inherit), Just(EarlyKill::Early), Just(EarlyKill::Late)]
}

proptest! {
    #[test]
    fn classification_is_total_and_first_match(flags in any_flags()) {
        let rule = classify(flags);
        prop_assert!(rule.matches(flags));
        prop_assert_eq!(classify(flags), rule);

        let position = STATE_RULES.iter().position(|candidate| candidate == rule);
        prop_assert!(position.is_some());
        let earlier = STATE_RULES.iter().take(position.unwrap_or_default());
        for candidate in earlier {
            prop_assert!(!candidate.matches(flags));
        }
    }

    #[test]
    fn dirty_unevictable_uses_dirty_handler(extra in any_flags()) {
        let kernel_or_swap = FrameFlags::RESERVED | FrameFlags::SLAB | FrameFlags::COMPOUND | FrameFlags::SWAPCACHE;
        let flags = (extra - kernel_or_swap) | FrameFlags::UNEVICTABLE | FrameFlags::DIRTY;
        prop_assert_eq!(classify(flags).handler, Handler::DirtyCache);
    }

    #[test]
    fn victims_pass_early_notification_policy(
        tasks in prop::collection::vec((any_policy(), any::<bool>()), 1..12),
        default_early in any::<bool>(),
    ) {
        let host = HostPlatform::new(4);
        let mapping = MappingId::new(1);
        let mut expected = 0;

        for (pid, (policy, kernel)) in (1u32..).zip(&tasks) {
            let task = if *kernel {
                HostTask::kernel_thread(ProcessId::new(pid), "kthread")
            } else {
                let mm = MmId::new(pid);
                host.add_file_vma(mapping, mm, VirtualAddress::new(0x1000_0000), 1, 0);
                HostTask::new(ProcessId::new(pid), "user", mm)
            };
            let task = task.with_policy(*policy);
            if task_early_kill(&task, default_early) {
                expected += 1;
            }
            host.add_task(task);
        }
        let frame = host.add_file_page(Pfn::new(1), mapping, 0).unwrap();

        let ledger = PoisonLedger::new();
        let config = Config { early_kill: default_early, ..Config::default() };
        let mf = MemoryFailure::new(&host, &ledger, config);
        let victims = mf.collect_victims(frame);

        prop_assert_eq!(victims.len(), expected);
        for victim in &victims {
            prop_assert!(task_early_kill(&victim.task, default_early));
        }
    }

    #[test]
    fn forced_fatal_iff_failed_or_unresolved(
        addr in prop::option::of(any::<u32>()),
        failed in any::<bool>(),
    ) {
        let victim = Victim {
            task: HostTask::new(ProcessId::new(1), "victim", MmId::new(1)),
            addr: addr.map(|addr| VirtualAddress::new(addr as usize)),
        };
        let fatal = victim.notice(failed) == Notice::ForcedFatal;
        prop_assert_eq!(fatal, failed || addr.is_none());
    }

    #[test]
    fn unpoison_is_idempotent(pins in 0u32..4, offline in any::<bool>()) {
        let host = HostPlatform::new(4);
        let ledger = PoisonLedger::new();
        let mf = MemoryFailure::new(&host, &ledger, Config::default());
        let pfn = Pfn::new(2);
        let frame = host.frame(pfn).unwrap();

        if offline {
            prop_assert!(mf.soft_offline(pfn, AcquireFlags::empty()).is_ok());
        } else {
            for _ in 0..pins {
                frame.get();
            }
            ledger.record(frame);
        }
        let before = ledger.count();

        prop_assert!(mf.unpoison(pfn).is_ok());
        prop_assert!(mf.unpoison(pfn).is_ok());
        prop_assert!(!frame.is_poisoned());
        prop_assert_eq!(ledger.count(), before - 1);
    }
}
