//! Victim Collector
//!
//! Finds every task that maps a poisoned frame and asked to be told about
//! it early. There is no index from an address space back to its tasks, so
//! collection walks the whole task list under the task-list lock and, for
//! each task, the regions of the frame's owner under that owner's lock.
//! Corruption is rare enough that the linear scan is acceptable.
//!
//! # Storage
//!
//! Victims are stored in a fixed-capacity [`VictimList`] created before any
//! lock is taken, so collection never allocates while the locks are held.
//! A frame mapped by more than [`MAX_VICTIMS`] early-notification tasks
//! loses the excess victims, with a warning.
//!
//! [`MAX_VICTIMS`]: super::MAX_VICTIMS

#![deny(missing_docs)]

use heapless::Vec;

use super::failure::MemoryFailure;
use super::{AnonVmaId, Frame, FrameMapping, MappingId, VirtualAddress, VirtualMemoryArea, MAX_VICTIMS};
use crate::debug_print;
use crate::platform::{Platform, ReverseMap};
use crate::process::{task_early_kill, Task};

/// Signal a victim is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Catchable bus error at the corrupted address
    Advisory(VirtualAddress),
    /// Uncatchable kill
    ForcedFatal,
}

/// A task mapping a poisoned frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Victim<T> {
    /// Task to notify; holding it keeps the task pinned
    pub task: T,
    /// Address the frame is mapped at, `None` if it could not be resolved
    pub addr: Option<VirtualAddress>,
}

impl<T: Task> Victim<T> {
    /// Choose the signal for this victim. An unknown address or an
    /// incomplete teardown leaves the corrupted memory reachable, so the
    /// task is killed outright.
    pub fn notice(&self, teardown_failed: bool) -> Notice {
        match self.addr {
            Some(addr) if !teardown_failed => Notice::Advisory(addr),
            _ => Notice::ForcedFatal,
        }
    }
}

/// Victims collected for a single frame
pub type VictimList<T> = Vec<Victim<T>, MAX_VICTIMS>;

impl<P: Platform> MemoryFailure<'_, P> {
    /// Collect the early-notification tasks mapping `frame`.
    ///
    /// Must run before the frame's page-table entries are removed.
    pub fn collect_victims(&self, frame: &Frame) -> VictimList<P::Task> {
        let mut victims = VictimList::new();
        match frame.mapping() {
            FrameMapping::Detached => {}
            FrameMapping::Anon { anon_vma, index } => {
                self.collect_anon(frame, anon_vma, index, &mut victims);
            }
            FrameMapping::File { mapping, index } => {
                self.collect_file(frame, mapping, index, &mut victims);
            }
        }
        victims
    }

    fn collect_anon(&self, frame: &Frame, anon_vma: AnonVmaId, index: u64, victims: &mut VictimList<P::Task>) {
        let rmap = self.platform().reverse_map();
        let default_early = self.config().early_kill;

        rmap.with_tasks(&mut |tasks| {
            let present = rmap.with_anon_vmas(anon_vma, &mut |vmas| {
                for task in tasks.iter().filter(|task| task_early_kill(*task, default_early)) {
                    for vma in vmas {
                        if !rmap.frame_mapped_in(frame, vma) {
                            continue;
                        }
                        if task.mm() == Some(vma.mm) {
                            add_to_kill(frame, task, vma, index, victims);
                        }
                    }
                }
            });
            if !present {
                debug_print!(DEBUG, "MCE {}: anonymous mapping already gone", frame.pfn());
            }
        });
    }

    fn collect_file(&self, frame: &Frame, mapping: MappingId, index: u64, victims: &mut VictimList<P::Task>) {
        let rmap = self.platform().reverse_map();
        let default_early = self.config().early_kill;

        // A covering region is enough: any later access faults in the same
        // corrupted offset, mapped yet or not.
        rmap.with_tasks(&mut |tasks| {
            rmap.with_file_vmas(mapping, index, &mut |vmas| {
                for task in tasks.iter().filter(|task| task_early_kill(*task, default_early)) {
                    for vma in vmas.iter().filter(|vma| vma.covers(index)) {
                        if task.mm() == Some(vma.mm) {
                            add_to_kill(frame, task, vma, index, victims);
                        }
                    }
                }
            });
        });
    }
}

fn add_to_kill<T: Task>(
    frame: &Frame,
    task: &T,
    vma: &VirtualMemoryArea,
    index: u64,
    victims: &mut VictimList<T>,
) {
    let addr = vma.address_of(index);
    if addr.is_none() {
        debug_print!(
            DEBUG,
            "MCE {}: Unable to find user space address in {}",
            frame.pfn(),
            task.name()
        );
    }

    let victim = Victim {
        task: task.clone(),
        addr,
    };
    if victims.push(victim).is_err() {
        debug_print!(
            WARN,
            "MCE {}: victim list full, {}:{} will not be notified",
            frame.pfn(),
            task.name(),
            task.pid()
        );
    }
}
