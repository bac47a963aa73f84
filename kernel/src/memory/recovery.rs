//! Recovery Action Handlers
//!
//! One handler per page category selected by the classifier. Handlers never
//! fail with an error; each reports an [`Outcome`]. The dispatcher then
//! checks that nothing but the core's own pin (and, for a delayed dirty
//! swap-cache frame, the swap cache's pin) still references the frame, and
//! downgrades the outcome to `Failed` otherwise.
//!
//! | Handler          | Side effects                                  | Outcome            |
//! |------------------|-----------------------------------------------|--------------------|
//! | Kernel           | none                                          | Ignored            |
//! | Unknown          | log                                           | Failed             |
//! | CleanCache       | off reclaim list, punch hole or invalidate    | Recovered / Failed |
//! | DirtyCache       | error flags, then as CleanCache               | Recovered / Failed |
//! | CleanSwapCache   | out of swap cache and reclaim list            | Recovered / Failed |
//! | DirtySwapCache   | clear dirty/uptodate, off reclaim list only   | Delayed / Failed   |
//! | Huge             | none                                          | Failed             |

#![deny(missing_docs)]

use core::fmt;

use super::classify::{self, Handler, StateRule};
use super::failure::{action_result, MemoryFailure};
use super::{Frame, FrameFlags, FrameMapping, MemoryError, MemoryResult, PinnedFrame};
use crate::debug_print;
use crate::platform::{PageCache, Platform, PunchError};

/// Pins the swap cache keeps on a dirty swap-cache frame whose recovery was
/// delayed. The dispatcher expects them on top of its own pin.
pub const DIRTY_SWAPCACHE_EXPECTED_PINS: u32 = 1;

/// Pins held by the memory-failure core itself while recovering a frame
const CORE_PINS: u32 = 1;

/// Result of a single recovery handler run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Not recoverable; left alone
    Ignored,
    /// Recovery attempted and failed
    Failed,
    /// Recovery deferred to a later fault
    Delayed,
    /// Frame fully reclaimed
    Recovered,
}

impl Outcome {
    /// Whether the outcome counts as success
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Recovered | Self::Delayed)
    }

    /// Name used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ignored => "Ignored",
            Self::Failed => "Failed",
            Self::Delayed => "Delayed",
            Self::Recovered => "Recovered",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report of [`MemoryFailure::classify_and_recover`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    /// Rule the frame matched
    pub rule: &'static StateRule,
    /// Final outcome, after the residual-reference check
    pub outcome: Outcome,
    /// Unexpected references left on the frame
    pub residual: u32,
}

impl Recovery {
    /// Map the report onto a result
    pub fn into_result(self) -> MemoryResult<Outcome> {
        if self.outcome.is_success() {
            return Ok(self.outcome);
        }
        match self.rule.handler {
            Handler::Kernel | Handler::Huge | Handler::Unknown => Err(MemoryError::UnsupportedPageType),
            _ if self.residual > 0 => Err(MemoryError::ResidualReference),
            _ if self.outcome == Outcome::Ignored => Err(MemoryError::UnsupportedPageType),
            _ => Err(MemoryError::RecoveryFailed),
        }
    }
}

impl<P: Platform> MemoryFailure<'_, P> {
    /// Classify `frame` and run the matching recovery handler.
    ///
    /// Never fails; the outcome is `Failed` whenever references other than
    /// the expected ones remain afterwards.
    pub fn classify_and_recover(&self, frame: &PinnedFrame<'_>) -> Recovery {
        let rule = classify::classify(frame.flags());
        let handled = self.run_handler(rule.handler, frame);
        action_result(frame, rule.name, handled);

        let mut expected = CORE_PINS;
        if rule.handler == Handler::DirtySwapCache && handled == Outcome::Delayed {
            expected += DIRTY_SWAPCACHE_EXPECTED_PINS;
        }

        let residual = frame.ref_count().saturating_sub(expected);
        let outcome = if residual != 0 {
            debug_print!(
                ERROR,
                "MCE {}: {} page still referenced by {} users",
                frame.pfn(),
                rule.name,
                residual
            );
            Outcome::Failed
        } else {
            handled
        };

        Recovery { rule, outcome, residual }
    }

    fn run_handler(&self, handler: Handler, frame: &Frame) -> Outcome {
        match handler {
            Handler::Kernel => Outcome::Ignored,
            Handler::Unknown => {
                debug_print!(ERROR, "MCE {}: Unknown page state", frame.pfn());
                Outcome::Failed
            }
            Handler::CleanCache => self.recover_clean_cache(frame),
            Handler::DirtyCache => self.recover_dirty_cache(frame),
            Handler::CleanSwapCache => self.recover_clean_swap_cache(frame),
            Handler::DirtySwapCache => self.recover_dirty_swap_cache(frame),
            Handler::Huge => Outcome::Failed,
        }
    }

    /// Take `frame` off the reclaim list and clear the hints the allocator
    /// would complain about once the frame is unpoisoned and freed
    fn delete_from_lru_cache(&self, frame: &Frame) -> bool {
        if !self.platform().page_cache().isolate_lru(frame) {
            return false;
        }
        frame.clear_flags(FrameFlags::ACTIVE | FrameFlags::UNEVICTABLE);
        frame.put();
        true
    }

    fn recover_clean_cache(&self, frame: &Frame) -> Outcome {
        let cache = self.platform().page_cache();
        let pfn = frame.pfn();

        self.delete_from_lru_cache(frame);

        // Only the core's pin is left on anonymous memory
        let mapping = match frame.mapping() {
            FrameMapping::Anon { .. } => return Outcome::Recovered,
            FrameMapping::Detached => return Outcome::Failed,
            FrameMapping::File { mapping, .. } => mapping,
        };

        match cache.punch_hole(mapping, frame) {
            Ok(()) if frame.has_private() && !cache.release_private_metadata(frame) => {
                debug_print!(DEBUG, "MCE {}: failed to release buffers", pfn);
                Outcome::Failed
            }
            Ok(()) => Outcome::Recovered,
            Err(PunchError::Failed(err)) => {
                debug_print!(INFO, "MCE {}: Failed to punch page: {}", pfn, err);
                Outcome::Failed
            }
            Err(PunchError::Unsupported) => {
                if cache.invalidate(frame) {
                    Outcome::Recovered
                } else {
                    debug_print!(INFO, "MCE {}: Failed to invalidate", pfn);
                    Outcome::Failed
                }
            }
        }
    }

    fn recover_dirty_cache(&self, frame: &Frame) -> Outcome {
        frame.set_flags(FrameFlags::ERROR);
        if let Some(mapping) = frame.mapping().file_mapping() {
            // Reported by the next write or sync on the mapping
            self.platform().page_cache().mark_mapping_io_error(mapping);
        }
        self.recover_clean_cache(frame)
    }

    fn recover_clean_swap_cache(&self, frame: &Frame) -> Outcome {
        let evicted = self.platform().page_cache().delete_from_swap_cache(frame);
        if self.delete_from_lru_cache(frame) && evicted {
            Outcome::Recovered
        } else {
            Outcome::Failed
        }
    }

    /// The frame stays in the swap cache so a later fault on it is caught
    /// and the faulting process killed. Clearing uptodate makes that fault
    /// see the frame as bad instead of reading it.
    fn recover_dirty_swap_cache(&self, frame: &Frame) -> Outcome {
        frame.clear_flags(FrameFlags::DIRTY | FrameFlags::UPTODATE);
        if self.delete_from_lru_cache(frame) {
            Outcome::Delayed
        } else {
            Outcome::Failed
        }
    }
}
