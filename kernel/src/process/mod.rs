//! Process View for Memory-Failure Handling
//!
//! The memory-failure core does not manage processes. It only needs to
//! identify them, pin them while a notification is pending, find out which
//! address space they run in, and read their early-notification policy.
//! Process objects themselves belong to the scheduler and are reached
//! through the [`Task`] trait.
//!
//! # Early notification
//!
//! A process may ask to be told about corruption of any page it maps as soon
//! as the corruption is found, instead of only when it next touches the page.
//! The choice is per task:
//!
//! ```text
//! EarlyKill::Early   -> always notified early
//! EarlyKill::Late    -> never notified early
//! EarlyKill::Inherit -> follows Config::early_kill (process-wide default)
//! ```
//!
//! Kernel threads (no address space) are never notified.

#![deny(missing_docs)]

use core::fmt;

use thiserror::Error;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Create a new process ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address space identifier
///
/// Two mapping regions belong to the same process when their address space
/// IDs match the one the task runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MmId(u32);

impl MmId {
    /// Create a new address space ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Per-task early notification policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EarlyKill {
    /// Task never set a policy; the process-wide default applies
    #[default]
    Inherit,
    /// Task asked to be notified as soon as corruption is found
    Early,
    /// Task asked to be notified only on access
    Late,
}

/// A process as seen by the memory-failure core.
///
/// `Clone` must pin the underlying process object and dropping a clone must
/// release that pin, so a collected victim keeps its task alive until the
/// notification step consumes it.
pub trait Task: Clone {
    /// Process identifier
    fn pid(&self) -> ProcessId;

    /// Short command name used in diagnostics
    fn name(&self) -> &str;

    /// Address space the task runs in, `None` for kernel threads
    fn mm(&self) -> Option<MmId>;

    /// Policy explicitly set by the task
    fn early_kill(&self) -> EarlyKill;
}

/// Decide whether `task` wants to be notified early.
pub fn task_early_kill<T: Task>(task: &T, default_early: bool) -> bool {
    if task.mm().is_none() {
        return false;
    }
    match task.early_kill() {
        EarlyKill::Early => true,
        EarlyKill::Late => false,
        EarlyKill::Inherit => default_early,
    }
}

/// Signal delivery errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Delivery was refused by the signal layer
    #[error("permission denied")]
    PermissionDenied,
}

/// Result type for signal delivery
pub type SignalResult<T> = Result<T, SignalError>;
