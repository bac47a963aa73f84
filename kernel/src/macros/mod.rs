//! Zero OS Memory-Failure Macros
//!
//! This module provides the logging macro used throughout the memory-failure
//! core. Output goes through the `log` facade so the embedding kernel decides
//! where diagnostics end up (UART, ring buffer, host test logger).
//!
//! # Levels
//!
//! - `ERROR`: recovery results, forced kills, failed unmaps
//! - `WARN`: degraded behavior (victim list exhausted, failed signal delivery)
//! - `INFO`: decisions with no side effects on processes
//! - `DEBUG`: per-frame tracing of guard, soft-offline and unpoison paths
//! - `TRACE`: most verbose

#![deny(missing_docs)]

/// Log target shared by every message emitted from this crate
pub const LOG_TARGET: &str = "hwpoison";

/// Emit a diagnostic message at the given level.
///
/// ```ignore
/// debug_print!(ERROR, "MCE {:#x}: Unknown page state", pfn);
/// ```
#[macro_export]
macro_rules! debug_print {
    (ERROR, $($arg:tt)*) => {
        ::log::error!(target: $crate::macros::LOG_TARGET, $($arg)*)
    };
    (WARN, $($arg:tt)*) => {
        ::log::warn!(target: $crate::macros::LOG_TARGET, $($arg)*)
    };
    (INFO, $($arg:tt)*) => {
        ::log::info!(target: $crate::macros::LOG_TARGET, $($arg)*)
    };
    (DEBUG, $($arg:tt)*) => {
        ::log::debug!(target: $crate::macros::LOG_TARGET, $($arg)*)
    };
    (TRACE, $($arg:tt)*) => {
        ::log::trace!(target: $crate::macros::LOG_TARGET, $($arg)*)
    };
}
