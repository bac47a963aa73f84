//! Architecture Trap Context
//!
//! Hardware fault detection is outside this crate: the trigger arrives as an
//! opaque frame number plus the context of the trap that reported it. This
//! module carries that context through to the advisory signal delivered to
//! processes, so a handler in user space can tell which trap fired.

#![deny(missing_docs)]

/// Kind of trap that reported a memory error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// Machine check exception
    MachineCheck,
    /// Synchronous external abort on a data access
    DataAbort,
    /// Synchronous external abort on an instruction fetch
    PrefetchAbort,
    /// Software-injected failure (testing and diagnostics)
    Injected,
}

/// Trap context handed to the memory-failure core by the fault orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapContext {
    /// Kind of trap
    pub kind: TrapKind,
    /// Architecture trap number, forwarded untouched in advisory signals
    pub trap_number: u32,
}

impl TrapContext {
    /// Create a new trap context
    pub const fn new(kind: TrapKind, trap_number: u32) -> Self {
        Self { kind, trap_number }
    }

    /// Context used for software-injected failures
    pub const fn injected() -> Self {
        Self::new(TrapKind::Injected, 0)
    }
}

impl Default for TrapContext {
    fn default() -> Self {
        Self::injected()
    }
}
