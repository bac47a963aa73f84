//! Memory-Failure Subsystem
//!
//! This module implements containment and recovery for physical frames that
//! hardware reported as corrupted, and proactive offlining of frames that are
//! merely suspect. It is built from the following components, leaf first:
//!
//! - Frame Reference Guard (stable pin on an arbitrary frame)
//! - Page State Classifier (ordered rule table)
//! - Recovery Action Handlers (one per page category)
//! - Victim Collector (reverse-mapping walk)
//! - Mapping Teardown & Notifier (unmap, then signal)
//! - Soft-Offline Migrator (vacate a suspect frame)
//! - Poison Ledger (quarantined frame accounting, unpoison)
//!
//! # Design Principles
//!
//! - Classification and recovery never fail with an error, they report an
//!   [`Outcome`]
//! - Every pin taken on a frame is released on every exit path, except the
//!   one pin deliberately retained on a poisoned frame
//! - Victims are collected before mappings are torn down, since teardown
//!   destroys the reverse-mapping links collection depends on
//! - Bounded retries replace indefinite waits
//!
//! # Frame Lifecycle
//!
//! ```text
//! in use --(memory failure)--> poisoned, pinned --(unpoison)--> in use
//!    |                                                 ^
//!    +--(soft offline: invalidate / migrate)-----------+
//! free --(guard finds it free)--> poisoned, unpinned --(unpoison)--> free
//! ```

#![deny(missing_docs)]

use core::fmt;

use thiserror::Error;

pub mod classify;
pub mod collect;
pub mod failure;
pub mod frame;
pub mod guard;
pub mod ledger;
pub mod recovery;
pub mod soft_offline;
pub mod teardown;
pub mod virtual_memory;

// Re-exports
pub use classify::{classify, Handler, StateRule, STATE_RULES};
pub use collect::{Notice, Victim, VictimList};
pub use failure::{Config, MemoryFailure};
pub use frame::{Frame, FrameFlags, FrameLock, FrameMapping, PinnedFrame};
pub use guard::{acquire, AcquireFlags, Acquired};
pub use ledger::PoisonLedger;
pub use recovery::{Outcome, Recovery, DIRTY_SWAPCACHE_EXPECTED_PINS};
pub use teardown::{TeardownResult, UnmapFlags, UnmapStatus};
pub use virtual_memory::{VirtualAddress, VirtualMemoryArea};

/// Page size (4KB)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Page shift (log2 of page size)
pub const PAGE_SHIFT: usize = 12;

/// Maximum number of victims collected for a single frame
pub const MAX_VICTIMS: usize = 64;

/// Physical frame number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pfn(u64);

impl Pfn {
    /// Create a new frame number
    pub const fn new(pfn: u64) -> Self {
        Self(pfn)
    }

    /// Get the raw frame number
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::LowerHex for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// NUMA node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(u16);

impl NodeId {
    /// Create a new node ID
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw node ID
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Identifier of an anonymous mapping group (the set of regions that may map
/// a given anonymous frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnonVmaId(u32);

impl AnonVmaId {
    /// Create a new anonymous mapping group ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Identifier of a file mapping (the page-cache owner of file-backed frames)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappingId(u32);

impl MappingId {
    /// Create a new file mapping ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Memory-failure errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Frame number does not name a frame
    #[error("invalid frame")]
    InvalidFrame,
    /// Zero pin count, yet the allocator denies the frame is free
    #[error("zero refcount frame that is not free")]
    AmbiguousFreeState,
    /// Frame type cannot be handled (huge, compound, slab, reserved, unknown)
    #[error("unsupported page type")]
    UnsupportedPageType,
    /// Page-table entries still reference the frame after all unmap retries
    #[error("teardown of user mappings incomplete")]
    TeardownIncomplete,
    /// Frame already carries the poison flag
    #[error("frame already poisoned")]
    AlreadyPoisoned,
    /// Isolation or migration of the frame failed
    #[error("migration failed")]
    MigrationFailed,
    /// Other users still hold references after recovery
    #[error("frame still referenced after recovery")]
    ResidualReference,
    /// A recovery handler attempted recovery and failed
    #[error("recovery failed")]
    RecoveryFailed,
    /// Generic I/O error (migration left frames behind)
    #[error("I/O error")]
    Io,
}

/// Result type for memory-failure operations
pub type MemoryResult<T> = Result<T, MemoryError>;
