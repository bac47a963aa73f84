//! Page State Classifier
//!
//! An ordered rule table maps the flag word of a frame onto the recovery
//! handler appropriate for its current role. Rules are evaluated top to
//! bottom and the first rule whose masked flags equal its required bits
//! wins. The last rule has an empty mask, so every flag word matches
//! something.
//!
//! # Ordering
//!
//! - Kernel-owned frames (reserved, slab) come first: they are never touched
//! - Compound frames are unsupported and must not reach the cache handlers
//! - Swap-cache frames come before plain cache frames because a dirty
//!   swap-cache frame is reachable through two kinds of page-table entries
//! - For every base mask, the dirty rule precedes the clean one

#![deny(missing_docs)]

use core::fmt;

use static_assertions::const_assert;

use super::FrameFlags;

/// Recovery handler selected by classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    /// Kernel-internal frame; left alone
    Kernel,
    /// State not covered by any rule
    Unknown,
    /// Clean page-cache or anonymous frame
    CleanCache,
    /// Dirty page-cache or anonymous frame
    DirtyCache,
    /// Clean swap-cache frame
    CleanSwapCache,
    /// Dirty swap-cache frame
    DirtySwapCache,
    /// Compound (huge) frame
    Huge,
}

/// One row of the classification table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRule {
    /// Flags inspected by this rule
    pub mask: FrameFlags,
    /// Value the inspected flags must have
    pub required: FrameFlags,
    /// Human-readable state name used in logs
    pub name: &'static str,
    /// Handler to run
    pub handler: Handler,
}

impl StateRule {
    const fn new(mask: FrameFlags, required: FrameFlags, name: &'static str, handler: Handler) -> Self {
        Self { mask, required, name, handler }
    }

    /// Check whether `flags` match this rule
    pub const fn matches(&self, flags: FrameFlags) -> bool {
        flags.intersection(self.mask).bits() == self.required.bits()
    }
}

impl fmt::Display for StateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

const DIRTY: FrameFlags = FrameFlags::DIRTY;
const SWAPCACHE: FrameFlags = FrameFlags::SWAPCACHE;
const UNEVICTABLE: FrameFlags = FrameFlags::UNEVICTABLE;
const MLOCKED: FrameFlags = FrameFlags::MLOCKED;
const LRU: FrameFlags = FrameFlags::LRU;
const NONE: FrameFlags = FrameFlags::empty();

const UNKNOWN_STATE: StateRule = StateRule::new(NONE, NONE, "unknown page state", Handler::Unknown);

/// Classification table, evaluated in order
pub const STATE_RULES: &[StateRule] = &[
    StateRule::new(FrameFlags::RESERVED, FrameFlags::RESERVED, "reserved kernel", Handler::Kernel),
    StateRule::new(FrameFlags::SLAB, FrameFlags::SLAB, "kernel slab", Handler::Kernel),
    StateRule::new(FrameFlags::COMPOUND, FrameFlags::COMPOUND, "huge", Handler::Huge),
    StateRule::new(SWAPCACHE.union(DIRTY), SWAPCACHE.union(DIRTY), "swapcache", Handler::DirtySwapCache),
    StateRule::new(SWAPCACHE.union(DIRTY), SWAPCACHE, "swapcache", Handler::CleanSwapCache),
    StateRule::new(UNEVICTABLE.union(DIRTY), UNEVICTABLE.union(DIRTY), "unevictable LRU", Handler::DirtyCache),
    StateRule::new(UNEVICTABLE, UNEVICTABLE, "unevictable LRU", Handler::CleanCache),
    StateRule::new(MLOCKED.union(DIRTY), MLOCKED.union(DIRTY), "mlocked LRU", Handler::DirtyCache),
    StateRule::new(MLOCKED, MLOCKED, "mlocked LRU", Handler::CleanCache),
    StateRule::new(LRU.union(DIRTY), LRU.union(DIRTY), "LRU", Handler::DirtyCache),
    StateRule::new(LRU.union(DIRTY), LRU, "clean LRU", Handler::CleanCache),
    UNKNOWN_STATE,
];

// The catch-all must be last
const_assert!(matches!(
    STATE_RULES.last(),
    Some(rule) if rule.mask.is_empty() && rule.required.is_empty()
));

/// Select the rule matching `flags`
pub fn classify(flags: FrameFlags) -> &'static StateRule {
    STATE_RULES
        .iter()
        .find(|rule| rule.matches(flags))
        .unwrap_or(&UNKNOWN_STATE)
}
