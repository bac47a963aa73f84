//! Zero OS Memory-Failure Core
//!
//! Containment and recovery for hardware-reported memory corruption. Given
//! the frame number of a damaged physical page this crate classifies the
//! page's current role, runs the recovery action appropriate for that role,
//! notifies or terminates every process mapping it, and can proactively
//! migrate a suspect (not yet corrupted) page off of failing memory.
//!
//! # Architecture
//!
//! The core never owns frames. Everything it touches outside the frame
//! descriptor itself is reached through the collaborator traits in
//! [`platform`]:
//! - Frame allocator (free-list lookup, allocation exclusion, replacement frames)
//! - Page cache / reclaim list (hole punching, invalidation, swap-cache)
//! - Reverse mapping (task list, anonymous and file mapping indexes, unmap)
//! - Signal delivery
//! - Page migration
//!
//! Entry points live on [`memory::MemoryFailure`]:
//! - `handle` - asynchronous containment of a confirmed corrupted frame
//! - `classify_and_recover` - rule-table dispatch to a recovery handler
//! - `contain_user_mappings` - collect victims, unmap, notify
//! - `soft_offline` - vacate a suspect frame without killing anyone
//! - `unpoison` - software reversal of poisoning
//!
//! # Safety
//!
//! Corruption can be reported at any instant, including while another
//! thread holds the frame for an unrelated operation. Pin counts and flag
//! bits are only changed with atomic operations and every test-and-clear is
//! written to tolerate a concurrent poison or pin change.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]
#![warn(clippy::panic)]
#![warn(clippy::unwrap_used)]

pub mod macros;
pub mod arch;
pub mod memory;
pub mod platform;
pub mod process;

pub use memory::{Config, MemoryError, MemoryFailure, MemoryResult, Outcome, PoisonLedger};
