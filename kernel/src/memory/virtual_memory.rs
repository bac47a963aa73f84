//! Virtual Memory Areas
//!
//! The reverse-mapping index hands the memory-failure core a set of mapping
//! regions (VMAs) that may reference a frame. This module describes those
//! regions just enough to answer two questions:
//!
//! - Does the region cover a given page offset?
//! - At which virtual address does the region map that offset?
//!
//! # Address Resolution
//!
//! ```text
//! address = start + (index - pgoff) << PAGE_SHIFT
//! valid   iff start <= address < end
//! ```

#![deny(missing_docs)]

use core::fmt;

use crate::memory::PAGE_SHIFT;
use crate::process::MmId;

/// Virtual address in a process address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    /// Create a new virtual address
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Virtual Memory Area (VMA) descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualMemoryArea {
    /// Address space the region belongs to
    pub mm: MmId,
    /// Start virtual address
    pub start: VirtualAddress,
    /// End virtual address (exclusive)
    pub end: VirtualAddress,
    /// Page offset (in the file or anonymous object) mapped at `start`
    pub pgoff: u64,
}

impl VirtualMemoryArea {
    /// Create a new VMA
    pub const fn new(mm: MmId, start: VirtualAddress, end: VirtualAddress, pgoff: u64) -> Self {
        Self { mm, start, end, pgoff }
    }

    /// Number of pages spanned by the region
    pub const fn pages(&self) -> u64 {
        (self.end.as_usize().saturating_sub(self.start.as_usize()) >> PAGE_SHIFT) as u64
    }

    /// Check whether the region maps page offset `index`
    pub const fn covers(&self, index: u64) -> bool {
        index >= self.pgoff && index - self.pgoff < self.pages()
    }

    /// Virtual address at which the region maps page offset `index`
    pub fn address_of(&self, index: u64) -> Option<VirtualAddress> {
        let delta = index.checked_sub(self.pgoff)?;
        let offset = usize::try_from(delta).ok()?.checked_shl(PAGE_SHIFT as u32)?;
        let addr = self.start.as_usize().checked_add(offset)?;
        (addr >= self.start.as_usize() && addr < self.end.as_usize()).then_some(VirtualAddress(addr))
    }
}
