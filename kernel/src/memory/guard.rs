//! Frame Reference Guard
//!
//! Takes a stable pin on an arbitrary frame. The frame may be in use, free,
//! or in the middle of an allocation or release on another CPU, and the
//! caller does not know which.
//!
//! A zero pin count alone cannot tell "free" from "about to be freed". The
//! guard therefore excludes the frame from allocation for the duration of
//! the check and asks the allocator's own free lists.
//!
//! ```text
//! ALREADY_PINNED ---------------------------> Pinned (caller's pin adopted)
//! exclude -> get_unless_zero -> ok ---------> Pinned (new pin)
//!                            -> zero, free -> Free   (no pin)
//!                                            \-> poisoned meanwhile -> Err(AlreadyPoisoned)
//!                            -> zero, busy -> Err(AmbiguousFreeState)
//! restore
//! ```

#![deny(missing_docs)]

use bitflags::bitflags;

use super::{Frame, FrameFlags, MemoryError, MemoryResult, PinnedFrame};
use crate::debug_print;
use crate::platform::FrameAllocator;

bitflags! {
    /// Options for [`acquire`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AcquireFlags: u32 {
        /// The caller already holds a pin; trust it
        const ALREADY_PINNED = 1 << 0;
        /// Set the poison flag on a frame found free, while it is still
        /// excluded from allocation. Fails if the flag was already set.
        const POISON_IF_FREE = 1 << 1;
    }
}

/// Outcome of a successful [`acquire`]
#[derive(Debug)]
pub enum Acquired<'a> {
    /// Frame sits on the allocator's free lists; no pin was taken
    Free,
    /// Frame is in use and now pinned
    Pinned(PinnedFrame<'a>),
}

/// Keeps a frame excluded from allocation until dropped
struct Isolation<'a, A: FrameAllocator + ?Sized> {
    allocator: &'a A,
    frame: &'a Frame,
}

impl<'a, A: FrameAllocator + ?Sized> Isolation<'a, A> {
    fn new(allocator: &'a A, frame: &'a Frame) -> Self {
        allocator.exclude_from_allocation(frame);
        Self { allocator, frame }
    }
}

impl<A: FrameAllocator + ?Sized> Drop for Isolation<'_, A> {
    fn drop(&mut self) {
        self.allocator.restore(self.frame);
    }
}

/// Acquire a stable pin on `frame`.
///
/// On `Pinned` the caller owns the pin and releases it by dropping the
/// returned [`PinnedFrame`].
pub fn acquire<'a, A>(allocator: &A, frame: &'a Frame, flags: AcquireFlags) -> MemoryResult<Acquired<'a>>
where
    A: FrameAllocator + ?Sized,
{
    if flags.contains(AcquireFlags::ALREADY_PINNED) {
        return Ok(Acquired::Pinned(PinnedFrame::adopt(frame)));
    }

    let _isolation = Isolation::new(allocator, frame);

    if frame.get_unless_zero() {
        return Ok(Acquired::Pinned(PinnedFrame::adopt(frame)));
    }

    if allocator.is_frame_free(frame) {
        debug_print!(DEBUG, "acquire: {} free buddy page", frame.pfn());
        if flags.contains(AcquireFlags::POISON_IF_FREE) && frame.test_and_set(FrameFlags::HWPOISON) {
            debug_print!(DEBUG, "acquire: {} already poisoned", frame.pfn());
            return Err(MemoryError::AlreadyPoisoned);
        }
        Ok(Acquired::Free)
    } else {
        debug_print!(
            WARN,
            "acquire: {}: unknown zero refcount page type {:#x}",
            frame.pfn(),
            frame.flags().bits()
        );
        Err(MemoryError::AmbiguousFreeState)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::memory::{AnonVmaId, Pfn};
    use crate::platform::host::HostPlatform;

    #[test]
    fn free_frame_is_reported_without_pin() {
        let host = HostPlatform::new(8);
        let frame = host.frame(Pfn::new(3)).unwrap();

        let acquired = acquire(&host, frame, AcquireFlags::empty()).unwrap();
        assert!(matches!(acquired, Acquired::Free));
        assert_eq!(frame.ref_count(), 0);
        assert!(!frame.is_poisoned());
        assert!(!host.is_isolated(Pfn::new(3)));
    }

    #[test]
    fn free_frame_poisoned_on_request() {
        let host = HostPlatform::new(8);
        let frame = host.frame(Pfn::new(3)).unwrap();

        let acquired = acquire(&host, frame, AcquireFlags::POISON_IF_FREE).unwrap();
        assert!(matches!(acquired, Acquired::Free));
        assert!(frame.is_poisoned());
    }

    #[test]
    fn free_frame_poisoned_elsewhere_is_not_claimed() {
        let host = HostPlatform::new(8);
        let frame = host.frame(Pfn::new(3)).unwrap();
        frame.set_flags(FrameFlags::HWPOISON);

        assert_eq!(
            acquire(&host, frame, AcquireFlags::POISON_IF_FREE).unwrap_err(),
            MemoryError::AlreadyPoisoned
        );
        assert!(!host.is_isolated(Pfn::new(3)));
    }

    #[test]
    fn in_use_frame_is_pinned_and_released() {
        let host = HostPlatform::new(8);
        let frame = host.add_anon_page(Pfn::new(2), AnonVmaId::new(1), 0).unwrap();
        frame.get();

        let acquired = acquire(&host, frame, AcquireFlags::empty()).unwrap();
        assert!(matches!(&acquired, Acquired::Pinned(pin) if pin.ref_count() == 2));
        drop(acquired);
        assert_eq!(frame.ref_count(), 1);
        assert!(!host.is_isolated(Pfn::new(2)));
    }

    #[test]
    fn already_pinned_skips_isolation() {
        let host = HostPlatform::new(8);
        let frame = host.frame(Pfn::new(5)).unwrap();
        frame.get();

        let acquired = acquire(&host, frame, AcquireFlags::ALREADY_PINNED).unwrap();
        assert!(matches!(acquired, Acquired::Pinned(_)));
        drop(acquired);
        assert_eq!(frame.ref_count(), 0);
    }

    #[test]
    fn zero_refcount_busy_frame_is_ambiguous() {
        let host = HostPlatform::new(8);
        let frame = host.add_anon_page(Pfn::new(4), AnonVmaId::new(1), 0).unwrap();

        assert_eq!(
            acquire(&host, frame, AcquireFlags::empty()).unwrap_err(),
            MemoryError::AmbiguousFreeState
        );
        assert!(!host.is_isolated(Pfn::new(4)));
    }
}
