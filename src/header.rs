//! Opaque message identities.
//!
//! Every message that crosses a [`TargetEndpoint`](crate::target::TargetEndpoint) or
//! the [`SourceCore`](crate::source::SourceCore) output queue carries a [`MessageHeader`]:
//! a positive, monotonically increasing id generated per (block, target) pair. Headers
//! from different blocks or different targets are never compared to each other, so
//! uniqueness only needs to hold locally.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a message in transit.
///
/// `id` is always `>= 1`; the value `0` is reserved to mean "no header" and is never
/// produced by [`HeaderGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    id: u64,
}

impl MessageHeader {
    /// Builds a header from a raw id.
    ///
    /// Returns `None` if `id == 0`, matching the "no header" sentinel.
    pub fn from_raw(id: u64) -> Option<Self> {
        (id != 0).then_some(Self { id })
    }

    /// The underlying, block-local, monotonically increasing id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Generates the monotonically increasing headers for one target (or one source's
/// output), independent of whatever lock the rest of the target's state lives behind.
///
/// Cache-padded because several of these live side by side in a block's target array
/// and are touched by whichever producer thread is currently offering, so false sharing
/// between neighboring counters is worth avoiding, the same way the teacher pads its
/// channel cursors.
pub(crate) struct HeaderGenerator {
    next: CachePadded<AtomicU64>,
}

impl Default for HeaderGenerator {
    fn default() -> Self {
        Self {
            next: CachePadded::new(AtomicU64::new(1)),
        }
    }
}

impl HeaderGenerator {
    pub(crate) fn next(&self) -> MessageHeader {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        MessageHeader { id }
    }
}

/// Stable identity of a target endpoint, used as the `requester` in the
/// reserve/consume/release protocol so a [`SourceCore`](crate::source::SourceCore) can
/// tell which downstream target currently holds its one outstanding reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequesterId(u64);

impl RequesterId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_monotone_and_positive() {
        let gen = HeaderGenerator::default();
        let a = gen.next();
        let b = gen.next();
        assert!(a.id() >= 1);
        assert!(b.id() > a.id());
    }

    #[test]
    fn zero_is_not_a_header() {
        assert!(MessageHeader::from_raw(0).is_none());
        assert!(MessageHeader::from_raw(1).is_some());
    }

    #[test]
    fn requester_ids_are_distinct() {
        let a = RequesterId::next();
        let b = RequesterId::next();
        assert_ne!(a, b);
    }
}
