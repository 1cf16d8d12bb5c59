//! The producer/consumer protocol (spec §4.B, §6.4).
//!
//! [`SourceProducer`] is the capability every upstream producer exposes to a target:
//! reserve, then either consume or release. [`DownstreamTarget`] is its mirror image,
//! the capability every downstream target exposes to a source — this is what
//! `SourceCore::link_to` hands messages to. A [`SourceCore`](crate::source::SourceCore)
//! implements `SourceProducer`; a target endpoint implements `DownstreamTarget`, so two
//! grouping blocks can be chained with no additional glue.

use crate::error::GroupingError;
use crate::header::{MessageHeader, RequesterId};
use async_trait::async_trait;

/// Outcome of a `consume` call.
pub enum ConsumeOutcome<T> {
    /// Ownership of the message transferred to the requester.
    Accepted(T),
    /// The producer declined to hand the message over (already taken, withdrawn, etc).
    NotAccepted,
}

/// Capability exposed by upstream producers (spec §4.B).
///
/// `reserve`/`consume`/`release` are expected to be non-blocking and short; the
/// coordinator calls them while holding its single internal lock (spec §5). Producers
/// that might genuinely block should buffer internally rather than stall the lock.
#[async_trait]
pub trait SourceProducer<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Non-blocking: on `true`, the producer guarantees the message identified by
    /// `header` stays available until a matching `release` or `consume`.
    async fn reserve(&self, header: MessageHeader) -> bool;

    /// Atomically transfers ownership of the reserved message to `requester`, or
    /// reports that it could not.
    async fn consume(
        &self,
        header: MessageHeader,
        requester: RequesterId,
    ) -> Result<ConsumeOutcome<T>, GroupingError>;

    /// Drops a prior reservation, restoring consumability for the original producer.
    async fn release(&self, header: MessageHeader, requester: RequesterId);
}

/// Decision returned by `offerMessage` (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionCode {
    Accepted,
    Declined,
    Postponed,
    NotAvailable,
}

/// Capability exposed by downstream targets (spec §4.C, mirrored for linking in §4.E).
#[async_trait]
pub trait DownstreamTarget<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Offers `payload` under `header`. If `consume_to_accept` is set, `producer` must
    /// be `Some` and the target is expected to call back into it before accepting.
    async fn offer_message(
        &self,
        header: MessageHeader,
        payload: T,
        producer: Option<std::sync::Arc<dyn SourceProducer<T>>>,
        consume_to_accept: bool,
    ) -> DecisionCode;

    /// Marks the target as declining further offers (propagated completion).
    fn notify_complete(&self);

    /// Marks the target as declining further offers and records a fault.
    fn notify_fault(&self, err: GroupingError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_code_is_copy_and_comparable() {
        let a = DecisionCode::Accepted;
        let b = a;
        assert_eq!(a, b);
        assert_ne!(DecisionCode::Accepted, DecisionCode::Declined);
    }
}
