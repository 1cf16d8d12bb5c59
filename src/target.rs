//! One input target endpoint per block (spec §4.C).
//!
//! [`TargetState`] is the mutable per-target bookkeeping, owned by the
//! [`CoordinatorState`](crate::inner::CoordinatorState) behind the block's single lock.
//! [`TargetHandle`] is the thin, cloneable, public handle returned in a block's target
//! array: it owns no state of its own beyond an index and a reference back into the
//! arena, and every call it makes is delegated straight into the coordinator.

use crate::assembler::GroupAssembler;
use crate::error::GroupingError;
use crate::header::{HeaderGenerator, MessageHeader, RequesterId};
use crate::inner::Inner;
use crate::producer::{DecisionCode, DownstreamTarget, SourceProducer};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;

/// Per-target mutable state, guarded by the coordinator's `incomingLock`.
pub(crate) struct TargetState<T> {
    /// Ordered `(producer, header)` offers not yet consumed or released (non-greedy).
    pub(crate) postponed: VecDeque<(Arc<dyn SourceProducer<T>>, MessageHeader)>,
    /// Accepted payloads awaiting assembly (greedy mode only).
    pub(crate) input_queue: VecDeque<T>,
    /// Once set, further offers to this target are declined.
    pub(crate) declining: bool,
    /// Stable identity this target presents to upstream producers across its
    /// lifetime, so a producer's `reserve`/`consume`/`release` always see the same
    /// requester for this target.
    pub(crate) requester_id: RequesterId,
}

impl<T> TargetState<T> {
    pub(crate) fn new(requester_id: RequesterId) -> Self {
        Self {
            postponed: VecDeque::new(),
            input_queue: VecDeque::new(),
            declining: false,
            requester_id,
        }
    }

    /// Releases every still-postponed offer (best-effort; producer failures here are
    /// swallowed, matching "drained, not faulted further" semantics on a block that is
    /// already tearing down).
    pub(crate) fn drain_postponed(&mut self) -> Vec<(Arc<dyn SourceProducer<T>>, MessageHeader)> {
        self.postponed.drain(..).collect()
    }

    pub(crate) fn is_quiescent(&self) -> bool {
        self.postponed.is_empty() && self.input_queue.is_empty()
    }
}

/// Public per-target endpoint (spec §6.1).
pub struct TargetHandle<T, A>
where
    T: Send + 'static,
    A: GroupAssembler<T> + 'static,
{
    pub(crate) inner: Arc<Inner<T, A>>,
    pub(crate) index: usize,
    pub(crate) header_gen: HeaderGenerator,
}

impl<T, A> TargetHandle<T, A>
where
    T: Send + 'static,
    A: GroupAssembler<T> + 'static,
{
    /// 0-based position of this target within its block.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Offers `payload` under `header`, from `producer` if this is a non-greedy,
    /// acquire-only offer (spec §4.C).
    pub async fn offer_message(
        &self,
        header: MessageHeader,
        payload: T,
        producer: Option<Arc<dyn SourceProducer<T>>>,
        consume_to_accept: bool,
    ) -> Result<DecisionCode, GroupingError> {
        if header.id() < 1 {
            return Err(GroupingError::InvalidMessageHeader(
                "header.id must be >= 1".into(),
            ));
        }
        if consume_to_accept && producer.is_none() {
            return Err(GroupingError::InvalidMessageHeader(
                "consume_to_accept requires a producer".into(),
            ));
        }
        Ok(self
            .inner
            .offer_message(self.index, header, payload, producer, consume_to_accept)
            .await)
    }

    /// Sugar for `offer_message` with a freshly generated header and no producer.
    /// Returns `true` if the payload was accepted.
    pub async fn post(&self, payload: T) -> bool {
        let header = self.header_gen.next();
        matches!(
            self.offer_message(header, payload, None, false).await,
            Ok(DecisionCode::Accepted)
        )
    }

    /// Marks this target as declining further offers.
    pub async fn complete(&self) {
        self.inner.target_complete(self.index).await;
    }

    /// As `complete`, but also reports `err` into the block's exception pipeline.
    pub async fn fault(&self, err: GroupingError) {
        self.inner.target_fault(self.index, err).await;
    }

    /// Per-target completion is not part of the observable surface (spec §4.C).
    pub fn completion(&self) -> Result<std::convert::Infallible, GroupingError> {
        Err(GroupingError::NotSupported(
            "per-target completion is not observable; use the block's completion future"
                .into(),
        ))
    }
}

#[async_trait]
impl<T, A> DownstreamTarget<T> for TargetHandle<T, A>
where
    T: Send + 'static,
    A: GroupAssembler<T> + 'static,
{
    async fn offer_message(
        &self,
        header: MessageHeader,
        payload: T,
        producer: Option<Arc<dyn SourceProducer<T>>>,
        consume_to_accept: bool,
    ) -> DecisionCode {
        TargetHandle::offer_message(self, header, payload, producer, consume_to_accept)
            .await
            .unwrap_or(DecisionCode::Declined)
    }

    fn notify_complete(&self) {
        let inner = self.inner.clone();
        let index = self.index;
        self.inner
            .runner
            .spawn(Box::pin(async move { inner.target_complete(index).await }));
    }

    fn notify_fault(&self, err: GroupingError) {
        let inner = self.inner.clone();
        let index = self.index;
        self.inner.runner.spawn(Box::pin(async move {
            inner.target_fault(index, err).await
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_state_starts_quiescent() {
        let state = TargetState::<i32>::new(RequesterId::next());
        assert!(state.is_quiescent());
    }
}
