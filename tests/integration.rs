//! End-to-end scenarios (S1-S6) and the property-style invariants they exercise.
//!
//! Every block here is built with the default `TokioRunner`, so a `post`/`fault`/
//! `complete` call only schedules the coordinator's background job; `settle` yields
//! repeatedly to give that job a chance to run before assertions.

use conflux_dataflow::prelude::*;

async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn s1_post_then_receive() {
    let join = JoinMany::<i32>::new(2).unwrap();
    for i in 0..3 {
        assert!(join.target(0).post(i).await);
        assert!(join.target(1).post(i + 1).await);
    }
    settle().await;

    assert_eq!(join.try_receive(), Some(vec![0, 1]));
    assert_eq!(join.try_receive(), Some(vec![1, 2]));
    assert_eq!(join.try_receive(), Some(vec![2, 3]));
    assert_eq!(join.try_receive(), None);
}

#[tokio::test]
async fn s2_one_target_insufficient() {
    let join = JoinMany::<i32>::new(2).unwrap();
    assert!(join.target(0).post(0).await);
    settle().await;

    assert_eq!(join.try_receive(), None);
    assert_eq!(join.output_count(), 0);
}

#[tokio::test]
async fn s3_precancelled() {
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let options = GroupingOptions::default()
        .cancellation_token(token)
        .max_number_of_groups(Bound::Limited(1));
    let join = JoinMany::<i32>::with_options(2, options).unwrap();
    settle().await;

    assert!(!join.target(0).post(42).await);
    assert!(!join.target(1).post(43).await);

    let state = join.completion().wait().await;
    assert!(matches!(state, CompletionState::Cancelled));
}

#[tokio::test]
async fn s4_fault_through_target() {
    let join = JoinMany::<i32>::new(2).unwrap();
    join.target(1)
        .fault(GroupingError::ProducerError("FormatError".into()))
        .await;
    settle().await;

    let state = join.completion().wait().await;
    match state {
        CompletionState::Faulted(errors) => {
            assert!(errors.iter().any(|e| e.to_string().contains("FormatError")));
        }
        other => panic!("expected Faulted, got {other:?}"),
    }
}

#[tokio::test]
async fn s5_batched_join_unbalanced() {
    let join = BatchedJoinMany::<i32>::new(2, 5).unwrap();
    for i in 0..10 {
        assert!(join.target(1).post(i).await);
    }
    settle().await;

    assert_eq!(join.output_count(), 2);
    assert_eq!(join.try_receive(), Some(vec![vec![], vec![0, 1, 2, 3, 4]]));
    assert_eq!(join.try_receive(), Some(vec![vec![], vec![5, 6, 7, 8, 9]]));
    assert_eq!(join.try_receive(), None);
}

#[tokio::test]
async fn s6_batched_join_final_short() {
    let join = BatchedJoinMany::<i32>::new(2, 2).unwrap();
    for i in 0..10 {
        assert!(join.target(0).post(i).await);
        assert!(join.target(1).post(i).await);
    }
    assert!(join.target(0).post(10).await);
    settle().await;

    join.target(0).complete().await;
    join.target(1).complete().await;
    settle().await;

    let groups = join.try_receive_all();
    assert_eq!(groups.len(), 11);
    for group in &groups[..10] {
        assert_eq!(group[0].len() + group[1].len(), 2);
    }
    assert_eq!(groups[10], vec![vec![10], vec![]]);

    let state = join.completion().wait().await;
    assert!(matches!(state, CompletionState::Normal));
}

#[tokio::test]
async fn invariant_max_number_of_groups_strictness() {
    let options = GroupingOptions::default().max_number_of_groups(Bound::Limited(1));
    let join = JoinMany::<i32>::with_options(2, options).unwrap();

    assert!(join.target(0).post(1).await);
    assert!(join.target(1).post(2).await);
    settle().await;
    assert_eq!(join.try_receive(), Some(vec![1, 2]));

    assert!(!join.target(0).post(3).await);
    assert!(!join.target(1).post(4).await);
    settle().await;
    assert_eq!(join.try_receive(), None);
}

/// A producer that always reserves successfully and, on `consume`, hands back a
/// fixed payload — used to drive a non-greedy `JoinMany` target from the producer
/// side rather than through `post`.
struct AlwaysAvailable {
    payload: i32,
    released: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl SourceProducer<i32> for AlwaysAvailable {
    async fn reserve(&self, _header: MessageHeader) -> bool {
        true
    }

    async fn consume(
        &self,
        _header: MessageHeader,
        _requester: RequesterId,
    ) -> Result<ConsumeOutcome<i32>, GroupingError> {
        Ok(ConsumeOutcome::Accepted(self.payload))
    }

    async fn release(&self, _header: MessageHeader, _requester: RequesterId) {
        self.released.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

/// A producer whose `reserve` always fails, simulating a sibling target whose
/// upstream message was withdrawn between the offer and the reservation attempt.
struct NeverAvailable;

#[async_trait::async_trait]
impl SourceProducer<i32> for NeverAvailable {
    async fn reserve(&self, _header: MessageHeader) -> bool {
        false
    }

    async fn consume(
        &self,
        _header: MessageHeader,
        _requester: RequesterId,
    ) -> Result<ConsumeOutcome<i32>, GroupingError> {
        unreachable!("reserve always fails, consume is never reached")
    }

    async fn release(&self, _header: MessageHeader, _requester: RequesterId) {
        unreachable!("reserve always fails, nothing to release on this producer")
    }
}

#[tokio::test]
async fn invariant_non_greedy_atomicity_releases_on_partial_failure() {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    let options = GroupingOptions::default().greedy(false);
    let join = JoinMany::<i32>::with_options(2, options).unwrap();

    let available = Arc::new(AlwaysAvailable {
        payload: 7,
        released: std::sync::atomic::AtomicBool::new(false),
    });
    let unavailable: Arc<NeverAvailable> = Arc::new(NeverAvailable);

    let header0 = MessageHeader::from_raw(1).unwrap();
    let header1 = MessageHeader::from_raw(1).unwrap();

    let decision0 = join
        .target(0)
        .offer_message(header0, 0, Some(available.clone() as Arc<dyn SourceProducer<i32>>), false)
        .await
        .unwrap();
    assert_eq!(decision0, DecisionCode::Postponed);

    let decision1 = join
        .target(1)
        .offer_message(header1, 0, Some(unavailable as Arc<dyn SourceProducer<i32>>), false)
        .await
        .unwrap();
    assert_eq!(decision1, DecisionCode::Postponed);

    settle().await;

    // Target 1's producer never reserves, so target 0's successful reservation must
    // have been rolled back: nothing was ever assembled, and the producer that did
    // reserve observed a release.
    assert_eq!(join.try_receive(), None);
    assert!(available.released.load(Ordering::SeqCst));
}
