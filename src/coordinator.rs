//! The assembly algorithm itself (spec §4.D, §4.E "Algorithm").
//!
//! Everything here runs as methods on [`Inner`], invoked from the single
//! input-processing job that `schedule_input_job` ensures is never running more than
//! once concurrently per block — the same "at most one active job" invariant the
//! block's output side keeps in `SourceCore::run_output_job`.

use crate::assembler::{GroupAssembler, IntakeMode};
use crate::error::GroupingError;
use crate::header::{MessageHeader, RequesterId};
use crate::inner::{CoordinatorState, Inner};
use crate::options::GroupingOptions;
use crate::producer::{ConsumeOutcome, DecisionCode, SourceProducer};
use crate::source::CompletionState;
use std::sync::Arc;
use std::sync::atomic::Ordering;

enum StepOutcome {
    Advanced,
    Blocked,
}

impl<T, A> Inner<T, A>
where
    T: Send + 'static,
    A: GroupAssembler<T> + 'static,
{
    pub(crate) async fn run_input_job(self: Arc<Self>) {
        log::trace!("input job kicked");
        let mut processed = 0usize;
        loop {
            match self.drive_assembly().await {
                StepOutcome::Advanced => {
                    processed += 1;
                    if self.options.max_messages_per_task.reached(processed) {
                        log::trace!(
                            "input job yielding after {processed} messages (max_messages_per_task)"
                        );
                        self.input_task_scheduled.store(false, Ordering::Release);
                        self.schedule_input_job();
                        return;
                    }
                    continue;
                }
                StepOutcome::Blocked => {
                    self.input_task_scheduled.store(false, Ordering::Release);
                    return;
                }
            }
        }
    }

    pub(crate) async fn target_complete(&self, index: usize) {
        {
            let mut state = self.state.lock().await;
            state.targets[index].declining = true;
        }
        log::debug!("target {index} completed");
        self.schedule_input_job();
    }

    /// A fault on any one target forces the whole block to decline (spec §4.C
    /// "fault... forces the whole block to decline"): unlike plain `complete`, which
    /// only stops offers to that one endpoint, a fault's error must be guaranteed to
    /// reach `completionTask`, so it can't wait on the other targets to drain first.
    pub(crate) async fn target_fault(&self, index: usize, err: GroupingError) {
        log::warn!("target {index} faulted: {err}");
        {
            let mut state = self.state.lock().await;
            state.errors.extend(err.into_flat_vec());
            state.declining_permanently = true;
            for t in state.targets.iter_mut() {
                t.declining = true;
            }
        }
        self.schedule_input_job();
    }

    pub(crate) async fn offer_message(
        &self,
        target_index: usize,
        header: MessageHeader,
        payload: T,
        producer: Option<Arc<dyn SourceProducer<T>>>,
        consume_to_accept: bool,
    ) -> DecisionCode {
        let requester_id = {
            let state = self.state.lock().await;
            if state.declining_permanently || state.targets[target_index].declining {
                return DecisionCode::Declined;
            }
            state.targets[target_index].requester_id
        };

        match (consume_to_accept, producer) {
            // Greedy mode calls `consume` directly (spec §4.C step 3): `reserve` is
            // the non-greedy atomic-acquire protocol, and a producer that can satisfy
            // a direct consume but not a speculative reserve must not be declined.
            (true, Some(p)) if self.options.greedy => match p.consume(header, requester_id).await
            {
                Ok(ConsumeOutcome::Accepted(item)) => {
                    self.push_payload(target_index, item).await;
                    DecisionCode::Accepted
                }
                Ok(ConsumeOutcome::NotAccepted) => DecisionCode::Declined,
                Err(err) => {
                    self.record_error(err).await;
                    DecisionCode::Declined
                }
            },
            (true, Some(p)) => match p.reserve(header).await {
                false => DecisionCode::Declined,
                true => match p.consume(header, requester_id).await {
                    Ok(ConsumeOutcome::Accepted(item)) => {
                        self.push_payload(target_index, item).await;
                        DecisionCode::Accepted
                    }
                    Ok(ConsumeOutcome::NotAccepted) => {
                        self.record_error(GroupingError::ProducerContractViolation(
                            "reserve succeeded but consume was not accepted".into(),
                        ))
                        .await;
                        DecisionCode::Declined
                    }
                    Err(err) => {
                        self.record_error(err).await;
                        DecisionCode::Declined
                    }
                },
            },
            (true, None) => DecisionCode::Declined,
            (false, None) => {
                // A direct post: no upstream producer to coordinate a reservation with,
                // so it is taken unconditionally, the same way `ITargetBlock.Post` never
                // postpones.
                let _ = &payload;
                self.push_payload(target_index, payload).await;
                DecisionCode::Accepted
            }
            (false, Some(_)) if self.options.greedy => {
                self.push_payload(target_index, payload).await;
                DecisionCode::Accepted
            }
            (false, Some(p)) => {
                let mut state = self.state.lock().await;
                if state.declining_permanently || state.targets[target_index].declining {
                    return DecisionCode::Declined;
                }
                state.targets[target_index]
                    .postponed
                    .push_back((p, header));
                drop(state);
                self.schedule_input_job();
                DecisionCode::Postponed
            }
        }
    }

    async fn push_payload(&self, target_index: usize, payload: T) {
        {
            let mut state = self.state.lock().await;
            match state.assembler.intake_mode() {
                // A Join gathers one payload per target, so each target keeps its own
                // queue.
                IntakeMode::AllTargets => {
                    state.targets[target_index].input_queue.push_back(payload)
                }
                // A BatchedJoin assembles in acceptance order regardless of which
                // target a payload came from, so every target feeds one shared FIFO.
                IntakeMode::AnyTarget => state.pending.push_back((target_index, payload)),
            }
        }
        self.schedule_input_job();
    }

    async fn record_error(&self, err: GroupingError) {
        {
            let mut state = self.state.lock().await;
            state.errors.push(err);
        }
        self.schedule_input_job();
    }

    /// One unit of progress: either wind the block down further, or assemble (at
    /// most) one more group. Returns `Blocked` once nothing more can happen without a
    /// new external event (an offer, a capacity release, a completion/fault call).
    async fn drive_assembly(&self) -> StepOutcome {
        let mut state = self.state.lock().await;

        if self.options.cancellation_token.is_cancelled() && !state.cancelled {
            log::debug!("cancellation observed");
            state.cancelled = true;
        }

        // A Join can never assemble again once any one target is both declining and
        // exhausted: it needs exactly one payload from every target, and a declining
        // target with nothing left pending will never contribute another. A
        // BatchedJoin has no such dependency between targets, so this only applies
        // to AllTargets intake.
        let join_starved = matches!(state.assembler.intake_mode(), IntakeMode::AllTargets)
            && state.targets.iter().any(|t| t.declining && t.is_quiescent());

        if !state.declining_permanently
            && (state.cancelled || state.all_targets_declining() || join_starved)
        {
            log::debug!("decliningPermanently set");
            state.declining_permanently = true;
            for t in state.targets.iter_mut() {
                t.declining = true;
            }
        }

        if state.declining_permanently {
            return self.wind_down(state).await;
        }

        match state.assembler.intake_mode() {
            IntakeMode::AllTargets => {
                if self.options.greedy {
                    self.assemble_all_greedy(state).await
                } else {
                    self.assemble_all_non_greedy(state).await
                }
            }
            IntakeMode::AnyTarget => self.assemble_one_greedy(state).await,
        }
    }

    async fn wind_down<'a>(
        &'a self,
        mut state: tokio::sync::MutexGuard<'a, CoordinatorState<T, A>>,
    ) -> StepOutcome {
        let mut releases = Vec::new();
        for t in state.targets.iter_mut() {
            let requester_id = t.requester_id;
            releases.extend(
                t.drain_postponed()
                    .into_iter()
                    .map(|(producer, header)| (producer, header, requester_id)),
            );
        }
        drop(state);
        for (producer, header, requester_id) in releases {
            producer.release(header, requester_id).await;
        }
        let mut state = self.state.lock().await;

        // Anything already accepted into `pending` (BatchedJoin) but not yet folded
        // into the assembler still owes a place in some emitted group; drain one
        // entry at a time so a batch boundary crossed mid-drain still emits a full
        // group instead of being swallowed into the residue. Always empty for a
        // Join, which never populates `pending`.
        if let Some((index, payload)) = state.pending.pop_front() {
            if let Some(group) = state.assembler.assemble_one(index, payload) {
                state.groups_emitted += 1;
                drop(state);
                self.source.add_message(group).await;
            }
            return StepOutcome::Advanced;
        }

        if let Some(residue) = state.assembler.flush_residue() {
            state.groups_emitted += 1;
            drop(state);
            self.source.add_message(residue).await;
            return StepOutcome::Advanced;
        }

        let terminal = if !state.errors.is_empty() {
            CompletionState::Faulted(std::mem::take(&mut state.errors))
        } else if state.cancelled {
            CompletionState::Cancelled
        } else {
            CompletionState::Normal
        };
        drop(state);
        self.source.complete_with(terminal).await;
        StepOutcome::Blocked
    }

    async fn assemble_all_greedy<'a>(
        &'a self,
        mut state: tokio::sync::MutexGuard<'a, CoordinatorState<T, A>>,
    ) -> StepOutcome {
        if !self.source.has_capacity().await {
            return StepOutcome::Blocked;
        }
        if !state.targets.iter().all(|t| !t.input_queue.is_empty()) {
            return StepOutcome::Blocked;
        }
        let payloads: Vec<T> = state
            .targets
            .iter_mut()
            .map(|t| t.input_queue.pop_front().unwrap())
            .collect();
        let group = state
            .assembler
            .assemble_all(payloads)
            .expect("AllTargets intake always completes a group once every slot is full");
        self.emit(state, group).await
    }

    async fn assemble_all_non_greedy<'a>(
        &'a self,
        mut state: tokio::sync::MutexGuard<'a, CoordinatorState<T, A>>,
    ) -> StepOutcome {
        if !self.source.has_capacity().await {
            return StepOutcome::Blocked;
        }
        if !state.targets.iter().all(|t| !t.postponed.is_empty()) {
            return StepOutcome::Blocked;
        }
        let heads: Vec<(Arc<dyn SourceProducer<T>>, MessageHeader, RequesterId)> = state
            .targets
            .iter()
            .map(|t| {
                let (producer, header) = t.postponed.front().cloned().unwrap();
                (producer, header, t.requester_id)
            })
            .collect();
        drop(state);

        // Phase 1: reserve every head in target order; on the first failure, release
        // whatever was already reserved, in reverse order, and stay blocked until the
        // next external event gives the stalled target another chance.
        let mut reserved_upto = 0;
        let mut all_reserved = true;
        for (producer, header, _) in &heads {
            if producer.reserve(*header).await {
                reserved_upto += 1;
            } else {
                all_reserved = false;
                break;
            }
        }
        if !all_reserved {
            for (producer, header, requester_id) in heads[..reserved_upto].iter().rev() {
                producer.release(*header, *requester_id).await;
            }
            return StepOutcome::Blocked;
        }

        // Phase 2: every reservation holds; consume in the same order.
        let mut payloads = Vec::with_capacity(heads.len());
        let mut violation: Option<GroupingError> = None;
        for (producer, header, requester_id) in &heads {
            match producer.consume(*header, *requester_id).await {
                Ok(ConsumeOutcome::Accepted(item)) => payloads.push(item),
                Ok(ConsumeOutcome::NotAccepted) => {
                    violation = Some(GroupingError::ProducerContractViolation(
                        "reserve succeeded but consume was not accepted".into(),
                    ));
                    break;
                }
                Err(err) => {
                    violation = Some(err);
                    break;
                }
            }
        }

        let mut state = self.state.lock().await;
        let consumed = payloads.len();
        for t in state.targets.iter_mut().take(consumed) {
            t.postponed.pop_front();
        }

        if let Some(err) = violation {
            state.errors.push(err);
            state.declining_permanently = true;
            for t in state.targets.iter_mut() {
                t.declining = true;
            }
            return StepOutcome::Advanced;
        }

        let group = state
            .assembler
            .assemble_all(payloads)
            .expect("AllTargets intake always completes a group once every slot is full");
        self.emit(state, group).await
    }

    async fn assemble_one_greedy<'a>(
        &'a self,
        mut state: tokio::sync::MutexGuard<'a, CoordinatorState<T, A>>,
    ) -> StepOutcome {
        if !self.source.has_capacity().await {
            return StepOutcome::Blocked;
        }
        // Drain `pending` in acceptance order, not by scanning targets lowest-index
        // first: the final short batch must be whichever payload was accepted last,
        // regardless of which target it came from.
        let Some((index, payload)) = state.pending.pop_front() else {
            return StepOutcome::Blocked;
        };
        match state.assembler.assemble_one(index, payload) {
            Some(group) => self.emit(state, group).await,
            None => StepOutcome::Advanced,
        }
    }

    async fn emit<'a>(
        &'a self,
        mut state: tokio::sync::MutexGuard<'a, CoordinatorState<T, A>>,
        group: A::Output,
    ) -> StepOutcome {
        state.groups_emitted += 1;
        log::trace!("group assembled (total {})", state.groups_emitted);
        check_group_limit(&mut state, &self.options);
        drop(state);
        self.source.add_message(group).await;
        StepOutcome::Advanced
    }
}

fn check_group_limit<T, A>(state: &mut CoordinatorState<T, A>, options: &GroupingOptions) {
    if options.max_number_of_groups.reached(state.groups_emitted) {
        log::debug!("decliningPermanently set (max_number_of_groups reached)");
        state.declining_permanently = true;
        for t in state.targets.iter_mut() {
            t.declining = true;
        }
    }
}
