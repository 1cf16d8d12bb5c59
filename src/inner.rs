//! The arena tying one block's coordinator state, source, and options together
//! (spec §5).
//!
//! `Inner<T, A>` is never exposed publicly: `JoinMany`/`BatchedJoinMany` and their
//! `TargetHandle`s each hold an `Arc<Inner<T, A>>`. Everything that needs to happen
//! under the single `incomingLock` lives in [`CoordinatorState`], guarded by one
//! `tokio::sync::Mutex` — an async-aware mutex, not `std::sync::Mutex`, because
//! `schedule_input_job`'s job holds it across `.await` points while mutating queues
//! and deciding what to do next. The lock is always dropped before a cross-block
//! producer `reserve`/`consume`/`release` call, though: two linked blocks each
//! holding their own lock while awaiting the other would deadlock, so the non-greedy
//! reservation dance in `coordinator.rs` snapshots what it needs, drops the lock, then
//! reacquires it once the producer calls resolve.

use crate::assembler::GroupAssembler;
use crate::error::GroupingError;
use crate::executor::JobRunner;
use crate::header::{HeaderGenerator, RequesterId};
use crate::options::GroupingOptions;
use crate::source::{CompletionState, SourceCore};
use crate::target::{TargetHandle, TargetState};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// State touched only while holding the coordinator's single lock.
pub(crate) struct CoordinatorState<T, A> {
    pub(crate) assembler: A,
    pub(crate) targets: Vec<TargetState<T>>,
    pub(crate) declining_permanently: bool,
    pub(crate) cancelled: bool,
    pub(crate) errors: Vec<GroupingError>,
    pub(crate) groups_emitted: usize,
    /// Accepted `(target_index, payload)` pairs awaiting assembly, in acceptance
    /// order. Only populated in `AnyTarget` intake (`BatchedJoinMany`): a `Join`
    /// gathers one payload per target instead, via each `TargetState::input_queue`.
    pub(crate) pending: VecDeque<(usize, T)>,
}

impl<T, A> CoordinatorState<T, A> {
    pub(crate) fn all_targets_declining(&self) -> bool {
        self.targets.iter().all(|t| t.declining)
    }
}

pub(crate) struct Inner<T, A: GroupAssembler<T>>
where
    T: Send + 'static,
{
    self_weak: Weak<Inner<T, A>>,
    pub(crate) state: tokio::sync::Mutex<CoordinatorState<T, A>>,
    pub(crate) target_count: usize,
    pub(crate) source: Arc<SourceCore<A::Output>>,
    pub(crate) options: GroupingOptions,
    pub(crate) runner: Arc<dyn JobRunner>,
    pub(crate) input_task_scheduled: AtomicBool,
}

impl<T, A> Inner<T, A>
where
    T: Send + 'static,
    A: GroupAssembler<T> + 'static,
{
    pub(crate) fn new(target_count: usize, assembler: A, options: GroupingOptions) -> Arc<Self> {
        let runner: Arc<dyn JobRunner> = Arc::new(crate::executor::TokioRunner);
        Self::new_with_runner(target_count, assembler, options, runner)
    }

    pub(crate) fn new_with_runner(
        target_count: usize,
        assembler: A,
        options: GroupingOptions,
        runner: Arc<dyn JobRunner>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Inner<T, A>>| {
            let weak_for_source = weak.clone();
            let on_capacity_freed = Box::new(move || {
                if let Some(this) = weak_for_source.upgrade() {
                    this.schedule_input_job();
                }
            });
            let source = SourceCore::new(
                options.bounded_capacity,
                runner.clone(),
                on_capacity_freed,
            );
            let state = CoordinatorState {
                assembler,
                targets: (0..target_count)
                    .map(|_| TargetState::new(RequesterId::next()))
                    .collect(),
                declining_permanently: false,
                cancelled: false,
                errors: Vec::new(),
                groups_emitted: 0,
                pending: VecDeque::new(),
            };
            Inner {
                self_weak: weak.clone(),
                state: tokio::sync::Mutex::new(state),
                target_count,
                source,
                options,
                runner,
                input_task_scheduled: AtomicBool::new(false),
            }
        })
    }

    pub(crate) fn make_targets(self: &Arc<Self>) -> Vec<TargetHandle<T, A>> {
        (0..self.target_count)
            .map(|index| TargetHandle {
                inner: self.clone(),
                index,
                header_gen: HeaderGenerator::default(),
            })
            .collect()
    }

    pub(crate) fn source(&self) -> &Arc<SourceCore<A::Output>> {
        &self.source
    }

    fn arc(&self) -> Arc<Self> {
        self.self_weak
            .upgrade()
            .expect("Inner outlives its own Arc")
    }

    pub(crate) fn schedule_input_job(&self) {
        if self
            .input_task_scheduled
            .swap(true, Ordering::AcqRel)
        {
            return;
        }
        let this = self.arc();
        self.runner
            .spawn(Box::pin(async move { this.run_input_job().await }));
    }

    /// If `options.cancellation_token` was already cancelled when the block was
    /// constructed, the very first input job observes it and winds the block down
    /// with no targets ever having accepted a message (spec §4.D "pre-cancelled").
    pub(crate) fn check_precancelled(self: &Arc<Self>) {
        if self.options.cancellation_token.is_cancelled() {
            self.schedule_input_job();
        }
    }
}
