//! Output queue, link registry, and completion (spec §4.E).
//!
//! `SourceCore<U>` is the block's output half: `addMessage` enqueues an assembled
//! group and kicks an output-processing job, which offers the queue head to linked
//! downstream targets in registration order, one target at a time, until one accepts
//! or postpones it — the same point-to-point distribution a TPL-Dataflow source block
//! uses. It also implements [`SourceProducer<U>`] itself, since a linked downstream
//! target treats the source as just another upstream producer in the
//! reserve/consume/release protocol.

use crate::error::GroupingError;
use crate::executor::JobRunner;
use crate::header::{HeaderGenerator, MessageHeader, RequesterId};
use crate::producer::{ConsumeOutcome, DecisionCode, DownstreamTarget, SourceProducer};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;

/// Terminal state of a block's completion future (spec §6.3).
#[derive(Debug, Clone)]
pub enum CompletionState {
    Normal,
    Cancelled,
    Faulted(Vec<GroupingError>),
}

impl CompletionState {
    pub fn is_faulted(&self) -> bool {
        matches!(self, CompletionState::Faulted(_))
    }
}

impl Default for CompletionState {
    fn default() -> Self {
        CompletionState::Normal
    }
}

/// The block's single-shot completion awaitable. Every clone observes the same
/// resolution (spec §6.3), the same way `hoffmang9-WesoForge`'s engine status is a
/// `watch` channel every subscriber reads the latest value of.
#[derive(Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<CompletionState>>,
}

impl Completion {
    pub(crate) fn new(rx: watch::Receiver<Option<CompletionState>>) -> Self {
        Self { rx }
    }

    /// Resolves once the block reaches a terminal state.
    pub async fn wait(mut self) -> CompletionState {
        loop {
            if let Some(state) = self.rx.borrow_and_update().clone() {
                return state;
            }
            if self.rx.changed().await.is_err() {
                return CompletionState::Faulted(vec![GroupingError::ProducerError(
                    "completion sender dropped before resolving".into(),
                )]);
            }
        }
    }

    /// Non-blocking peek at the current state, if already resolved.
    pub fn try_state(&self) -> Option<CompletionState> {
        self.rx.borrow().clone()
    }
}

struct LinkEntry<U> {
    target: Arc<dyn DownstreamTarget<U>>,
    propagate_completion: bool,
    max_messages: crate::options::Bound,
    sent: usize,
    filter: Option<Arc<dyn Fn(&U) -> bool + Send + Sync>>,
}

/// Options for one `linkTo` registration (spec §4.E).
#[derive(Clone, Default)]
pub struct LinkOptions<U> {
    pub propagate_completion: bool,
    pub max_messages: crate::options::Bound,
    pub filter: Option<Arc<dyn Fn(&U) -> bool + Send + Sync>>,
}

/// Handle returned by `link_to`; dropping it unlinks the target.
pub struct LinkHandle<U> {
    links: Weak<Mutex<Vec<LinkEntry<U>>>>,
    target_ptr: *const (),
}

unsafe impl<U> Send for LinkHandle<U> {}
unsafe impl<U> Sync for LinkHandle<U> {}

impl<U> Drop for LinkHandle<U> {
    fn drop(&mut self) {
        if let Some(links) = self.links.upgrade() {
            let mut links = links.lock().unwrap();
            links.retain(|entry| Arc::as_ptr(&entry.target) as *const () != self.target_ptr);
        }
    }
}

struct SourceQueueState<U> {
    queue: VecDeque<(MessageHeader, U)>,
    /// The one outstanding reservation, if any. `reserve` doesn't take a requester
    /// id (a producer can't know who's asking before the fact), so there is nothing
    /// to bind a requester identity to here — only the header needs to match back up
    /// in `consume`/`release`.
    reserved: Option<MessageHeader>,
    completed: bool,
    /// Terminal state to resolve with once `completed && queue.is_empty()`. Defaults to
    /// `Normal`; a coordinator winding down on cancellation sets this ahead of time so
    /// already-queued groups still drain before the completion future resolves.
    terminal: CompletionState,
}

/// The block's output half (spec §4.E).
pub struct SourceCore<U> {
    self_weak: Weak<SourceCore<U>>,
    queue_state: tokio::sync::Mutex<SourceQueueState<U>>,
    links: Arc<Mutex<Vec<LinkEntry<U>>>>,
    header_gen: HeaderGenerator,
    completion_tx: watch::Sender<Option<CompletionState>>,
    completion_rx: watch::Receiver<Option<CompletionState>>,
    bounded_capacity: crate::options::Bound,
    runner: Arc<dyn JobRunner>,
    output_task_scheduled: std::sync::atomic::AtomicBool,
    /// Invoked whenever downstream draining frees capacity, so a bounded coordinator
    /// can resume assembling groups. A plain closure rather than a back-reference to
    /// `Inner`, to avoid the ownership cycle the design notes call out (spec §9).
    on_capacity_freed: Box<dyn Fn() + Send + Sync>,
}

impl<U: Send + Clone + 'static> SourceCore<U> {
    pub(crate) fn new(
        bounded_capacity: crate::options::Bound,
        runner: Arc<dyn JobRunner>,
        on_capacity_freed: Box<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        let (completion_tx, completion_rx) = watch::channel(None);
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            queue_state: tokio::sync::Mutex::new(SourceQueueState {
                queue: VecDeque::new(),
                reserved: None,
                completed: false,
                terminal: CompletionState::Normal,
            }),
            links: Arc::new(Mutex::new(Vec::new())),
            header_gen: HeaderGenerator::default(),
            completion_tx,
            completion_rx,
            bounded_capacity,
            runner,
            output_task_scheduled: std::sync::atomic::AtomicBool::new(false),
            on_capacity_freed,
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_weak
            .upgrade()
            .expect("SourceCore outlives its own Arc")
    }

    /// Whether a new group can currently be enqueued without exceeding
    /// `BoundedCapacity`.
    pub(crate) async fn has_capacity(&self) -> bool {
        let state = self.queue_state.lock().await;
        !self.bounded_capacity.reached(state.queue.len())
    }

    /// Registers `target` as a downstream consumer of this source's output.
    pub fn link_to(
        &self,
        target: Arc<dyn DownstreamTarget<U>>,
        options: LinkOptions<U>,
    ) -> LinkHandle<U> {
        let ptr = Arc::as_ptr(&target) as *const ();
        let entry = LinkEntry {
            target,
            propagate_completion: options.propagate_completion,
            max_messages: options.max_messages,
            sent: 0,
            filter: options.filter,
        };
        self.links.lock().unwrap().push(entry);
        self.schedule_output_job();
        LinkHandle {
            links: Arc::downgrade(&self.links),
            target_ptr: ptr,
        }
    }

    /// Synchronous, non-blocking pop of the head item.
    pub fn try_receive(&self) -> Option<U> {
        crate::executor::drive_inline(async {
            let mut state = self.queue_state.lock().await;
            state.queue.pop_front().map(|(_, item)| item)
        })
    }

    /// Atomic drain of every queued item.
    pub fn try_receive_all(&self) -> Vec<U> {
        crate::executor::drive_inline(async {
            let mut state = self.queue_state.lock().await;
            state.queue.drain(..).map(|(_, item)| item).collect()
        })
    }

    pub fn output_count(&self) -> usize {
        crate::executor::drive_inline(async { self.queue_state.lock().await.queue.len() })
    }

    pub fn completion(&self) -> Completion {
        Completion::new(self.completion_rx.clone())
    }

    pub(crate) fn resolve(&self, state: CompletionState) {
        // Only the first resolution sticks: a cancel observed after a fault must not
        // override it (spec §4.D "Cancellation", invariant 6 "fault dominates").
        self.completion_tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(state);
                true
            }
        });
    }

    /// Enqueues a freshly assembled group and schedules the output-processing job.
    pub(crate) async fn add_message(&self, item: U) {
        let header = self.header_gen.next();
        {
            let mut state = self.queue_state.lock().await;
            state.queue.push_back((header, item));
        }
        self.schedule_output_job();
    }

    /// Marks the source itself complete: no more groups will ever be added. The
    /// output-processing job, once it drains the queue, resolves completion and tells
    /// every `propagate_completion` link that it is done.
    pub(crate) async fn complete(&self) {
        self.complete_with(CompletionState::Normal).await
    }

    /// As `complete`, but resolves with `terminal` once the queue drains instead of
    /// `Normal` — used for a graceful cancellation, where groups already assembled
    /// before the cancellation was observed still deserve to be delivered.
    pub(crate) async fn complete_with(&self, terminal: CompletionState) {
        {
            let mut state = self.queue_state.lock().await;
            state.completed = true;
            state.terminal = terminal;
        }
        self.schedule_output_job();
    }

    pub(crate) async fn fault(&self, errors: Vec<GroupingError>) {
        {
            let mut state = self.queue_state.lock().await;
            state.queue.clear();
            state.completed = true;
        }
        self.resolve(CompletionState::Faulted(errors));
        self.notify_links_complete();
    }

    fn schedule_output_job(&self) {
        if self
            .output_task_scheduled
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return;
        }
        let this = self.arc();
        self.runner
            .spawn(Box::pin(async move { this.run_output_job().await }));
    }

    async fn run_output_job(self: Arc<Self>) {
        loop {
            let head = {
                let state = self.queue_state.lock().await;
                state.queue.front().cloned()
            };
            let Some((header, item)) = head else {
                let done = {
                    let state = self.queue_state.lock().await;
                    (state.completed && state.queue.is_empty()).then(|| state.terminal.clone())
                };
                self.output_task_scheduled
                    .store(false, std::sync::atomic::Ordering::Release);
                if let Some(terminal) = done {
                    self.resolve(terminal);
                    self.notify_links_complete();
                }
                return;
            };

            match self.offer_head_to_links(header, item).await {
                HeadOutcome::ConsumedOrDelivered => continue,
                HeadOutcome::Stalled => {
                    self.output_task_scheduled
                        .store(false, std::sync::atomic::Ordering::Release);
                    return;
                }
            }
        }
    }

    /// Offers one queue head to linked targets, in order, until one of them takes it.
    async fn offer_head_to_links(&self, header: MessageHeader, item: U) -> HeadOutcome {
        let candidates: Vec<Arc<dyn DownstreamTarget<U>>> = {
            let links = self.links.lock().unwrap();
            links
                .iter()
                .filter(|entry| !entry.max_messages.reached(entry.sent))
                .filter(|entry| entry.filter.as_ref().is_none_or(|f| f(&item)))
                .map(|entry| entry.target.clone())
                .collect()
        };

        for target in candidates {
            let producer: Arc<dyn SourceProducer<U>> = self.arc();
            let decision = target
                .offer_message(header, item.clone(), Some(producer), false)
                .await;
            match decision {
                DecisionCode::Accepted => {
                    self.pop_if_head_matches(header).await;
                    self.mark_sent(&target);
                    return HeadOutcome::ConsumedOrDelivered;
                }
                DecisionCode::Postponed => {
                    self.mark_sent(&target);
                    return HeadOutcome::Stalled;
                }
                DecisionCode::Declined | DecisionCode::NotAvailable => continue,
            }
        }
        // No link wanted it (or none are linked): leave it queued for `try_receive`.
        HeadOutcome::Stalled
    }

    fn mark_sent(&self, target: &Arc<dyn DownstreamTarget<U>>) {
        let ptr = Arc::as_ptr(target) as *const ();
        let mut links = self.links.lock().unwrap();
        if let Some(entry) = links
            .iter_mut()
            .find(|e| Arc::as_ptr(&e.target) as *const () == ptr)
        {
            entry.sent += 1;
        }
    }

    async fn pop_if_head_matches(&self, header: MessageHeader) {
        let mut state = self.queue_state.lock().await;
        if matches!(state.queue.front(), Some((h, _)) if *h == header) {
            state.queue.pop_front();
        }
    }

    fn notify_links_complete(&self) {
        let links = self.links.lock().unwrap();
        for entry in links.iter().filter(|e| e.propagate_completion) {
            entry.target.notify_complete();
        }
    }
}

enum HeadOutcome {
    ConsumedOrDelivered,
    Stalled,
}

#[async_trait]
impl<U: Send + Sync + Clone + 'static> SourceProducer<U> for SourceCore<U> {
    async fn reserve(&self, header: MessageHeader) -> bool {
        let mut state = self.queue_state.lock().await;
        if state.reserved.is_some() {
            return false;
        }
        let is_head = matches!(state.queue.front(), Some((h, _)) if *h == header);
        if !is_head {
            return false;
        }
        state.reserved = Some(header);
        true
    }

    async fn consume(
        &self,
        header: MessageHeader,
        _requester: RequesterId,
    ) -> Result<ConsumeOutcome<U>, GroupingError> {
        let mut state = self.queue_state.lock().await;
        if state.reserved != Some(header) {
            return Ok(ConsumeOutcome::NotAccepted);
        }
        match state.queue.front() {
            Some((front_header, _)) if *front_header == header => {
                let (_, item) = state.queue.pop_front().unwrap();
                state.reserved = None;
                drop(state);
                self.schedule_output_job();
                Ok(ConsumeOutcome::Accepted(item))
            }
            _ => Ok(ConsumeOutcome::NotAccepted),
        }
    }

    async fn release(&self, header: MessageHeader, _requester: RequesterId) {
        let mut state = self.queue_state.lock().await;
        if state.reserved == Some(header) {
            state.reserved = None;
        }
        drop(state);
        self.schedule_output_job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineRunner;

    fn noop_source<U: Send + Clone + 'static>() -> Arc<SourceCore<U>> {
        SourceCore::new(crate::options::Bound::Unbounded, Arc::new(InlineRunner), Box::new(|| {}))
    }

    #[tokio::test]
    async fn add_then_try_receive() {
        let source = noop_source::<i32>();
        source.add_message(7).await;
        assert_eq!(source.output_count(), 1);
        assert_eq!(source.try_receive(), Some(7));
        assert_eq!(source.try_receive(), None);
    }

    #[tokio::test]
    async fn completion_resolves_normal_once_drained_and_completed() {
        let source = noop_source::<i32>();
        source.add_message(1).await;
        let _ = source.try_receive();
        source.complete().await;
        let state = source.completion().wait().await;
        assert!(matches!(state, CompletionState::Normal));
    }

    #[tokio::test]
    async fn fault_wins_and_drops_queue() {
        let source = noop_source::<i32>();
        source.add_message(1).await;
        source
            .fault(vec![GroupingError::ProducerError("boom".into())])
            .await;
        assert_eq!(source.output_count(), 0);
        let state = source.completion().wait().await;
        assert!(state.is_faulted());
    }
}
