//! Grouping dataflow blocks.
//!
//! `JoinMany` and `BatchedJoinMany` are the two blocks that gather messages across a
//! fixed number of input targets into a single output: a `JoinMany` waits until every
//! target has exactly one message before emitting the N-tuple; a `BatchedJoinMany`
//! accepts messages from any target independently until the combined count across all
//! of them reaches a configured batch size.
//!
//! Both are built on the same coordination engine: a single async mutex guarding one
//! input-processing job per block, an output queue with its own processing job, and a
//! greedy/non-greedy choice of how aggressively a target takes ownership of an offered
//! message. See [`options::GroupingOptions`] for the knobs and [`error::GroupingError`]
//! for how failures surface.

mod assembler;
mod coordinator;
mod error;
mod executor;
mod header;
mod inner;
mod options;
mod producer;
mod source;
mod target;

mod batched_join;
mod join;

pub mod prelude;

pub use assembler::{BatchedJoinAssembler, GroupAssembler, JoinAssembler};
pub use batched_join::BatchedJoinMany;
pub use error::GroupingError;
pub use executor::{InlineRunner, JobRunner, TokioRunner};
pub use header::{MessageHeader, RequesterId};
pub use join::JoinMany;
pub use options::{BatchedJoinOptions, Bound, GroupingOptions};
pub use producer::{ConsumeOutcome, DecisionCode, DownstreamTarget, SourceProducer};
pub use source::{Completion, CompletionState, LinkHandle, LinkOptions};
pub use target::TargetHandle;
