//! Common re-exports for constructing and wiring blocks.

pub use crate::batched_join::BatchedJoinMany;
pub use crate::error::GroupingError;
pub use crate::header::{MessageHeader, RequesterId};
pub use crate::join::JoinMany;
pub use crate::options::{BatchedJoinOptions, Bound, GroupingOptions};
pub use crate::producer::{ConsumeOutcome, DecisionCode, DownstreamTarget, SourceProducer};
pub use crate::source::{Completion, CompletionState, LinkOptions};
pub use crate::target::TargetHandle;
