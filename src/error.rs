//! Error kinds for the coordination engine (spec §7).
//!
//! Argument errors are returned synchronously from the offending constructor or call.
//! Everything else (producer failures, contract violations, cancellation) is buffered
//! by the coordinator and only ever surfaces through the block's completion future.

use thiserror::Error;

/// Errors produced by the grouping engine.
#[derive(Debug, Error)]
pub enum GroupingError {
    /// Rejected at construction time: bad `N`, bad batch size, or a forbidden option
    /// combination (e.g. non-greedy `BatchedJoinMany`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `offerMessage` called with `header.id < 1`, or `consumeToAccept = true` with no
    /// producer supplied.
    #[error("invalid message header: {0}")]
    InvalidMessageHeader(String),

    /// A producer's `reserve` succeeded but the paired `consume` reported
    /// `accepted = false`; the protocol promises this cannot happen.
    #[error("producer contract violation: {0}")]
    ProducerContractViolation(String),

    /// A producer's `reserve`/`consume`/`release` raised an error of its own.
    #[error("producer error: {0}")]
    ProducerError(String),

    /// The block's `CancellationToken` fired and no exceptions had been recorded.
    #[error("operation cancelled")]
    Cancelled,

    /// Per-target completion queries are not part of the observable surface (spec §4.C).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The completion awaitable's terminal faulted state: every error accumulated over
    /// the block's lifetime, flattened.
    #[error("{} error(s): {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<GroupingError>),
}

fn join_messages(errors: &[GroupingError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl GroupingError {
    /// Flattens `self` into a single `Aggregate`: nested aggregates are spliced in,
    /// never nested two deep.
    pub(crate) fn into_flat_vec(self) -> Vec<GroupingError> {
        match self {
            GroupingError::Aggregate(errors) => errors,
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_formats_every_message() {
        let err = GroupingError::Aggregate(vec![
            GroupingError::Cancelled,
            GroupingError::ProducerError("boom".into()),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("2 error"));
        assert!(rendered.contains("boom"));
    }
}
