//! Options & bounding (spec §4.G).
//!
//! Options are copied into the block at construction; later mutation of the caller's
//! `GroupingOptions` value can never reach back into a live block, because `clone()` is
//! a real, independent copy (no shared interior state besides the cancellation token,
//! which is cloneable-by-design and meant to be shared).

use crate::error::GroupingError;
use tokio_util::sync::CancellationToken;

/// A quantity that is either unbounded or capped at a positive value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Unbounded,
    Limited(usize),
}

impl Bound {
    pub fn is_unbounded(self) -> bool {
        matches!(self, Bound::Unbounded)
    }

    pub(crate) fn reached(self, count: usize) -> bool {
        match self {
            Bound::Unbounded => false,
            Bound::Limited(limit) => count >= limit,
        }
    }
}

impl Default for Bound {
    fn default() -> Self {
        Bound::Unbounded
    }
}

/// Options shared by `JoinMany` and `BatchedJoinMany` (spec §4.G).
#[derive(Clone)]
pub struct GroupingOptions {
    pub greedy: bool,
    pub bounded_capacity: Bound,
    pub max_number_of_groups: Bound,
    pub max_messages_per_task: Bound,
    pub cancellation_token: CancellationToken,
    pub name_format: String,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            greedy: true,
            bounded_capacity: Bound::Unbounded,
            max_number_of_groups: Bound::Unbounded,
            max_messages_per_task: Bound::Unbounded,
            cancellation_token: CancellationToken::new(),
            name_format: "{0} (id={1})".to_string(),
        }
    }
}

impl std::fmt::Debug for GroupingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupingOptions")
            .field("greedy", &self.greedy)
            .field("bounded_capacity", &self.bounded_capacity)
            .field("max_number_of_groups", &self.max_number_of_groups)
            .field("max_messages_per_task", &self.max_messages_per_task)
            .field("name_format", &self.name_format)
            .finish()
    }
}

impl GroupingOptions {
    pub fn greedy(mut self, greedy: bool) -> Self {
        self.greedy = greedy;
        self
    }

    pub fn bounded_capacity(mut self, capacity: Bound) -> Self {
        self.bounded_capacity = capacity;
        self
    }

    pub fn max_number_of_groups(mut self, max: Bound) -> Self {
        self.max_number_of_groups = max;
        self
    }

    pub fn max_messages_per_task(mut self, max: Bound) -> Self {
        self.max_messages_per_task = max;
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn name_format(mut self, format: impl Into<String>) -> Self {
        self.name_format = format.into();
        self
    }
}

/// Options accepted by `BatchedJoinMany` (spec §4.F "Restrictions on BatchedJoin options").
#[derive(Debug, Clone)]
pub struct BatchedJoinOptions {
    pub base: GroupingOptions,
    pub batch_size: usize,
}

impl Default for BatchedJoinOptions {
    fn default() -> Self {
        Self {
            base: GroupingOptions::default(),
            batch_size: 1,
        }
    }
}

impl BatchedJoinOptions {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    pub fn base(mut self, base: GroupingOptions) -> Self {
        self.base = base;
        self
    }

    /// Validates the combination forbidden by spec §4.F: non-greedy acquisition would
    /// need a cross-target atomic multi-reserve that BatchedJoin has no natural batch
    /// boundary for, and bounded capacity has no meaning against an accumulator that is
    /// flushed by total count rather than by downstream drain.
    pub(crate) fn validate(&self) -> Result<(), GroupingError> {
        if self.batch_size == 0 {
            return Err(GroupingError::InvalidArgument(
                "batch_size must be >= 1".into(),
            ));
        }
        if !self.base.greedy {
            return Err(GroupingError::InvalidArgument(
                "BatchedJoinMany does not support Greedy = false".into(),
            ));
        }
        if !self.base.bounded_capacity.is_unbounded() {
            return Err(GroupingError::InvalidArgument(
                "BatchedJoinMany does not support BoundedCapacity".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batched_join_rejects_non_greedy() {
        let opts = BatchedJoinOptions::new(4).base(GroupingOptions::default().greedy(false));
        assert!(opts.validate().is_err());
    }

    #[test]
    fn batched_join_rejects_bounded_capacity() {
        let opts =
            BatchedJoinOptions::new(4).base(GroupingOptions::default().bounded_capacity(Bound::Limited(8)));
        assert!(opts.validate().is_err());
    }

    #[test]
    fn batched_join_rejects_zero_batch_size() {
        assert!(BatchedJoinOptions::new(0).validate().is_err());
    }

    #[test]
    fn defaults_are_unbounded_and_greedy() {
        let opts = GroupingOptions::default();
        assert!(opts.greedy);
        assert!(opts.bounded_capacity.is_unbounded());
        assert!(opts.max_number_of_groups.is_unbounded());
    }
}
