//! `BatchedJoinMany`: accepts messages independently across `N` targets until the
//! combined count reaches `batch_size`, then emits one `Vec<Vec<T>>` per target
//! (spec §3 "BatchedJoinMany", §4.F).

use crate::assembler::BatchedJoinAssembler;
use crate::error::GroupingError;
use crate::executor::JobRunner;
use crate::inner::Inner;
use crate::options::BatchedJoinOptions;
use crate::producer::DownstreamTarget;
use crate::source::{Completion, LinkHandle, LinkOptions};
use crate::target::TargetHandle;
use std::sync::Arc;

/// A block with `N` input targets that emits one `Vec<Vec<T>>` (one sequence per
/// target) every time `batch_size` messages have arrived across all of them
/// (spec §4.F "BatchedJoinMany").
pub struct BatchedJoinMany<T: Send + 'static> {
    inner: Arc<Inner<T, BatchedJoinAssembler<T>>>,
    targets: Vec<TargetHandle<T, BatchedJoinAssembler<T>>>,
}

impl<T: Send + 'static> std::fmt::Debug for BatchedJoinMany<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedJoinMany")
            .field("target_count", &self.targets.len())
            .field("output_count", &self.output_count())
            .finish()
    }
}

impl<T: Send + 'static> BatchedJoinMany<T> {
    pub fn new(target_count: usize, batch_size: usize) -> Result<Self, GroupingError> {
        Self::with_options(target_count, BatchedJoinOptions::new(batch_size))
    }

    pub fn with_options(
        target_count: usize,
        options: BatchedJoinOptions,
    ) -> Result<Self, GroupingError> {
        if target_count == 0 {
            return Err(GroupingError::InvalidArgument(
                "target_count must be >= 1".into(),
            ));
        }
        options.validate()?;
        let assembler = BatchedJoinAssembler::new(target_count, options.batch_size);
        let inner = Inner::new(target_count, assembler, options.base);
        Self::from_inner(inner)
    }

    pub(crate) fn with_runner(
        target_count: usize,
        options: BatchedJoinOptions,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self, GroupingError> {
        if target_count == 0 {
            return Err(GroupingError::InvalidArgument(
                "target_count must be >= 1".into(),
            ));
        }
        options.validate()?;
        let assembler = BatchedJoinAssembler::new(target_count, options.batch_size);
        let inner = Inner::new_with_runner(target_count, assembler, options.base, runner);
        Self::from_inner(inner)
    }

    fn from_inner(
        inner: Arc<Inner<T, BatchedJoinAssembler<T>>>,
    ) -> Result<Self, GroupingError> {
        let targets = inner.make_targets();
        inner.check_precancelled();
        Ok(Self { inner, targets })
    }

    pub fn targets(&self) -> &[TargetHandle<T, BatchedJoinAssembler<T>>] {
        &self.targets
    }

    pub fn target(&self, index: usize) -> &TargetHandle<T, BatchedJoinAssembler<T>> {
        &self.targets[index]
    }

    pub fn try_receive(&self) -> Option<Vec<Vec<T>>> {
        self.inner.source().try_receive()
    }

    pub fn try_receive_all(&self) -> Vec<Vec<Vec<T>>> {
        self.inner.source().try_receive_all()
    }

    pub fn output_count(&self) -> usize {
        self.inner.source().output_count()
    }

    pub fn completion(&self) -> Completion {
        self.inner.source().completion()
    }

    pub fn link_to(
        &self,
        target: Arc<dyn DownstreamTarget<Vec<Vec<T>>>>,
        options: LinkOptions<Vec<Vec<T>>>,
    ) -> LinkHandle<Vec<Vec<T>>> {
        self.inner.source().link_to(target, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineRunner;
    use crate::options::GroupingOptions;

    #[tokio::test]
    async fn emits_once_batch_size_reached_regardless_of_balance() {
        let options = BatchedJoinOptions::new(3).base(GroupingOptions::default());
        let join =
            BatchedJoinMany::<i32>::with_runner(2, options, Arc::new(InlineRunner)).unwrap();
        assert!(join.target(0).post(1).await);
        assert!(join.target(0).post(2).await);
        assert_eq!(join.try_receive(), None);
        assert!(join.target(1).post(3).await);
        assert_eq!(join.try_receive(), Some(vec![vec![1, 2], vec![3]]));
    }

    #[tokio::test]
    async fn rejects_non_greedy_options() {
        let options =
            BatchedJoinOptions::new(2).base(GroupingOptions::default().greedy(false));
        assert!(BatchedJoinMany::<i32>::with_options(2, options).is_err());
    }
}
