//! `JoinMany`: waits for exactly one message on every target, then emits the
//! N-tuple (spec §3 "JoinMany", §4 throughout).

use crate::assembler::JoinAssembler;
use crate::error::GroupingError;
use crate::executor::JobRunner;
use crate::inner::Inner;
use crate::options::GroupingOptions;
use crate::producer::DownstreamTarget;
use crate::source::{Completion, LinkHandle, LinkOptions};
use crate::target::TargetHandle;
use std::sync::Arc;

/// A block with `N` input targets that emits one `Vec<T>` of length `N` per group,
/// gathered one payload at a time from each target (spec §4.A "JoinMany").
pub struct JoinMany<T: Send + 'static> {
    inner: Arc<Inner<T, JoinAssembler>>,
    targets: Vec<TargetHandle<T, JoinAssembler>>,
}

impl<T: Send + 'static> std::fmt::Debug for JoinMany<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinMany")
            .field("target_count", &self.targets.len())
            .field("output_count", &self.output_count())
            .finish()
    }
}

impl<T: Send + 'static> JoinMany<T> {
    /// Builds an `N`-target join with default options.
    pub fn new(target_count: usize) -> Result<Self, GroupingError> {
        Self::with_options(target_count, GroupingOptions::default())
    }

    pub fn with_options(
        target_count: usize,
        options: GroupingOptions,
    ) -> Result<Self, GroupingError> {
        if target_count == 0 {
            return Err(GroupingError::InvalidArgument(
                "target_count must be >= 1".into(),
            ));
        }
        let inner = Inner::new(target_count, JoinAssembler::new(target_count), options);
        Self::from_inner(inner)
    }

    pub(crate) fn with_runner(
        target_count: usize,
        options: GroupingOptions,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self, GroupingError> {
        if target_count == 0 {
            return Err(GroupingError::InvalidArgument(
                "target_count must be >= 1".into(),
            ));
        }
        let inner = Inner::new_with_runner(
            target_count,
            JoinAssembler::new(target_count),
            options,
            runner,
        );
        Self::from_inner(inner)
    }

    fn from_inner(inner: Arc<Inner<T, JoinAssembler>>) -> Result<Self, GroupingError> {
        let targets = inner.make_targets();
        inner.check_precancelled();
        Ok(Self { inner, targets })
    }

    /// The block's `N` input targets, in construction order.
    pub fn targets(&self) -> &[TargetHandle<T, JoinAssembler>] {
        &self.targets
    }

    pub fn target(&self, index: usize) -> &TargetHandle<T, JoinAssembler> {
        &self.targets[index]
    }

    pub fn try_receive(&self) -> Option<Vec<T>> {
        self.inner.source().try_receive()
    }

    pub fn try_receive_all(&self) -> Vec<Vec<T>> {
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
        target: Arc<dyn DownstreamTarget<Vec<T>>>,
        options: LinkOptions<Vec<T>>,
    ) -> LinkHandle<Vec<T>> {
        self.inner.source().link_to(target, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineRunner;

    #[tokio::test]
    async fn posting_to_every_target_emits_one_group() {
        let join = JoinMany::<i32>::with_runner(3, GroupingOptions::default(), Arc::new(InlineRunner))
            .unwrap();
        assert!(join.target(0).post(1).await);
        assert!(join.target(1).post(2).await);
        assert_eq!(join.try_receive(), None);
        assert!(join.target(2).post(3).await);
        assert_eq!(join.try_receive(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn rejects_zero_targets() {
        assert!(JoinMany::<i32>::new(0).is_err());
    }
}
