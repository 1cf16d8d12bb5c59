//! Pluggable group-assembly policy (spec §4.F).
//!
//! `JoinMany` and `BatchedJoinMany` only differ in how they decide a group is ready:
//! `JoinAssembler` needs exactly one payload from every target before it emits anything;
//! `BatchedJoinAssembler` accepts payloads from any target independently and emits once
//! the running total across all targets reaches `batch_size`. The coordinator is generic
//! over this trait rather than dispatching dynamically, since a block is permanently
//! wired to exactly one policy at construction.

/// How the coordinator is allowed to gather input for this assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IntakeMode {
    /// A group needs one payload from every target, gathered together.
    AllTargets,
    /// A group can be advanced by a single payload from any one target.
    AnyTarget,
}

pub trait GroupAssembler<T>: Send
where
    T: Send + 'static,
{
    type Output: Send + 'static;

    fn intake_mode(&self) -> IntakeMode;

    /// Called only when `intake_mode() == AllTargets`, with exactly one payload per
    /// target in target-index order.
    fn assemble_all(&mut self, payloads: Vec<T>) -> Option<Self::Output>;

    /// Called only when `intake_mode() == AnyTarget`, with one payload from
    /// `target_index`.
    fn assemble_one(&mut self, target_index: usize, payload: T) -> Option<Self::Output>;

    /// Called once the block is `decliningPermanently` and no more input can arrive, to
    /// flush whatever partial group is pending. `None` if there is nothing to flush.
    fn flush_residue(&mut self) -> Option<Self::Output>;
}

/// One-tuple-per-group assembler backing `JoinMany`. Its only reason to be public
/// rather than an internal-only policy type is that it is the second type parameter
/// of the `TargetHandle`s a `JoinMany` hands out; there is nothing on it a caller is
/// meant to construct or call directly.
pub struct JoinAssembler {
    target_count: usize,
}

impl JoinAssembler {
    pub(crate) fn new(target_count: usize) -> Self {
        Self { target_count }
    }
}

impl<T: Send + 'static> GroupAssembler<T> for JoinAssembler {
    type Output = Vec<T>;

    fn intake_mode(&self) -> IntakeMode {
        IntakeMode::AllTargets
    }

    fn assemble_all(&mut self, payloads: Vec<T>) -> Option<Self::Output> {
        debug_assert_eq!(payloads.len(), self.target_count);
        Some(payloads)
    }

    fn assemble_one(&mut self, _target_index: usize, _payload: T) -> Option<Self::Output> {
        unreachable!("JoinAssembler only ever receives AllTargets intake")
    }

    fn flush_residue(&mut self) -> Option<Self::Output> {
        // A join never has a partial group: groups only exist once all N payloads are
        // in hand, at which point they are emitted immediately.
        None
    }
}

/// Accumulator-until-batch-size assembler backing `BatchedJoinMany`. Public for the
/// same reason as [`JoinAssembler`]: it names the `TargetHandle`s a `BatchedJoinMany`
/// hands out.
pub struct BatchedJoinAssembler<T> {
    batch_size: usize,
    accumulators: Vec<Vec<T>>,
    total: usize,
}

impl<T> BatchedJoinAssembler<T> {
    pub(crate) fn new(target_count: usize, batch_size: usize) -> Self {
        Self {
            batch_size,
            accumulators: (0..target_count).map(|_| Vec::new()).collect(),
            total: 0,
        }
    }

    fn take_accumulators(&mut self) -> Vec<Vec<T>> {
        self.total = 0;
        self.accumulators
            .iter_mut()
            .map(std::mem::take)
            .collect()
    }

    fn has_pending(&self) -> bool {
        self.total > 0
    }
}

impl<T: Send + 'static> GroupAssembler<T> for BatchedJoinAssembler<T> {
    type Output = Vec<Vec<T>>;

    fn intake_mode(&self) -> IntakeMode {
        IntakeMode::AnyTarget
    }

    fn assemble_all(&mut self, _payloads: Vec<T>) -> Option<Self::Output> {
        unreachable!("BatchedJoinAssembler only ever receives AnyTarget intake")
    }

    fn assemble_one(&mut self, target_index: usize, payload: T) -> Option<Self::Output> {
        self.accumulators[target_index].push(payload);
        self.total += 1;
        if self.total == self.batch_size {
            Some(self.take_accumulators())
        } else {
            None
        }
    }

    fn flush_residue(&mut self) -> Option<Self::Output> {
        self.has_pending().then(|| self.take_accumulators())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_assembler_emits_immediately() {
        let mut assembler = JoinAssembler::new(2);
        let out = GroupAssembler::<i32>::assemble_all(&mut assembler, vec![1, 2]);
        assert_eq!(out, Some(vec![1, 2]));
        assert_eq!(GroupAssembler::<i32>::flush_residue(&mut assembler), None);
    }

    #[test]
    fn batched_assembler_emits_on_total_count() {
        let mut assembler = BatchedJoinAssembler::<i32>::new(2, 3);
        assert!(assembler.assemble_one(1, 10).is_none());
        assert!(assembler.assemble_one(1, 20).is_none());
        let out = assembler.assemble_one(0, 30).unwrap();
        assert_eq!(out, vec![vec![30], vec![10, 20]]);
        assert!(!assembler.has_pending());
    }

    #[test]
    fn batched_assembler_flushes_short_residue() {
        let mut assembler = BatchedJoinAssembler::<i32>::new(2, 5);
        assembler.assemble_one(0, 1);
        assembler.assemble_one(1, 2);
        let residue = assembler.flush_residue().unwrap();
        assert_eq!(residue, vec![vec![1], vec![2]]);
        assert_eq!(assembler.flush_residue(), None);
    }
}
