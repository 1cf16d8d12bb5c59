//! Scheduler abstraction (spec §5, §9).
//!
//! The block posts its input- and output-processing jobs to an abstract [`JobRunner`]
//! rather than spawning threads itself. The default is a process-wide shared
//! work-stealing pool (`tokio`'s); [`InlineRunner`] drives jobs to completion
//! synchronously on the caller's thread, for deterministic tests.

use futures::future::BoxFuture;
use std::future::Future;
use std::task::{Context, Poll};

/// A place to post the coordinator's input-processing and the source's
/// output-processing jobs.
pub trait JobRunner: Send + Sync {
    fn spawn(&self, job: BoxFuture<'static, ()>);
}

/// Default runner: hands the job to `tokio::spawn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

impl JobRunner for TokioRunner {
    fn spawn(&self, job: BoxFuture<'static, ()>) {
        tokio::spawn(job);
    }
}

/// Deterministic runner for tests: drives the job to completion on the calling thread
/// before `spawn` returns, using a no-op waker the same way the teacher's spin-wait
/// send/recv paths poll a lock-free channel in a tight loop rather than parking.
///
/// Jobs posted to this runner must not genuinely block on external I/O; the
/// coordinator's own jobs never do (their only suspension points are producer
/// `reserve`/`consume` calls, which in-process producers resolve immediately).
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

impl JobRunner for InlineRunner {
    fn spawn(&self, mut job: BoxFuture<'static, ()>) {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            match job.as_mut().poll(&mut cx) {
                Poll::Ready(()) => return,
                Poll::Pending => std::hint::spin_loop(),
            }
        }
    }
}

/// Drives any future to completion inline, used internally wherever a non-`'static`
/// or non-`Send` caller needs the same busy-poll strategy as [`InlineRunner`].
pub(crate) fn drive_inline<F: Future>(mut fut: F) -> F::Output {
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut fut = unsafe { std::pin::Pin::new_unchecked(&mut fut) };
    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(out) => return out,
            Poll::Pending => std::hint::spin_loop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_runner_runs_ready_futures_immediately() {
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag_c = flag.clone();
        InlineRunner.spawn(Box::pin(async move {
            flag_c.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
