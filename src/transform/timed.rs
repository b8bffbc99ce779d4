use std::{
    sync::{Arc, mpsc},
    time::Duration,
};

use crate::{Case, Deferred, DeferredNode, Executor, utils::timer::TimeoutError};

use super::Transform;

/// Runs the source's blocking resolution on an executor and waits for it with a deadline.
///
/// Unlike [`TimeLimit`](crate::TimeLimit), resolving a `Timed` blocks the
/// resolving thread until the outcome arrives or the deadline passes. The
/// work itself keeps running on the executor after a timeout; its outcome is
/// discarded.
pub struct Timed {
    timeout: Duration,
}

impl Timed {
    pub fn of(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn on(self, executor: impl Executor) -> TimedOn {
        TimedOn {
            timeout: self.timeout,
            executor: Arc::new(executor),
        }
    }
}

/// A [`Timed`] bound to an executor.
#[derive(Clone)]
pub struct TimedOn {
    timeout: Duration,
    executor: Arc<dyn Executor>,
}

impl<T: Send + 'static> Transform<T> for TimedOn {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        Deferred::from_node(TimedNode {
            source,
            timeout: self.timeout,
            executor: self.executor,
        })
    }
}

struct TimedNode<T: 'static> {
    source: Deferred<T>,
    timeout: Duration,
    executor: Arc<dyn Executor>,
}

impl<T: Send + 'static> DeferredNode<T> for TimedNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let (tx, rx) = mpsc::sync_channel(1);
        let source = self.source.clone();
        self.executor.execute(Box::new(move || {
            let _ = tx.send(source.wait());
        }));
        match rx.recv_timeout(self.timeout) {
            Ok(result) => case.resolve(result),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::debug!(timeout = ?self.timeout, "timed resolution missed its deadline");
                case.failure(TimeoutError::new())
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => case.failure(crate::Dropped),
        }
    }
}
