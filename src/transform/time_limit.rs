use std::{sync::Arc, time::Duration};

use crate::{
    Case, Deferred, DeferredNode,
    deferred::SharedCase,
    utils::timer::{Scheduler, TimeoutError, default_scheduler},
};

use super::Transform;

/// Fails with [`TimeoutError`] if the source does not resolve within a time limit.
///
/// The source and the timer race; whichever finishes first is delivered and
/// the other is discarded. A zero limit disables the timer.
#[derive(Clone)]
pub struct TimeLimit {
    timeout: Duration,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl TimeLimit {
    pub fn of(timeout: Duration) -> Self {
        Self {
            timeout,
            scheduler: None,
        }
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl<T: Send + 'static> Transform<T> for TimeLimit {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        if self.timeout.is_zero() {
            return source;
        }
        let scheduler = self.scheduler.unwrap_or_else(default_scheduler);
        Deferred::from_node(TimeLimitNode {
            source,
            timeout: self.timeout,
            scheduler,
        })
    }
}

struct TimeLimitNode<T: 'static> {
    source: Deferred<T>,
    timeout: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> DeferredNode<T> for TimeLimitNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let case = SharedCase::new(case);
        let timer = case.clone();
        let timeout = self.timeout;
        self.scheduler.schedule(
            timeout,
            Box::new(move || {
                if timer.resolve(Err(TimeoutError::new().into())) {
                    tracing::debug!(?timeout, "time limit expired");
                }
            }),
        );
        self.source.select(Case::new(move |result| {
            case.resolve(result);
        }));
    }
}
