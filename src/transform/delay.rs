use std::{sync::Arc, time::Duration};

use crate::{
    Case, Deferred, DeferredNode,
    utils::timer::{Scheduler, default_scheduler},
};

use super::Transform;

/// Postpones resolving the source, delivering its outcome, or both.
///
/// Delayed steps run on the scheduler's thread. A zero delay runs its step in
/// place.
#[derive(Clone)]
pub struct Delay {
    before: Duration,
    after: Duration,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl Delay {
    /// Waits `before` until resolving the source, then `after` until delivering its outcome.
    pub fn by(before: Duration, after: Duration) -> Self {
        Self {
            before,
            after,
            scheduler: None,
        }
    }

    pub fn execution_by(before: Duration) -> Self {
        Self::by(before, Duration::ZERO)
    }

    pub fn result_by(after: Duration) -> Self {
        Self::by(Duration::ZERO, after)
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl<T: Send + 'static> Transform<T> for Delay {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        let scheduler = self.scheduler.unwrap_or_else(default_scheduler);
        Deferred::from_node(DelayNode {
            source,
            before: self.before,
            after: self.after,
            scheduler,
        })
    }
}

struct DelayNode<T: 'static> {
    source: Deferred<T>,
    before: Duration,
    after: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> DeferredNode<T> for DelayNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let after = self.after;
        let scheduler = self.scheduler.clone();
        let case = if after.is_zero() {
            case
        } else {
            Case::new(move |result| {
                scheduler.schedule(after, Box::new(move || case.resolve(result)));
            })
        };
        if self.before.is_zero() {
            self.source.select(case);
        } else {
            let source = self.source.clone();
            self.scheduler
                .schedule(self.before, Box::new(move || source.select(case)));
        }
    }
}
