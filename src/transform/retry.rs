use std::{sync::Arc, time::Duration};

use crate::{
    Case, Deferred, DeferredNode, Error,
    error::catch,
    utils::timer::{Scheduler, default_scheduler},
};

use super::Transform;

/// Resolves the source again after a failure.
///
/// Each retry resolves the same source, so its side effects recur. `n`
/// retries mean up to `n + 1` attempts per resolution.
///
/// ```
/// use std::{sync::{Arc, atomic::{AtomicUsize, Ordering}}};
/// use altlive::{Deferred, Error, Retry};
///
/// let attempts = Arc::new(AtomicUsize::new(0));
/// let a = attempts.clone();
/// let d = Deferred::<()>::from_fn(move || {
///     a.fetch_add(1, Ordering::SeqCst);
///     Err(Error::msg("unavailable"))
/// })
/// .pipe(Retry::until(2));
/// assert!(d.wait().is_err());
/// assert_eq!(attempts.load(Ordering::SeqCst), 3);
/// ```
#[derive(Clone)]
pub struct Retry {
    retries: usize,
    guard: Arc<dyn Fn(&Error) -> bool + Send + Sync>,
    backoff: Arc<dyn Fn(usize) -> Duration + Send + Sync>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl Retry {
    /// Retries at most `retries` times. Zero means no limit.
    pub fn until(retries: usize) -> Self {
        Self {
            retries,
            guard: Arc::new(|_| true),
            backoff: Arc::new(|_| Duration::ZERO),
            scheduler: None,
        }
    }

    pub fn forever() -> Self {
        Self::until(0)
    }

    /// Retries only failures for which `guard` returns true.
    pub fn guard(mut self, guard: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Arc::new(guard);
        self
    }

    /// Waits `backoff(retry_index)` before each retry. The first retry has index 0.
    pub fn backoff(mut self, backoff: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Runs delayed retries on `scheduler` instead of [`TimerService::global`](crate::TimerService::global).
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl<T: Send + 'static> Transform<T> for Retry {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        Deferred::from_node(RetryNode {
            source,
            config: self,
        })
    }
}

struct RetryNode<T: 'static> {
    source: Deferred<T>,
    config: Retry,
}

impl<T: Send + 'static> RetryNode<T> {
    fn attempt(self: Arc<Self>, case: Case<T>, retries: usize) {
        let source = self.source.clone();
        source.select(Case::new(move |result| {
            let error = match result {
                Ok(value) => return case.success(value),
                Err(error) => error,
            };
            let config = &self.config;
            if config.retries != 0 && retries >= config.retries {
                return case.failure(error);
            }
            match catch(|| (config.guard)(&error)) {
                Ok(true) => {}
                Ok(false) => return case.failure(error),
                Err(e) => return case.failure(e),
            }
            let delay = match catch(|| (config.backoff)(retries)) {
                Ok(delay) => delay,
                Err(e) => return case.failure(e),
            };
            tracing::debug!(retry = retries + 1, ?delay, %error, "retrying");
            if delay.is_zero() {
                self.attempt(case, retries + 1);
            } else {
                let scheduler = match &self.config.scheduler {
                    Some(scheduler) => scheduler.clone(),
                    None => default_scheduler(),
                };
                scheduler.schedule(delay, Box::new(move || self.attempt(case, retries + 1)));
            }
        }))
    }
}

impl<T: Send + 'static> DeferredNode<T> for RetryNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        self.attempt(case, 0)
    }
}
