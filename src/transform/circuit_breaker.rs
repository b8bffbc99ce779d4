use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::{Case, Deferred, DeferredNode, Error, Tripped, error::catch};

use super::Transform;

/// Stops resolving the source after too many consecutive failures.
///
/// Once `limit` qualifying failures happen in a row, every resolution within
/// `half_open` of the last failure fails immediately with [`Tripped`]. After
/// that window one attempt is let through; a success closes the circuit again.
///
/// Clones share the same failure count, so one breaker can guard several sources.
#[derive(Clone)]
pub struct CircuitBreaker {
    limit: usize,
    half_open: Duration,
    guard: Arc<dyn Fn(&Error) -> bool + Send + Sync>,
    state: Arc<Mutex<BreakerState>>,
}

#[derive(Default)]
struct BreakerState {
    fail_count: usize,
    last_failure: Option<Instant>,
    last_error: Option<Error>,
}

impl CircuitBreaker {
    /// A `limit` of zero never opens the circuit.
    pub fn of(limit: usize, half_open: Duration) -> Self {
        Self {
            limit,
            half_open,
            guard: Arc::new(|_| true),
            state: Arc::new(Mutex::new(BreakerState::default())),
        }
    }

    /// Counts only failures for which `guard` returns true.
    pub fn guard(mut self, guard: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Arc::new(guard);
        self
    }

    /// The number of consecutive qualifying failures.
    pub fn fail_count(&self) -> usize {
        self.state.lock().unwrap().fail_count
    }

    pub fn is_open(&self) -> bool {
        self.open_cause().is_some()
    }

    fn open_cause(&self) -> Option<Option<Error>> {
        if self.limit == 0 {
            return None;
        }
        let s = self.state.lock().unwrap();
        let open = s.fail_count >= self.limit
            && s.last_failure
                .is_some_and(|at| at.elapsed() < self.half_open);
        open.then(|| s.last_error.clone())
    }

    fn record(&self, result: &Result<impl Sized, Error>) -> Result<(), Error> {
        match result {
            Ok(_) => {
                *self.state.lock().unwrap() = BreakerState::default();
            }
            Err(e) => {
                if catch(|| (self.guard)(e))? {
                    let mut s = self.state.lock().unwrap();
                    s.fail_count += 1;
                    s.last_failure = Some(Instant::now());
                    s.last_error = Some(e.clone());
                }
            }
        }
        Ok(())
    }
}

impl<T: Send + 'static> Transform<T> for CircuitBreaker {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        Deferred::from_node(BreakerNode {
            source,
            breaker: self,
        })
    }
}

struct BreakerNode<T: 'static> {
    source: Deferred<T>,
    breaker: CircuitBreaker,
}

impl<T: Send + 'static> DeferredNode<T> for BreakerNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        if let Some(cause) = self.breaker.open_cause() {
            tracing::debug!(
                fail_count = self.breaker.fail_count(),
                "circuit is open, skipping source"
            );
            return case.failure(Tripped::new(cause));
        }
        let source = self.source.clone();
        source.select(Case::new(move |result| {
            if self.breaker.limit == 0 {
                return case.resolve(result);
            }
            match self.breaker.record(&result) {
                Ok(()) => case.resolve(result),
                Err(e) => case.failure(e),
            }
        }))
    }
}
