use std::{
    mem::replace,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use derive_ex::derive_ex;

use crate::{Case, Deferred, DeferredNode, Error};

/// Caches the first outcome of a source and replays it to later resolutions.
///
/// The source runs at most once per cached outcome, even when several threads
/// resolve concurrently: resolutions that arrive while the first one is in
/// flight wait for its outcome. Failures are cached too. Use
/// [`clear`](Self::clear) to forget the outcome.
///
/// ```
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
/// use altlive::{Deferred, Memoize};
///
/// let runs = Arc::new(AtomicUsize::new(0));
/// let r = runs.clone();
/// let memo = Memoize::new(Deferred::from_fn(move || {
///     Ok::<_, std::io::Error>(r.fetch_add(1, Ordering::SeqCst))
/// }));
/// assert_eq!(memo.deferred().wait().ok(), Some(0));
/// assert_eq!(memo.deferred().wait().ok(), Some(0));
/// assert_eq!(runs.load(Ordering::SeqCst), 1);
/// ```
#[derive_ex(Clone, bound())]
pub struct Memoize<T: 'static>(Arc<MemoNode<T>>);

struct MemoNode<T: 'static> {
    source: Deferred<T>,
    state: Mutex<MemoState<T>>,
}

struct MemoState<T> {
    generation: u64,
    cache: Cache<T>,
}

enum Cache<T> {
    Empty,
    Pending(Vec<Case<T>>),
    Done {
        outcome: Result<T, Error>,
        at: Instant,
    },
}

impl<T: Clone + Send + 'static> Memoize<T> {
    pub fn new(source: Deferred<T>) -> Self {
        Self(Arc::new(MemoNode {
            source,
            state: Mutex::new(MemoState {
                generation: 0,
                cache: Cache::Empty,
            }),
        }))
    }

    /// A `Deferred` that resolves through this cache.
    pub fn deferred(&self) -> Deferred<T> {
        Deferred::from_arc(self.0.clone())
    }

    pub fn select(&self, case: Case<T>) {
        self.0.clone().select(case)
    }

    /// Returns true if a successful outcome is cached.
    pub fn has_value(&self) -> bool {
        matches!(
            self.0.state.lock().unwrap().cache,
            Cache::Done { outcome: Ok(_), .. }
        )
    }

    /// Returns true if any outcome, success or failure, is cached.
    pub fn is_resolved(&self) -> bool {
        matches!(self.0.state.lock().unwrap().cache, Cache::Done { .. })
    }

    /// Returns true if the cached outcome was produced more than `age` ago.
    ///
    /// Always false when nothing is cached.
    pub fn is_older_than(&self, age: Duration) -> bool {
        match &self.0.state.lock().unwrap().cache {
            Cache::Done { at, .. } => at.elapsed() > age,
            _ => false,
        }
    }

    /// Forgets the cached outcome, so the next resolution runs the source again.
    ///
    /// A resolution already in flight still delivers to its waiters, but its
    /// outcome is not cached.
    pub fn clear(&self) {
        let mut s = self.0.state.lock().unwrap();
        s.generation += 1;
        if let Cache::Done { .. } = s.cache {
            s.cache = Cache::Empty;
        }
    }
}

impl<T: Clone + Send + 'static> From<Memoize<T>> for Deferred<T> {
    fn from(memo: Memoize<T>) -> Self {
        memo.deferred()
    }
}

impl<T: Clone + Send + 'static> MemoNode<T> {
    fn complete(&self, generation: u64, result: Result<T, Error>) {
        let waiters = {
            let mut s = self.state.lock().unwrap();
            let waiters = match replace(&mut s.cache, Cache::Empty) {
                Cache::Pending(waiters) => waiters,
                other => {
                    s.cache = other;
                    Vec::new()
                }
            };
            if s.generation == generation {
                s.cache = Cache::Done {
                    outcome: result.clone(),
                    at: Instant::now(),
                };
            }
            waiters
        };
        for waiter in waiters {
            waiter.resolve(result.clone());
        }
    }

    /// The source dropped its continuation. Waiters are dropped with it.
    fn abandon(&self) {
        let waiters = {
            let mut s = self.state.lock().unwrap();
            match replace(&mut s.cache, Cache::Empty) {
                Cache::Pending(waiters) => waiters,
                other => {
                    s.cache = other;
                    Vec::new()
                }
            }
        };
        drop(waiters);
    }
}

impl<T: Clone + Send + 'static> DeferredNode<T> for MemoNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let mut s = self.state.lock().unwrap();
        match &mut s.cache {
            Cache::Done { outcome, .. } => {
                let outcome = outcome.clone();
                drop(s);
                tracing::trace!("replaying memoized outcome");
                case.resolve(outcome);
            }
            Cache::Pending(waiters) => waiters.push(case),
            Cache::Empty => {
                s.cache = Cache::Pending(vec![case]);
                let completion = Completion {
                    generation: s.generation,
                    node: Some(self.clone()),
                };
                drop(s);
                self.source
                    .select(Case::new(move |result| completion.complete(result)));
            }
        }
    }
}

struct Completion<T: Clone + Send + 'static> {
    generation: u64,
    node: Option<Arc<MemoNode<T>>>,
}

impl<T: Clone + Send + 'static> Completion<T> {
    fn complete(mut self, result: Result<T, Error>) {
        if let Some(node) = self.node.take() {
            node.complete(self.generation, result);
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            node.abandon();
        }
    }
}
