use std::{
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use derive_ex::derive_ex;

use crate::{
    Dropped,
    error::{Error, catch},
    transform::{Recover, Transform},
    utils::{
        sync::oneshot::{RecvError, oneshot},
        timer::TimeoutError,
    },
};


/// The continuation of a [`Deferred`].
///
/// Invoking it consumes it, so an outcome is delivered at most once. Dropping
/// it without invoking it means no outcome will be delivered.
pub struct Case<T>(Box<dyn FnOnce(Result<T, Error>) + Send + 'static>);

impl<T> Case<T> {
    pub fn new(f: impl FnOnce(Result<T, Error>) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Creates a continuation from a pair of branches, one of which will be called.
    pub fn from_branches(
        on_success: impl FnOnce(T) + Send + 'static,
        on_failure: impl FnOnce(Error) + Send + 'static,
    ) -> Self {
        Self::new(move |result| match result {
            Ok(value) => on_success(value),
            Err(error) => on_failure(error),
        })
    }

    pub fn resolve(self, result: Result<T, Error>) {
        (self.0)(result)
    }

    pub fn success(self, value: T) {
        self.resolve(Ok(value))
    }

    pub fn failure(self, error: impl Into<Error>) {
        self.resolve(Err(error.into()))
    }
}

/// The source of a [`Deferred`].
///
/// `select` must eventually resolve `case` exactly once, or drop it when the
/// computation is abandoned. It may do so before returning, or later from any
/// thread.
pub trait DeferredNode<T>: Send + Sync + 'static {
    fn select(self: Arc<Self>, case: Case<T>);
}

/// A computation that eventually succeeds with a `T` or fails with an [`Error`].
///
/// A `Deferred` does nothing until it is resolved with [`select`](Self::select)
/// or one of the adapters built on it. Each resolution may run the underlying
/// work again; use [`Memoize`](crate::Memoize) to share a single outcome.
///
/// Panics in functions passed to `Deferred` operations and combinators are
/// caught and delivered as [`Panicked`](crate::Panicked) failures. Panics in the
/// continuation itself are not caught.
#[derive_ex(Clone, bound())]
pub struct Deferred<T: 'static>(Arc<dyn DeferredNode<T>>);

impl<T: Send + 'static> Deferred<T> {
    /// A `Deferred` that always succeeds with a clone of `value`.
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_node(JustNode(value))
    }

    /// A `Deferred` that always fails with `error`.
    pub fn raise(error: impl Into<Error>) -> Self {
        Self::from_node(RaiseNode(error.into()))
    }

    /// A `Deferred` that runs `f` on the resolving thread each time it is resolved.
    pub fn from_fn<E: Into<Error>>(
        f: impl Fn() -> Result<T, E> + Send + Sync + 'static,
    ) -> Self {
        Self::from_node(FnNode(f))
    }

    /// A `Deferred` driven by a raw continuation, for wrapping callback-based sources.
    ///
    /// `f` may resolve the case later from another thread. A panic in `f`
    /// before it resolves the case is delivered as a failure; one after it
    /// resolves the case is ignored.
    pub fn from_raw(f: impl Fn(Case<T>) + Send + Sync + 'static) -> Self {
        Self::from_node(RawNode(f))
    }

    pub fn from_node(node: impl DeferredNode<T>) -> Self {
        Self(Arc::new(node))
    }

    pub(crate) fn from_arc(node: Arc<dyn DeferredNode<T>>) -> Self {
        Self(node)
    }

    /// Starts a resolution, delivering its outcome to `case`.
    pub fn select(&self, case: Case<T>) {
        self.0.clone().select(case)
    }

    /// Starts a resolution with a pair of branches.
    pub fn resolve(
        &self,
        on_success: impl FnOnce(T) + Send + 'static,
        on_failure: impl FnOnce(Error) + Send + 'static,
    ) {
        self.select(Case::from_branches(on_success, on_failure))
    }

    pub fn map<U: Send + 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Deferred<U> {
        Deferred::from_node(MapNode { source: self, f })
    }

    /// Like [`map`](Self::map), but `f` may fail.
    pub fn try_map<U: Send + 'static, E: Into<Error>>(
        self,
        f: impl Fn(T) -> Result<U, E> + Send + Sync + 'static,
    ) -> Deferred<U> {
        Deferred::from_node(TryMapNode { source: self, f })
    }

    /// Chains a dependent computation.
    pub fn and_then<U: Send + 'static>(
        self,
        f: impl Fn(T) -> Deferred<U> + Send + Sync + 'static,
    ) -> Deferred<U> {
        Deferred::from_node(AndThenNode { source: self, f })
    }

    /// Replaces a failure with the result of `handler`.
    pub fn recover<E: Into<Error>>(
        self,
        handler: impl Fn(Error) -> Result<T, E> + Send + Sync + 'static,
    ) -> Self {
        self.pipe(Recover::from(handler))
    }

    /// Replaces a failure with the `Deferred` returned by `handler`.
    pub fn recover_with(self, handler: impl Fn(Error) -> Deferred<T> + Send + Sync + 'static) -> Self {
        self.pipe(Recover::flat_from(handler))
    }

    /// Applies a combinator, or any function taking a `Deferred`.
    ///
    /// ```
    /// use altlive::{Deferred, Filter};
    ///
    /// let d = Deferred::just(4).pipe(Filter::accept(|x: &i32| x % 2 == 0));
    /// assert_eq!(d.wait().ok(), Some(4));
    /// ```
    pub fn pipe<X: Transform<T>>(self, transform: X) -> X::Output {
        transform.apply(self)
    }

    /// Resolves and blocks the current thread until the outcome arrives.
    ///
    /// This deadlocks if the computation needs the calling thread to make
    /// progress, for example when it is scheduled onto a [`SerialQueue`](crate::SerialQueue)
    /// that is currently running the caller. If the computation is abandoned
    /// without an outcome, [`Dropped`] is returned.
    pub fn wait(&self) -> Result<T, Error> {
        let (tx, rx) = oneshot();
        self.select(Case::new(move |result| tx.send(result)));
        match rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Dropped.into()),
        }
    }

    /// Like [`wait`](Self::wait), but fails with [`TimeoutError`] after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, Error> {
        let (tx, rx) = oneshot();
        self.select(Case::new(move |result| tx.send(result)));
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvError::Closed) => Err(Dropped.into()),
            Err(RecvError::Timeout) => Err(TimeoutError::new().into()),
        }
    }

    /// Resolves now and returns a future of the outcome.
    pub fn to_future(&self) -> impl Future<Output = Result<T, Error>> + Send + 'static {
        let (tx, rx) = futures::channel::oneshot::channel();
        self.select(Case::new(move |result| {
            let _ = tx.send(result);
        }));
        async move { rx.await.unwrap_or_else(|_| Err(Dropped.into())) }
    }
}

/// A continuation shared by competing resolvers; the first to resolve it wins.
#[derive_ex(Clone, bound())]
pub(crate) struct SharedCase<T>(Arc<Mutex<Option<Case<T>>>>);

impl<T> SharedCase<T> {
    pub fn new(case: Case<T>) -> Self {
        Self(Arc::new(Mutex::new(Some(case))))
    }

    /// Resolves the continuation if nobody has yet. Returns whether this call won.
    pub fn resolve(&self, result: Result<T, Error>) -> bool {
        let case = self.0.lock().unwrap().take();
        if let Some(case) = case {
            case.resolve(result);
            true
        } else {
            false
        }
    }

    /// Drops the continuation without resolving it.
    pub fn discard(&self) -> bool {
        let case = self.0.lock().unwrap().take();
        case.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.0.lock().unwrap().is_some()
    }
}

struct JustNode<T>(T);

impl<T: Clone + Send + Sync + 'static> DeferredNode<T> for JustNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        case.success(self.0.clone())
    }
}

struct RaiseNode(Error);

impl<T: Send + 'static> DeferredNode<T> for RaiseNode {
    fn select(self: Arc<Self>, case: Case<T>) {
        case.failure(self.0.clone())
    }
}

struct FnNode<F>(F);

impl<T, E, F> DeferredNode<T> for FnNode<F>
where
    T: Send + 'static,
    E: Into<Error>,
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
{
    fn select(self: Arc<Self>, case: Case<T>) {
        let result = catch(|| (self.0)()).and_then(|r| r.map_err(Into::into));
        case.resolve(result)
    }
}

struct RawNode<F>(F);

impl<T, F> DeferredNode<T> for RawNode<F>
where
    T: Send + 'static,
    F: Fn(Case<T>) + Send + Sync + 'static,
{
    fn select(self: Arc<Self>, case: Case<T>) {
        let shared = SharedCase::new(case);
        let inner = shared.clone();
        let caller = thread::current().id();
        let in_case = Arc::new(AtomicBool::new(false));
        let in_case_flag = in_case.clone();
        let case = Case::new(move |result| {
            let on_caller = thread::current().id() == caller;
            if on_caller {
                in_case_flag.store(true, Ordering::SeqCst);
            }
            inner.resolve(result);
            if on_caller {
                in_case_flag.store(false, Ordering::SeqCst);
            }
        });
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (self.0)(case))) {
            // A panic from the downstream continuation running on this thread
            // belongs to the consumer.
            if in_case.load(Ordering::SeqCst) {
                resume_unwind(payload);
            }
            shared.resolve(Err(Error::from_panic(payload)));
        }
    }
}

struct MapNode<T: 'static, F> {
    source: Deferred<T>,
    f: F,
}

impl<T, U, F> DeferredNode<U> for MapNode<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    fn select(self: Arc<Self>, case: Case<U>) {
        let source = self.source.clone();
        source.select(Case::new(move |result| {
            let result = result.and_then(|value| catch(|| (self.f)(value)));
            case.resolve(result)
        }))
    }
}

struct TryMapNode<T: 'static, F> {
    source: Deferred<T>,
    f: F,
}

impl<T, U, E, F> DeferredNode<U> for TryMapNode<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Into<Error>,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    fn select(self: Arc<Self>, case: Case<U>) {
        let source = self.source.clone();
        source.select(Case::new(move |result| {
            let result = result
                .and_then(|value| catch(|| (self.f)(value)))
                .and_then(|r| r.map_err(Into::into));
            case.resolve(result)
        }))
    }
}

struct AndThenNode<T: 'static, F> {
    source: Deferred<T>,
    f: F,
}

impl<T, U, F> DeferredNode<U> for AndThenNode<T, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Deferred<U> + Send + Sync + 'static,
{
    fn select(self: Arc<Self>, case: Case<U>) {
        let source = self.source.clone();
        source.select(Case::new(move |result| {
            match result.and_then(|value| catch(|| (self.f)(value))) {
                Ok(next) => next.select(case),
                Err(e) => case.failure(e),
            }
        }))
    }
}
