use std::sync::Arc;

use crate::{Case, Deferred, DeferredNode, Error, Executor};

use super::Transform;

/// Resolves the source on an executor.
///
/// The continuation runs wherever the source delivers its outcome, which for
/// a synchronous source is the executor's thread.
#[derive(Clone)]
pub struct ExecuteOn(Arc<dyn Executor>);

impl ExecuteOn {
    pub fn new(executor: impl Executor) -> Self {
        Self(Arc::new(executor))
    }

    /// A `Deferred` that runs `f` on `executor` each time it is resolved.
    pub fn run<T: Send + 'static, E: Into<Error>>(
        executor: impl Executor,
        f: impl Fn() -> Result<T, E> + Send + Sync + 'static,
    ) -> Deferred<T> {
        Deferred::from_fn(f).pipe(Self::new(executor))
    }
}

impl<T: Send + 'static> Transform<T> for ExecuteOn {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        Deferred::from_node(ExecuteOnNode {
            source,
            executor: self.0,
        })
    }
}

struct ExecuteOnNode<T: 'static> {
    source: Deferred<T>,
    executor: Arc<dyn Executor>,
}

impl<T: Send + 'static> DeferredNode<T> for ExecuteOnNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let source = self.source.clone();
        self.executor.execute(Box::new(move || source.select(case)));
    }
}

/// Resolves the source in place and delivers its outcome on an executor.
#[derive(Clone)]
pub struct ReceiveOn(Arc<dyn Executor>);

impl ReceiveOn {
    pub fn new(executor: impl Executor) -> Self {
        Self(Arc::new(executor))
    }
}

impl<T: Send + 'static> Transform<T> for ReceiveOn {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        Deferred::from_node(ReceiveOnNode {
            source,
            executor: self.0,
        })
    }
}

struct ReceiveOnNode<T: 'static> {
    source: Deferred<T>,
    executor: Arc<dyn Executor>,
}

impl<T: Send + 'static> DeferredNode<T> for ReceiveOnNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let executor = self.executor.clone();
        self.source.select(Case::new(move |result| {
            executor.execute(Box::new(move || case.resolve(result)));
        }));
    }
}
