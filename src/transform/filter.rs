use std::sync::Arc;

use derive_ex::Ex;

use crate::{Case, Deferred, DeferredNode, NotFound, error::catch};

use super::Transform;

/// Turns successes that fail a predicate into [`NotFound`] failures.
#[derive(Ex)]
#[derive_ex(Clone, bound())]
pub struct Filter<T: 'static>(Arc<dyn Fn(&T) -> bool + Send + Sync>);

impl<T: Send + 'static> Filter<T> {
    /// Keeps values for which `predicate` returns true.
    pub fn accept(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Keeps values for which `predicate` returns false.
    pub fn reject(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self::accept(move |value| !predicate(value))
    }
}

impl<T: Send + 'static> Transform<T> for Filter<T> {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        Deferred::from_node(FilterNode {
            source,
            predicate: self.0,
        })
    }
}

struct FilterNode<T: 'static> {
    source: Deferred<T>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Send + 'static> DeferredNode<T> for FilterNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let source = self.source.clone();
        source.select(Case::new(move |result| match result {
            Ok(value) => match catch(|| (self.predicate)(&value)) {
                Ok(true) => case.success(value),
                Ok(false) => case.failure(NotFound),
                Err(e) => case.failure(e),
            },
            Err(e) => case.failure(e),
        }))
    }
}
