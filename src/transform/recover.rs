use std::sync::Arc;

use derive_ex::derive_ex;

use crate::{Case, Deferred, DeferredNode, Error, error::catch};

use super::Transform;

/// Replaces a failure with a fallback computation. Successes pass through.
#[derive_ex(Clone, bound())]
pub struct Recover<T: 'static>(Handler<T>);

#[derive_ex(Clone, bound())]
enum Handler<T: 'static> {
    Value(Arc<dyn Fn(Error) -> Result<T, Error> + Send + Sync>),
    Flat(Arc<dyn Fn(Error) -> Deferred<T> + Send + Sync>),
}

impl<T: Send + 'static> Recover<T> {
    /// Resolves the `Deferred` returned by `handler` in place of the failure.
    pub fn flat_from(handler: impl Fn(Error) -> Deferred<T> + Send + Sync + 'static) -> Self {
        Self(Handler::Flat(Arc::new(handler)))
    }

    /// Delivers the result of `handler` in place of the failure.
    #[allow(clippy::should_implement_trait)]
    pub fn from<E: Into<Error>>(
        handler: impl Fn(Error) -> Result<T, E> + Send + Sync + 'static,
    ) -> Self {
        Self(Handler::Value(Arc::new(move |e| handler(e).map_err(Into::into))))
    }
}

impl<T: Send + 'static> Transform<T> for Recover<T> {
    type Output = Deferred<T>;
    fn apply(self, source: Deferred<T>) -> Deferred<T> {
        Deferred::from_node(RecoverNode {
            source,
            handler: self.0,
        })
    }
}

struct RecoverNode<T: 'static> {
    source: Deferred<T>,
    handler: Handler<T>,
}

impl<T: Send + 'static> DeferredNode<T> for RecoverNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let source = self.source.clone();
        source.select(Case::new(move |result| {
            let error = match result {
                Ok(value) => return case.success(value),
                Err(error) => error,
            };
            match &self.handler {
                Handler::Value(f) => case.resolve(catch(|| f(error)).and_then(|r| r)),
                Handler::Flat(f) => match catch(|| f(error)) {
                    Ok(fallback) => fallback.select(case),
                    Err(e) => case.failure(e),
                },
            }
        }))
    }
}
