use std::{
    mem::take,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use derive_ex::derive_ex;
use slabmap::SlabMap;

use crate::{Case, Deferred, DeferredNode, deferred::SharedCase};

/// A source whose outcome can be suppressed.
///
/// After [`cancel`](Self::cancel), no outcome is delivered to any continuation
/// of this `Canceller`, including resolutions already in flight. Their
/// continuations are dropped, so a thread blocked in [`Deferred::wait`]
/// returns [`Dropped`](crate::Dropped).
#[derive_ex(Clone, bound())]
pub struct Canceller<T: 'static>(Arc<CancelNode<T>>);

type OnCancel = Box<dyn FnOnce() + Send>;

struct CancelNode<T: 'static> {
    source: Deferred<T>,
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<OnCancel>>,
    pending: Mutex<SlabMap<SharedCase<T>>>,
}

impl<T: Send + 'static> Canceller<T> {
    pub fn new(source: Deferred<T>) -> Self {
        Self::from_parts(source, None)
    }

    /// Runs `on_cancel` the first time [`cancel`](Self::cancel) is called.
    ///
    /// Use it to stop the underlying work, for example by aborting a request.
    pub fn with(source: Deferred<T>, on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self::from_parts(source, Some(Box::new(on_cancel)))
    }

    fn from_parts(source: Deferred<T>, on_cancel: Option<OnCancel>) -> Self {
        Self(Arc::new(CancelNode {
            source,
            cancelled: AtomicBool::new(false),
            on_cancel: Mutex::new(on_cancel),
            pending: Mutex::new(SlabMap::new()),
        }))
    }

    pub fn deferred(&self) -> Deferred<T> {
        Deferred::from_arc(self.0.clone())
    }

    pub fn select(&self, case: Case<T>) {
        self.0.clone().select(case)
    }

    /// Suppresses every present and future outcome. Calling it again does nothing.
    pub fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = take(&mut *self.0.pending.lock().unwrap());
        tracing::debug!(pending = pending.len(), "cancelled");
        for (_, case) in pending {
            case.discard();
        }
        let on_cancel = self.0.on_cancel.lock().unwrap().take();
        if let Some(on_cancel) = on_cancel {
            on_cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }
}

impl<T: Send + 'static> From<Canceller<T>> for Deferred<T> {
    fn from(canceller: Canceller<T>) -> Self {
        canceller.deferred()
    }
}

impl<T: Send + 'static> DeferredNode<T> for CancelNode<T> {
    fn select(self: Arc<Self>, case: Case<T>) {
        let case = SharedCase::new(case);
        let key = {
            let mut pending = self.pending.lock().unwrap();
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }
            pending.insert(case.clone())
        };
        let node = self.clone();
        self.source.select(Case::new(move |result| {
            if !node.cancelled.load(Ordering::SeqCst) {
                case.resolve(result);
            }
            node.pending.lock().unwrap().remove(key);
        }));
    }
}
