use std::sync::{Arc, Mutex};

use derive_ex::derive_ex;

use crate::{
    ActiveCell, ActiveCellBuilder, ConfigError, Deferred, Error, ObserveError, Observer,
    error::catch, lifecycle::LifecycleOwner,
};

#[cfg(test)]
mod tests;

/// The state of the latest submission to a [`ProgressCell`].
#[derive(Debug, Clone)]
pub enum Progress<K, V> {
    /// The work for `key` has started. `current` is the last successful value
    /// of any earlier submission.
    Running { key: K, current: Option<V> },
    Done { key: K, value: V },
    Failed { key: K, error: Error },
}

impl<K, V> Progress<K, V> {
    pub fn key(&self) -> &K {
        match self {
            Self::Running { key, .. } | Self::Done { key, .. } | Self::Failed { key, .. } => key,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Calls the visitor method matching this phase.
    pub fn visit(&self, visitor: &(impl ProgressVisitor<K, V> + ?Sized)) {
        match self {
            Self::Running { key, current } => visitor.running(key, current.as_ref()),
            Self::Done { key, value } => visitor.done(key, value),
            Self::Failed { key, error } => visitor.failed(key, error),
        }
    }

    /// A `Deferred` of the value this progress carries: the previous value
    /// while running, the new value when done, the error when failed.
    pub fn to_deferred(&self) -> Deferred<Option<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        match self {
            Self::Running { current, .. } => Deferred::just(current.clone()),
            Self::Done { value, .. } => Deferred::just(Some(value.clone())),
            Self::Failed { error, .. } => Deferred::raise(error.clone()),
        }
    }
}

/// Handles each phase of a [`Progress`].
pub trait ProgressVisitor<K, V> {
    fn running(&self, key: &K, current: Option<&V>);

    fn done(&self, key: &K, value: &V);

    /// By default, logs the error and panics with it as the payload, so a
    /// failure nobody handles is not lost.
    fn failed(&self, _key: &K, error: &Error) {
        tracing::error!(%error, "unhandled task failure");
        std::panic::panic_any(error.clone())
    }
}

/// A visitor that calls `f` on success and ignores the other phases.
pub fn when_done<V, F>(f: F) -> WhenDone<F>
where
    F: Fn(&V),
{
    WhenDone(f)
}

pub struct WhenDone<F>(F);

impl<K, V, F: Fn(&V)> ProgressVisitor<K, V> for WhenDone<F> {
    fn running(&self, _key: &K, _current: Option<&V>) {}

    fn done(&self, _key: &K, value: &V) {
        (self.0)(value)
    }

    fn failed(&self, _key: &K, _error: &Error) {}
}

/// A visitor that calls `on_done` on success and `on_failed` on failure.
pub fn when_done_or_failed<V, D, E>(on_done: D, on_failed: E) -> WhenDoneOrFailed<D, E>
where
    D: Fn(&V),
    E: Fn(&Error),
{
    WhenDoneOrFailed { on_done, on_failed }
}

pub struct WhenDoneOrFailed<D, E> {
    on_done: D,
    on_failed: E,
}

impl<K, V, D: Fn(&V), E: Fn(&Error)> ProgressVisitor<K, V> for WhenDoneOrFailed<D, E> {
    fn running(&self, _key: &K, _current: Option<&V>) {}

    fn done(&self, _key: &K, value: &V) {
        (self.on_done)(value)
    }

    fn failed(&self, _key: &K, error: &Error) {
        (self.on_failed)(error)
    }
}

/// Tracks keyed work through [`Progress`] states published on an [`ActiveCell`].
///
/// Each [`submit`](Self::submit) publishes `Running`, runs the producer and
/// publishes `Done` or `Failed` when its `Deferred` resolves. Publication goes
/// through [`ActiveCell::post`], so it happens on the cell's executor.
///
/// ```
/// use altlive::{Deferred, Immortal, ProgressCell, when_done};
///
/// let task = ProgressCell::new(|n: u32| Deferred::just(n * 2));
/// task.observe_visitor(Immortal::instance(), when_done(|v: &u32| println!("{v}"))).unwrap();
/// task.submit(Some(21)); // prints 42
/// ```
#[derive_ex(Clone, bound())]
pub struct ProgressCell<K: 'static, V: 'static> {
    cell: ActiveCell<Option<Progress<K, V>>>,
    last_value: Arc<Mutex<Option<V>>>,
    producer: Arc<dyn Fn(K) -> Deferred<V> + Send + Sync>,
}

impl<K, V> ProgressCell<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(producer: impl Fn(K) -> Deferred<V> + Send + Sync + 'static) -> Self {
        Self::from_cell(ActiveCell::new(), producer)
    }

    /// Publishes through a cell built from `builder`.
    pub fn from_builder(
        builder: ActiveCellBuilder,
        producer: impl Fn(K) -> Deferred<V> + Send + Sync + 'static,
    ) -> Result<Self, ConfigError> {
        Ok(Self::from_cell(builder.build()?, producer))
    }

    pub fn from_cell(
        cell: ActiveCell<Option<Progress<K, V>>>,
        producer: impl Fn(K) -> Deferred<V> + Send + Sync + 'static,
    ) -> Self {
        Self {
            cell,
            last_value: Arc::new(Mutex::new(None)),
            producer: Arc::new(producer),
        }
    }

    /// Starts work for `key`, or clears the published progress if `key` is `None`.
    pub fn submit(&self, key: Option<K>) {
        let Some(key) = key else {
            tracing::trace!("progress cleared");
            self.cell.post(None);
            return;
        };
        let current = self.last_value.lock().unwrap().clone();
        tracing::trace!("progress running");
        self.cell.post(Some(Progress::Running {
            key: key.clone(),
            current,
        }));
        let deferred = match catch(|| (self.producer)(key.clone())) {
            Ok(deferred) => deferred,
            Err(error) => {
                self.cell.post(Some(Progress::Failed { key, error }));
                return;
            }
        };
        let done = self.clone();
        let failed = self.clone();
        let failed_key = key.clone();
        deferred.resolve(
            move |value| {
                *done.last_value.lock().unwrap() = Some(value.clone());
                tracing::trace!("progress done");
                done.cell.post(Some(Progress::Done { key, value }));
            },
            move |error| {
                tracing::trace!(%error, "progress failed");
                failed.cell.post(Some(Progress::Failed {
                    key: failed_key,
                    error,
                }));
            },
        );
    }

    /// The most recently published progress.
    pub fn current(&self) -> Option<Progress<K, V>> {
        self.cell.value().and_then(|p| (*p).clone())
    }

    pub fn observe(
        &self,
        owner: Arc<dyn LifecycleOwner>,
        observer: &Observer<Option<Progress<K, V>>>,
    ) -> Result<(), ObserveError> {
        self.cell.observe(owner, observer)
    }

    pub fn observe_forever(&self, observer: &Observer<Option<Progress<K, V>>>) -> Result<(), ObserveError> {
        self.cell.observe_forever(observer)
    }

    /// Observes with a visitor. Cleared progress is not delivered to it.
    ///
    /// Returns the observer so it can be removed later.
    pub fn observe_visitor(
        &self,
        owner: Arc<dyn LifecycleOwner>,
        visitor: impl ProgressVisitor<K, V> + Send + Sync + 'static,
    ) -> Result<Observer<Option<Progress<K, V>>>, ObserveError> {
        let observer = Self::visitor_observer(visitor);
        self.cell.observe(owner, &observer)?;
        Ok(observer)
    }

    /// Wraps a visitor as an observer of this cell's progress.
    pub fn visitor_observer(
        visitor: impl ProgressVisitor<K, V> + Send + Sync + 'static,
    ) -> Observer<Option<Progress<K, V>>> {
        Observer::new(move |progress: &Option<Progress<K, V>>| {
            if let Some(progress) = progress {
                progress.visit(&visitor);
            }
        })
    }

    pub fn remove_observer(&self, observer: &Observer<Option<Progress<K, V>>>) {
        self.cell.remove_observer(observer)
    }

    pub fn remove_observers(&self, owner: &dyn LifecycleOwner) {
        self.cell.remove_observers(owner)
    }

    pub fn cell(&self) -> &ActiveCell<Option<Progress<K, V>>> {
        &self.cell
    }
}
