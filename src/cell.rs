use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex, Weak},
};

use derive_ex::derive_ex;
use serde::{Deserialize, Serialize};

use crate::{
    ConfigError, Executor, Inline, ObserveError,
    lifecycle::{Immortal, LifecycleEvent, LifecycleObserver, LifecycleOwner, LifecycleState},
};


pub(crate) trait Notify<T>: Send + Sync + 'static {
    fn notify(&self, value: &T);
}

impl<T, F> Notify<T> for F
where
    F: Fn(&T) + Send + Sync + 'static,
{
    fn notify(&self, value: &T) {
        self(value)
    }
}

/// A callback registered with an [`ActiveCell`].
///
/// Clones are the same observer: registering a clone again is a no-op, and
/// any clone can be used to remove it.
#[derive_ex(Clone, bound())]
pub struct Observer<T: 'static>(Arc<dyn Notify<T>>);

impl<T: 'static> Observer<T> {
    pub fn new(f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    fn notify(&self, value: &T) {
        self.0.notify(value)
    }
}

fn owner_key(owner: &dyn LifecycleOwner) -> usize {
    owner as *const dyn LifecycleOwner as *const () as usize
}

/// Configuration for an [`ActiveCell`].
///
/// An owner is active from its `activate` event until its `deactivate`
/// event. The defaults are [`Resume`](LifecycleEvent::Resume) and
/// [`Pause`](LifecycleEvent::Pause), a sticky cell, and [`Inline`] posting.
#[derive(Clone)]
pub struct ActiveCellBuilder {
    executor: Arc<dyn Executor>,
    activator: LifecycleEvent,
    deactivator: LifecycleEvent,
    sticky: bool,
}

impl Default for ActiveCellBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveCellBuilder {
    pub fn new() -> Self {
        Self {
            executor: Arc::new(Inline),
            activator: LifecycleEvent::Resume,
            deactivator: LifecycleEvent::Pause,
            sticky: true,
        }
    }

    /// Sets the executor that runs [`ActiveCell::post`].
    pub fn post_on(mut self, executor: impl Executor) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Sets the event that starts an owner's active window.
    ///
    /// Must be `Create`, `Start` or `Resume`.
    pub fn activate(mut self, event: LifecycleEvent) -> Result<Self, ConfigError> {
        match event {
            LifecycleEvent::Create | LifecycleEvent::Start | LifecycleEvent::Resume => {
                self.activator = event;
                Ok(self)
            }
            _ => Err(ConfigError::InvalidActivator(event)),
        }
    }

    /// Sets the event that ends an owner's active window.
    ///
    /// Must be `Pause`, `Stop` or `Destroy`.
    pub fn deactivate(mut self, event: LifecycleEvent) -> Result<Self, ConfigError> {
        match event {
            LifecycleEvent::Pause | LifecycleEvent::Stop | LifecycleEvent::Destroy => {
                self.deactivator = event;
                Ok(self)
            }
            _ => Err(ConfigError::InvalidDeactivator(event)),
        }
    }

    /// A sticky cell replays its value when an observer is added to an active
    /// owner and whenever an owner becomes active.
    pub fn sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    /// Builds an empty cell.
    ///
    /// Fails if the activator does not come before the deactivator in event order.
    pub fn build<T: Send + Sync + 'static>(self) -> Result<ActiveCell<T>, ConfigError> {
        if self.activator >= self.deactivator {
            return Err(ConfigError::Misordered {
                activator: self.activator,
                deactivator: self.deactivator,
            });
        }
        Ok(ActiveCell(Arc::new(CellNode {
            executor: self.executor,
            activator: self.activator,
            deactivator: self.deactivator,
            sticky: self.sticky,
            state: Mutex::new(CellState {
                value: None,
                owners: HashMap::new(),
                observer_owner: HashMap::new(),
            }),
        })))
    }

    /// Builds a cell holding `seed`.
    pub fn build_with<T: Send + Sync + 'static>(self, seed: T) -> Result<ActiveCell<T>, ConfigError> {
        let cell = self.build()?;
        cell.set(seed);
        Ok(cell)
    }
}

/// A value whose observers are notified only while their owner is active.
///
/// Each observer belongs to one [`LifecycleOwner`]. [`set`](Self::set) notifies
/// the observers of owners currently inside their active window; a sticky
/// cell also replays its value when an owner (re)enters the window. When an
/// owner is destroyed, its observers are removed.
///
/// ```
/// use altlive::{ActiveCell, Lifecycle, LifecycleState, Observer};
///
/// let cell = ActiveCell::new();
/// let owner = Lifecycle::new();
/// cell.observe(owner.clone(), &Observer::new(|v: &i32| println!("{v}"))).unwrap();
/// cell.set(1); // not delivered, the owner is not resumed yet
/// owner.move_to(LifecycleState::Resumed); // prints 1
/// ```
#[derive_ex(Clone, bound())]
pub struct ActiveCell<T: 'static>(Arc<CellNode<T>>);

struct CellNode<T: 'static> {
    executor: Arc<dyn Executor>,
    activator: LifecycleEvent,
    deactivator: LifecycleEvent,
    sticky: bool,
    state: Mutex<CellState<T>>,
}

struct CellState<T: 'static> {
    value: Option<Arc<T>>,
    owners: HashMap<usize, OwnerEntry<T>>,
    observer_owner: HashMap<usize, usize>,
}

struct OwnerEntry<T: 'static> {
    owner: Arc<dyn LifecycleOwner>,
    binding: Arc<dyn LifecycleObserver>,
    observers: Vec<Observer<T>>,
    active: bool,
}

/// Forwards an owner's lifecycle events to the cell without keeping it alive.
struct Binding<T: 'static> {
    cell: Weak<CellNode<T>>,
    owner: usize,
}

impl<T: Send + Sync + 'static> LifecycleObserver for Binding<T> {
    fn on_event(&self, event: LifecycleEvent) {
        if let Some(cell) = self.cell.upgrade() {
            cell.on_event(self.owner, event);
        }
    }
}

impl<T: Send + Sync + 'static> ActiveCell<T> {
    /// An empty, sticky cell active between `Resume` and `Pause`.
    pub fn new() -> Self {
        Self::from_valid_builder(ActiveCellBuilder::new())
    }

    /// Like [`new`](Self::new), but holding `seed`.
    pub fn with_value(seed: T) -> Self {
        let cell = Self::new();
        cell.set(seed);
        cell
    }

    fn from_valid_builder(builder: ActiveCellBuilder) -> Self {
        match builder.build() {
            Ok(cell) => cell,
            Err(e) => unreachable!("default configuration is valid: {e}"),
        }
    }

    /// Stores `value` and notifies the observers of every active owner before returning.
    ///
    /// Observers run on the calling thread, in registration order within an
    /// owner. The observer list is captured before the first call, so adding
    /// or removing observers from inside an observer affects only later calls.
    pub fn set(&self, value: T) {
        let value = Arc::new(value);
        let targets: Vec<_> = {
            let mut s = self.0.state.lock().unwrap();
            s.value = Some(value.clone());
            s.owners
                .values()
                .filter(|e| e.active)
                .flat_map(|e| e.observers.iter().cloned())
                .collect()
        };
        for observer in targets {
            observer.notify(&value);
        }
    }

    /// Runs [`set`](Self::set) on the configured executor.
    pub fn post(&self, value: T) {
        let cell = self.clone();
        self.0.executor.execute(Box::new(move || cell.set(value)));
    }

    /// Registers `observer` with `owner`.
    ///
    /// Registering the same pair again does nothing. Nothing happens if the
    /// owner is already destroyed. If the cell is sticky, holds a value and
    /// the owner is active, the observer is notified before this returns.
    pub fn observe(
        &self,
        owner: Arc<dyn LifecycleOwner>,
        observer: &Observer<T>,
    ) -> Result<(), ObserveError> {
        if owner.current_state() == LifecycleState::Destroyed {
            return Ok(());
        }
        let key = owner_key(&*owner);
        let (subscribe, replay) = {
            let mut guard = self.0.state.lock().unwrap();
            let s = &mut *guard;
            match s.observer_owner.get(&observer.key()) {
                Some(&existing) if existing != key => {
                    return Err(ObserveError::OwnedByAnotherOwner);
                }
                Some(_) => return Ok(()),
                None => {}
            }
            s.observer_owner.insert(observer.key(), key);
            match s.owners.entry(key) {
                Entry::Occupied(mut e) => {
                    let e = e.get_mut();
                    e.observers.push(observer.clone());
                    let replay = if self.0.sticky && e.active {
                        s.value.clone()
                    } else {
                        None
                    };
                    (None, replay)
                }
                Entry::Vacant(e) => {
                    let binding: Arc<dyn LifecycleObserver> = Arc::new(Binding {
                        cell: Arc::downgrade(&self.0),
                        owner: key,
                    });
                    e.insert(OwnerEntry {
                        owner: owner.clone(),
                        binding: binding.clone(),
                        observers: vec![observer.clone()],
                        active: false,
                    });
                    (Some(binding), None)
                }
            }
        };
        // Replays the owner's events, which activates it if it is already in its window.
        if let Some(binding) = subscribe {
            owner.add_observer(binding);
        }
        if let Some(value) = replay {
            observer.notify(&value);
        }
        Ok(())
    }

    /// Registers `observer` with the [`Immortal`] owner, so it sees every value
    /// until it is removed.
    pub fn observe_forever(&self, observer: &Observer<T>) -> Result<(), ObserveError> {
        self.observe(Immortal::instance(), observer)
    }

    /// Registers `f` to be called with the next delivered value, after which
    /// it removes itself.
    ///
    /// Returns the observer so it can be removed before it fires.
    pub fn observe_once(
        &self,
        owner: Arc<dyn LifecycleOwner>,
        f: impl FnOnce(&T) + Send + 'static,
    ) -> Result<Observer<T>, ObserveError> {
        let observer = self.once_observer(f);
        self.observe(owner, &observer)?;
        Ok(observer)
    }

    pub fn observe_once_forever(
        &self,
        f: impl FnOnce(&T) + Send + 'static,
    ) -> Result<Observer<T>, ObserveError> {
        self.observe_once(Immortal::instance(), f)
    }

    fn once_observer(&self, f: impl FnOnce(&T) + Send + 'static) -> Observer<T> {
        let cell = Arc::downgrade(&self.0);
        Observer(Arc::new_cyclic(|this: &Weak<OnceObserver<T>>| OnceObserver {
            f: Mutex::new(Some(Box::new(f))),
            cell,
            this: this.clone(),
        }))
    }

    /// Detaches `observer`. Its owner is forgotten once it has no observers left.
    pub fn remove_observer(&self, observer: &Observer<T>) {
        self.0.remove_observer(observer.key());
    }

    /// Detaches every observer of `owner` and forgets the owner.
    pub fn remove_observers(&self, owner: &dyn LifecycleOwner) {
        self.0.forget_owner(owner_key(owner));
    }

    /// The current value, if any.
    pub fn value(&self) -> Option<Arc<T>> {
        self.0.state.lock().unwrap().value.clone()
    }

    pub fn has_value(&self) -> bool {
        self.0.state.lock().unwrap().value.is_some()
    }

    /// Drops the current value without notifying anyone.
    pub fn clear(&self) {
        self.0.state.lock().unwrap().value = None;
    }

    /// The number of owners that currently have observers.
    pub fn owner_count(&self) -> usize {
        self.0.state.lock().unwrap().owners.len()
    }

    /// The number of registered observers across all owners.
    pub fn observer_count(&self) -> usize {
        self.0.state.lock().unwrap().observer_owner.len()
    }
}

impl<T: Send + Sync + 'static> Default for ActiveCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> CellNode<T> {
    fn on_event(&self, owner: usize, event: LifecycleEvent) {
        if event == LifecycleEvent::Destroy {
            tracing::trace!(owner, "owner destroyed");
            self.forget_owner(owner);
            return;
        }
        let replay = {
            let mut guard = self.state.lock().unwrap();
            let s = &mut *guard;
            let Some(e) = s.owners.get_mut(&owner) else {
                return;
            };
            if event == self.activator {
                tracing::trace!(owner, %event, "owner activated");
                e.active = true;
                match &s.value {
                    Some(value) if self.sticky => Some((value.clone(), e.observers.clone())),
                    _ => None,
                }
            } else if event == self.deactivator {
                tracing::trace!(owner, %event, "owner deactivated");
                e.active = false;
                None
            } else {
                None
            }
        };
        if let Some((value, observers)) = replay {
            for observer in observers {
                observer.notify(&value);
            }
        }
    }

    fn remove_observer(&self, observer: usize) {
        let forgotten = {
            let mut guard = self.state.lock().unwrap();
            let s = &mut *guard;
            let Some(owner) = s.observer_owner.remove(&observer) else {
                return;
            };
            let Entry::Occupied(mut e) = s.owners.entry(owner) else {
                return;
            };
            e.get_mut().observers.retain(|o| o.key() != observer);
            if !e.get().observers.is_empty() {
                return;
            }
            e.remove()
        };
        forgotten.owner.remove_observer(&forgotten.binding);
    }

    fn forget_owner(&self, owner: usize) {
        let forgotten = {
            let mut guard = self.state.lock().unwrap();
            let s = &mut *guard;
            let Some(e) = s.owners.remove(&owner) else {
                return;
            };
            for observer in &e.observers {
                s.observer_owner.remove(&observer.key());
            }
            e
        };
        forgotten.owner.remove_observer(&forgotten.binding);
    }
}

struct OnceObserver<T: 'static> {
    f: Mutex<Option<Box<dyn FnOnce(&T) + Send>>>,
    cell: Weak<CellNode<T>>,
    this: Weak<OnceObserver<T>>,
}

impl<T: Send + Sync + 'static> Notify<T> for OnceObserver<T> {
    fn notify(&self, value: &T) {
        let f = self.f.lock().unwrap().take();
        let Some(f) = f else {
            return;
        };
        f(value);
        if let (Some(cell), Some(this)) = (self.cell.upgrade(), self.this.upgrade()) {
            cell.remove_observer(Observer::<T>(this).key());
        }
    }
}

impl<T> Serialize for ActiveCell<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        self.value().as_deref().serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for ActiveCell<T>
where
    T: Deserialize<'de> + Send + Sync + 'static,
{
    fn deserialize<D>(deserializer: D) -> Result<ActiveCell<T>, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let cell = ActiveCell::new();
        if let Some(value) = Option::<T>::deserialize(deserializer)? {
            cell.set(value);
        }
        Ok(cell)
    }
}
