//! Owner lifecycles that gate delivery in an [`ActiveCell`](crate::ActiveCell).

use std::sync::{Arc, LazyLock, Mutex};

use parse_display::Display;
use slabmap::SlabMap;


/// A transition in an owner's lifecycle, in the order they normally happen.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleEvent {
    Create,
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
}

impl LifecycleEvent {
    /// The state an owner is in right after this event.
    pub fn target_state(self) -> LifecycleState {
        match self {
            Self::Create | Self::Stop => LifecycleState::Created,
            Self::Start | Self::Pause => LifecycleState::Started,
            Self::Resume => LifecycleState::Resumed,
            Self::Destroy => LifecycleState::Destroyed,
        }
    }

    /// The event that moves an owner up out of `state`, if any.
    pub fn up_from(state: LifecycleState) -> Option<Self> {
        match state {
            LifecycleState::Initialized => Some(Self::Create),
            LifecycleState::Created => Some(Self::Start),
            LifecycleState::Started => Some(Self::Resume),
            LifecycleState::Resumed | LifecycleState::Destroyed => None,
        }
    }

    /// The event that moves an owner down out of `state`, if any.
    pub fn down_from(state: LifecycleState) -> Option<Self> {
        match state {
            LifecycleState::Resumed => Some(Self::Pause),
            LifecycleState::Started => Some(Self::Stop),
            LifecycleState::Created | LifecycleState::Initialized => Some(Self::Destroy),
            LifecycleState::Destroyed => None,
        }
    }

    /// The events a newly added observer sees for an owner in `state`.
    pub fn leading_to(state: LifecycleState) -> impl Iterator<Item = Self> {
        let mut current = LifecycleState::Initialized;
        std::iter::from_fn(move || {
            if current >= state {
                return None;
            }
            let event = Self::up_from(current)?;
            current = event.target_state();
            Some(event)
        })
    }
}

/// Where an owner is in its lifecycle. Ordered from least to most active.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Destroyed,
    Initialized,
    Created,
    Started,
    Resumed,
}

impl LifecycleState {
    pub fn is_at_least(self, state: LifecycleState) -> bool {
        self >= state
    }
}

pub trait LifecycleObserver: Send + Sync + 'static {
    fn on_event(&self, event: LifecycleEvent);
}

impl<F> LifecycleObserver for F
where
    F: Fn(LifecycleEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: LifecycleEvent) {
        self(event)
    }
}

/// Something with a lifecycle that observers can follow.
pub trait LifecycleOwner: Send + Sync + 'static {
    fn current_state(&self) -> LifecycleState;

    /// Registers `observer` and immediately delivers the events leading up to
    /// the current state, in order.
    fn add_observer(&self, observer: Arc<dyn LifecycleObserver>);

    fn remove_observer(&self, observer: &Arc<dyn LifecycleObserver>);
}

pub(crate) fn same_observer(a: &Arc<dyn LifecycleObserver>, b: &Arc<dyn LifecycleObserver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// A lifecycle driven by calls to [`handle_event`](Self::handle_event).
///
/// Observers are notified outside the internal lock, so they may add or
/// remove observers while handling an event. Once destroyed, the lifecycle
/// ignores further events and drops its observers.
pub struct Lifecycle(Mutex<LifecycleData>);

struct LifecycleData {
    state: LifecycleState,
    observers: SlabMap<Arc<dyn LifecycleObserver>>,
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(LifecycleData {
            state: LifecycleState::Initialized,
            observers: SlabMap::new(),
        })))
    }

    /// Moves to the state after `event` and notifies every observer.
    pub fn handle_event(&self, event: LifecycleEvent) {
        let observers: Vec<_> = {
            let mut d = self.0.lock().unwrap();
            if d.state == LifecycleState::Destroyed {
                return;
            }
            d.state = event.target_state();
            if event == LifecycleEvent::Destroy {
                std::mem::take(&mut d.observers)
                    .into_iter()
                    .map(|(_, o)| o)
                    .collect()
            } else {
                d.observers.iter().map(|(_, o)| o.clone()).collect()
            }
        };
        for observer in observers {
            observer.on_event(event);
        }
    }

    /// Emits the events needed to reach `state`, one step at a time.
    pub fn move_to(&self, state: LifecycleState) {
        loop {
            let current = self.current_state();
            let event = if current < state {
                LifecycleEvent::up_from(current)
            } else if current > state {
                LifecycleEvent::down_from(current)
            } else {
                None
            };
            match event {
                Some(event) => self.handle_event(event),
                None => return,
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.0.lock().unwrap().observers.len()
    }
}

impl LifecycleOwner for Lifecycle {
    fn current_state(&self) -> LifecycleState {
        self.0.lock().unwrap().state
    }

    fn add_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        let state = {
            let mut d = self.0.lock().unwrap();
            if d.state == LifecycleState::Destroyed {
                return;
            }
            d.observers.insert(observer.clone());
            d.state
        };
        for event in LifecycleEvent::leading_to(state) {
            observer.on_event(event);
        }
    }

    fn remove_observer(&self, observer: &Arc<dyn LifecycleObserver>) {
        let mut d = self.0.lock().unwrap();
        let key = d
            .observers
            .iter()
            .find(|(_, o)| same_observer(o, observer))
            .map(|(key, _)| key);
        if let Some(key) = key {
            d.observers.remove(key);
        }
    }
}

static IMMORTAL: LazyLock<Arc<Immortal>> = LazyLock::new(|| Arc::new(Immortal { _private: () }));

/// An owner that is always resumed and never destroyed.
///
/// Observing an [`ActiveCell`](crate::ActiveCell) with it delivers every value
/// until the observer is removed.
pub struct Immortal {
    _private: (),
}

impl Immortal {
    /// The process-wide instance, created on first access.
    pub fn instance() -> Arc<Immortal> {
        IMMORTAL.clone()
    }
}

impl LifecycleOwner for Immortal {
    fn current_state(&self) -> LifecycleState {
        LifecycleState::Resumed
    }

    fn add_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        for event in LifecycleEvent::leading_to(LifecycleState::Resumed) {
            observer.on_event(event);
        }
    }

    fn remove_observer(&self, _observer: &Arc<dyn LifecycleObserver>) {}
}
