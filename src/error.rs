use std::{
    any::Any,
    error::Error as StdError,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parse_display::Display;

use crate::lifecycle::LifecycleEvent;


/// The failure branch of a [`Deferred`](crate::Deferred).
///
/// An opaque, cheaply cloneable wrapper around any error type. The same
/// failure may be delivered to many receivers (memoized outcomes, progress
/// observers), so it is shared rather than owned.
#[derive(Clone)]
pub struct Error(Arc<dyn StdError + Send + Sync + 'static>);

impl Error {
    pub fn new(error: impl StdError + Send + Sync + 'static) -> Self {
        Self(Arc::new(error))
    }

    /// Creates an error from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(Message(message.to_string()))
    }

    /// A panic that carries an `Error` as its payload is unwrapped back into that error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<Error>() {
            Ok(error) => *error,
            Err(payload) => Self::new(Panicked::from_payload(payload)),
        }
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.0.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref()
    }

    pub fn as_std(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }

    /// Returns true if both values refer to the same underlying failure.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<E: StdError + Send + Sync + 'static> From<E> for Error {
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[derive(Debug, Display)]
#[display("{0}")]
struct Message(String);

impl StdError for Message {}

/// A user-supplied function panicked while a combinator was running it.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("panicked: {message}")]
pub struct Panicked {
    pub message: String,
}

impl Panicked {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self { message }
    }
}

impl StdError for Panicked {}

/// The circuit is open: the source failed too many times in a row.
#[derive(Debug, Display, Clone)]
#[display("failed too many times")]
pub struct Tripped {
    cause: Option<Error>,
}

impl Tripped {
    pub(crate) fn new(cause: Option<Error>) -> Self {
        Self { cause }
    }

    /// The failure that last counted towards opening the circuit.
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_ref()
    }
}

impl StdError for Tripped {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_std() as &(dyn StdError + 'static))
    }
}

/// A filtered value was rejected.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display("not found")]
pub struct NotFound;

impl StdError for NotFound {}

/// The continuation was dropped before it was invoked, for example because the
/// computation was cancelled or its executor shut down.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display("the computation was dropped before it resolved")]
pub struct Dropped;

impl StdError for Dropped {}

/// An [`ActiveCell`](crate::ActiveCell) was configured with an unusable
/// activation window.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[display("{0} cannot start the active window; expected Create, Start or Resume")]
    InvalidActivator(LifecycleEvent),
    #[display("{0} cannot end the active window; expected Pause, Stop or Destroy")]
    InvalidDeactivator(LifecycleEvent),
    #[display("activator {activator} does not precede deactivator {deactivator}")]
    Misordered {
        activator: LifecycleEvent,
        deactivator: LifecycleEvent,
    },
}

impl StdError for ConfigError {}

/// Misuse of [`ActiveCell::observe`](crate::ActiveCell::observe).
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ObserveError {
    #[display("an observer can only be associated with one owner")]
    OwnedByAnotherOwner,
}

impl StdError for ObserveError {}

/// Runs a user-supplied function, turning a panic into an [`Error`].
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    catch_unwind(AssertUnwindSafe(f)).map_err(Error::from_panic)
}
