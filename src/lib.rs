//! Lifecycle-aware reactive state.
//!
//! - [`Deferred`]: a computation that eventually succeeds or fails, with
//!   combinators in [`transform`] for retrying, caching, timing and moving
//!   work between threads.
//! - [`ActiveCell`]: a value that notifies observers only while their
//!   [`LifecycleOwner`] is active.
//! - [`ProgressCell`]: keyed work whose running, done and failed states are
//!   published on an `ActiveCell`.

extern crate self as altlive;

mod cell;
mod deferred;
mod error;
mod executor;
pub mod lifecycle;
mod task;
pub mod transform;
pub mod utils;

pub use cell::*;
pub use deferred::{Case, Deferred, DeferredNode};
pub use error::*;
pub use executor::*;
pub use lifecycle::{
    Immortal, Lifecycle, LifecycleEvent, LifecycleObserver, LifecycleOwner, LifecycleState,
};
pub use task::*;
pub use transform::*;
pub use utils::timer::{Scheduler, TimeoutError, TimerService};

/// Fails a test that runs longer than the given duration.
///
/// ```ignore
/// #[test]
/// #[altlive::timeout("1s")]
/// fn finishes_quickly() {}
/// ```
pub use altlive_macros::timeout;
