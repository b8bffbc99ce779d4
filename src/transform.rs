//! Combinators that wrap a [`Deferred`] and change when, where or how it resolves.
//!
//! Every combinator is a [`Transform`] and is applied with [`Deferred::pipe`]:
//!
//! ```
//! use std::time::Duration;
//! use altlive::{Deferred, Retry, TimeLimit};
//!
//! let d = Deferred::<u32>::from_fn(|| Ok::<_, std::io::Error>(7))
//!     .pipe(Retry::until(3))
//!     .pipe(TimeLimit::of(Duration::from_secs(1)));
//! assert_eq!(d.wait().ok(), Some(7));
//! ```

use crate::Deferred;

mod canceller;
mod circuit_breaker;
mod delay;
mod execute;
mod filter;
mod memoize;
mod recover;
mod retry;
mod time_limit;
mod timed;

pub use canceller::*;
pub use circuit_breaker::*;
pub use delay::*;
pub use execute::*;
pub use filter::*;
pub use memoize::*;
pub use recover::*;
pub use retry::*;
pub use time_limit::*;
pub use timed::*;


/// Something that can be applied to a [`Deferred`] with [`Deferred::pipe`].
///
/// Implemented by every combinator builder and by any `FnOnce(Deferred<T>) -> R`.
pub trait Transform<T: 'static> {
    type Output;
    fn apply(self, source: Deferred<T>) -> Self::Output;
}

impl<T: 'static, R, F> Transform<T> for F
where
    F: FnOnce(Deferred<T>) -> R,
{
    type Output = R;
    fn apply(self, source: Deferred<T>) -> R {
        self(source)
    }
}
