use std::{
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use assert_call::call;

use crate::{Case, Deferred, Error};

/// Returns a value that records `s` when dropped. It can be moved into a
/// continuation to observe when that continuation is released.
pub fn call_on_drop(s: impl Into<String>) -> impl Send + 'static {
    struct OnDrop(String);
    impl Drop for OnDrop {
        fn drop(&mut self) {
            call!("{}", self.0);
        }
    }
    OnDrop(s.into())
}

/// Resolves `d` and returns a receiver for the outcome.
pub fn select_to_channel<T: Send + 'static>(d: &Deferred<T>) -> mpsc::Receiver<Result<T, Error>> {
    let (tx, rx) = mpsc::channel();
    d.select(Case::new(move |result| {
        let _ = tx.send(result);
    }));
    rx
}

/// Polls `f` until it returns true or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    f()
}
