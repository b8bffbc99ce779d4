use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use altlive::{
    Canceller, CircuitBreaker, Deferred, Dropped, Error, ExecuteOn, Memoize, Retry, TimeLimit,
    TimeoutError, Tripped, WorkerPool,
};
use futures::executor::block_on;
use pretty_assertions::assert_eq;

fn flaky_service(failures: usize) -> (Arc<AtomicUsize>, Deferred<String>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let d = Deferred::from_fn(move || {
        let n = c.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            Err(Error::msg("service unavailable"))
        } else {
            Ok(format!("response {n}"))
        }
    });
    (calls, d)
}

#[test]
#[altlive::timeout("5s")]
fn retry_with_backoff_on_the_global_timer() {
    let (calls, d) = flaky_service(3);
    let d = d
        .pipe(Retry::until(5).backoff(|i| Duration::from_millis(1 << i)))
        .pipe(TimeLimit::of(Duration::from_secs(2)));
    assert_eq!(d.wait().ok(), Some("response 4".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
#[altlive::timeout("5s")]
fn time_limit_cuts_off_retries() {
    let (_, d) = flaky_service(usize::MAX);
    let d = d
        .pipe(Retry::until(20).backoff(|_| Duration::from_millis(10)))
        .pipe(TimeLimit::of(Duration::from_millis(50)));
    assert!(d.wait().unwrap_err().is::<TimeoutError>());
}

#[test]
fn breaker_with_fallback() {
    let breaker = CircuitBreaker::of(2, Duration::from_secs(60));
    let (calls, d) = flaky_service(usize::MAX);
    let d = d
        .pipe(breaker.clone())
        .recover(|e| {
            if e.is::<Tripped>() {
                Ok("cached".to_string())
            } else {
                Err(e)
            }
        });
    assert!(d.wait().is_err());
    assert!(d.wait().is_err());
    assert_eq!(d.wait().ok(), Some("cached".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn retry_inside_breaker_counts_once_per_resolution() {
    let breaker = CircuitBreaker::of(2, Duration::from_secs(60));
    let (calls, d) = flaky_service(usize::MAX);
    let d = d.pipe(Retry::until(2)).pipe(breaker.clone());
    assert!(d.wait().is_err());
    assert_eq!(breaker.fail_count(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
#[altlive::timeout("5s")]
fn memoized_work_on_a_pool_is_shared_between_threads() {
    let pool = WorkerPool::new("io", 4);
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    let memo = Memoize::new(ExecuteOn::run(pool, move || {
        thread::sleep(Duration::from_millis(20));
        r.fetch_add(1, Ordering::SeqCst);
        Ok::<_, Error>(thread::current().name().map(str::to_string))
    }));
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let d = memo.deferred();
            thread::spawn(move || d.wait().ok().flatten())
        })
        .collect();
    let names: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(names.iter().all(|n| n.as_deref().is_some_and(|n| n.starts_with("io-"))));
    assert!(names.windows(2).all(|w| w[0] == w[1]));
}

#[test]
#[altlive::timeout("5s")]
fn futures_can_await_deferred() {
    let pool = WorkerPool::new("async", 1);
    let d = ExecuteOn::run(pool, || Ok::<_, Error>(2)).map(|x| x * 21);
    assert_eq!(block_on(d.to_future()).ok(), Some(42));
}

#[test]
#[altlive::timeout("5s")]
fn cancel_releases_waiters_and_stops_work() {
    let stopped = Arc::new(Mutex::new(false));
    let pool = WorkerPool::new("cancel", 1);
    let s = stopped.clone();
    let work = ExecuteOn::run(pool, move || {
        while !*s.lock().unwrap() {
            thread::sleep(Duration::from_millis(1));
        }
        Ok::<_, Error>(())
    });
    let s = stopped.clone();
    let canceller = Canceller::with(work, move || *s.lock().unwrap() = true);
    let d = canceller.deferred();
    let waiter = thread::spawn(move || d.wait());
    thread::sleep(Duration::from_millis(20));
    canceller.cancel();
    assert!(waiter.join().unwrap().unwrap_err().is::<Dropped>());
    assert!(*stopped.lock().unwrap());
}
