//! Scheduled execution on a dedicated timer thread.

use std::{
    collections::BTreeMap,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    sync::{Arc, Condvar, LazyLock, Mutex, mpsc},
    thread,
    time::{Duration, Instant},
};

use parse_display::Display;
use slabmap::SlabMap;

use crate::executor::Work;


static GLOBAL: LazyLock<Arc<TimerService>> =
    LazyLock::new(|| Arc::new(TimerService::new("altlive-timer")));

/// Runs work after a delay.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, delay: Duration, work: Work);
}

impl<F> Scheduler for F
where
    F: Fn(Duration, Work) + Send + Sync + 'static,
{
    fn schedule(&self, delay: Duration, work: Work) {
        self(delay, work)
    }
}

/// A [`Scheduler`] backed by a single worker thread.
///
/// Work runs on the timer thread in deadline order; work scheduled for the
/// same instant runs in scheduling order. The thread is spawned on first use
/// and stops when the service is dropped. Pending work is discarded at that
/// point.
pub struct TimerService(Arc<Registry>);

impl TimerService {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::new(Registry {
            name: name.into(),
            queue: Mutex::new(TimerQueue::new()),
            condvar: Condvar::new(),
        }))
    }

    /// The process-wide timer used by combinators that are not given a scheduler.
    ///
    /// Initialized once, on first access.
    pub fn global() -> Arc<TimerService> {
        GLOBAL.clone()
    }

    /// The number of scheduled work items that have not run yet.
    pub fn pending(&self) -> usize {
        self.0.queue.lock().unwrap().tasks.len()
    }
}

/// The scheduler combinators use when none is configured.
pub(crate) fn default_scheduler() -> Arc<dyn Scheduler> {
    TimerService::global()
}

impl Scheduler for TimerService {
    fn schedule(&self, delay: Duration, work: Work) {
        self.0.insert(Instant::now() + delay, work);
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.0.queue.lock().unwrap().shutdown = true;
        self.0.condvar.notify_all();
    }
}

struct Registry {
    name: String,
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
}

impl Registry {
    fn insert(self: &Arc<Self>, instant: Instant, work: Work) {
        let mut queue = self.queue.lock().unwrap();
        if !queue.thread_running {
            queue.thread_running = true;
            let registry = self.clone();
            thread::Builder::new()
                .name(self.name.clone())
                .spawn(move || registry.run_worker())
                .expect("failed to spawn the timer thread");
        }
        let key = Key {
            instant,
            seq: queue.next_seq,
        };
        queue.next_seq += 1;
        let notify = queue
            .tasks
            .first_key_value()
            .is_none_or(|(first, _)| key < *first);
        let id = queue.entries.insert(work);
        queue.tasks.insert(key, id);
        if notify {
            self.condvar.notify_one();
        }
    }

    fn run_worker(&self) {
        let mut due = Vec::new();
        let mut queue = self.queue.lock().unwrap();
        loop {
            if queue.shutdown {
                return;
            }
            let now = Instant::now();
            let q = &mut *queue;
            while let Some(task) = q.tasks.first_entry()
                && task.key().instant <= now
            {
                let id = task.remove();
                if let Some(work) = q.entries.remove(id) {
                    due.push(work);
                }
            }
            if !due.is_empty() {
                drop(queue);
                for work in due.drain(..) {
                    if catch_unwind(AssertUnwindSafe(work)).is_err() {
                        tracing::error!(timer = %self.name, "scheduled work panicked");
                    }
                }
                queue = self.queue.lock().unwrap();
                continue;
            }
            let next = queue.tasks.first_key_value().map(|(key, _)| key.instant);
            queue = if let Some(instant) = next {
                let wait = instant.saturating_duration_since(now);
                self.condvar.wait_timeout(queue, wait).unwrap().0
            } else {
                self.condvar.wait(queue).unwrap()
            };
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    instant: Instant,
    seq: u64,
}

struct TimerQueue {
    next_seq: u64,
    tasks: BTreeMap<Key, usize>,
    entries: SlabMap<Work>,
    thread_running: bool,
    shutdown: bool,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            next_seq: 0,
            tasks: BTreeMap::new(),
            entries: SlabMap::new(),
            thread_running: false,
            shutdown: false,
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display("timeout")]
pub struct TimeoutError {
    _private: (),
}
impl TimeoutError {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

impl std::error::Error for TimeoutError {}

/// Runs `f` on a new thread and waits at most `duration` for it to return.
///
/// A panic in `f` is resumed on the calling thread. On timeout the thread is
/// left running detached.
pub fn with_timeout<T: Send + 'static>(
    f: impl FnOnce() -> T + Send + 'static,
    duration: Duration,
) -> Result<T, TimeoutError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(catch_unwind(AssertUnwindSafe(f)));
    });
    match rx.recv_timeout(duration) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(payload)) => resume_unwind(payload),
        Err(_) => Err(TimeoutError::new()),
    }
}
