//! Execution contexts that run submitted work.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, mpsc},
    thread,
};

#[cfg(test)]
mod tests;

/// A unit of work submitted to an [`Executor`] or a [`Scheduler`](crate::utils::timer::Scheduler).
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted work, now or later, on some thread.
///
/// Submission is fire-and-forget. Work that is dropped without being run
/// releases whatever it captured, which lets a waiting [`Deferred`](crate::Deferred)
/// observe [`Dropped`](crate::Dropped) instead of hanging.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, work: Work);
}

impl<F> Executor for F
where
    F: Fn(Work) + Send + Sync + 'static,
{
    fn execute(&self, work: Work) {
        self(work)
    }
}

/// Runs work synchronously on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, work: Work) {
        work()
    }
}

/// A fixed set of named worker threads sharing one queue.
///
/// Cloning yields another handle to the same pool. The threads exit once every
/// handle is dropped and the queue has drained.
#[derive(Clone)]
pub struct WorkerPool(Arc<Pool>);

struct Pool {
    name: String,
    threads: usize,
    sender: mpsc::Sender<Work>,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one), named `{name}-{index}`.
    pub fn new(name: impl Into<String>, threads: usize) -> Self {
        let name = name.into();
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::channel::<Work>();
        let receiver = Arc::new(Mutex::new(receiver));
        for index in 0..threads {
            let receiver = receiver.clone();
            let pool = name.clone();
            thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || run_worker(&pool, &receiver))
                .expect("failed to spawn a worker thread");
        }
        Self(Arc::new(Pool {
            name,
            threads,
            sender,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn threads(&self) -> usize {
        self.0.threads
    }
}

impl Executor for WorkerPool {
    fn execute(&self, work: Work) {
        if self.0.sender.send(work).is_err() {
            tracing::debug!(pool = %self.0.name, "worker pool is gone, work dropped");
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        tracing::debug!(pool = %self.name, "shutting down worker pool");
    }
}

fn run_worker(pool: &str, receiver: &Mutex<mpsc::Receiver<Work>>) {
    loop {
        let work = match receiver.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => return,
        };
        let Ok(work) = work else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(work)).is_err() {
            tracing::error!(pool, "submitted work panicked");
        }
    }
}

/// A single worker thread that runs work in submission order.
#[derive(Clone)]
pub struct SerialQueue(WorkerPool);

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self(WorkerPool::new(name, 1))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl Executor for SerialQueue {
    fn execute(&self, work: Work) {
        self.0.execute(work)
    }
}
