use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use pretty_assertions::assert_eq;

use super::*;

#[test]
fn inline_runs_on_the_calling_thread() {
    let caller = thread::current().id();
    let (tx, rx) = mpsc::channel();
    Inline.execute(Box::new(move || tx.send(thread::current().id()).unwrap()));
    assert_eq!(rx.try_recv(), Ok(caller));
}

#[test]
fn closures_are_executors() {
    let count = Arc::new(AtomicUsize::new(0));
    let executor = |work: Work| work();
    let c = count.clone();
    executor.execute(Box::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn worker_pool_runs_every_item() {
    let pool = WorkerPool::new("pool", 3);
    assert_eq!(pool.threads(), 3);
    let (tx, rx) = mpsc::channel();
    for i in 0..20 {
        let tx = tx.clone();
        pool.execute(Box::new(move || tx.send(i).unwrap()));
    }
    let mut received: Vec<_> = (0..20)
        .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
        .collect();
    received.sort();
    assert_eq!(received, (0..20).collect::<Vec<_>>());
}

#[test]
fn worker_pool_threads_are_named() {
    let pool = WorkerPool::new("named", 1);
    let (tx, rx) = mpsc::channel();
    pool.execute(Box::new(move || {
        tx.send(thread::current().name().map(str::to_string))
            .unwrap()
    }));
    let name = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(name.as_deref(), Some("named-0"));
}

#[test]
fn worker_pool_has_at_least_one_thread() {
    assert_eq!(WorkerPool::new("empty", 0).threads(), 1);
}

#[test]
fn worker_pool_survives_panicking_work() {
    let pool = WorkerPool::new("pool", 1);
    pool.execute(Box::new(|| panic!("boom")));
    let (tx, rx) = mpsc::channel();
    pool.execute(Box::new(move || tx.send(()).unwrap()));
    assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
}

#[test]
fn queued_work_runs_after_the_last_handle_is_dropped() {
    let pool = WorkerPool::new("pool", 1);
    let (tx, rx) = mpsc::channel();
    pool.execute(Box::new(|| thread::sleep(Duration::from_millis(20))));
    pool.execute(Box::new(move || tx.send(()).unwrap()));
    drop(pool);
    assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
}

#[test]
fn serial_queue_preserves_submission_order() {
    let queue = SerialQueue::new("serial");
    let log = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();
    for i in 0..50 {
        let log = log.clone();
        queue.execute(Box::new(move || log.lock().unwrap().push(i)));
    }
    queue.execute(Box::new(move || tx.send(()).unwrap()));
    rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(*log.lock().unwrap(), (0..50).collect::<Vec<_>>());
}
