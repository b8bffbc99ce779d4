use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex},
    time::Duration,
};

use assert_call::{CallRecorder, call};
use pretty_assertions::assert_eq;

use super::*;
use crate::{Case, Immortal, Lifecycle, LifecycleEvent, LifecycleState, Panicked, SerialQueue};

fn describe(progress: &Option<Progress<u32, u32>>) -> String {
    match progress {
        None => "cleared".to_string(),
        Some(Progress::Running { key, current }) => format!("running {key} {current:?}"),
        Some(Progress::Done { key, value }) => format!("done {key} {value}"),
        Some(Progress::Failed { key, error }) => format!("failed {key} {error}"),
    }
}

fn divide_twelve() -> ProgressCell<u32, u32> {
    ProgressCell::new(|d: u32| {
        Deferred::from_fn(move || 12u32.checked_div(d).ok_or_else(|| Error::msg("division by zero")))
    })
}

fn log_all(task: &ProgressCell<u32, u32>) {
    task.observe_forever(&Observer::new(|p: &Option<Progress<u32, u32>>| {
        call!("{}", describe(p))
    }))
    .unwrap();
}

#[test]
fn publishes_running_then_outcome() {
    let mut cr = CallRecorder::new();
    let task = divide_twelve();
    log_all(&task);
    for d in [6, 4, 3, 2, 0] {
        task.submit(Some(d));
    }
    cr.verify([
        "running 6 None",
        "done 6 2",
        "running 4 Some(2)",
        "done 4 3",
        "running 3 Some(3)",
        "done 3 4",
        "running 2 Some(4)",
        "done 2 6",
        "running 0 Some(6)",
        "failed 0 division by zero",
    ]);
}

#[test]
fn running_carries_last_success_across_failures() {
    let mut cr = CallRecorder::new();
    let task = divide_twelve();
    task.submit(Some(3));
    task.submit(Some(0));
    log_all(&task);
    cr.verify("failed 0 division by zero");
    task.submit(Some(6));
    cr.verify(["running 6 Some(4)", "done 6 2"]);
}

#[test]
fn submitting_none_clears() {
    let mut cr = CallRecorder::new();
    let task = divide_twelve();
    task.submit(Some(6));
    log_all(&task);
    cr.verify("done 6 2");
    task.submit(None);
    cr.verify("cleared");
    assert!(task.current().is_none());
}

#[test]
fn stays_running_until_the_source_resolves() {
    let cases = Arc::new(Mutex::new(Vec::new()));
    let c = cases.clone();
    let task = ProgressCell::new(move |_: u32| {
        let c = c.clone();
        Deferred::from_raw(move |case: Case<u32>| c.lock().unwrap().push(case))
    });
    task.submit(Some(1));
    let current = task.current().unwrap();
    assert!(current.is_running());
    assert_eq!(*current.key(), 1);

    cases.lock().unwrap().pop().unwrap().success(10);
    assert_eq!(describe(&task.current()), "done 1 10");
}

#[test]
fn producer_panic_is_published_as_failure() {
    let task = ProgressCell::new(|_: u32| -> Deferred<u32> { panic!("no producer") });
    task.submit(Some(1));
    match task.current() {
        Some(Progress::Failed { error, .. }) => assert!(error.is::<Panicked>()),
        other => panic!("unexpected {:?}", other.map(|p| p.is_running())),
    }
}

#[test]
fn when_done_ignores_other_phases() {
    let mut cr = CallRecorder::new();
    let task = divide_twelve();
    task.observe_visitor(Immortal::instance(), when_done(|v: &u32| call!("{v}")))
        .unwrap();
    task.submit(Some(4));
    cr.verify("3");
}

#[test]
fn when_done_or_failed_sees_both() {
    let mut cr = CallRecorder::new();
    let task = divide_twelve();
    task.observe_visitor(
        Immortal::instance(),
        when_done_or_failed(|v: &u32| call!("done {v}"), |e| call!("failed {e}")),
    )
    .unwrap();
    task.submit(Some(12));
    task.submit(Some(0));
    cr.verify(["done 1", "failed division by zero"]);
}

struct DoneOnly;

impl ProgressVisitor<u32, u32> for DoneOnly {
    fn running(&self, _key: &u32, _current: Option<&u32>) {}

    fn done(&self, _key: &u32, _value: &u32) {}
}

#[test]
fn unhandled_failure_panics_with_the_error() {
    let task = divide_twelve();
    task.observe_visitor(Immortal::instance(), DoneOnly).unwrap();
    let payload = catch_unwind(AssertUnwindSafe(|| task.submit(Some(0)))).unwrap_err();
    let error = payload.downcast::<Error>().unwrap();
    assert_eq!(error.to_string(), "division by zero");
}

#[test]
fn visitor_follows_the_owner_lifecycle() {
    let mut cr = CallRecorder::new();
    let task = divide_twelve();
    let owner = Lifecycle::new();
    let observer = task
        .observe_visitor(owner.clone(), when_done(|v: &u32| call!("{v}")))
        .unwrap();
    task.submit(Some(6));
    cr.verify(());

    owner.move_to(LifecycleState::Resumed);
    cr.verify("2");

    task.remove_observer(&observer);
    task.submit(Some(3));
    cr.verify(());
}

#[test]
fn remove_observers_of_owner() {
    let mut cr = CallRecorder::new();
    let task = divide_twelve();
    let owner = Lifecycle::new();
    owner.move_to(LifecycleState::Resumed);
    task.observe_visitor(owner.clone(), when_done(|v: &u32| call!("{v}")))
        .unwrap();
    task.remove_observers(&*owner);
    task.submit(Some(6));
    cr.verify(());
    assert_eq!(task.cell().observer_count(), 0);
}

#[test]
fn from_builder_validates_window() {
    let builder = ActiveCellBuilder::new()
        .activate(LifecycleEvent::Start)
        .unwrap();
    assert!(ProgressCell::<u32, u32>::from_builder(builder, |_| Deferred::just(0)).is_err());
}

#[test]
fn publishes_on_the_cell_executor() {
    let queue = SerialQueue::new("progress");
    let task = ProgressCell::from_builder(ActiveCellBuilder::new().post_on(queue), |d: u32| {
        Deferred::just(12 / d)
    })
    .unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    let tx = Mutex::new(tx);
    task.observe_visitor(
        Immortal::instance(),
        when_done(move |v: &u32| {
            let name = std::thread::current().name().map(str::to_string);
            tx.lock().unwrap().send((*v, name)).unwrap();
        }),
    )
    .unwrap();
    task.submit(Some(3));
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        (4, Some("progress-0".to_string()))
    );
}

#[test]
fn progress_to_deferred() {
    let running: Progress<u32, u32> = Progress::Running {
        key: 1,
        current: Some(5),
    };
    assert_eq!(running.to_deferred().wait().ok(), Some(Some(5)));
    let done: Progress<u32, u32> = Progress::Done { key: 1, value: 6 };
    assert_eq!(done.to_deferred().wait().ok(), Some(Some(6)));
    let failed: Progress<u32, u32> = Progress::Failed {
        key: 1,
        error: Error::msg("x"),
    };
    assert!(failed.to_deferred().wait().is_err());
}

#[test]
fn submitting_none_does_not_run_the_producer() {
    let mut cr = CallRecorder::new();
    let task = ProgressCell::new(|k: u32| {
        call!("produce {k}");
        Deferred::just(k)
    });
    task.submit(None);
    cr.verify(());
    assert!(task.current().is_none());
}
