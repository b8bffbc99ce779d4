use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    time::Duration,
};

use altlive::{
    ActiveCellBuilder, Deferred, Error, ExecuteOn, Immortal, Lifecycle, LifecycleState, Memoize,
    Progress, ProgressCell, ProgressVisitor, Retry, SerialQueue, WorkerPool, when_done_or_failed,
};
use pretty_assertions::assert_eq;

#[derive(Clone, Default)]
struct Screen {
    log: Arc<Mutex<Vec<String>>>,
}

impl ProgressVisitor<String, Vec<String>> for Screen {
    fn running(&self, key: &String, current: Option<&Vec<String>>) {
        let shown = current.map_or(0, |c| c.len());
        self.log
            .lock()
            .unwrap()
            .push(format!("loading {key}, showing {shown}"));
    }

    fn done(&self, key: &String, value: &Vec<String>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{key}: {}", value.join(",")));
    }

    fn failed(&self, key: &String, error: &Error) {
        self.log.lock().unwrap().push(format!("{key} failed: {error}"));
    }
}

fn folders() -> ProgressCell<String, Vec<String>> {
    ProgressCell::new(|folder: String| {
        Deferred::from_fn(move || match folder.as_str() {
            "inbox" => Ok(vec!["hello".to_string(), "invoice".to_string()]),
            "sent" => Ok(vec!["re: hello".to_string()]),
            _ => Err(Error::msg("no such folder")),
        })
    })
}

#[test]
fn screen_sees_each_load() {
    let task = folders();
    let screen = Screen::default();
    let owner = Lifecycle::new();
    owner.move_to(LifecycleState::Resumed);
    task.observe_visitor(owner.clone(), screen.clone()).unwrap();

    task.submit(Some("inbox".to_string()));
    task.submit(Some("trash".to_string()));
    task.submit(Some("sent".to_string()));

    assert_eq!(
        *screen.log.lock().unwrap(),
        vec![
            "loading inbox, showing 0",
            "inbox: hello,invoice",
            "loading trash, showing 2",
            "trash failed: no such folder",
            "loading sent, showing 2",
            "sent: re: hello",
        ]
    );
}

#[test]
fn hidden_screen_only_sees_the_latest_progress() {
    let task = folders();
    let screen = Screen::default();
    let owner = Lifecycle::new();
    owner.move_to(LifecycleState::Started);
    task.observe_visitor(owner.clone(), screen.clone()).unwrap();

    task.submit(Some("inbox".to_string()));
    task.submit(Some("sent".to_string()));
    assert!(screen.log.lock().unwrap().is_empty());

    owner.move_to(LifecycleState::Resumed);
    assert_eq!(*screen.log.lock().unwrap(), vec!["sent: re: hello"]);
}

#[test]
fn loader_without_key_reloads_a_memoized_source() {
    let loads = Arc::new(AtomicUsize::new(0));
    let l = loads.clone();
    let source = Memoize::new(Deferred::from_fn(move || {
        Ok::<_, Error>(l.fetch_add(1, Ordering::SeqCst))
    }));
    let memo = source.clone();
    let loader = ProgressCell::new(move |()| memo.deferred());

    loader.submit(Some(()));
    loader.submit(Some(()));
    assert!(matches!(loader.current(), Some(Progress::Done { value: 0, .. })));

    source.clear();
    loader.submit(Some(()));
    assert!(matches!(loader.current(), Some(Progress::Done { value: 1, .. })));
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
#[altlive::timeout("5s")]
fn background_work_is_published_on_the_ui_queue() {
    let pool = WorkerPool::new("io", 2);
    let attempts = Arc::new(AtomicUsize::new(0));
    let a = attempts.clone();
    let task = ProgressCell::from_builder(
        ActiveCellBuilder::new().post_on(SerialQueue::new("ui")),
        move |n: u32| {
            let a = a.clone();
            ExecuteOn::run(pool.clone(), move || {
                if a.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::msg("first attempt fails"))
                } else {
                    Ok(n * 2)
                }
            })
            .pipe(Retry::until(1))
        },
    )
    .unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let tx_failed = Mutex::new(tx.lock().unwrap().clone());
    task.observe_visitor(
        Immortal::instance(),
        when_done_or_failed(
            move |v: &u32| tx.lock().unwrap().send(Ok(*v)).unwrap(),
            move |e| tx_failed.lock().unwrap().send(Err(e.to_string())).unwrap(),
        ),
    )
    .unwrap();

    task.submit(Some(21));
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Ok(42));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
