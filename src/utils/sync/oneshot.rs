use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};


struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    condvar: Condvar,
}

/// A single-value channel whose receiver blocks the calling thread.
pub fn oneshot<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            value: None,
            closed: false,
        }),
        condvar: Condvar::new(),
    });
    (Sender(shared.clone()), Receiver(shared))
}

pub struct Sender<T>(Arc<Shared<T>>);

impl<T> Sender<T> {
    pub fn send(self, value: T) {
        self.0.slot.lock().unwrap().value = Some(value);
    }
}
impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.0.slot.lock().unwrap().closed = true;
        self.0.condvar.notify_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    Closed,
    Timeout,
}

pub struct Receiver<T>(Arc<Shared<T>>);

impl<T> Receiver<T> {
    /// Blocks until a value is sent or the sender is dropped without sending.
    pub fn recv(self) -> Result<T, RecvError> {
        let mut slot = self.0.slot.lock().unwrap();
        loop {
            if let Some(value) = slot.value.take() {
                return Ok(value);
            }
            if slot.closed {
                return Err(RecvError::Closed);
            }
            slot = self.0.condvar.wait(slot).unwrap();
        }
    }

    pub fn recv_timeout(self, timeout: Duration) -> Result<T, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.0.slot.lock().unwrap();
        loop {
            if let Some(value) = slot.value.take() {
                return Ok(value);
            }
            if slot.closed {
                return Err(RecvError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RecvError::Timeout);
            }
            slot = self.0.condvar.wait_timeout(slot, deadline - now).unwrap().0;
        }
    }
}
