use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Manual-reset event. Once triggered it stays signalled, releasing current and future waiters, until `reset`.
#[derive(Debug, Default)]
pub struct Event {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }

    pub fn is_triggered(&self) -> bool {
        *self.signalled.lock()
    }

    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.condvar.wait(&mut signalled);
        }
    }

    /// Waits until the event is triggered or `timeout` elapses. Returns whether it was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signalled = self.signalled.lock();
        while !*signalled {
            if self.condvar.wait_until(&mut signalled, deadline).timed_out() {
                return *signalled;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn stays_signalled_until_reset() {
        let event = Event::new();
        assert!(!event.wait_timeout(Duration::from_millis(1)));
        event.trigger();
        assert!(event.wait_timeout(Duration::ZERO));
        event.wait();
        event.reset();
        assert!(!event.is_triggered());
    }

    #[test]
    fn wakes_waiter_on_another_thread() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = event.clone();
            std::thread::spawn(move || event.wait_timeout(Duration::from_secs(5)))
        };
        event.trigger();
        assert!(waiter.join().unwrap());
    }
}
