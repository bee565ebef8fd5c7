use std::sync::Arc;
use std::time::Duration;

use crate::threading::dispatcher::{Dispatcher, ThreadingMode};
use crate::threading::event::Event;
use crate::threading::module::PhysicsModule;

/// Best-effort stall of the physics thread for the lifetime of the guard.
///
/// The physics thread parks at the start of its next tick until the guard drops. If it does not get there within
/// the timeout the caller goes on without the lock and the physics thread is never held.
#[must_use = "the physics thread resumes as soon as the guard is dropped"]
pub struct ScopedThreadLock {
    resume: Option<Arc<Event>>,
    got_lock: bool,
}

impl ScopedThreadLock {
    /// Stalls the module's physics thread, waiting at most `timeout` (capped at the module's `max_stall_ms`).
    pub fn acquire(module: &PhysicsModule, timeout: Duration) -> Self {
        let timeout = timeout.min(Duration::from_millis(module.config().max_stall_ms));
        Self::acquire_with(module.dispatcher().as_ref(), timeout)
    }

    /// Stalls whatever thread drains `dispatcher`'s task queue.
    pub fn acquire_with(dispatcher: &dyn Dispatcher, timeout: Duration) -> Self {
        if dispatcher.mode() != ThreadingMode::DedicatedThread {
            return Self {
                resume: None,
                got_lock: false,
            };
        }

        let stalled = Arc::new(Event::new());
        let resume = Arc::new(Event::new());
        {
            let stalled = stalled.clone();
            let resume = resume.clone();
            dispatcher.enqueue_task(Box::new(move |_| {
                stalled.trigger();
                resume.wait();
            }));
        }

        let got_lock = stalled.wait_timeout(timeout);
        if !got_lock {
            // The physics thread passes straight through the command once it gets there.
            resume.trigger();
            tracing::debug!(?timeout, "physics thread did not stall in time");
        }
        Self {
            resume: Some(resume),
            got_lock,
        }
    }

    /// True if the physics thread is parked while this guard lives.
    #[inline]
    pub fn did_get_lock(&self) -> bool {
        self.got_lock
    }
}

impl Drop for ScopedThreadLock {
    fn drop(&mut self) {
        if let Some(resume) = &self.resume {
            resume.trigger();
        }
    }
}
