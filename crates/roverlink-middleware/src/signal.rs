//! [`StopSignal`] – one-way cancellation flag shared between threads.
//!
//! Once [`StopSignal::set`] has been called the signal stays set forever.
//! Loops check it at every iteration boundary, and timed waits use
//! [`StopSignal::wait_timeout`] so that a stop request interrupts a sleep
//! instead of waiting it out.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    set: Mutex<bool>,
    cond: Condvar,
}

/// Monotonic stop flag.  Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter.  Idempotent.
    pub fn set(&self) {
        let mut set = self
            .inner
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *set = true;
        self.inner.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self
            .inner
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleep for up to `timeout`, returning early if the signal is raised.
    ///
    /// Returns `true` when the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self
            .inner
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*set {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            set = self
                .inner
                .cond
                .wait_timeout(set, remaining)
                .map(|(g, _)| g)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        *set
    }
}
