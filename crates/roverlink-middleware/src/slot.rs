//! [`FreshnessSlot`] – capacity-1 mailbox between a network thread and a
//! consumer thread.
//!
//! A slot holds at most one item.  What happens when a second item arrives
//! while the first is still pending is fixed at construction by its
//! [`OverflowPolicy`]:
//!
//! | Policy | `put` on a full slot |
//! |---|---|
//! | [`OverflowPolicy::DropNewest`] | returns at once, the arrival is discarded |
//! | [`OverflowPolicy::KeepLatest`] | returns at once, the pending item is replaced |
//! | [`OverflowPolicy::BlockProducer`] | waits until the consumer took the pending item |
//!
//! Each slot has exactly one writer role and one reader role.  Taking an item
//! (`get`, `try_get`, `get_timeout`) is a single atomic step.
//!
//! # Example
//!
//! ```
//! use roverlink_middleware::slot::FreshnessSlot;
//! use roverlink_types::OverflowPolicy;
//!
//! let slot = FreshnessSlot::new(OverflowPolicy::DropNewest);
//! slot.put("A");
//! slot.put("B");
//! assert_eq!(slot.try_get(), Some("A"));
//! assert_eq!(slot.try_get(), None);
//! ```

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use roverlink_types::OverflowPolicy;

/// Single-item mailbox with a fixed [`OverflowPolicy`].
#[derive(Debug)]
pub struct FreshnessSlot<T> {
    policy: OverflowPolicy,
    item: Mutex<Option<T>>,
    /// Signalled when an item is stored.
    filled: Condvar,
    /// Signalled when the item is taken.
    drained: Condvar,
}

impl<T> FreshnessSlot<T> {
    pub fn new(policy: OverflowPolicy) -> Self {
        Self {
            policy,
            item: Mutex::new(None),
            filled: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Offer `item` to the slot according to its overflow policy.
    ///
    /// Only [`OverflowPolicy::BlockProducer`] ever suspends the caller.
    pub fn put(&self, item: T) {
        let mut guard = self.lock();
        match self.policy {
            OverflowPolicy::DropNewest => {
                if guard.is_none() {
                    *guard = Some(item);
                    self.filled.notify_one();
                }
            }
            OverflowPolicy::KeepLatest => {
                *guard = Some(item);
                self.filled.notify_one();
            }
            OverflowPolicy::BlockProducer => {
                while guard.is_some() {
                    guard = self
                        .drained
                        .wait(guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                *guard = Some(item);
                self.filled.notify_one();
            }
        }
    }

    /// Like [`put`](Self::put) but gives up after `timeout` when a
    /// [`OverflowPolicy::BlockProducer`] slot stays full.
    ///
    /// # Errors
    ///
    /// Returns the item back when it could not be stored in time.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        if self.policy != OverflowPolicy::BlockProducer {
            self.put(item);
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(item);
            }
            guard = self
                .drained
                .wait_timeout(guard, remaining)
                .map(|(g, _)| g)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        *guard = Some(item);
        self.filled.notify_one();
        Ok(())
    }

    /// Take the pending item, if any, without waiting.
    pub fn try_get(&self) -> Option<T> {
        let mut guard = self.lock();
        self.take(&mut guard)
    }

    /// Take the pending item, waiting for one to arrive.
    pub fn get(&self) -> T {
        let mut guard = self.lock();
        loop {
            if let Some(item) = self.take(&mut guard) {
                return item;
            }
            guard = self
                .filled
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Take the pending item, waiting at most `timeout` for one to arrive.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if let Some(item) = self.take(&mut guard) {
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            guard = self
                .filled
                .wait_timeout(guard, remaining)
                .map(|(g, _)| g)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// `true` when an item is pending.
    pub fn is_available(&self) -> bool {
        self.lock().is_some()
    }

    /// Number of pending items: always 0 or 1.
    pub fn len(&self) -> usize {
        usize::from(self.is_available())
    }

    pub fn is_empty(&self) -> bool {
        !self.is_available()
    }

    fn take(&self, guard: &mut MutexGuard<'_, Option<T>>) -> Option<T> {
        let item = guard.take();
        if item.is_some() {
            self.drained.notify_one();
        }
        item
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // A panicking holder cannot leave the Option half-written.
        self.item.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
