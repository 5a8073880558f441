//! Per-key debounced side effects
//!
//! Each key owns a single slot. Scheduling a key cancels whatever was pending
//! for it and arms a fresh timer, so only the last value inside the window is
//! ever sent. Slots are epoch-tagged: a timer that wakes up after being
//! superseded sees a newer epoch and does nothing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

struct Slot {
    epoch: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    next_epoch: u64,
    pending: HashMap<String, Slot>,
}

/// Single-slot timers keyed by string
///
/// Must be used from within a tokio runtime. Dropping the debouncer cancels
/// every pending timer, so nothing fires after its owner is gone.
pub struct Debouncer {
    delay: Duration,
    slots: Arc<Mutex<Slots>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `action` once `delay` has passed without another schedule for `key`
    ///
    /// Returns the epoch assigned to this schedule.
    pub fn schedule<F>(&self, key: impl Into<String>, action: F) -> u64
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let delay = self.delay;
        let slots = Arc::clone(&self.slots);

        let mut guard = self.slots.lock();
        guard.next_epoch += 1;
        let epoch = guard.next_epoch;

        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            {
                let mut guard = slots.lock();
                match guard.pending.get(&task_key) {
                    Some(slot) if slot.epoch == epoch => {
                        guard.pending.remove(&task_key);
                    }
                    _ => return,
                }
            }
            trace!("Debounce '{}' fired (epoch {})", task_key, epoch);
            // The slot is released before running, so a newer schedule cannot
            // abort an in-flight command.
            action.await;
        });

        if let Some(previous) = guard.pending.insert(key.clone(), Slot { epoch, handle }) {
            previous.handle.abort();
            trace!("Debounce '{}' rescheduled (epoch {})", key, epoch);
        }
        epoch
    }

    /// Cancel the pending action for `key`; returns whether one was pending
    pub fn cancel(&self, key: &str) -> bool {
        match self.slots.lock().pending.remove(key) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut guard = self.slots.lock();
        for (_, slot) in guard.pending.drain() {
            slot.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.slots.lock().pending.contains_key(key)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
