//! Reactive state container
//!
//! An explicitly constructed store: no module-level singleton. Components get
//! a cloned [`StateStore`] handle and share the same underlying state.

mod state;

pub use state::{AppState, DEFAULT_TARGET_FPS};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`StateStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Notify<S> = Arc<dyn Fn(&S) + Send + Sync>;

struct Inner<S> {
    state: RwLock<S>,
    listeners: Mutex<Vec<(SubscriptionId, Notify<S>)>>,
    next_id: AtomicU64,
}

/// Shared state with selector-based change notification
pub struct StateStore<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for StateStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Default + Clone + Send + Sync + 'static> Default for StateStore<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: Clone + Send + Sync + 'static> StateStore<S> {
    pub fn new(initial: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(initial),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Snapshot of the whole state
    pub fn get_state(&self) -> S {
        self.inner.state.read().clone()
    }

    /// Borrow the state for a read without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Apply `patch` atomically, then notify subscribers whose selection changed
    ///
    /// Listeners run after the lock is released and may read or update the
    /// store themselves.
    pub fn set_state<R>(&self, patch: impl FnOnce(&mut S) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.inner.state.write();
            let result = patch(&mut state);
            (result, state.clone())
        };

        let listeners: Vec<Notify<S>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, notify)| Arc::clone(notify))
            .collect();
        for notify in listeners {
            notify(&snapshot);
        }
        result
    }

    /// Call `listener` with the selected value each time it changes
    ///
    /// The selection is compared with `PartialEq`; identical selections do
    /// not notify.
    pub fn subscribe<T, Sel, L>(&self, selector: Sel, listener: L) -> SubscriptionId
    where
        T: PartialEq + Send + 'static,
        Sel: Fn(&S) -> T + Send + Sync + 'static,
        L: Fn(&T) + Send + Sync + 'static,
    {
        let last = Mutex::new(self.read(&selector));
        let notify: Notify<S> = Arc::new(move |state: &S| {
            let next = selector(state);
            let mut last = last.lock();
            if *last != next {
                listener(&next);
                *last = next;
            }
        });

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, notify));
        id
    }

    /// Remove a subscription; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        before != listeners.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}
