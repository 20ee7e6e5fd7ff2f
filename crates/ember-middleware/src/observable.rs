//! [`Observable<T>`] – thread-safe value cell with change notification.
//!
//! Every state producer in Ember (display brightness, connectivity flags,
//! settings values, …) exposes its state as an `Observable`.  Consumers
//! subscribe a callback and are invoked with the new value whenever it
//! changes.
//!
//! # Locking discipline
//!
//! The compare-and-update step runs under the internal lock; the subscriber
//! list is then copied and the lock released **before** any callback runs.
//! A callback may therefore call [`Observable::get`], subscribe, or
//! unsubscribe on the same cell without deadlocking.
//!
//! # Subscription handles
//!
//! [`Observable::subscribe`] returns a [`SubscriptionId`].  Handles are
//! allocated monotonically and never reused, so unsubscribing one handle can
//! never invalidate or alias another.  Removed subscriptions are dropped from
//! storage immediately; repeated subscribe/unsubscribe cycles do not grow the
//! cell.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use ember_middleware::Observable;
//!
//! let brightness = Observable::new(128u8);
//! let calls = Arc::new(AtomicUsize::new(0));
//! let seen = calls.clone();
//! brightness.subscribe(move |_| {
//!     seen.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! brightness.set(128); // unchanged: no notification
//! brightness.set(200);
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! assert_eq!(brightness.previous(), 128);
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by [`Observable::subscribe`].
pub type SubscriptionId = usize;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: T,
    previous: T,
    subscribers: Vec<(SubscriptionId, Callback<T>)>,
    next_id: SubscriptionId,
}

/// Thread-safe observable value.
pub struct Observable<T> {
    inner: Mutex<Inner<T>>,
}

/// String-valued observable.
pub type StringObservable = Observable<String>;

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Create a cell holding `initial`.  The previous value starts equal to
    /// the initial value.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                previous: initial.clone(),
                value: initial,
                subscribers: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Snapshot of the value before the last applied update.
    pub fn previous(&self) -> T {
        self.inner.lock().previous.clone()
    }

    /// Store `value` and notify subscribers if it differs from the current
    /// value.  Returns `true` when the value changed.
    pub fn set(&self, value: T) -> bool {
        let (current, callbacks) = {
            let mut inner = self.inner.lock();
            if inner.value == value {
                return false;
            }
            inner.previous = std::mem::replace(&mut inner.value, value);
            (inner.value.clone(), Self::snapshot(&inner))
        };
        Self::broadcast(&current, &callbacks);
        true
    }

    /// Store `value` and notify every subscriber even if it is unchanged.
    ///
    /// Used when the notification itself carries meaning, e.g. "re-apply the
    /// current setting to the hardware".
    pub fn set_and_notify(&self, value: T) {
        let (current, callbacks) = {
            let mut inner = self.inner.lock();
            inner.previous = std::mem::replace(&mut inner.value, value);
            (inner.value.clone(), Self::snapshot(&inner))
        };
        Self::broadcast(&current, &callbacks);
    }

    /// Re-broadcast the current value to every subscriber.
    pub fn notify(&self) {
        let (current, callbacks) = {
            let inner = self.inner.lock();
            (inner.value.clone(), Self::snapshot(&inner))
        };
        Self::broadcast(&current, &callbacks);
    }

    /// Register `callback`; it runs on the thread that applies each update.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Remove the subscription `id`.  Returns `false` if it was not active.
    ///
    /// A broadcast already in flight on another thread may still deliver one
    /// final notification to the removed callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
        inner.subscribers.len() != before
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    fn snapshot(inner: &Inner<T>) -> Vec<Callback<T>> {
        inner
            .subscribers
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }

    fn broadcast(value: &T, callbacks: &[Callback<T>]) {
        for cb in callbacks {
            cb(value);
        }
    }
}

impl Observable<String> {
    /// Convenience setter for string cells.
    pub fn set_str(&self, value: &str) -> bool {
        let unchanged = self.inner.lock().value == value;
        if unchanged {
            return false;
        }
        self.set(value.to_string())
    }
}

impl<T> Default for Observable<T>
where
    T: Clone + PartialEq + Send + Default + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Observable<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("previous", &inner.previous)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}
