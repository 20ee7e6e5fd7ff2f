//! [`BusManager`] – per-bus reentrant lock registry.
//!
//! Serialises access to a shared electrical bus across unrelated drivers
//! that have no other way to coordinate.  Each bus identifier gets exactly
//! one lock, created lazily on first use and kept until the manager is
//! dropped.
//!
//! Bus locks are reentrant: a thread that already holds bus `n` may acquire
//! it again (e.g. a display transaction nested inside a higher-level draw
//! call) and must release it the same number of times.  Other threads are
//! excluded until the outermost release.
//!
//! A timed-out acquisition is an ordinary `false` result.  The caller aborts
//! the pending hardware transaction; nothing else is affected.
//!
//! # Example
//!
//! ```
//! use ember_hal::bus_manager::BusManager;
//!
//! let buses = BusManager::new();
//! {
//!     let guard = buses.lock(2, 100);
//!     assert!(guard.is_acquired());
//!     // … SPI transfer on host 2 …
//! } // released here
//! assert!(buses.acquire(2, 0));
//! buses.release(2);
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use ember_types::KernelError;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

/// Identifier of a physical bus (SPI host number, I2C port offset, …).
pub type BusId = i32;

/// Pass as `timeout_ms` to wait without a deadline.
pub const WAIT_FOREVER: u64 = u64::MAX;

/// Default acquisition timeout used by drivers.
pub const DEFAULT_BUS_TIMEOUT_MS: u64 = 1000;

// ────────────────────────────────────────────────────────────────────────────
// Reentrant timed lock
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Reentrant lock with timed acquisition and owner-checked release.
#[derive(Default)]
struct BusLock {
    state: Mutex<Ownership>,
    freed: Condvar,
}

impl BusLock {
    fn acquire(&self, timeout_ms: u64) -> bool {
        let me = thread::current().id();
        let deadline = (timeout_ms != WAIT_FOREVER)
            .then(|| Instant::now().checked_add(Duration::from_millis(timeout_ms)))
            .flatten();

        let mut st = self.state.lock();
        loop {
            match st.owner {
                None => {
                    st.owner = Some(me);
                    st.depth = 1;
                    return true;
                }
                Some(owner) if owner == me => {
                    st.depth += 1;
                    return true;
                }
                Some(_) => match deadline {
                    None => self.freed.wait(&mut st),
                    Some(deadline) => {
                        if self.freed.wait_until(&mut st, deadline).timed_out()
                            && st.owner.is_some()
                        {
                            return false;
                        }
                    }
                },
            }
        }
    }

    /// Returns `false` if the calling thread does not hold the lock.
    fn release(&self) -> bool {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.owner != Some(me) {
            return false;
        }
        st.depth -= 1;
        if st.depth == 0 {
            st.owner = None;
            self.freed.notify_one();
        }
        true
    }

    fn is_held(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BusManager
// ────────────────────────────────────────────────────────────────────────────

/// Registry of per-bus reentrant locks.
///
/// Construct one per board and share it (`Arc<BusManager>`) with every
/// driver that touches a shared bus.
#[derive(Default)]
pub struct BusManager {
    locks: Mutex<HashMap<BusId, Arc<BusLock>>>,
}

impl BusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire bus `bus_id`, waiting at most `timeout_ms`
    /// ([`WAIT_FOREVER`] for no deadline).
    ///
    /// Returns `false` on timeout, with no side effects.
    pub fn acquire(&self, bus_id: BusId, timeout_ms: u64) -> bool {
        let lock = self.lock_for(bus_id);
        let acquired = lock.acquire(timeout_ms);
        if acquired {
            trace!(bus_id, "bus acquired");
        } else {
            debug!(bus_id, timeout_ms, "bus acquisition timed out");
        }
        acquired
    }

    /// Release one level of the calling thread's hold on `bus_id`.
    ///
    /// Returns `false` (and does nothing) when the caller does not hold it.
    pub fn release(&self, bus_id: BusId) -> bool {
        let lock = self.locks.lock().get(&bus_id).cloned();
        match lock {
            Some(lock) => {
                let released = lock.release();
                if !released {
                    warn!(bus_id, "release of a bus not held by this thread");
                }
                released
            }
            None => {
                warn!(bus_id, "release of an unknown bus");
                false
            }
        }
    }

    /// Scoped acquisition; check [`ScopedBusLock::is_acquired`] before use.
    pub fn lock(&self, bus_id: BusId, timeout_ms: u64) -> ScopedBusLock<'_> {
        let acquired = self.acquire(bus_id, timeout_ms);
        ScopedBusLock {
            manager: self,
            bus_id,
            acquired,
            _not_send: PhantomData,
        }
    }

    /// Scoped acquisition that turns a timeout into
    /// [`KernelError::BusTimeout`], for use with `?`.
    pub fn try_lock(&self, bus_id: BusId, timeout_ms: u64) -> Result<ScopedBusLock<'_>, KernelError> {
        let guard = self.lock(bus_id, timeout_ms);
        if guard.is_acquired() {
            Ok(guard)
        } else {
            Err(KernelError::BusTimeout { bus_id, timeout_ms })
        }
    }

    /// Number of distinct buses seen so far.
    pub fn bus_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether any thread currently holds `bus_id`.
    pub fn is_locked(&self, bus_id: BusId) -> bool {
        self.locks
            .lock()
            .get(&bus_id)
            .is_some_and(|lock| lock.is_held())
    }

    fn lock_for(&self, bus_id: BusId) -> Arc<BusLock> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(bus_id).or_insert_with(|| {
            debug!(bus_id, "creating bus lock");
            Arc::new(BusLock::default())
        }))
    }
}

impl std::fmt::Debug for BusManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusManager")
            .field("buses", &self.bus_count())
            .finish()
    }
}

/// RAII bus lock returned by [`BusManager::lock`].
///
/// Releases on drop when the acquisition succeeded.  Not `Send`: a bus must
/// be released by the thread that acquired it.
#[must_use = "the bus is released as soon as the guard is dropped"]
pub struct ScopedBusLock<'a> {
    manager: &'a BusManager,
    bus_id: BusId,
    acquired: bool,
    _not_send: PhantomData<*const ()>,
}

impl ScopedBusLock<'_> {
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn bus_id(&self) -> BusId {
        self.bus_id
    }
}

impl Drop for ScopedBusLock<'_> {
    fn drop(&mut self) {
        if self.acquired {
            self.manager.release(self.bus_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn lock_created_lazily_once_per_bus() {
        let buses = BusManager::new();
        assert_eq!(buses.bus_count(), 0);
        assert!(buses.acquire(1, 10));
        assert!(buses.release(1));
        assert!(buses.acquire(1, 10));
        assert!(buses.release(1));
        assert!(buses.acquire(3, 10));
        assert!(buses.release(3));
        assert_eq!(buses.bus_count(), 2);
    }

    #[test]
    fn reentrant_on_same_thread() {
        let buses = BusManager::new();
        assert!(buses.acquire(2, 10));
        assert!(buses.acquire(2, 10));
        assert!(buses.release(2));
        assert!(buses.is_locked(2));
        assert!(buses.release(2));
        assert!(!buses.is_locked(2));
    }

    #[test]
    fn second_thread_times_out_while_held() {
        let buses = Arc::new(BusManager::new());
        assert!(buses.acquire(2, 10));

        let other = buses.clone();
        let start = Instant::now();
        let acquired = thread::spawn(move || other.acquire(2, 50)).join().unwrap();
        assert!(!acquired);
        assert!(start.elapsed() >= Duration::from_millis(50));

        buses.release(2);
        let other = buses.clone();
        let acquired = thread::spawn(move || {
            let ok = other.acquire(2, 50);
            other.release(2);
            ok
        })
        .join()
        .unwrap();
        assert!(acquired);
    }

    #[test]
    fn zero_timeout_is_try_lock() {
        let buses = Arc::new(BusManager::new());
        let other = buses.clone();
        assert!(buses.acquire(7, 0));
        assert!(!thread::spawn(move || other.acquire(7, 0)).join().unwrap());
        buses.release(7);
    }

    #[test]
    fn waiter_wakes_on_release() {
        let buses = Arc::new(BusManager::new());
        assert!(buses.acquire(4, 10));

        let (tx, rx) = mpsc::channel();
        let other = buses.clone();
        let waiter = thread::spawn(move || {
            tx.send(()).unwrap();
            let ok = other.acquire(4, WAIT_FOREVER);
            other.release(4);
            ok
        });

        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        buses.release(4);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn release_by_non_owner_is_noop() {
        let buses = Arc::new(BusManager::new());
        assert!(buses.acquire(5, 10));
        let other = buses.clone();
        assert!(!thread::spawn(move || other.release(5)).join().unwrap());
        assert!(buses.is_locked(5));
        assert!(buses.release(5));

        // Never-seen bus.
        assert!(!buses.release(99));
    }

    #[test]
    fn scoped_lock_releases_on_early_return() {
        fn transfer(buses: &BusManager, fail: bool) -> Result<(), KernelError> {
            let _guard = buses.try_lock(2, 10)?;
            if fail {
                return Err(KernelError::Transport("crc".into()));
            }
            Ok(())
        }

        let buses = BusManager::new();
        assert!(transfer(&buses, true).is_err());
        assert!(!buses.is_locked(2));
        assert!(transfer(&buses, false).is_ok());
        assert!(!buses.is_locked(2));
    }

    #[test]
    fn scoped_lock_releases_on_panic() {
        let buses = Arc::new(BusManager::new());
        let inner = buses.clone();
        let result = thread::spawn(move || {
            let _guard = inner.lock(2, 10);
            panic!("driver bug");
        })
        .join();
        assert!(result.is_err());
        assert!(!buses.is_locked(2));
    }

    #[test]
    fn try_lock_reports_timeout() {
        let buses = Arc::new(BusManager::new());
        assert!(buses.acquire(9, 10));
        let other = buses.clone();
        let err = thread::spawn(move || other.try_lock(9, 5).map(|_| ()))
            .join()
            .unwrap();
        assert_eq!(
            err,
            Err(KernelError::BusTimeout {
                bus_id: 9,
                timeout_ms: 5
            })
        );
        buses.release(9);
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        let buses = Arc::new(BusManager::new());
        let inside = Arc::new(AtomicBool::new(false));
        let entries = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let buses = buses.clone();
                let inside = inside.clone();
                let entries = entries.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let guard = buses.lock(1, WAIT_FOREVER);
                        assert!(guard.is_acquired());
                        assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                        entries.fetch_add(1, Ordering::SeqCst);
                        inside.store(false, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(entries.load(Ordering::SeqCst), 200);
    }
}
