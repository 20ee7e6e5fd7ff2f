//! [`Watchdog`] – heartbeat tracking for long-running kernel threads.
//!
//! Each task registers under a name with a timeout and calls
//! [`Watchdog::heartbeat`] while it makes progress.  A task whose last
//! heartbeat is older than its timeout is reported as stalled by
//! [`Watchdog::check_all`].
//!
//! The watchdog is observational.  Stalled tasks are logged and reported;
//! nothing is restarted.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use ember_kernel::watchdog::{TaskHealth, Watchdog};
//!
//! let wd = Watchdog::new();
//! wd.register("gpio-edge", Duration::from_millis(500));
//! wd.heartbeat("gpio-edge");
//! assert_eq!(wd.health("gpio-edge"), TaskHealth::Alive);
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Liveness of one watched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskHealth {
    /// Heartbeat received within the timeout.
    Alive,
    /// No heartbeat for longer than the timeout, or the task is unknown.
    Stalled,
}

#[derive(Debug, Clone, Copy)]
struct TaskEntry {
    last_heartbeat: Instant,
    timeout: Duration,
}

impl TaskEntry {
    fn is_stalled(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > self.timeout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Name-keyed heartbeat table.  Shared between threads behind an `Arc`.
#[derive(Debug, Default)]
pub struct Watchdog {
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `task`.  Registration counts as the first heartbeat.
    ///
    /// Re-registering replaces the timeout and resets the heartbeat.
    pub fn register(&self, task: &str, timeout: Duration) {
        self.register_at(task, timeout, Instant::now());
    }

    /// [`register`][Self::register] with an explicit timestamp.
    pub fn register_at(&self, task: &str, timeout: Duration, now: Instant) {
        self.tasks.lock().insert(
            task.to_string(),
            TaskEntry {
                last_heartbeat: now,
                timeout,
            },
        );
        debug!(task, timeout_ms = timeout.as_millis() as u64, "task watched");
    }

    /// Stop watching `task`.  Returns `false` if it was not registered.
    pub fn unregister(&self, task: &str) -> bool {
        self.tasks.lock().remove(task).is_some()
    }

    /// Record progress for `task`.  Unknown names are ignored.
    pub fn heartbeat(&self, task: &str) {
        self.heartbeat_at(task, Instant::now());
    }

    pub fn heartbeat_at(&self, task: &str, now: Instant) {
        if let Some(entry) = self.tasks.lock().get_mut(task) {
            entry.last_heartbeat = now;
        }
    }

    pub fn health(&self, task: &str) -> TaskHealth {
        self.health_at(task, Instant::now())
    }

    /// Health of `task` as of `now`.  A heartbeat exactly `timeout` old is
    /// still [`TaskHealth::Alive`].
    pub fn health_at(&self, task: &str, now: Instant) -> TaskHealth {
        match self.tasks.lock().get(task) {
            Some(entry) if !entry.is_stalled(now) => TaskHealth::Alive,
            _ => TaskHealth::Stalled,
        }
    }

    /// Names of every stalled task, sorted.  Each one is logged at `warn`.
    pub fn check_all(&self) -> Vec<String> {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> Vec<String> {
        let mut stalled: Vec<String> = self
            .tasks
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_stalled(now))
            .map(|(name, _)| name.clone())
            .collect();
        stalled.sort();
        for task in &stalled {
            warn!(task, "task heartbeat overdue");
        }
        stalled
    }

    pub fn tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fresh_task_is_alive() {
        let wd = Watchdog::new();
        wd.register("gpio-edge", Duration::from_secs(5));
        assert_eq!(wd.health("gpio-edge"), TaskHealth::Alive);
        assert!(wd.check_all().is_empty());
    }

    #[test]
    fn heartbeat_at_exact_timeout_is_alive() {
        let wd = Watchdog::new();
        let t0 = Instant::now();
        let timeout = Duration::from_millis(100);
        wd.register_at("health-monitor", timeout, t0);

        assert_eq!(wd.health_at("health-monitor", t0 + timeout), TaskHealth::Alive);
        assert!(wd.check_at(t0 + timeout).is_empty());

        let late = t0 + timeout + Duration::from_millis(1);
        assert_eq!(wd.health_at("health-monitor", late), TaskHealth::Stalled);
        assert_eq!(wd.check_at(late), vec!["health-monitor"]);
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let wd = Watchdog::new();
        let t0 = Instant::now();
        let timeout = Duration::from_millis(100);
        wd.register_at("gui", timeout, t0);
        wd.heartbeat_at("gui", t0 + Duration::from_millis(90));

        assert_eq!(
            wd.health_at("gui", t0 + Duration::from_millis(150)),
            TaskHealth::Alive
        );
        assert_eq!(
            wd.health_at("gui", t0 + Duration::from_millis(191)),
            TaskHealth::Stalled
        );
    }

    #[test]
    fn stalls_when_silent() {
        let wd = Watchdog::new();
        wd.register("gpio-edge", Duration::from_millis(20));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(wd.health("gpio-edge"), TaskHealth::Stalled);
        assert_eq!(wd.check_all(), vec!["gpio-edge"]);
    }

    #[test]
    fn check_all_is_sorted_and_skips_live_tasks() {
        let wd = Watchdog::new();
        let t0 = Instant::now();
        wd.register_at("zeta", Duration::from_millis(10), t0);
        wd.register_at("alpha", Duration::from_millis(10), t0);
        wd.register_at("steady", Duration::from_secs(60), t0);

        assert_eq!(
            wd.check_at(t0 + Duration::from_millis(20)),
            vec!["alpha", "zeta"]
        );
    }

    #[test]
    fn unknown_task_is_stalled_and_heartbeat_is_ignored() {
        let wd = Watchdog::new();
        wd.heartbeat("ghost");
        assert_eq!(wd.health("ghost"), TaskHealth::Stalled);
        assert!(wd.tasks().is_empty());
    }

    #[test]
    fn reregister_resets_and_unregister_forgets() {
        let wd = Watchdog::new();
        let t0 = Instant::now();
        wd.register_at("gui", Duration::from_millis(10), t0);
        let later = t0 + Duration::from_millis(50);
        wd.register_at("gui", Duration::from_millis(10), later);
        assert_eq!(wd.health_at("gui", later), TaskHealth::Alive);

        assert!(wd.unregister("gui"));
        assert!(!wd.unregister("gui"));
        assert!(wd.check_at(later + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn heartbeats_from_another_thread() {
        let wd = Arc::new(Watchdog::new());
        wd.register("worker", Duration::from_millis(200));
        let remote = wd.clone();
        thread::spawn(move || remote.heartbeat("worker")).join().unwrap();
        assert_eq!(wd.health("worker"), TaskHealth::Alive);
    }
}
