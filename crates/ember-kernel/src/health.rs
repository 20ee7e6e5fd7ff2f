//! [`HealthMonitor`] – periodic service health sweep.
//!
//! Runs [`ServiceRegistry::perform_health_check`] on a background thread
//! every `interval`.  Results are observational: failures are logged and
//! the most recent sweep is kept for inspection; nothing is restarted.
//! Restarting is an explicit operator action.
//!
//! When spawned with a [`Watchdog`] the monitor registers itself under
//! [`HEALTH_TASK`], heartbeats on every wake-up, and copies the watchdog's
//! stalled tasks into each [`SweepReport`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ember_types::KernelError;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::service_registry::ServiceRegistry;
use crate::watchdog::Watchdog;

/// Shortest accepted sweep interval.  Shorter requests are clamped.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Watchdog name of the sweep thread.
pub const HEALTH_TASK: &str = "health-monitor";

/// Missed sweeps tolerated before the sweep thread counts as stalled.
const STALL_FACTOR: u32 = 3;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub sweep: u64,
    /// `(service id, error)` for every failing health hook.
    pub failures: Vec<(String, KernelError)>,
    /// Watchdog tasks whose heartbeat was overdue at sweep time.
    pub stalled_tasks: Vec<String>,
    pub completed_at: Option<Instant>,
}

impl SweepReport {
    pub fn is_healthy(&self) -> bool {
        self.failures.is_empty() && self.stalled_tasks.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Shared {
    stop: Mutex<bool>,
    wake: Condvar,
    last: Mutex<SweepReport>,
}

// ────────────────────────────────────────────────────────────────────────────
// HealthMonitor
// ────────────────────────────────────────────────────────────────────────────

/// Background health sweeper.  Stops when dropped.
pub struct HealthMonitor {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    interval: Duration,
    watchdog: Option<Arc<Watchdog>>,
}

impl HealthMonitor {
    /// Spawn the sweep thread.  The first sweep runs after one `interval`.
    ///
    /// Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn spawn(registry: Arc<ServiceRegistry>, interval: Duration) -> Result<Self, KernelError> {
        Self::start(registry, interval, None)
    }

    /// Like [`spawn`][Self::spawn], with the sweep thread heartbeating into
    /// `watchdog` and each sweep reporting its stalled tasks.
    pub fn spawn_watched(
        registry: Arc<ServiceRegistry>,
        interval: Duration,
        watchdog: Arc<Watchdog>,
    ) -> Result<Self, KernelError> {
        Self::start(registry, interval, Some(watchdog))
    }

    fn start(
        registry: Arc<ServiceRegistry>,
        interval: Duration,
        watchdog: Option<Arc<Watchdog>>,
    ) -> Result<Self, KernelError> {
        let interval = clamp_interval(interval);
        if let Some(wd) = &watchdog {
            wd.register(HEALTH_TASK, interval * STALL_FACTOR);
        }

        let shared = Arc::new(Shared::default());
        let state = Arc::clone(&shared);
        let watched = watchdog.clone();
        let worker = thread::Builder::new()
            .name(HEALTH_TASK.into())
            .spawn(move || run(&registry, &state, interval, watched.as_deref()))
            .map_err(|e| KernelError::Config(format!("cannot spawn health monitor: {e}")))?;

        info!(interval_ms = interval.as_millis() as u64, "health monitor started");
        Ok(Self {
            shared,
            worker: Some(worker),
            interval,
            watchdog,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Report from the most recent completed sweep.
    pub fn last_report(&self) -> SweepReport {
        self.shared.last.lock().clone()
    }

    /// Stop the sweep thread and wait for it to exit.
    pub fn stop(&mut self) {
        *self.shared.stop.lock() = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("health monitor thread panicked");
            }
            debug!("health monitor stopped");
        }
        if let Some(wd) = self.watchdog.take() {
            wd.unregister(HEALTH_TASK);
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_INTERVAL {
        warn!(
            requested_ms = interval.as_millis() as u64,
            min_ms = MIN_INTERVAL.as_millis() as u64,
            "health interval too short, clamping"
        );
        return MIN_INTERVAL;
    }
    interval
}

fn run(registry: &ServiceRegistry, shared: &Shared, interval: Duration, watchdog: Option<&Watchdog>) {
    let mut sweep = 0u64;
    loop {
        {
            let mut stop = shared.stop.lock();
            if !*stop {
                shared.wake.wait_for(&mut stop, interval);
            }
            if *stop {
                break;
            }
        }

        sweep += 1;
        let stalled_tasks = match watchdog {
            Some(wd) => {
                wd.heartbeat(HEALTH_TASK);
                wd.check_all()
            }
            None => Vec::new(),
        };
        let failures = registry.perform_health_check();
        if !failures.is_empty() {
            warn!(sweep, failing = failures.len(), "health sweep found failing services");
        }
        *shared.last.lock() = SweepReport {
            sweep,
            failures,
            stalled_tasks,
            completed_at: Some(Instant::now()),
        };
    }
}
