//! The [`Service`] contract and the per-service lifecycle state machine.
//!
//! A service is described by a static [`ServiceManifest`] (identity,
//! dependencies, boot priority, flags) and implements the lifecycle hooks of
//! [`Service`].  The [`ServiceRegistry`][crate::service_registry::ServiceRegistry]
//! wraps each one in a [`ServiceHandle`], which owns the state machine:
//!
//! ```text
//! Stopped ──▶ Starting ──▶ Started ──▶ Stopping ──▶ Stopped
//!                 │
//!                 └──────▶ Failed ──▶ Starting (retry)
//! ```
//!
//! Hooks always run with no lock held, so a hook may query the registries.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use ember_types::KernelError;
use parking_lot::Mutex;

bitflags! {
    /// Capabilities a service provides to the rest of the system.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServiceCapabilities: u32 {
        const WIFI = 1 << 0;
        const BLUETOOTH = 1 << 1;
        const STORAGE = 1 << 2;
        const GPIO = 1 << 3;
        const I2C = 1 << 4;
        const DISPLAY = 1 << 5;
        const AUDIO = 1 << 6;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Manifest
// ────────────────────────────────────────────────────────────────────────────

/// Static metadata the registry uses for dependency resolution and boot
/// ordering.  This is the only coupling between a service and the kernel.
///
/// # Example
///
/// ```
/// use ember_kernel::service::ServiceManifest;
///
/// let manifest = ServiceManifest::new("com.ember.display", "Display")
///     .depends_on("com.ember.settings")
///     .priority(20)
///     .required(true);
/// assert!(manifest.auto_start);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceManifest {
    /// Unique reverse-DNS identifier, e.g. `"com.ember.settings"`.
    pub id: String,
    pub name: String,
    pub version: String,
    /// Ids of services that must be started first.
    pub dependencies: Vec<String>,
    /// Boot priority among services whose dependencies are satisfied; lower
    /// starts earlier.
    pub priority: i32,
    /// Failure to start puts the system in safe mode.
    pub required: bool,
    /// Started by the boot pass; otherwise only on explicit request.
    pub auto_start: bool,
    /// Skipped entirely when the system runs headless.
    pub gui_required: bool,
    pub capabilities: ServiceCapabilities,
    pub description: String,
}

impl ServiceManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1.0.0".to_string(),
            dependencies: Vec::new(),
            priority: 100,
            required: false,
            auto_start: true,
            gui_required: false,
            capabilities: ServiceCapabilities::empty(),
            description: String::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn gui_required(mut self, gui_required: bool) -> Self {
        self.gui_required = gui_required;
        self
    }

    pub fn capabilities(mut self, capabilities: ServiceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Service contract
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle hooks implemented by every system service.
pub trait Service: Send + Sync {
    fn manifest(&self) -> &ServiceManifest;

    /// Bring the service up.  Dependencies are already started.
    fn on_start(&self) -> Result<(), KernelError>;

    /// Tear the service down.  Dependents are already stopped.
    fn on_stop(&self);

    /// Deferred initialisation that needs a live display; called once the
    /// graphics subsystem is ready, only for services already running.
    fn on_gui_init(&self) {}

    /// Periodic, observational health probe.
    fn on_health_check(&self) -> Result<(), KernelError> {
        Ok(())
    }
}

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Started,
    Stopping,
    Failed,
}

impl ServiceState {
    pub const fn label(self) -> &'static str {
        match self {
            ServiceState::Stopped => "Stopped",
            ServiceState::Starting => "Starting",
            ServiceState::Started => "Started",
            ServiceState::Stopping => "Stopping",
            ServiceState::Failed => "Failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Runtime counters kept per service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Successful starts.
    pub start_count: u32,
    /// Failed start attempts.
    pub failure_count: u32,
    /// Duration of the most recent `on_start` call.
    pub last_start_duration: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

struct Lifecycle {
    state: ServiceState,
    stats: ServiceStats,
}

/// A registered service plus its lifecycle state and counters.
pub struct ServiceHandle {
    service: Arc<dyn Service>,
    lifecycle: Mutex<Lifecycle>,
}

impl ServiceHandle {
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self {
            service,
            lifecycle: Mutex::new(Lifecycle {
                state: ServiceState::Stopped,
                stats: ServiceStats::default(),
            }),
        }
    }

    pub fn manifest(&self) -> &ServiceManifest {
        self.service.manifest()
    }

    pub fn id(&self) -> &str {
        &self.service.manifest().id
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle.lock().state
    }

    pub fn stats(&self) -> ServiceStats {
        self.lifecycle.lock().stats
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Started
    }

    /// Run `on_start` and move to `Started` or `Failed`.
    ///
    /// Starting a running service is a successful no-op.  A start already in
    /// progress on another thread is reported as a failure.
    pub fn start(&self) -> Result<(), KernelError> {
        {
            let mut lc = self.lifecycle.lock();
            match lc.state {
                ServiceState::Started => return Ok(()),
                ServiceState::Starting | ServiceState::Stopping => {
                    return Err(KernelError::ServiceStartFailed(self.id().to_string()));
                }
                ServiceState::Stopped | ServiceState::Failed => lc.state = ServiceState::Starting,
            }
        }

        let t0 = Instant::now();
        let result = self.service.on_start();
        let elapsed = t0.elapsed();

        let mut lc = self.lifecycle.lock();
        lc.stats.last_start_duration = elapsed;
        match result {
            Ok(()) => {
                lc.state = ServiceState::Started;
                lc.stats.start_count += 1;
            }
            Err(_) => {
                lc.state = ServiceState::Failed;
                lc.stats.failure_count += 1;
            }
        }
        result
    }

    /// Run `on_stop` if the service is running; no-op otherwise.
    /// Returns whether the service was stopped by this call.
    pub fn stop(&self) -> bool {
        {
            let mut lc = self.lifecycle.lock();
            if lc.state != ServiceState::Started {
                return false;
            }
            lc.state = ServiceState::Stopping;
        }
        self.service.on_stop();
        self.lifecycle.lock().state = ServiceState::Stopped;
        true
    }

    pub fn gui_init(&self) {
        self.service.on_gui_init();
    }

    pub fn health_check(&self) -> Result<(), KernelError> {
        self.service.on_health_check()
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
