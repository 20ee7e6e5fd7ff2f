//! `ember-kernel` – service orchestration.
//!
//! Boots system services in dependency order, supervises their lifecycle,
//! and bridges the hardware layer into the event bus.
//!
//! # Modules
//!
//! - [`service`] – [`ServiceManifest`][service::ServiceManifest], the
//!   [`Service`][service::Service] lifecycle contract, and
//!   [`ServiceHandle`][service::ServiceHandle], the per-service state machine.
//! - [`service_registry`] – [`ServiceRegistry`][service_registry::ServiceRegistry]:
//!   resolves the boot order (Kahn's algorithm, priority tie-break), runs the
//!   boot pass, and handles start/stop/restart with dependency cascades.
//! - [`health`] – [`HealthMonitor`][health::HealthMonitor]: a background
//!   thread that sweeps every running service's health hook on an interval.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: name-keyed task
//!   heartbeats; overdue tasks are reported, never restarted.
//! - [`hal_init`] – [`HalInitService`][hal_init::HalInitService]: the
//!   first service to boot; installs the board and republishes device
//!   registry changes on the bus.
//! - [`settings`] – [`SettingsBinder`][settings::SettingsBinder]: forwards
//!   observable changes to a pluggable [`SettingsStore`][settings::SettingsStore].

pub mod hal_init;
pub mod health;
pub mod service;
pub mod service_registry;
pub mod settings;
pub mod watchdog;

pub use hal_init::{HAL_SERVICE_ID, HalInitService};
pub use health::{HEALTH_TASK, HealthMonitor, MIN_INTERVAL, SweepReport};
pub use service::{Service, ServiceCapabilities, ServiceHandle, ServiceManifest, ServiceState};
pub use service_registry::{ServiceRegistry, ServiceStatus};
pub use settings::{MemoryStore, SettingValue, SettingsBinder, SettingsStore};
pub use watchdog::{TaskHealth, Watchdog};
