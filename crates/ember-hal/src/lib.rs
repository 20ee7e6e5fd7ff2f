//! `ember-hal` – Hardware Abstraction Layer
//!
//! Owns every hardware peripheral on the board and arbitrates access to the
//! buses they share.
//!
//! # Modules
//!
//! - [`device`] – the [`Device`][device::Device] contract (identity,
//!   category, lifecycle state machine) and the capability projections used
//!   for typed queries.
//! - [`display`], [`touch`], [`spi`], [`i2c`], [`gpio`] – capability
//!   interfaces implemented by leaf drivers.
//! - [`bus_manager`] – [`BusManager`][bus_manager::BusManager]: per-bus
//!   reentrant locks with timeouts and a scoped guard.
//! - [`registry`] – [`DeviceRegistry`][registry::DeviceRegistry]: the table
//!   of live devices, add/remove notifications, and the health report.
//! - [`interrupt`] – the GPIO interrupt → task hand-off: a lock-free SPSC
//!   edge queue, per-pin debounce, and the consumer thread.
//! - [`capabilities`] – [`HardwareCapabilities`][capabilities::HardwareCapabilities]
//!   summary of what the running board can do.
//! - [`sim`] – simulated drivers and the [`SimBoard`][sim::SimBoard]
//!   builder for running without hardware.

pub mod bus_manager;
pub mod capabilities;
pub mod device;
pub mod display;
pub mod gpio;
pub mod i2c;
pub mod interrupt;
pub mod registry;
pub mod sim;
pub mod spi;
pub mod touch;

pub use bus_manager::{BusId, BusManager, ScopedBusLock};
pub use capabilities::HardwareCapabilities;
pub use device::{Device, DeviceCapability, DeviceCore, DeviceRef};
pub use registry::{DeviceRegistry, HealthReport};
pub use sim::SimBoard;
