//! The [`Device`] contract every hardware peripheral implements.
//!
//! A device has an immutable numeric identity, a [`DeviceCategory`], a short
//! name and description, and a lifecycle [`DeviceState`].  Drivers embed a
//! [`DeviceCore`] to get identity allocation and a lock-free state machine
//! for free, and implement one capability interface (display, SPI bus, …).
//!
//! # Capability queries
//!
//! Consumers hold devices as [`DeviceRef`] (`Arc<dyn Device>`).  To reach a
//! richer interface they call one of the `as_*` projections, which a driver
//! overrides to return itself:
//!
//! ```ignore
//! fn as_display(self: Arc<Self>) -> Option<Arc<dyn DisplayDevice>> {
//!     Some(self)
//! }
//! ```
//!
//! The registry's typed queries go through [`DeviceCapability`], so they
//! never need run-time type identification.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use ember_types::{DeviceCategory, DeviceId, DeviceState, KernelError};
use tracing::{debug, warn};

use crate::display::DisplayDevice;
use crate::gpio::GpioController;
use crate::i2c::I2cBus;
use crate::spi::SpiBus;
use crate::touch::TouchDevice;

/// Shared handle to a registered device.
pub type DeviceRef = Arc<dyn Device>;

/// Process-wide identity counter.  Starts at 1; ids are never reused.
static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(1);

fn allocate_device_id() -> DeviceId {
    NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Base contract for every hardware peripheral.
pub trait Device: Send + Sync {
    /// Immutable runtime identity, assigned at construction.
    fn id(&self) -> DeviceId;

    fn category(&self) -> DeviceCategory;

    /// Short human-readable name, e.g. `"Headless Display"`.
    fn name(&self) -> &str;

    /// Longer description including driver and configuration details.
    fn description(&self) -> &str;

    /// Bring the device up.  Runs the hardware initialisation at most once
    /// per instance; later calls report the outcome of the first attempt.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DeviceStartFailed`] when the device ends up in
    /// [`DeviceState::Error`].
    fn start(&self) -> Result<(), KernelError>;

    /// Shut the device down.  A device that never reached
    /// [`DeviceState::Ready`] is left untouched.
    fn stop(&self) -> Result<(), KernelError>;

    fn state(&self) -> DeviceState;

    fn is_healthy(&self) -> bool {
        self.state() == DeviceState::Ready
    }

    // ── Capability projections ──────────────────────────────────────────

    fn as_display(self: Arc<Self>) -> Option<Arc<dyn DisplayDevice>> {
        None
    }

    fn as_touch(self: Arc<Self>) -> Option<Arc<dyn TouchDevice>> {
        None
    }

    fn as_spi_bus(self: Arc<Self>) -> Option<Arc<dyn SpiBus>> {
        None
    }

    fn as_i2c_bus(self: Arc<Self>) -> Option<Arc<dyn I2cBus>> {
        None
    }

    fn as_gpio(self: Arc<Self>) -> Option<Arc<dyn GpioController>> {
        None
    }
}

/// A capability interface reachable from a [`DeviceRef`].
///
/// Implemented for the `dyn` capability traits so the registry can offer
/// `find_first::<dyn DisplayDevice>(…)`.
pub trait DeviceCapability {
    fn project(device: DeviceRef) -> Option<Arc<Self>>;
}

impl DeviceCapability for dyn Device {
    fn project(device: DeviceRef) -> Option<Arc<Self>> {
        Some(device)
    }
}

impl DeviceCapability for dyn DisplayDevice {
    fn project(device: DeviceRef) -> Option<Arc<Self>> {
        device.as_display()
    }
}

impl DeviceCapability for dyn TouchDevice {
    fn project(device: DeviceRef) -> Option<Arc<Self>> {
        device.as_touch()
    }
}

impl DeviceCapability for dyn SpiBus {
    fn project(device: DeviceRef) -> Option<Arc<Self>> {
        device.as_spi_bus()
    }
}

impl DeviceCapability for dyn I2cBus {
    fn project(device: DeviceRef) -> Option<Arc<Self>> {
        device.as_i2c_bus()
    }
}

impl DeviceCapability for dyn GpioController {
    fn project(device: DeviceRef) -> Option<Arc<Self>> {
        device.as_gpio()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DeviceCore
// ────────────────────────────────────────────────────────────────────────────

/// Identity and lifecycle bookkeeping shared by every concrete driver.
///
/// The state lives in an atomic so it can be read from any task without
/// taking a lock.  Transitions are compare-and-swap guarded and only follow
/// the edges of the lifecycle state machine.
#[derive(Debug)]
pub struct DeviceCore {
    id: DeviceId,
    state: AtomicU8,
}

impl DeviceCore {
    /// Allocate a fresh identity in [`DeviceState::Uninitialized`].
    pub fn new() -> Self {
        Self {
            id: allocate_device_id(),
            state: AtomicU8::new(DeviceState::Uninitialized as u8),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if that is a legal edge from the current state.
    /// Returns `false` (and changes nothing) otherwise.
    pub fn transition(&self, next: DeviceState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !DeviceState::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Drive `Uninitialized → Starting → {Ready | Error}` around `init`.
    ///
    /// `init` runs at most once per core.  A repeated call returns `Ok(())`
    /// if the first attempt succeeded and an error otherwise.
    pub fn run_start<F>(&self, name: &str, init: F) -> Result<(), KernelError>
    where
        F: FnOnce() -> Result<(), KernelError>,
    {
        if !self.transition(DeviceState::Starting) {
            return match self.state() {
                DeviceState::Ready => Ok(()),
                state => Err(KernelError::DeviceStartFailed {
                    name: name.to_string(),
                    details: format!("start already attempted (state={state})"),
                }),
            };
        }

        match init() {
            Ok(()) => {
                self.transition(DeviceState::Ready);
                debug!(device = name, id = self.id, "device ready");
                Ok(())
            }
            Err(e) => {
                self.transition(DeviceState::Error);
                warn!(device = name, id = self.id, error = %e, "device failed to start");
                Err(match e {
                    KernelError::DeviceStartFailed { .. } => e,
                    other => KernelError::DeviceStartFailed {
                        name: name.to_string(),
                        details: other.to_string(),
                    },
                })
            }
        }
    }

    /// Drive `Ready → Stopped` around `teardown`.  No-op in any other state.
    pub fn run_stop<F>(&self, teardown: F) -> Result<(), KernelError>
    where
        F: FnOnce() -> Result<(), KernelError>,
    {
        if self.state() != DeviceState::Ready {
            return Ok(());
        }
        let result = teardown();
        self.transition(DeviceState::Stopped);
        result
    }
}

impl Default for DeviceCore {
    fn default() -> Self {
        Self::new()
    }
}
