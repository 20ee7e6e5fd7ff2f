//! [`SpiBus`] capability interface and its scoped lock.
//!
//! Display, touch, and SD card frequently share one SPI host.  Every driver
//! on a shared host wraps its transaction in [`SpiGuard`] (or the
//! [`BusManager`][crate::bus_manager::BusManager] scoped lock directly);
//! a driver that skips it is a correctness hazard the kernel cannot detect.

use std::marker::PhantomData;

use crate::bus_manager::BusId;
use crate::device::Device;

pub trait SpiBus: Device {
    fn host_id(&self) -> BusId;

    /// Whether more than one peripheral is wired to this host.
    fn is_shared(&self) -> bool;

    /// Take exclusive (reentrant) access to the host.
    fn acquire(&self, timeout_ms: u64) -> bool;

    fn release(&self);

    /// Successful acquisitions so far.
    fn transaction_count(&self) -> u32 {
        0
    }

    /// Acquisitions that timed out so far.
    fn contention_count(&self) -> u32 {
        0
    }
}

/// RAII lock over an [`SpiBus`]; released on every exit path.
#[must_use = "the bus is released as soon as the guard is dropped"]
pub struct SpiGuard<'a> {
    bus: &'a dyn SpiBus,
    acquired: bool,
    // Release must happen on the acquiring thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a> SpiGuard<'a> {
    pub fn new(bus: &'a dyn SpiBus, timeout_ms: u64) -> Self {
        let acquired = bus.acquire(timeout_ms);
        Self {
            bus,
            acquired,
            _not_send: PhantomData,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }
}

impl Drop for SpiGuard<'_> {
    fn drop(&mut self) {
        if self.acquired {
            self.bus.release();
        }
    }
}
