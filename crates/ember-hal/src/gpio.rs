//! [`GpioController`] capability interface.
//!
//! Edge callbacks are never invoked from interrupt context: the interrupt
//! handler only queues the pin number, and a dedicated task reads the level
//! and calls back (see [`crate::interrupt`]).  Callbacks may therefore
//! allocate, log, and block.

use std::sync::Arc;

use ember_types::KernelError;

use crate::device::Device;

pub type Pin = i32;

/// "Not connected" marker; also the shutdown sentinel of the edge queue.
pub const PIN_NC: Pin = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioMode {
    Disable,
    Input,
    Output,
    OutputOpenDrain,
    InputOutput,
    InputOutputOpenDrain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullMode {
    #[default]
    None,
    Up,
    Down,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptEdge {
    None,
    Rising,
    Falling,
    Both,
}

impl InterruptEdge {
    /// Whether a transition to `level` fires on this edge setting.
    pub const fn fires_on(self, level: bool) -> bool {
        match self {
            InterruptEdge::None => false,
            InterruptEdge::Rising => level,
            InterruptEdge::Falling => !level,
            InterruptEdge::Both => true,
        }
    }
}

/// Edge callback, invoked as `(pin, level)` from task context.
pub type GpioCallback = Arc<dyn Fn(Pin, bool) + Send + Sync>;

pub trait GpioController: Device {
    fn configure(&self, pin: Pin, mode: GpioMode, pull: PullMode) -> Result<(), KernelError>;

    fn set_level(&self, pin: Pin, level: bool) -> Result<(), KernelError>;

    /// Current input level; `false` for invalid pins.
    fn level(&self, pin: Pin) -> bool;

    fn pin_count(&self) -> usize;

    fn attach_interrupt(
        &self,
        pin: Pin,
        edge: InterruptEdge,
        callback: GpioCallback,
    ) -> Result<(), KernelError>;

    fn detach_interrupt(&self, pin: Pin) -> Result<(), KernelError>;

    /// Trigger on both edges, rejecting edges closer than `debounce_ms` to
    /// the last accepted one.
    fn configure_debounced(
        &self,
        pin: Pin,
        debounce_ms: u32,
        callback: GpioCallback,
    ) -> Result<(), KernelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_filter() {
        assert!(InterruptEdge::Rising.fires_on(true));
        assert!(!InterruptEdge::Rising.fires_on(false));
        assert!(InterruptEdge::Falling.fires_on(false));
        assert!(InterruptEdge::Both.fires_on(true));
        assert!(InterruptEdge::Both.fires_on(false));
        assert!(!InterruptEdge::None.fires_on(true));
    }
}
