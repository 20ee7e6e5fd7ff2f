//! [`TouchDevice`] capability interface.

use crate::device::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchPoint {
    pub x: u16,
    pub y: u16,
}

/// Raw-to-screen calibration for resistive panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub x_min: i16,
    pub x_max: i16,
    pub y_min: i16,
    pub y_max: i16,
    /// Quarter turns applied before mapping onto the display.
    pub offset_rotation: u8,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            x_min: 0,
            x_max: 4095,
            y_min: 0,
            y_max: 4095,
            offset_rotation: 0,
        }
    }
}

pub trait TouchDevice: Device {
    /// Currently pressed points, at most `max_points` of them.
    fn touched_points(&self, max_points: usize) -> Vec<TouchPoint>;

    fn max_touch_points(&self) -> u8 {
        1
    }

    fn calibration(&self) -> Calibration;

    fn set_calibration(&self, _calibration: Calibration) {}
}
