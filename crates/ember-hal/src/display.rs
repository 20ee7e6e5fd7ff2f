//! [`DisplayDevice`] capability interface.

use std::sync::Arc;

use crate::device::Device;
use crate::touch::TouchDevice;

/// Pixel format produced by the panel driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Monochrome,
    Rgb565,
    Rgb565Swapped,
    Bgr565,
    Bgr565Swapped,
    Rgb888,
}

impl ColorFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            ColorFormat::Monochrome => 1,
            ColorFormat::Rgb888 => 3,
            _ => 2,
        }
    }
}

/// A display panel.
///
/// # Touch association
///
/// A display may own the touch controller laid over it.  The display holds
/// the only long-lived strong reference besides the registry's, and hands
/// out clones through [`DisplayDevice::attached_touch`]; the touch device's
/// useful lifetime is therefore contained in the display's.
pub trait DisplayDevice: Device {
    fn width(&self) -> u16;
    fn height(&self) -> u16;
    fn color_format(&self) -> ColorFormat;

    fn supports_backlight(&self) -> bool;
    /// Backlight duty in `0..=255`; `0` is off.
    fn set_backlight_duty(&self, duty: u8);
    fn backlight_duty(&self) -> u8;

    fn supports_power_control(&self) -> bool {
        false
    }
    fn set_power_on(&self, _on: bool) {}
    fn is_powered_on(&self) -> bool {
        true
    }

    fn attached_touch(&self) -> Option<Arc<dyn TouchDevice>>;

    /// Size in bytes of one full frame.
    fn frame_size(&self) -> usize {
        usize::from(self.width()) * usize::from(self.height()) * self.color_format().bytes_per_pixel()
    }
}
