//! Board capability summary derived from the live registry.

use ember_types::DeviceCategory;

use crate::display::DisplayDevice;
use crate::registry::DeviceRegistry;

/// What the running board can do right now.
///
/// A capability counts only if at least one device of that category is
/// registered **and** healthy; a registered card reader whose card failed to
/// mount does not give the board storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareCapabilities {
    pub has_display: bool,
    pub has_touch: bool,
    pub has_sd_card: bool,
    pub has_battery: bool,
    pub has_keyboard: bool,
    pub has_gps: bool,
    pub has_usb: bool,
    pub display_width: u16,
    pub display_height: u16,
}

impl HardwareCapabilities {
    pub fn active(registry: &DeviceRegistry) -> Self {
        let healthy = |category| {
            registry
                .find_by_category(category)
                .iter()
                .any(|d| d.is_healthy())
        };

        let display = registry
            .find_all::<dyn DisplayDevice>(DeviceCategory::Display)
            .into_iter()
            .find(|d| d.is_healthy());

        Self {
            has_display: display.is_some(),
            has_touch: healthy(DeviceCategory::Touch),
            has_sd_card: healthy(DeviceCategory::SdCard),
            has_battery: healthy(DeviceCategory::Power),
            has_keyboard: healthy(DeviceCategory::Keyboard),
            has_gps: healthy(DeviceCategory::Gps),
            has_usb: healthy(DeviceCategory::Usb),
            display_width: display.as_ref().map_or(0, |d| d.width()),
            display_height: display.as_ref().map_or(0, |d| d.height()),
        }
    }
}
