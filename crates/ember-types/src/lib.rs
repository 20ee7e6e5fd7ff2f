//! `ember-types` – shared vocabulary for the Ember board kernel.
//!
//! Every other crate in the workspace speaks in these types: device identity
//! and lifecycle, the typed [`Bundle`] payload carried by bus events, the
//! [`Event`] envelope itself, and the workspace-wide [`KernelError`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Runtime identity of a device. Allocated once, monotonically, never reused.
pub type DeviceId = u32;

/// Broad hardware category of a device, used for typed registry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceCategory {
    Display,
    Touch,
    SdCard,
    Gpio,
    I2c,
    Spi,
    Uart,
    Power,
    Keyboard,
    Encoder,
    Usb,
    Sensor,
    Gps,
    Other,
}

impl DeviceCategory {
    /// Short label used in logs and the console device table.
    pub const fn label(self) -> &'static str {
        match self {
            DeviceCategory::Display => "Display",
            DeviceCategory::Touch => "Touch",
            DeviceCategory::SdCard => "SdCard",
            DeviceCategory::Gpio => "GPIO",
            DeviceCategory::I2c => "I2C",
            DeviceCategory::Spi => "SPI",
            DeviceCategory::Uart => "UART",
            DeviceCategory::Power => "Power",
            DeviceCategory::Keyboard => "Keyboard",
            DeviceCategory::Encoder => "Encoder",
            DeviceCategory::Usb => "USB",
            DeviceCategory::Sensor => "Sensor",
            DeviceCategory::Gps => "GPS",
            DeviceCategory::Other => "Other",
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a device.
///
/// ```text
/// Uninitialized → Starting → Ready
///                          ↘ Error
/// Ready → Stopped
/// ```
///
/// Nothing leaves `Error` or `Stopped`; a fresh instance must be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceState {
    Uninitialized = 0,
    Starting = 1,
    Ready = 2,
    Error = 3,
    Stopped = 4,
}

impl DeviceState {
    /// Decode the raw representation stored in an atomic. Unknown values map
    /// to [`DeviceState::Error`].
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DeviceState::Uninitialized,
            1 => DeviceState::Starting,
            2 => DeviceState::Ready,
            4 => DeviceState::Stopped,
            _ => DeviceState::Error,
        }
    }

    /// Whether `self → next` is an edge of the lifecycle state machine.
    pub const fn can_transition_to(self, next: DeviceState) -> bool {
        matches!(
            (self, next),
            (DeviceState::Uninitialized, DeviceState::Starting)
                | (DeviceState::Starting, DeviceState::Ready)
                | (DeviceState::Starting, DeviceState::Error)
                | (DeviceState::Ready, DeviceState::Stopped)
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            DeviceState::Uninitialized => "Uninitialized",
            DeviceState::Starting => "Starting",
            DeviceState::Ready => "Ready",
            DeviceState::Error => "Error",
            DeviceState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single typed value stored in a [`Bundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BundleValue {
    Bool(bool),
    Int32(i32),
    String(String),
}

/// Structured key/value payload attached to bus events.
///
/// Keys are kept sorted so payloads render deterministically in logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    entries: BTreeMap<String, BundleValue>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.entries.insert(key.into(), BundleValue::Bool(value));
        self
    }

    pub fn put_i32(&mut self, key: impl Into<String>, value: i32) -> &mut Self {
        self.entries.insert(key.into(), BundleValue::Int32(value));
        self
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries
            .insert(key.into(), BundleValue::String(value.into()));
        self
    }

    /// Builder form of [`Bundle::put_string`].
    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put_string(key, value);
        self
    }

    /// Builder form of [`Bundle::put_i32`].
    pub fn with_i32(mut self, key: impl Into<String>, value: i32) -> Self {
        self.put_i32(key, value);
        self
    }

    /// Builder form of [`Bundle::put_bool`].
    pub fn with_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.put_bool(key, value);
        self
    }

    /// Returns `None` when the key is absent or holds a different type.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(BundleValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns `None` when the key is absent or holds a different type.
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(BundleValue::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns `None` when the key is absent or holds a different type.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(BundleValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_i32_or(&self, key: &str, default: i32) -> i32 {
        self.get_i32(key).unwrap_or(default)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Envelope for everything published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Dotted topic name, e.g. `"service.started"`.
    pub topic: String,
    pub payload: Bundle,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: Bundle) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            payload,
        }
    }
}

/// Workspace-wide error type.
///
/// Hardware and configuration failures are ordinary values here; callers
/// decide whether to retry, degrade, or abandon the pending operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("device {0} is already registered")]
    DuplicateDevice(DeviceId),

    #[error("device {0} is not registered")]
    DeviceNotFound(DeviceId),

    #[error("device '{name}' failed to start: {details}")]
    DeviceStartFailed { name: String, details: String },

    #[error("device '{0}' is not ready")]
    NotReady(String),

    #[error("bus transaction failed: {0}")]
    Transport(String),

    #[error("timed out after {timeout_ms} ms waiting for bus {bus_id}")]
    BusTimeout { bus_id: i32, timeout_ms: u64 },

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    #[error("cannot start '{service}': dependency '{dependency}' failed")]
    DependencyFailed { service: String, dependency: String },

    #[error("service '{0}' failed to start")]
    ServiceStartFailed(String),

    #[error("health check failed: {0}")]
    Unhealthy(String),

    #[error("settings storage error: {0}")]
    Storage(String),

    #[error("invalid GPIO pin {0}")]
    InvalidPin(i32),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_state_raw_roundtrip() {
        for state in [
            DeviceState::Uninitialized,
            DeviceState::Starting,
            DeviceState::Ready,
            DeviceState::Error,
            DeviceState::Stopped,
        ] {
            assert_eq!(DeviceState::from_u8(state as u8), state);
        }
        assert_eq!(DeviceState::from_u8(200), DeviceState::Error);
    }

    #[test]
    fn lifecycle_edges() {
        use DeviceState::*;
        assert!(Uninitialized.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Ready));
        assert!(Starting.can_transition_to(Error));
        assert!(Ready.can_transition_to(Stopped));

        assert!(!Error.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Starting));
        assert!(!Uninitialized.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Starting));
    }

    #[test]
    fn category_labels_match_console_names() {
        assert_eq!(DeviceCategory::Gpio.to_string(), "GPIO");
        assert_eq!(DeviceCategory::I2c.to_string(), "I2C");
        assert_eq!(DeviceCategory::Display.to_string(), "Display");
    }

    #[test]
    fn bundle_typed_access() {
        let bundle = Bundle::new()
            .with_string("name", "Headless Display")
            .with_i32("id", 7)
            .with_bool("added", true);

        assert_eq!(bundle.get_str("name"), Some("Headless Display"));
        assert_eq!(bundle.get_i32("id"), Some(7));
        assert_eq!(bundle.get_bool("added"), Some(true));
        assert_eq!(bundle.len(), 3);

        // Wrong type is reported as absent.
        assert_eq!(bundle.get_i32("name"), None);
        assert_eq!(bundle.get_i32_or("missing", -1), -1);
        assert_eq!(bundle.get_str_or("missing", "n/a"), "n/a");
    }

    #[test]
    fn bundle_serializes_as_flat_map() {
        let bundle = Bundle::new().with_string("serviceId", "com.ember.hal");
        let json = serde_json::to_string(&bundle).unwrap();
        assert_eq!(json, r#"{"serviceId":"com.ember.hal"}"#);
    }

    #[test]
    fn event_carries_topic_and_payload() {
        let event = Event::new("hal.init.complete", Bundle::new().with_i32("deviceCount", 4));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.topic, "hal.init.complete");
        assert_eq!(back.payload.get_i32("deviceCount"), Some(4));
    }

    #[test]
    fn kernel_error_display() {
        let err = KernelError::BusTimeout {
            bus_id: 2,
            timeout_ms: 50,
        };
        assert!(err.to_string().contains("bus 2"));

        let err = KernelError::DependencyFailed {
            service: "com.ember.display".into(),
            dependency: "com.ember.settings".into(),
        };
        assert!(err.to_string().contains("com.ember.settings"));
    }
}
