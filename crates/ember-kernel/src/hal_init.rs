//! [`HalInitService`] – the first service to boot.
//!
//! Brings the board's hardware up and bridges the [`DeviceRegistry`] into
//! the [`EventBus`]:
//!
//! | Topic | Payload |
//! |---|---|
//! | `hal.init.begin` | – |
//! | `hal.device.registered` | `id`, `type`, `name` |
//! | `hal.device.removed` | `id`, `type`, `name` |
//! | `hal.init.complete` | `deviceCount` |

use std::sync::Arc;

use ember_hal::registry::RegistrySubscription;
use ember_hal::{DeviceRef, DeviceRegistry};
use ember_middleware::{EventBus, topics};
use ember_types::{Bundle, KernelError};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::service::{Service, ServiceCapabilities, ServiceManifest};

pub const HAL_SERVICE_ID: &str = "com.ember.hal";

/// Board bring-up routine: starts drivers and registers them.
pub type BoardInitializer = Box<dyn FnOnce(&DeviceRegistry) -> Result<(), KernelError> + Send>;

pub struct HalInitService {
    manifest: ServiceManifest,
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    initializer: Mutex<Option<BoardInitializer>>,
    subscription: Mutex<Option<RegistrySubscription>>,
}

impl HalInitService {
    pub fn new(registry: Arc<DeviceRegistry>, events: EventBus) -> Self {
        Self {
            manifest: ServiceManifest::new(HAL_SERVICE_ID, "HAL")
                .priority(5)
                .required(true)
                .capabilities(
                    ServiceCapabilities::GPIO
                        | ServiceCapabilities::I2C
                        | ServiceCapabilities::DISPLAY,
                )
                .description("Hardware bring-up and device event bridge"),
            registry,
            events,
            initializer: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Run `init` on first start, after the event bridge is in place.
    pub fn with_initializer<F>(self, init: F) -> Self
    where
        F: FnOnce(&DeviceRegistry) -> Result<(), KernelError> + Send + 'static,
    {
        *self.initializer.lock() = Some(Box::new(init));
        self
    }
}

fn device_payload(device: &DeviceRef) -> Bundle {
    Bundle::new()
        .with_i32("id", i32::try_from(device.id()).unwrap_or(i32::MAX))
        .with_string("type", device.category().label())
        .with_string("name", device.name())
}

impl Service for HalInitService {
    fn manifest(&self) -> &ServiceManifest {
        &self.manifest
    }

    fn on_start(&self) -> Result<(), KernelError> {
        info!("initialising hardware");

        {
            let mut sub = self.subscription.lock();
            if sub.is_none() {
                let events = self.events.clone();
                *sub = Some(self.registry.subscribe(move |device, added| {
                    let topic = if added {
                        topics::DEVICE_REGISTERED
                    } else {
                        topics::DEVICE_REMOVED
                    };
                    events.publish(topic, device_payload(device));
                }));
            }
        }

        self.events.publish(topics::HAL_INIT_BEGIN, Bundle::new());

        let init = self.initializer.lock().take();
        if let Some(init) = init {
            if let Err(e) = init(&self.registry) {
                error!(error = %e, "hardware initialisation failed");
                return Err(e);
            }
        }

        let count = self.registry.count();
        info!(devices = count, "hardware initialisation complete");
        self.registry.dump_devices();
        self.events.publish(
            topics::HAL_INIT_COMPLETE,
            Bundle::new().with_i32("deviceCount", i32::try_from(count).unwrap_or(i32::MAX)),
        );
        Ok(())
    }

    fn on_stop(&self) {
        if let Some(sub) = self.subscription.lock().take() {
            self.registry.unsubscribe(sub);
        }
        info!("hardware event bridge stopped");
    }

    fn on_health_check(&self) -> Result<(), KernelError> {
        let report = self.registry.health_report();
        if report.error_devices == 0 {
            return Ok(());
        }
        warn!(errors = report.error_devices, "devices in error state");
        for (id, state) in &report.unhealthy {
            warn!(id, %state, "device unhealthy");
        }
        Err(KernelError::Unhealthy(format!(
            "{} of {} devices in error state",
            report.error_devices, report.total_devices
        )))
    }
}
