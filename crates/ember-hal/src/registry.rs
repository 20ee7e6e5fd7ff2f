//! [`DeviceRegistry`] – the table of live hardware peripherals.
//!
//! Drivers register here once started; services and UI code query by id,
//! name, category, or capability interface.  Interested parties subscribe to
//! add/remove notifications.
//!
//! # Locking
//!
//! The table sits behind a reentrant lock so that a query issued while the
//! same thread already holds it (e.g. from inside a health sweep) cannot
//! deadlock.  Change notifications are always delivered **after** the lock
//! has been released; a callback may register, deregister, or query freely.

use std::cell::RefCell;
use std::sync::Arc;

use ember_types::{DeviceCategory, DeviceId, DeviceState, KernelError};
use parking_lot::ReentrantMutex;
use tracing::{info, warn};

use crate::device::{DeviceCapability, DeviceRef};

/// Handle returned by [`DeviceRegistry::subscribe`].
pub type RegistrySubscription = u32;

/// Called with `(device, added)` after every registration change.
pub type RegistryCallback = Arc<dyn Fn(&DeviceRef, bool) + Send + Sync>;

/// Result of a single pass over the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub total_devices: usize,
    pub healthy_devices: usize,
    pub error_devices: usize,
    /// `(id, state)` for every device that is not healthy.
    pub unhealthy: Vec<(DeviceId, DeviceState)>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    devices: Vec<DeviceRef>,
    observers: Vec<(RegistrySubscription, RegistryCallback)>,
    next_subscription: RegistrySubscription,
}

/// Ordered, identity-unique collection of registered devices.
///
/// Constructed explicitly and shared as `Arc<DeviceRegistry>`; tests build
/// their own isolated instances.
#[derive(Default)]
pub struct DeviceRegistry {
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        f(&inner)
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        f(&mut inner)
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// Append `device` and notify subscribers.
    ///
    /// # Errors
    ///
    /// [`KernelError::DuplicateDevice`] if a device with the same id is
    /// already registered; the existing entry is left unchanged.
    pub fn register_device(&self, device: DeviceRef) -> Result<(), KernelError> {
        let id = device.id();
        let observers = self.with_mut(|inner| {
            if inner.devices.iter().any(|d| d.id() == id) {
                return Err(KernelError::DuplicateDevice(id));
            }
            inner.devices.push(Arc::clone(&device));
            Ok(snapshot(inner))
        });

        let observers = match observers {
            Ok(observers) => observers,
            Err(e) => {
                warn!(id, name = device.name(), "device already registered");
                return Err(e);
            }
        };

        info!(
            id,
            name = device.name(),
            category = %device.category(),
            state = %device.state(),
            "device registered"
        );
        for cb in &observers {
            cb(&device, true);
        }
        Ok(())
    }

    /// Remove the device with `id` and notify subscribers.
    ///
    /// # Errors
    ///
    /// [`KernelError::DeviceNotFound`] if nothing is registered under `id`.
    pub fn deregister_device(&self, id: DeviceId) -> Result<DeviceRef, KernelError> {
        let removed = self.with_mut(|inner| {
            let pos = inner.devices.iter().position(|d| d.id() == id)?;
            Some((inner.devices.remove(pos), snapshot(inner)))
        });

        let Some((device, observers)) = removed else {
            warn!(id, "deregister: device not found");
            return Err(KernelError::DeviceNotFound(id));
        };

        info!(id, name = device.name(), "device deregistered");
        for cb in &observers {
            cb(&device, false);
        }
        Ok(device)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn find_by_id(&self, id: DeviceId) -> Option<DeviceRef> {
        self.with(|inner| inner.devices.iter().find(|d| d.id() == id).cloned())
    }

    pub fn find_by_name(&self, name: &str) -> Option<DeviceRef> {
        self.with(|inner| inner.devices.iter().find(|d| d.name() == name).cloned())
    }

    /// Every device of `category`, in registration order.
    pub fn find_by_category(&self, category: DeviceCategory) -> Vec<DeviceRef> {
        self.with(|inner| {
            inner
                .devices
                .iter()
                .filter(|d| d.category() == category)
                .cloned()
                .collect()
        })
    }

    /// First device of `category` that exposes capability `C`.
    ///
    /// ```ignore
    /// let display = registry.find_first::<dyn DisplayDevice>(DeviceCategory::Display);
    /// ```
    pub fn find_first<C>(&self, category: DeviceCategory) -> Option<Arc<C>>
    where
        C: ?Sized + DeviceCapability,
    {
        self.find_by_category(category)
            .into_iter()
            .find_map(C::project)
    }

    /// Every device of `category` that exposes capability `C`; devices
    /// without it are skipped.
    pub fn find_all<C>(&self, category: DeviceCategory) -> Vec<Arc<C>>
    where
        C: ?Sized + DeviceCapability,
    {
        self.find_by_category(category)
            .into_iter()
            .filter_map(C::project)
            .collect()
    }

    pub fn all(&self) -> Vec<DeviceRef> {
        self.with(|inner| inner.devices.clone())
    }

    pub fn count(&self) -> usize {
        self.with(|inner| inner.devices.len())
    }

    pub fn has_category(&self, category: DeviceCategory) -> bool {
        self.with(|inner| inner.devices.iter().any(|d| d.category() == category))
    }

    // ── Change notification ──────────────────────────────────────────────

    pub fn subscribe<F>(&self, callback: F) -> RegistrySubscription
    where
        F: Fn(&DeviceRef, bool) + Send + Sync + 'static,
    {
        self.with_mut(|inner| {
            let id = inner.next_subscription;
            inner.next_subscription += 1;
            inner.observers.push((id, Arc::new(callback)));
            id
        })
    }

    pub fn unsubscribe(&self, id: RegistrySubscription) -> bool {
        self.with_mut(|inner| {
            let before = inner.observers.len();
            inner.observers.retain(|(sub, _)| *sub != id);
            inner.observers.len() != before
        })
    }

    // ── Health ───────────────────────────────────────────────────────────

    pub fn health_report(&self) -> HealthReport {
        self.with(|inner| {
            let mut report = HealthReport {
                total_devices: inner.devices.len(),
                ..HealthReport::default()
            };
            for device in &inner.devices {
                let state = device.state();
                if state == DeviceState::Error {
                    report.error_devices += 1;
                }
                if device.is_healthy() {
                    report.healthy_devices += 1;
                } else {
                    report.unhealthy.push((device.id(), state));
                }
            }
            report
        })
    }

    /// Log one line per registered device.
    pub fn dump_devices(&self) {
        let devices = self.all();
        info!(count = devices.len(), "registered devices");
        for d in devices {
            info!(
                id = d.id(),
                category = %d.category(),
                state = %d.state(),
                name = d.name(),
                description = d.description(),
                "  device"
            );
        }
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.count())
            .finish()
    }
}

fn snapshot(inner: &Inner) -> Vec<RegistryCallback> {
    inner.observers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceCore};
    use crate::spi::SpiBus;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockDevice {
        core: DeviceCore,
        category: DeviceCategory,
        name: String,
        fail: bool,
    }

    impl MockDevice {
        fn new(category: DeviceCategory, name: &str) -> Arc<Self> {
            Arc::new(Self {
                core: DeviceCore::new(),
                category,
                name: name.to_string(),
                fail: false,
            })
        }

        fn failing(category: DeviceCategory, name: &str) -> Arc<Self> {
            Arc::new(Self {
                core: DeviceCore::new(),
                category,
                name: name.to_string(),
                fail: true,
            })
        }
    }

    impl Device for MockDevice {
        fn id(&self) -> DeviceId {
            self.core.id()
        }
        fn category(&self) -> DeviceCategory {
            self.category
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "mock"
        }
        fn start(&self) -> Result<(), KernelError> {
            let fail = self.fail;
            self.core.run_start(&self.name, || {
                if fail {
                    Err(KernelError::Transport("mock".into()))
                } else {
                    Ok(())
                }
            })
        }
        fn stop(&self) -> Result<(), KernelError> {
            self.core.run_stop(|| Ok(()))
        }
        fn state(&self) -> DeviceState {
            self.core.state()
        }
    }

    /// A device that shares the id of another one.
    struct Impostor(DeviceId);

    impl Device for Impostor {
        fn id(&self) -> DeviceId {
            self.0
        }
        fn category(&self) -> DeviceCategory {
            DeviceCategory::Other
        }
        fn name(&self) -> &str {
            "impostor"
        }
        fn description(&self) -> &str {
            ""
        }
        fn start(&self) -> Result<(), KernelError> {
            Ok(())
        }
        fn stop(&self) -> Result<(), KernelError> {
            Ok(())
        }
        fn state(&self) -> DeviceState {
            DeviceState::Ready
        }
    }

    fn started(category: DeviceCategory, name: &str) -> DeviceRef {
        let d = MockDevice::new(category, name);
        d.start().unwrap();
        d
    }

    #[test]
    fn register_and_query() {
        let reg = DeviceRegistry::new();
        let gps = started(DeviceCategory::Gps, "gps");
        let sd = started(DeviceCategory::SdCard, "sd");
        reg.register_device(gps.clone()).unwrap();
        reg.register_device(sd.clone()).unwrap();

        assert_eq!(reg.count(), 2);
        assert_eq!(reg.find_by_id(gps.id()).unwrap().name(), "gps");
        assert_eq!(reg.find_by_name("sd").unwrap().id(), sd.id());
        assert!(reg.find_by_name("lcd").is_none());
        assert!(reg.has_category(DeviceCategory::Gps));
        assert!(!reg.has_category(DeviceCategory::Display));
        assert_eq!(reg.find_by_category(DeviceCategory::SdCard).len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected_and_original_kept() {
        let reg = DeviceRegistry::new();
        let gps = started(DeviceCategory::Gps, "gps");
        reg.register_device(gps.clone()).unwrap();

        let err = reg.register_device(Arc::new(Impostor(gps.id())));
        assert_eq!(err, Err(KernelError::DuplicateDevice(gps.id())));
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.find_by_id(gps.id()).unwrap().name(), "gps");
    }

    #[test]
    fn ids_not_reused_after_deregister() {
        let reg = DeviceRegistry::new();
        let devices: Vec<_> = (0..3)
            .map(|i| started(DeviceCategory::Other, &format!("d{i}")))
            .collect();
        for d in &devices {
            reg.register_device(d.clone()).unwrap();
        }
        reg.deregister_device(devices[1].id()).unwrap();

        let fresh = started(DeviceCategory::Other, "fresh");
        assert!(devices.iter().all(|d| d.id() != fresh.id()));
        reg.register_device(fresh).unwrap();
        assert_eq!(reg.count(), 3);
    }

    #[test]
    fn deregister_unknown_is_error_without_effect() {
        let reg = DeviceRegistry::new();
        reg.register_device(started(DeviceCategory::Gps, "gps")).unwrap();
        assert!(matches!(
            reg.deregister_device(u32::MAX),
            Err(KernelError::DeviceNotFound(_))
        ));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn observers_see_add_and_remove() {
        let reg = DeviceRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let sub = reg.subscribe(move |d, added| l.lock().push((d.id(), added)));

        let gps = started(DeviceCategory::Gps, "gps");
        reg.register_device(gps.clone()).unwrap();
        reg.deregister_device(gps.id()).unwrap();
        assert_eq!(*log.lock(), vec![(gps.id(), true), (gps.id(), false)]);

        assert!(reg.unsubscribe(sub));
        reg.register_device(started(DeviceCategory::Gps, "gps2")).unwrap();
        assert_eq!(log.lock().len(), 2);
        assert!(!reg.unsubscribe(sub));
    }

    #[test]
    fn observer_may_reenter_registry() {
        let reg = Arc::new(DeviceRegistry::new());
        let inner = Arc::downgrade(&reg);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        reg.subscribe(move |device, added| {
            let Some(reg) = inner.upgrade() else { return };
            // Queries and nested registration from inside the callback.
            s.store(reg.count(), Ordering::SeqCst);
            let _ = reg.health_report();
            if added && device.name() == "parent" {
                reg.register_device(started(DeviceCategory::Touch, "child"))
                    .unwrap();
            }
        });

        reg.register_device(started(DeviceCategory::Display, "parent"))
            .unwrap();
        assert_eq!(reg.count(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn health_report_counts_unhealthy() {
        let reg = DeviceRegistry::new();
        reg.register_device(started(DeviceCategory::Gps, "gps")).unwrap();

        let broken = MockDevice::failing(DeviceCategory::SdCard, "sd");
        assert!(broken.start().is_err());
        reg.register_device(broken.clone()).unwrap();

        let idle = MockDevice::new(DeviceCategory::Keyboard, "keys");
        reg.register_device(idle.clone()).unwrap();

        let report = reg.health_report();
        assert_eq!(report.total_devices, 3);
        assert_eq!(report.healthy_devices, 1);
        assert_eq!(report.error_devices, 1);
        assert!(!report.all_healthy());
        assert!(report.unhealthy.contains(&(broken.id(), DeviceState::Error)));
        assert!(
            report
                .unhealthy
                .contains(&(idle.id(), DeviceState::Uninitialized))
        );
    }

    #[test]
    fn typed_queries_skip_devices_without_capability() {
        let reg = DeviceRegistry::new();
        // Category matches but MockDevice does not implement SpiBus.
        reg.register_device(started(DeviceCategory::Spi, "not-a-bus"))
            .unwrap();
        assert!(reg.find_first::<dyn SpiBus>(DeviceCategory::Spi).is_none());
        assert!(reg.find_all::<dyn SpiBus>(DeviceCategory::Spi).is_empty());
        assert!(
            reg.find_first::<dyn Device>(DeviceCategory::Spi)
                .is_some()
        );
    }
}
