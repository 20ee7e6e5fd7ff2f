//! [`SettingsBinder`] – change-triggered persistence for reactive values.
//!
//! The kernel does not know how settings are stored.  Values are registered
//! by key together with the [`Observable`] that holds them, and every change
//! is forwarded to a [`SettingsStore`] supplied by the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use ember_middleware::{Observable, ObservableSubscription, StringObservable};
use ember_types::KernelError;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// A persisted setting value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Int(i32),
    Text(String),
}

/// Backing storage for settings.  The format is owned by the implementor.
pub trait SettingsStore: Send + Sync {
    fn load(&self, key: &str) -> Option<SettingValue>;

    fn save(&self, key: &str, value: SettingValue) -> Result<(), KernelError>;
}

/// In-memory [`SettingsStore`], used by the simulator profiles.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, SettingValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, SettingValue> {
        self.values.lock().clone()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self, key: &str) -> Option<SettingValue> {
        self.values.lock().get(key).cloned()
    }

    fn save(&self, key: &str, value: SettingValue) -> Result<(), KernelError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

enum Binding {
    Int(Arc<Observable<i32>>, ObservableSubscription),
    Text(Arc<StringObservable>, ObservableSubscription),
}

impl Binding {
    fn current(&self) -> SettingValue {
        match self {
            Binding::Int(obs, _) => SettingValue::Int(obs.get()),
            Binding::Text(obs, _) => SettingValue::Text(obs.get()),
        }
    }

    fn detach(&self) {
        match self {
            Binding::Int(obs, id) => {
                obs.unsubscribe(*id);
            }
            Binding::Text(obs, id) => {
                obs.unsubscribe(*id);
            }
        }
    }
}

fn persist(store: &dyn SettingsStore, key: &str, value: SettingValue) {
    match store.save(key, value) {
        Ok(()) => debug!(key, "setting persisted"),
        Err(e) => warn!(key, error = %e, "failed to persist setting"),
    }
}

/// Binds observables to a [`SettingsStore`].
pub struct SettingsBinder {
    store: Arc<dyn SettingsStore>,
    bindings: Mutex<BTreeMap<String, Binding>>,
}

impl SettingsBinder {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            bindings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register an integer setting.  A stored value, if present, is loaded
    /// into `value` before the binding starts forwarding changes.
    ///
    /// Re-registering a key replaces the earlier binding.
    pub fn register_i32(&self, key: &str, value: Arc<Observable<i32>>) {
        if let Some(SettingValue::Int(stored)) = self.store.load(key) {
            value.set(stored);
        }
        let store = Arc::clone(&self.store);
        let owned = key.to_string();
        let id = value.subscribe(move |v| persist(store.as_ref(), &owned, SettingValue::Int(*v)));
        self.bind(key, Binding::Int(value, id));
    }

    /// String counterpart of [`register_i32`][Self::register_i32].
    pub fn register_string(&self, key: &str, value: Arc<StringObservable>) {
        if let Some(SettingValue::Text(stored)) = self.store.load(key) {
            value.set(stored);
        }
        let store = Arc::clone(&self.store);
        let owned = key.to_string();
        let id = value.subscribe(move |v| persist(store.as_ref(), &owned, SettingValue::Text(v.clone())));
        self.bind(key, Binding::Text(value, id));
    }

    fn bind(&self, key: &str, binding: Binding) {
        if let Some(old) = self.bindings.lock().insert(key.to_string(), binding) {
            old.detach();
        }
        debug!(key, "setting bound");
    }

    /// Stop forwarding changes for `key`.  Returns `false` if it was not bound.
    pub fn unregister(&self, key: &str) -> bool {
        match self.bindings.lock().remove(key) {
            Some(binding) => {
                binding.detach();
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.bindings.lock().keys().cloned().collect()
    }

    /// Persist the current value of every bound setting.
    ///
    /// # Errors
    ///
    /// The first [`KernelError::Storage`] reported by the store; remaining
    /// keys are still attempted.
    pub fn save_all(&self) -> Result<(), KernelError> {
        let snapshot: Vec<(String, SettingValue)> = self
            .bindings
            .lock()
            .iter()
            .map(|(k, b)| (k.clone(), b.current()))
            .collect();

        let mut first_error = None;
        for (key, value) in snapshot {
            if let Err(e) = self.store.save(&key, value) {
                warn!(key, error = %e, "failed to persist setting");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for SettingsBinder {
    fn drop(&mut self) {
        for binding in self.bindings.get_mut().values() {
            binding.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyStore {
        inner: MemoryStore,
        reject: &'static str,
    }

    impl SettingsStore for FlakyStore {
        fn load(&self, key: &str) -> Option<SettingValue> {
            self.inner.load(key)
        }
        fn save(&self, key: &str, value: SettingValue) -> Result<(), KernelError> {
            if key == self.reject {
                return Err(KernelError::Storage(format!("{key}: read-only")));
            }
            self.inner.save(key, value)
        }
    }

    #[test]
    fn changes_are_forwarded() {
        let store = Arc::new(MemoryStore::new());
        let binder = SettingsBinder::new(store.clone());
        let brightness = Arc::new(Observable::new(50));
        let timezone = Arc::new(StringObservable::new("UTC".to_string()));
        binder.register_i32("display.brightness", brightness.clone());
        binder.register_string("system.timezone", timezone.clone());

        brightness.set(80);
        timezone.set_str("Europe/Madrid");

        assert_eq!(store.load("display.brightness"), Some(SettingValue::Int(80)));
        assert_eq!(
            store.load("system.timezone"),
            Some(SettingValue::Text("Europe/Madrid".into()))
        );
    }

    #[test]
    fn stored_value_is_loaded_on_register() {
        let store = Arc::new(MemoryStore::new());
        store.save("display.brightness", SettingValue::Int(30)).unwrap();
        let binder = SettingsBinder::new(store);
        let brightness = Arc::new(Observable::new(100));
        binder.register_i32("display.brightness", brightness.clone());
        assert_eq!(brightness.get(), 30);
    }

    #[test]
    fn unregister_stops_forwarding() {
        let store = Arc::new(MemoryStore::new());
        let binder = SettingsBinder::new(store.clone());
        let volume = Arc::new(Observable::new(5));
        binder.register_i32("audio.volume", volume.clone());
        assert!(binder.unregister("audio.volume"));
        assert!(!binder.unregister("audio.volume"));

        volume.set(9);
        assert_eq!(store.load("audio.volume"), None);
        assert_eq!(volume.subscriber_count(), 0);
    }

    #[test]
    fn rebinding_replaces_subscription() {
        let binder = SettingsBinder::new(Arc::new(MemoryStore::new()));
        let a = Arc::new(Observable::new(1));
        let b = Arc::new(Observable::new(2));
        binder.register_i32("k", a.clone());
        binder.register_i32("k", b.clone());
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
        assert_eq!(binder.keys(), vec!["k"]);
    }

    #[test]
    fn save_all_persists_snapshot_and_reports_failure() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            reject: "locked",
        });
        let binder = SettingsBinder::new(store.clone());
        binder.register_i32("open", Arc::new(Observable::new(7)));
        binder.register_i32("locked", Arc::new(Observable::new(8)));

        let err = binder.save_all().unwrap_err();
        assert!(matches!(err, KernelError::Storage(_)));
        assert_eq!(store.inner.load("open"), Some(SettingValue::Int(7)));
    }

    #[test]
    fn unregister_leaves_other_observers_attached() {
        let store = Arc::new(MemoryStore::new());
        let binder = SettingsBinder::new(store.clone());
        let volume = Arc::new(Observable::new(5));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let ui: ObservableSubscription = volume.subscribe(move |v| s.lock().push(*v));

        binder.register_i32("audio.volume", volume.clone());
        assert_eq!(volume.subscriber_count(), 2);
        assert!(binder.unregister("audio.volume"));
        assert_eq!(volume.subscriber_count(), 1);

        volume.set(7);
        assert_eq!(*seen.lock(), vec![7]);
        assert_eq!(store.load("audio.volume"), None);
        assert!(volume.unsubscribe(ui));
    }

    #[test]
    fn drop_detaches_observers() {
        let value = Arc::new(Observable::new(0));
        {
            let binder = SettingsBinder::new(Arc::new(MemoryStore::new()));
            binder.register_i32("x", value.clone());
            assert_eq!(value.subscriber_count(), 1);
        }
        assert_eq!(value.subscriber_count(), 0);
    }
}
