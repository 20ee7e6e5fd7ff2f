//! [`ServiceRegistry`] – dependency-ordered boot and supervision of system
//! services.
//!
//! # Boot order
//!
//! Kahn's algorithm over the manifest dependency graph, with a min-priority
//! queue as the tie-break: whenever several services have all their
//! dependencies satisfied, the one with the lowest `priority` starts first,
//! and equal priorities keep registration order.
//!
//! Dependencies on ids that are not registered are ignored with a warning.
//! Services caught in a dependency cycle are left out of the boot order: the
//! rest of the system boots, the unresolved ids are logged as an error,
//! published on [`topics::SERVICE_CYCLE`], and kept in
//! [`ServiceRegistry::unresolved`].
//!
//! # Events
//!
//! | Topic | When | Payload |
//! |---|---|---|
//! | `service.started` | a service reached `Started` | `serviceId` |
//! | `service.stopped` | a running service was stopped | `serviceId` |
//! | `service.failed` | `on_start` returned an error | `serviceId` |
//! | `service.cycle` | boot order resolution left services out | `unresolved` (comma-separated ids) |

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ember_middleware::{EventBus, topics};
use ember_types::{Bundle, KernelError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::service::{Service, ServiceHandle, ServiceState, ServiceStats};

/// Point-in-time view of one service, for consoles and reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub id: String,
    pub name: String,
    pub state: ServiceState,
    pub required: bool,
    pub priority: i32,
    pub stats: ServiceStats,
}

#[derive(Default)]
struct BootPlan {
    order: Vec<String>,
    unresolved: Vec<String>,
}

/// Owns every registered service.
///
/// Constructed explicitly and shared as `Arc<ServiceRegistry>`.
pub struct ServiceRegistry {
    services: RwLock<Vec<Arc<ServiceHandle>>>,
    plan: Mutex<BootPlan>,
    required_failed: AtomicBool,
    events: EventBus,
}

impl ServiceRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            services: RwLock::new(Vec::new()),
            plan: Mutex::new(BootPlan::default()),
            required_failed: AtomicBool::new(false),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`KernelError::DuplicateService`] if the id is already taken; the
    /// registered service is kept.
    pub fn add_service(&self, service: Arc<dyn Service>) -> Result<(), KernelError> {
        let id = service.manifest().id.clone();
        let mut services = self.services.write();
        if services.iter().any(|h| h.id() == id) {
            warn!(service = %id, "service already registered");
            return Err(KernelError::DuplicateService(id));
        }
        services.push(Arc::new(ServiceHandle::new(service)));
        debug!(service = %id, "service registered");
        Ok(())
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    pub fn service(&self, id: &str) -> Option<Arc<ServiceHandle>> {
        self.services.read().iter().find(|h| h.id() == id).cloned()
    }

    fn handles(&self) -> Vec<Arc<ServiceHandle>> {
        self.services.read().clone()
    }

    // ── Boot order ───────────────────────────────────────────────────────

    /// Compute (and remember) the boot order.
    pub fn resolve_boot_order(&self) -> Vec<String> {
        let services = self.handles();
        let index: HashMap<&str, usize> = services
            .iter()
            .enumerate()
            .map(|(i, h)| (h.id(), i))
            .collect();

        let mut in_degree = vec![0usize; services.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); services.len()];
        for (i, handle) in services.iter().enumerate() {
            for dep in &handle.manifest().dependencies {
                match index.get(dep.as_str()) {
                    Some(&d) => {
                        dependents[d].push(i);
                        in_degree[i] += 1;
                    }
                    None => warn!(
                        service = handle.id(),
                        dependency = %dep,
                        "unknown dependency ignored"
                    ),
                }
            }
        }

        // Min-heap on (priority, registration index).
        let mut ready: BinaryHeap<Reverse<(i32, usize)>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(i, _)| Reverse((services[i].manifest().priority, i)))
            .collect();

        let mut order = Vec::with_capacity(services.len());
        while let Some(Reverse((_, i))) = ready.pop() {
            order.push(i);
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse((services[j].manifest().priority, j)));
                }
            }
        }

        let order: Vec<String> = order.iter().map(|&i| services[i].id().to_string()).collect();
        let unresolved: Vec<String> = services
            .iter()
            .filter(|h| !order.iter().any(|id| id == h.id()))
            .map(|h| h.id().to_string())
            .collect();

        if !unresolved.is_empty() {
            error!(
                resolved = order.len(),
                registered = services.len(),
                unresolved = ?unresolved,
                "dependency cycle detected; booting the resolvable subset"
            );
            self.events.publish(
                topics::SERVICE_CYCLE,
                Bundle::new().with_string("unresolved", unresolved.join(",")),
            );
        }

        let mut plan = self.plan.lock();
        plan.order = order.clone();
        plan.unresolved = unresolved;
        order
    }

    /// Boot order from the most recent resolution.
    pub fn boot_order(&self) -> Vec<String> {
        self.plan.lock().order.clone()
    }

    /// Services left out of the most recent resolution by a cycle.
    pub fn unresolved(&self) -> Vec<String> {
        self.plan.lock().unresolved.clone()
    }

    // ── Boot pass ────────────────────────────────────────────────────────

    /// Resolve the boot order and start every auto-start service in it.
    ///
    /// GUI-only services are skipped when `gui_mode` is false.  Returns
    /// `false` if and only if a `required` service failed to start during
    /// this pass; the caller should then enter safe mode.
    pub fn start_all(&self, gui_mode: bool) -> bool {
        let order = self.resolve_boot_order();
        self.required_failed.store(false, Ordering::SeqCst);
        info!(gui_mode, order = ?order, "starting services");

        let (mut started, mut skipped, mut failed) = (0usize, 0usize, 0usize);
        for id in &order {
            let Some(handle) = self.service(id) else {
                continue;
            };
            let manifest = handle.manifest();
            if !manifest.auto_start {
                debug!(service = %id, "skipped: not auto-start");
                skipped += 1;
                continue;
            }
            if manifest.gui_required && !gui_mode {
                debug!(service = %id, "skipped: requires GUI");
                skipped += 1;
                continue;
            }
            if handle.is_running() {
                started += 1;
                continue;
            }

            match handle.start() {
                Ok(()) => {
                    started += 1;
                    info!(
                        service = %id,
                        elapsed_us = handle.stats().last_start_duration.as_micros() as u64,
                        "service started"
                    );
                    self.publish(topics::SERVICE_STARTED, id);
                }
                Err(e) => {
                    failed += 1;
                    self.publish(topics::SERVICE_FAILED, id);
                    if manifest.required {
                        self.required_failed.store(true, Ordering::SeqCst);
                        error!(service = %id, error = %e, "required service failed to start");
                    } else {
                        warn!(service = %id, error = %e, "service failed to start");
                    }
                }
            }
        }

        let healthy = !self.required_failed.load(Ordering::SeqCst);
        info!(started, skipped, failed, healthy, "service boot complete");
        healthy
    }

    /// Whether a required service failed during the last boot pass.
    pub fn has_required_failure(&self) -> bool {
        self.required_failed.load(Ordering::SeqCst)
    }

    /// Run the GUI initialisation hook of every running service, in boot
    /// order.  Returns how many were initialised.
    pub fn init_gui_services(&self) -> usize {
        let mut count = 0;
        for id in self.boot_order() {
            if let Some(handle) = self.service(&id).filter(|h| h.is_running()) {
                debug!(service = %id, "gui init");
                handle.gui_init();
                count += 1;
            }
        }
        info!(count, "gui services initialised");
        count
    }

    /// Stop every running service in reverse boot order.
    pub fn stop_all(&self) {
        let mut order = self.boot_order();
        // Services started on demand but absent from the plan.
        for handle in self.handles() {
            if !order.iter().any(|id| id == handle.id()) {
                order.insert(0, handle.id().to_string());
            }
        }
        for id in order.iter().rev() {
            if let Some(handle) = self.service(id)
                && handle.stop()
            {
                info!(service = %id, "service stopped");
                self.publish(topics::SERVICE_STOPPED, id);
            }
        }
    }

    // ── Individual lifecycle ─────────────────────────────────────────────

    /// Start `id`, starting its dependencies first (depth-first, manifest
    /// order).
    ///
    /// # Errors
    ///
    /// [`KernelError::UnknownService`] for an unregistered id,
    /// [`KernelError::DependencyFailed`] if a dependency cannot start, or the
    /// service's own start error.
    pub fn start_service(&self, id: &str) -> Result<(), KernelError> {
        let mut visiting = HashSet::new();
        self.start_with_dependencies(id, &mut visiting)
    }

    fn start_with_dependencies(
        &self,
        id: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<(), KernelError> {
        let handle = self.service(id).ok_or_else(|| {
            warn!(service = %id, "start: unknown service");
            KernelError::UnknownService(id.to_string())
        })?;
        if handle.is_running() {
            return Ok(());
        }
        if !visiting.insert(id.to_string()) {
            error!(service = %id, "dependency cycle while starting service");
            return Err(KernelError::DependencyFailed {
                service: id.to_string(),
                dependency: id.to_string(),
            });
        }

        for dep in &handle.manifest().dependencies {
            if self.service(dep).is_none() {
                warn!(service = %id, dependency = %dep, "unknown dependency ignored");
                continue;
            }
            if let Err(e) = self.start_with_dependencies(dep, visiting) {
                warn!(service = %id, dependency = %dep, error = %e, "dependency failed to start");
                return Err(KernelError::DependencyFailed {
                    service: id.to_string(),
                    dependency: dep.clone(),
                });
            }
        }

        match handle.start() {
            Ok(()) => {
                info!(service = %id, "service started");
                self.publish(topics::SERVICE_STARTED, id);
                Ok(())
            }
            Err(e) => {
                warn!(service = %id, error = %e, "service failed to start");
                self.publish(topics::SERVICE_FAILED, id);
                Err(e)
            }
        }
    }

    /// Stop `id` after stopping every running service that depends on it.
    ///
    /// # Errors
    ///
    /// [`KernelError::UnknownService`] for an unregistered id.
    pub fn stop_service(&self, id: &str) -> Result<(), KernelError> {
        let mut visiting = HashSet::new();
        self.stop_with_dependents(id, &mut visiting)
    }

    fn stop_with_dependents(
        &self,
        id: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<(), KernelError> {
        let handle = self.service(id).ok_or_else(|| {
            warn!(service = %id, "stop: unknown service");
            KernelError::UnknownService(id.to_string())
        })?;
        if !visiting.insert(id.to_string()) {
            return Ok(());
        }

        let dependents: Vec<String> = self
            .handles()
            .iter()
            .filter(|h| h.is_running() && h.manifest().dependencies.iter().any(|d| d == id))
            .map(|h| h.id().to_string())
            .collect();
        for dependent in dependents {
            debug!(service = %id, dependent = %dependent, "stopping dependent first");
            self.stop_with_dependents(&dependent, visiting)?;
        }

        if handle.stop() {
            info!(service = %id, "service stopped");
            self.publish(topics::SERVICE_STOPPED, id);
        }
        Ok(())
    }

    /// Stop then start `id`.  Dependents stopped on the way are not
    /// restarted.
    pub fn restart_service(&self, id: &str) -> Result<(), KernelError> {
        self.stop_service(id)?;
        self.start_service(id)
    }

    // ── Health & introspection ───────────────────────────────────────────

    /// Run the health hook of every running service.
    ///
    /// Observational only: failures are logged and returned, nothing is
    /// restarted.
    pub fn perform_health_check(&self) -> Vec<(String, KernelError)> {
        let mut failures = Vec::new();
        for handle in self.handles().iter().filter(|h| h.is_running()) {
            if let Err(e) = handle.health_check() {
                warn!(service = handle.id(), error = %e, "health check failed");
                failures.push((handle.id().to_string(), e));
            }
        }
        debug!(failures = failures.len(), "health sweep complete");
        failures
    }

    pub fn service_state(&self, id: &str) -> Option<ServiceState> {
        self.service(id).map(|h| h.state())
    }

    /// Every service, in registration order.
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.handles()
            .iter()
            .map(|h| {
                let m = h.manifest();
                ServiceStatus {
                    id: m.id.clone(),
                    name: m.name.clone(),
                    state: h.state(),
                    required: m.required,
                    priority: m.priority,
                    stats: h.stats(),
                }
            })
            .collect()
    }

    /// Log one line per service.
    pub fn dump_service_states(&self) {
        let statuses = self.statuses();
        info!(count = statuses.len(), "registered services");
        for s in statuses {
            info!(
                service = %s.id,
                state = %s.state,
                required = s.required,
                starts = s.stats.start_count,
                "  service"
            );
        }
    }

    fn publish(&self, topic: &str, id: &str) {
        self.events
            .publish(topic, Bundle::new().with_string("serviceId", id));
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_count())
            .field("required_failed", &self.has_required_failure())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceManifest;
    use std::sync::atomic::AtomicUsize;

    /// Records every hook invocation into a shared journal.
    struct MockService {
        manifest: ServiceManifest,
        fail: AtomicBool,
        unhealthy: bool,
        journal: Arc<Mutex<Vec<String>>>,
        gui_inits: AtomicUsize,
    }

    impl MockService {
        fn new(manifest: ServiceManifest, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                manifest,
                fail: AtomicBool::new(false),
                unhealthy: false,
                journal: journal.clone(),
                gui_inits: AtomicUsize::new(0),
            }
        }

        fn failing(self) -> Self {
            self.fail.store(true, Ordering::SeqCst);
            self
        }

        fn unhealthy(mut self) -> Self {
            self.unhealthy = true;
            self
        }
    }

    impl Service for MockService {
        fn manifest(&self) -> &ServiceManifest {
            &self.manifest
        }
        fn on_start(&self) -> Result<(), KernelError> {
            self.journal.lock().push(format!("start:{}", self.manifest.id));
            if self.fail.load(Ordering::SeqCst) {
                Err(KernelError::ServiceStartFailed(self.manifest.id.clone()))
            } else {
                Ok(())
            }
        }
        fn on_stop(&self) {
            self.journal.lock().push(format!("stop:{}", self.manifest.id));
        }
        fn on_gui_init(&self) {
            self.gui_inits.fetch_add(1, Ordering::SeqCst);
        }
        fn on_health_check(&self) -> Result<(), KernelError> {
            if self.unhealthy {
                Err(KernelError::Unhealthy("mock".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        registry: ServiceRegistry,
        journal: Arc<Mutex<Vec<String>>>,
        events: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let bus = EventBus::default();
            let events = Arc::new(Mutex::new(Vec::new()));
            let e = events.clone();
            bus.subscribe_all(move |ev| {
                let id = ev
                    .payload
                    .get_str("serviceId")
                    .or_else(|| ev.payload.get_str("unresolved"))
                    .unwrap_or_default()
                    .to_string();
                e.lock().push((ev.topic.clone(), id));
            });
            Self {
                registry: ServiceRegistry::new(bus),
                journal: Arc::new(Mutex::new(Vec::new())),
                events,
            }
        }

        fn add(&self, manifest: ServiceManifest) {
            self.add_mock(MockService::new(manifest, &self.journal));
        }

        fn add_mock(&self, service: MockService) {
            self.registry.add_service(Arc::new(service)).unwrap();
        }

        fn mock(&self, manifest: ServiceManifest) -> MockService {
            MockService::new(manifest, &self.journal)
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().clone()
        }

        fn topics(&self, topic: &str) -> Vec<String> {
            self.events
                .lock()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, id)| id.clone())
                .collect()
        }
    }

    fn settings() -> ServiceManifest {
        ServiceManifest::new("settings", "Settings")
            .priority(10)
            .required(true)
    }

    fn display() -> ServiceManifest {
        ServiceManifest::new("display", "Display")
            .priority(20)
            .required(true)
            .depends_on("settings")
    }

    fn theme() -> ServiceManifest {
        ServiceManifest::new("theme", "Theme")
            .priority(25)
            .depends_on("settings")
    }

    #[test]
    fn boot_order_respects_dependencies_then_priority() {
        // Registration order must not matter.
        for perm in [
            [theme(), display(), settings()],
            [display(), settings(), theme()],
            [settings(), theme(), display()],
        ] {
            let f = Fixture::new();
            for m in perm {
                f.add(m);
            }
            assert_eq!(
                f.registry.resolve_boot_order(),
                vec!["settings", "display", "theme"]
            );
            assert!(f.registry.unresolved().is_empty());
        }
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let f = Fixture::new();
        f.add(ServiceManifest::new("b", "B").priority(50));
        f.add(ServiceManifest::new("a", "A").priority(50));
        f.add(ServiceManifest::new("c", "C").priority(50));
        assert_eq!(f.registry.resolve_boot_order(), vec!["b", "a", "c"]);
    }

    #[test]
    fn lower_priority_does_not_jump_dependencies() {
        let f = Fixture::new();
        f.add(ServiceManifest::new("hal", "HAL").priority(50));
        f.add(ServiceManifest::new("gps", "GPS").priority(1).depends_on("hal"));
        f.add(ServiceManifest::new("clock", "Clock").priority(60));
        assert_eq!(f.registry.resolve_boot_order(), vec!["hal", "gps", "clock"]);
    }

    #[test]
    fn unknown_dependency_is_ignored() {
        let f = Fixture::new();
        f.add(ServiceManifest::new("wifi", "WiFi").depends_on("com.ember.missing"));
        assert_eq!(f.registry.resolve_boot_order(), vec!["wifi"]);
        assert!(f.registry.start_all(false));
    }

    #[test]
    fn cycle_boots_resolvable_subset() {
        let f = Fixture::new();
        f.add(ServiceManifest::new("a", "A").depends_on("b"));
        f.add(ServiceManifest::new("b", "B").depends_on("a"));
        f.add(ServiceManifest::new("c", "C").depends_on("a"));
        f.add(ServiceManifest::new("free", "Free"));

        let order = f.registry.resolve_boot_order();
        assert_eq!(order, vec!["free"]);
        assert!(order.len() < f.registry.service_count());
        assert_eq!(f.registry.unresolved(), vec!["a", "b", "c"]);
        assert_eq!(f.topics(topics::SERVICE_CYCLE), vec!["a,b,c"]);

        assert!(f.registry.start_all(false));
        assert_eq!(f.journal(), vec!["start:free"]);
        assert_eq!(f.registry.service_state("a"), Some(ServiceState::Stopped));
    }

    #[test]
    fn start_all_healthy_boot() {
        let f = Fixture::new();
        f.add(theme());
        f.add(display());
        f.add(settings());

        assert!(f.registry.start_all(true));
        assert!(!f.registry.has_required_failure());
        assert_eq!(
            f.journal(),
            vec!["start:settings", "start:display", "start:theme"]
        );
        assert_eq!(
            f.topics(topics::SERVICE_STARTED),
            vec!["settings", "display", "theme"]
        );
    }

    #[test]
    fn required_failure_fails_boot() {
        let f = Fixture::new();
        f.add_mock(f.mock(settings()).failing());
        f.add(ServiceManifest::new("clock", "Clock"));

        assert!(!f.registry.start_all(false));
        assert!(f.registry.has_required_failure());
        assert_eq!(f.topics(topics::SERVICE_FAILED), vec!["settings"]);
        // The rest of the system still boots.
        assert_eq!(f.registry.service_state("clock"), Some(ServiceState::Started));
    }

    #[test]
    fn optional_failure_keeps_boot_healthy() {
        let f = Fixture::new();
        f.add(settings());
        f.add_mock(f.mock(ServiceManifest::new("gps", "GPS")).failing());

        assert!(f.registry.start_all(false));
        assert_eq!(f.registry.service_state("gps"), Some(ServiceState::Failed));
    }

    #[test]
    fn required_flag_resets_each_pass() {
        let f = Fixture::new();
        let flaky = Arc::new(f.mock(settings()).failing());
        f.registry.add_service(flaky.clone()).unwrap();
        assert!(!f.registry.start_all(false));

        flaky.fail.store(false, Ordering::SeqCst);
        assert!(f.registry.start_all(false));
        assert!(!f.registry.has_required_failure());
    }

    #[test]
    fn start_all_skips_manual_and_gui_services() {
        let f = Fixture::new();
        f.add(ServiceManifest::new("cli", "CLI").auto_start(false));
        f.add(ServiceManifest::new("launcher", "Launcher").gui_required(true));
        f.add(ServiceManifest::new("clock", "Clock"));

        assert!(f.registry.start_all(false));
        assert_eq!(f.journal(), vec!["start:clock"]);

        assert!(f.registry.start_all(true));
        assert_eq!(f.journal(), vec!["start:clock", "start:launcher"]);
        assert_eq!(f.registry.service_state("cli"), Some(ServiceState::Stopped));
    }

    #[test]
    fn start_service_brings_up_dependencies() {
        let f = Fixture::new();
        f.add(settings());
        f.add(display());
        f.add(ServiceManifest::new("ui", "UI").depends_on("display"));

        f.registry.start_service("ui").unwrap();
        assert_eq!(
            f.journal(),
            vec!["start:settings", "start:display", "start:ui"]
        );
    }

    #[test]
    fn start_service_fails_fast_on_dependency() {
        let f = Fixture::new();
        f.add_mock(f.mock(settings()).failing());
        f.add(display());

        let err = f.registry.start_service("display").unwrap_err();
        assert_eq!(
            err,
            KernelError::DependencyFailed {
                service: "display".into(),
                dependency: "settings".into()
            }
        );
        assert_eq!(f.journal(), vec!["start:settings"]);
        assert_eq!(f.registry.service_state("display"), Some(ServiceState::Stopped));
    }

    #[test]
    fn start_service_detects_cycle() {
        let f = Fixture::new();
        f.add(ServiceManifest::new("a", "A").depends_on("b"));
        f.add(ServiceManifest::new("b", "B").depends_on("a"));
        assert!(matches!(
            f.registry.start_service("a"),
            Err(KernelError::DependencyFailed { .. })
        ));
        assert!(f.journal().is_empty());
    }

    #[test]
    fn unknown_service_operations() {
        let f = Fixture::new();
        assert_eq!(
            f.registry.start_service("nope"),
            Err(KernelError::UnknownService("nope".into()))
        );
        assert!(f.registry.stop_service("nope").is_err());
        assert!(f.registry.restart_service("nope").is_err());
        assert_eq!(f.registry.service_state("nope"), None);
    }

    #[test]
    fn duplicate_service_rejected() {
        let f = Fixture::new();
        f.add(settings());
        let dup = Arc::new(f.mock(settings()));
        assert_eq!(
            f.registry.add_service(dup),
            Err(KernelError::DuplicateService("settings".into()))
        );
        assert_eq!(f.registry.service_count(), 1);
    }

    #[test]
    fn stop_service_stops_dependents_first() {
        let f = Fixture::new();
        f.add(settings());
        f.add(display());
        f.add(theme());
        f.add(ServiceManifest::new("ui", "UI").depends_on("display"));
        assert!(f.registry.start_all(false));
        f.journal.lock().clear();

        f.registry.stop_service("settings").unwrap();
        let journal = f.journal();
        assert_eq!(journal.last().map(String::as_str), Some("stop:settings"));
        let pos = |s: &str| journal.iter().position(|j| j == s).unwrap();
        assert!(pos("stop:ui") < pos("stop:display"));
        assert!(pos("stop:theme") < pos("stop:settings"));
        assert!(
            f.registry
                .statuses()
                .iter()
                .all(|s| s.state == ServiceState::Stopped)
        );
    }

    #[test]
    fn restart_is_stop_then_start() {
        let f = Fixture::new();
        f.add(settings());
        f.add(display());
        assert!(f.registry.start_all(false));
        f.journal.lock().clear();

        f.registry.restart_service("settings").unwrap();
        assert_eq!(
            f.journal(),
            vec!["stop:display", "stop:settings", "start:settings"]
        );
        assert_eq!(f.registry.service("settings").unwrap().stats().start_count, 2);
        // Dependents are left stopped.
        assert_eq!(f.registry.service_state("display"), Some(ServiceState::Stopped));
    }

    #[test]
    fn stop_all_runs_in_reverse_boot_order() {
        let f = Fixture::new();
        f.add(theme());
        f.add(display());
        f.add(settings());
        assert!(f.registry.start_all(false));
        f.journal.lock().clear();

        f.registry.stop_all();
        assert_eq!(
            f.journal(),
            vec!["stop:theme", "stop:display", "stop:settings"]
        );
        assert_eq!(
            f.topics(topics::SERVICE_STOPPED),
            vec!["theme", "display", "settings"]
        );
    }

    #[test]
    fn gui_init_only_for_running_services() {
        let f = Fixture::new();
        let failing = Arc::new(f.mock(ServiceManifest::new("gps", "GPS")).failing());
        let clock = Arc::new(f.mock(ServiceManifest::new("clock", "Clock")));
        f.registry.add_service(failing.clone()).unwrap();
        f.registry.add_service(clock.clone()).unwrap();
        f.registry.start_all(true);

        assert_eq!(f.registry.init_gui_services(), 1);
        assert_eq!(clock.gui_inits.load(Ordering::SeqCst), 1);
        assert_eq!(failing.gui_inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn health_check_is_observational() {
        let f = Fixture::new();
        f.add_mock(f.mock(ServiceManifest::new("gps", "GPS")).unhealthy());
        f.add(ServiceManifest::new("clock", "Clock"));
        f.registry.start_all(false);

        let failures = f.registry.perform_health_check();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "gps");
        // Nothing restarted or stopped.
        assert_eq!(f.registry.service_state("gps"), Some(ServiceState::Started));
        assert_eq!(f.journal(), vec!["start:gps", "start:clock"]);
    }
}
