//! Driver registry: candidates per interface type, priority selection with
//! fallback, typed lookup and ordered shutdown.

pub mod driver;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

pub use driver::{AsAny, Driver, DriverState, InterfaceId};

use crate::capability::CapabilityProvider;
use crate::diagnostics::InterfaceStatus;
use crate::error::{HalError, HalResult, LOCK_POISONED};

pub const NO_ACTIVE_DRIVER: HalError = HalError::driver(300, "no active driver for interface");
pub const WRONG_DRIVER_TYPE: HalError = HalError::driver(301, "active driver is not of the requested type");
pub const MISSING_CAPABILITIES: HalError = HalError::driver(302, "platform lacks capabilities the driver requires");
pub const REGISTRY_SEALED: HalError = HalError::platform(303, "drivers cannot be registered after initialization");
pub const ALREADY_INITIALIZED: HalError = HalError::platform(304, "registry is already initialized");

struct DriverRecord {
    interface: InterfaceId,
    priority: i32,
    sequence: u64,
    driver: Arc<dyn Driver>,
    state: DriverState,
    last_error: Option<HalError>,
    init_time: Option<Duration>,
}

#[derive(Default)]
struct Table {
    records: Vec<DriverRecord>,
    /// Interface types in order of first registration.
    interfaces: Vec<InterfaceId>,
    /// Record indices in the order they became Active.
    activation_order: Vec<usize>,
    next_sequence: u64,
    sealed: bool,
    shut_down: bool,
}

/// A candidate that did not make it to Active.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCandidate {
    pub interface: InterfaceId,
    pub driver: String,
    pub priority: i32,
    pub error: HalError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitReport {
    /// `(interface, driver name)` in activation order.
    pub activated: Vec<(InterfaceId, String)>,
    pub failed: Vec<FailedCandidate>,
    /// Interfaces where every candidate failed.
    pub unavailable: Vec<InterfaceId>,
    /// Drivers accepted although `initialize()` exceeded the init timeout.
    pub slow: Vec<(InterfaceId, String)>,
    pub elapsed: Duration,
}

pub struct DriverRegistry {
    table: RwLock<Table>,
    init_timeout: Duration,
}

impl DriverRegistry {
    pub fn new(init_timeout: Duration) -> Self {
        Self { table: RwLock::new(Table::default()), init_timeout }
    }

    /// Adds a candidate for `interface`. Nothing is selected until
    /// `initialize_all`; same-priority candidates keep registration order.
    pub fn register(&self, interface: InterfaceId, priority: i32, driver: Arc<dyn Driver>) -> HalResult<()> {
        let mut table = self.write()?;
        if table.sealed {
            return Err(REGISTRY_SEALED.with_context(interface.as_str()));
        }

        let sequence = table.next_sequence;
        table.next_sequence += 1;
        if !table.interfaces.contains(&interface) {
            table.interfaces.push(interface);
        }

        debug!("Registered {} for {} (priority {}, #{})", driver.name(), interface, priority, sequence);
        table.records.push(DriverRecord {
            interface,
            priority,
            sequence,
            driver,
            state: DriverState::Registered,
            last_error: None,
            init_time: None,
        });
        Ok(())
    }

    /// Selects one active driver per interface type.
    ///
    /// Candidates are tried by priority (highest first, ties by registration
    /// order). A failing candidate is marked Failed and the next one is tried.
    /// Interfaces with no working candidate are reported, not treated as errors.
    pub fn initialize_all(&self, platform: &dyn CapabilityProvider) -> HalResult<InitReport> {
        let started = Instant::now();

        let plan = {
            let mut table = self.write()?;
            if table.sealed {
                return Err(ALREADY_INITIALIZED);
            }
            table.sealed = true;
            Self::plan(&table)
        };

        let available = platform.capability_mask();
        let mut report = InitReport::default();

        for (interface, candidates) in plan {
            let mut selected = false;
            for idx in candidates {
                let (driver, priority) = {
                    let table = self.read()?;
                    let record = &table.records[idx];
                    (record.driver.clone(), record.priority)
                };
                let name = driver.name().to_string();

                let missing = available.missing(driver.required_capabilities());
                let outcome = if !missing.is_empty() {
                    let names: Vec<&str> = missing.capabilities().map(|c| c.name()).collect();
                    warn!("{} for {} skipped: missing {}", name, interface, names.join(", "));
                    Err(MISSING_CAPABILITIES)
                } else {
                    let t0 = Instant::now();
                    let result = driver.initialize();
                    let took = t0.elapsed();
                    {
                        let mut table = self.write()?;
                        let record = &mut table.records[idx];
                        record.init_time = Some(took);
                        if result.is_ok() {
                            record.state = DriverState::Initialized;
                        }
                    }

                    if result.is_ok() && took > self.init_timeout {
                        warn!("{} for {} initialized slowly ({:?} > {:?})", name, interface, took, self.init_timeout);
                        report.slow.push((interface, name.clone()));
                    }
                    result
                };

                let mut table = self.write()?;
                match outcome {
                    Ok(()) => {
                        table.records[idx].state = DriverState::Active;
                        table.activation_order.push(idx);
                        info!("{} active: {} (priority {})", interface, name, priority);
                        report.activated.push((interface, name));
                        selected = true;
                    }
                    Err(e) => {
                        table.records[idx].state = DriverState::Failed;
                        table.records[idx].last_error = Some(e);
                        warn!("{} candidate {} failed: {}. Trying next.", interface, name, e);
                        report.failed.push(FailedCandidate { interface, driver: name, priority, error: e });
                    }
                }
                if selected {
                    break;
                }
            }

            if !selected {
                warn!("No working driver for {}", interface);
                report.unavailable.push(interface);
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Driver initialization: {} active, {} failed, {} unavailable in {:?}",
            report.activated.len(),
            report.failed.len(),
            report.unavailable.len(),
            report.elapsed
        );
        Ok(report)
    }

    /// Active driver for `interface`.
    pub fn get_driver(&self, interface: InterfaceId) -> HalResult<Arc<dyn Driver>> {
        let table = self.read()?;
        table
            .records
            .iter()
            .find(|r| r.interface == interface && r.state == DriverState::Active)
            .map(|r| r.driver.clone())
            .ok_or(NO_ACTIVE_DRIVER.with_context(interface.as_str()))
    }

    /// Active driver for `interface` as its concrete type.
    pub fn get<D: Driver>(&self, interface: InterfaceId) -> HalResult<Arc<D>> {
        self.get_driver(interface)?
            .as_any_arc()
            .downcast::<D>()
            .map_err(|_| WRONG_DRIVER_TYPE.with_context(interface.as_str()))
    }

    /// Shuts active drivers down in reverse activation order.
    ///
    /// Failures are logged and counted; every running record ends ShutDown
    /// while Failed ones keep their state. Calling it again is a no-op
    /// returning zero.
    pub fn shutdown_all(&self) -> HalResult<usize> {
        let targets: Vec<(InterfaceId, Arc<dyn Driver>)> = {
            let mut table = self.write()?;
            if table.shut_down {
                return Ok(0);
            }
            table.shut_down = true;
            table.sealed = true;
            table
                .activation_order
                .iter()
                .rev()
                .map(|&idx| (table.records[idx].interface, table.records[idx].driver.clone()))
                .collect()
        };

        let mut failures = 0;
        for (interface, driver) in targets {
            match driver.shutdown() {
                Ok(()) => debug!("{} ({}) shut down", driver.name(), interface),
                Err(e) => {
                    failures += 1;
                    warn!("{} ({}) failed to shut down: {}. Continuing.", driver.name(), interface, e);
                }
            }
        }

        let mut table = self.write()?;
        for record in table.records.iter_mut() {
            if matches!(record.state, DriverState::Active | DriverState::Initialized) {
                record.state = DriverState::ShutDown;
            }
        }
        info!("Registry shut down ({} failures)", failures);
        Ok(failures)
    }

    /// Interfaces with an active driver, in activation order.
    pub fn active_interfaces(&self) -> Vec<InterfaceId> {
        let Ok(table) = self.read() else {
            return Vec::new();
        };
        table
            .activation_order
            .iter()
            .map(|&idx| &table.records[idx])
            .filter(|r| r.state == DriverState::Active)
            .map(|r| r.interface)
            .collect()
    }

    pub fn interface_status(&self) -> Vec<InterfaceStatus> {
        let Ok(table) = self.read() else {
            return Vec::new();
        };
        table
            .interfaces
            .iter()
            .map(|&interface| {
                let records = || table.records.iter().filter(move |r| r.interface == interface);
                let active = records().find(|r| r.state == DriverState::Active);
                InterfaceStatus {
                    interface: interface.as_str().to_string(),
                    active_driver: active.map(|r| r.driver.name().to_string()),
                    candidates: records().count(),
                    failed_candidates: records().filter(|r| r.state == DriverState::Failed).count(),
                    init_time: active.and_then(|r| r.init_time),
                    last_error: records().filter_map(|r| r.last_error).last(),
                }
            })
            .collect()
    }

    pub fn state_count(&self, state: DriverState) -> usize {
        self.read().map(|t| t.records.iter().filter(|r| r.state == state).count()).unwrap_or(0)
    }

    fn plan(table: &Table) -> Vec<(InterfaceId, Vec<usize>)> {
        table
            .interfaces
            .iter()
            .map(|&interface| {
                let mut candidates: Vec<usize> = table
                    .records
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.interface == interface && r.state == DriverState::Registered)
                    .map(|(idx, _)| idx)
                    .collect();
                candidates.sort_by(|&a, &b| {
                    let (ra, rb) = (&table.records[a], &table.records[b]);
                    rb.priority.cmp(&ra.priority).then(ra.sequence.cmp(&rb.sequence))
                });
                (interface, candidates)
            })
            .collect()
    }

    fn read(&self) -> HalResult<RwLockReadGuard<'_, Table>> {
        self.table.read().map_err(|_| LOCK_POISONED)
    }

    fn write(&self) -> HalResult<RwLockWriteGuard<'_, Table>> {
        self.table.write().map_err(|_| LOCK_POISONED)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capability::{CapabilityMask, PerformanceTier, PlatformInfo, StaticCapabilities};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    pub(crate) fn host_info() -> PlatformInfo {
        PlatformInfo {
            platform_name: "testbed".into(),
            architecture: "x86_64".into(),
            total_memory: 8 << 30,
            cpu_cores: 4,
            performance_tier: PerformanceTier::Standard,
            has_fpu: true,
            has_simd: true,
        }
    }

    pub(crate) fn platform(mask: CapabilityMask) -> StaticCapabilities {
        StaticCapabilities::new(mask, host_info())
    }

    /// Driver double that records lifecycle calls into a shared journal.
    #[derive(Debug)]
    pub(crate) struct MockDriver {
        pub name: &'static str,
        pub priority: i32,
        pub fail_init: Option<HalError>,
        pub fail_shutdown: bool,
        pub required: CapabilityMask,
        pub init_delay: Duration,
        pub active: AtomicBool,
        pub init_calls: AtomicU32,
        pub journal: Arc<Mutex<Vec<String>>>,
        info: PlatformInfo,
    }

    impl MockDriver {
        pub(crate) fn new(name: &'static str, priority: i32, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                priority,
                fail_init: None,
                fail_shutdown: false,
                required: CapabilityMask::empty(),
                init_delay: Duration::ZERO,
                active: AtomicBool::new(false),
                init_calls: AtomicU32::new(0),
                journal: journal.clone(),
                info: host_info(),
            }
        }

        pub(crate) fn failing(mut self, error: HalError) -> Self {
            self.fail_init = Some(error);
            self
        }
    }

    impl CapabilityProvider for MockDriver {
        fn capability_mask(&self) -> CapabilityMask {
            CapabilityMask::DMA
        }

        fn performance_tier(&self) -> PerformanceTier {
            self.info.performance_tier
        }

        fn platform_info(&self) -> &PlatformInfo {
            &self.info
        }
    }

    impl Driver for MockDriver {
        fn initialize(&self) -> HalResult<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.init_delay);
            self.journal.lock().unwrap().push(format!("init {}", self.name));
            if let Some(e) = self.fail_init {
                return Err(e);
            }
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown(&self) -> HalResult<()> {
            self.journal.lock().unwrap().push(format!("shutdown {}", self.name));
            self.active.store(false, Ordering::SeqCst);
            if self.fail_shutdown {
                return Err(HalError::hardware(9, "device stuck"));
            }
            Ok(())
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn name(&self) -> &str {
            self.name
        }

        fn required_capabilities(&self) -> CapabilityMask {
            self.required
        }
    }

    struct OtherDriver(PlatformInfo);

    impl CapabilityProvider for OtherDriver {
        fn capability_mask(&self) -> CapabilityMask {
            CapabilityMask::empty()
        }
        fn performance_tier(&self) -> PerformanceTier {
            PerformanceTier::Minimal
        }
        fn platform_info(&self) -> &PlatformInfo {
            &self.0
        }
    }

    impl Driver for OtherDriver {
        fn initialize(&self) -> HalResult<()> {
            Ok(())
        }
        fn shutdown(&self) -> HalResult<()> {
            Ok(())
        }
        fn is_active(&self) -> bool {
            true
        }
        fn priority(&self) -> i32 {
            0
        }
        fn name(&self) -> &str {
            "other"
        }
    }

    fn journal() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn registry() -> DriverRegistry {
        DriverRegistry::new(Duration::from_secs(2))
    }

    #[test]
    fn test_memory_falls_back_to_lower_priority() {
        let log = journal();
        let reg = registry();
        let hw_fault = HalError::hardware(7, "memory controller absent");

        reg.register(InterfaceId::MEMORY, 10, Arc::new(MockDriver::new("fast", 10, &log).failing(hw_fault)))
            .unwrap();
        reg.register(InterfaceId::MEMORY, 5, Arc::new(MockDriver::new("generic", 5, &log))).unwrap();

        let report = reg.initialize_all(&platform(CapabilityMask::all())).unwrap();

        let active = reg.get::<MockDriver>(InterfaceId::MEMORY).unwrap();
        assert_eq!(active.name, "generic");
        assert!(active.is_active());
        assert_eq!(report.activated, vec![(InterfaceId::MEMORY, "generic".to_string())]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].error, hw_fault);

        let status = reg.interface_status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].interface, "Memory");
        assert_eq!(status[0].active_driver.as_deref(), Some("generic"));
        assert_eq!(status[0].failed_candidates, 1);
    }

    #[test]
    fn test_ties_prefer_earliest_registration() {
        let log = journal();
        let reg = registry();
        reg.register(InterfaceId::AUDIO, 3, Arc::new(MockDriver::new("first", 3, &log))).unwrap();
        reg.register(InterfaceId::AUDIO, 3, Arc::new(MockDriver::new("second", 3, &log))).unwrap();
        reg.register(InterfaceId::AUDIO, 1, Arc::new(MockDriver::new("low", 1, &log))).unwrap();

        reg.initialize_all(&platform(CapabilityMask::all())).unwrap();

        assert_eq!(reg.get_driver(InterfaceId::AUDIO).unwrap().name(), "first");
        // Losing candidates are never initialized.
        assert_eq!(*log.lock().unwrap(), vec!["init first".to_string()]);
        assert_eq!(reg.state_count(DriverState::Registered), 2);
    }

    #[test]
    fn test_top_n_failures_select_next() {
        let log = journal();
        let reg = registry();
        let fault = HalError::driver(1, "nope");
        for (name, prio) in [("p9", 9), ("p8", 8), ("p7", 7)] {
            reg.register(InterfaceId::GRAPHICS, prio, Arc::new(MockDriver::new(name, prio, &log).failing(fault)))
                .unwrap();
        }
        reg.register(InterfaceId::GRAPHICS, 1, Arc::new(MockDriver::new("p1", 1, &log))).unwrap();

        reg.initialize_all(&platform(CapabilityMask::all())).unwrap();
        assert_eq!(reg.get_driver(InterfaceId::GRAPHICS).unwrap().name(), "p1");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["init p9", "init p8", "init p7", "init p1"].into_iter().map(String::from).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_all_candidates_failing_leaves_interface_unavailable() {
        let log = journal();
        let reg = registry();
        reg.register(InterfaceId::NETWORK, 1, Arc::new(MockDriver::new("nic", 1, &log).failing(HalError::hardware(2, "no link"))))
            .unwrap();

        let report = reg.initialize_all(&platform(CapabilityMask::all())).unwrap();
        assert_eq!(report.unavailable, vec![InterfaceId::NETWORK]);

        let err = reg.get_driver(InterfaceId::NETWORK).unwrap_err();
        assert!(err.is(&NO_ACTIVE_DRIVER));
        assert_eq!(err.context(), Some("Network"));
        assert!(reg.get_driver(InterfaceId::FILE).unwrap_err().is(&NO_ACTIVE_DRIVER));
    }

    #[test]
    fn test_missing_capabilities_skip_candidate() {
        let log = journal();
        let reg = registry();
        let mut gpu = MockDriver::new("gpu", 10, &log);
        gpu.required = CapabilityMask::COMPUTE_SHADERS;
        reg.register(InterfaceId::GRAPHICS, 10, Arc::new(gpu)).unwrap();
        reg.register(InterfaceId::GRAPHICS, 0, Arc::new(MockDriver::new("soft", 0, &log))).unwrap();

        let report = reg.initialize_all(&platform(CapabilityMask::HARDWARE_2D)).unwrap();
        assert_eq!(reg.get_driver(InterfaceId::GRAPHICS).unwrap().name(), "soft");
        assert_eq!(report.failed[0].error, MISSING_CAPABILITIES);
        // Skipped, never initialized.
        assert_eq!(*log.lock().unwrap(), vec!["init soft".to_string()]);
    }

    #[test]
    fn test_slow_init_is_accepted_and_flagged() {
        let log = journal();
        let reg = DriverRegistry::new(Duration::from_millis(1));
        let mut slow = MockDriver::new("slow", 1, &log);
        slow.init_delay = Duration::from_millis(20);
        reg.register(InterfaceId::TIME, 1, Arc::new(slow)).unwrap();

        let report = reg.initialize_all(&platform(CapabilityMask::all())).unwrap();
        assert_eq!(report.slow, vec![(InterfaceId::TIME, "slow".to_string())]);
        assert!(reg.get_driver(InterfaceId::TIME).is_ok());
    }

    #[test]
    fn test_typed_lookup_rejects_wrong_type() {
        let reg = registry();
        reg.register(InterfaceId::INPUT, 0, Arc::new(OtherDriver(host_info()))).unwrap();
        reg.initialize_all(&platform(CapabilityMask::all())).unwrap();

        assert!(reg.get::<OtherDriver>(InterfaceId::INPUT).is_ok());
        let err = reg.get::<MockDriver>(InterfaceId::INPUT).unwrap_err();
        assert!(err.is(&WRONG_DRIVER_TYPE));
    }

    #[test]
    fn test_registration_sealed_after_initialization() {
        let log = journal();
        let reg = registry();
        reg.initialize_all(&platform(CapabilityMask::all())).unwrap();

        let err = reg.register(InterfaceId::FILE, 0, Arc::new(MockDriver::new("late", 0, &log))).unwrap_err();
        assert!(err.is(&REGISTRY_SEALED));
        assert_eq!(reg.initialize_all(&platform(CapabilityMask::all())), Err(ALREADY_INITIALIZED));
    }

    #[test]
    fn test_shutdown_reverses_activation_and_survives_failures() {
        let log = journal();
        let reg = registry();
        reg.register(InterfaceId::MEMORY, 0, Arc::new(MockDriver::new("mem", 0, &log))).unwrap();
        let mut gfx = MockDriver::new("gfx", 0, &log);
        gfx.fail_shutdown = true;
        reg.register(InterfaceId::GRAPHICS, 0, Arc::new(gfx)).unwrap();
        reg.register(InterfaceId::AUDIO, 0, Arc::new(MockDriver::new("snd", 0, &log))).unwrap();
        reg.initialize_all(&platform(CapabilityMask::all())).unwrap();
        log.lock().unwrap().clear();

        assert_eq!(reg.shutdown_all().unwrap(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["shutdown snd", "shutdown gfx", "shutdown mem"].into_iter().map(String::from).collect::<Vec<_>>()
        );
        assert_eq!(reg.state_count(DriverState::ShutDown), 3);
        assert!(reg.active_interfaces().is_empty());

        assert_eq!(reg.shutdown_all().unwrap(), 0);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_shutdown_keeps_failed_and_untried_records() {
        let log = journal();
        let reg = registry();
        let fault = HalError::hardware(5, "no card");
        reg.register(InterfaceId::GRAPHICS, 9, Arc::new(MockDriver::new("gpu", 9, &log).failing(fault))).unwrap();
        reg.register(InterfaceId::GRAPHICS, 5, Arc::new(MockDriver::new("fb", 5, &log))).unwrap();
        reg.register(InterfaceId::GRAPHICS, 1, Arc::new(MockDriver::new("vga", 1, &log))).unwrap();
        reg.initialize_all(&platform(CapabilityMask::all())).unwrap();

        reg.shutdown_all().unwrap();
        assert_eq!(reg.state_count(DriverState::Failed), 1);
        assert_eq!(reg.state_count(DriverState::ShutDown), 1);
        assert_eq!(reg.state_count(DriverState::Registered), 1);

        let status = reg.interface_status();
        assert_eq!(status[0].failed_candidates, 1);
        assert_eq!(status[0].last_error, Some(fault));
    }

    #[test]
    fn test_driver_debug_names_the_driver() {
        let log = journal();
        let reg = registry();
        reg.register(InterfaceId::FILE, 2, Arc::new(MockDriver::new("vfs", 2, &log))).unwrap();
        reg.initialize_all(&platform(CapabilityMask::all())).unwrap();

        let shown = format!("{:?}", reg.get_driver(InterfaceId::FILE).unwrap());
        assert!(shown.contains("\"vfs\""), "{}", shown);
        assert!(shown.contains("active: true"), "{}", shown);
    }
}
