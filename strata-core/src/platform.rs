//! The platform context: owns detection, the registry and the coordinator,
//! and gates them behind a single lifecycle.
//!
//! There is no global instance. The entry point builds one `Platform` and
//! passes it to consumers; tests build as many isolated ones as they need.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde::Serialize;

use crate::capability::{
    BackgroundRefresher, Capability, CapabilityCacheEntry, CapabilityDetector, DetectionSettings, HardwareProbe,
    SystemProbe,
};
use crate::config::HalConfig;
use crate::coordinator::{AccessMode, Acquisition, ResourceCoordinator, ResourceGuard, ResourceRequest};
use crate::diagnostics::PerformanceStats;
use crate::error::{HalError, HalResult, LOCK_POISONED};
use crate::registry::{Driver, DriverRegistry, DriverState, InitReport, InterfaceId};

pub const NOT_INITIALIZED: HalError = HalError::platform(400, "platform is not initialized");
pub const ALREADY_STARTED: HalError = HalError::platform(401, "platform can only be initialized once");
pub const MANDATORY_UNAVAILABLE: HalError = HalError::driver(402, "mandatory interface has no working driver");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum PlatformState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    ShuttingDown = 3,
    Shutdown = 4,
}

impl PlatformState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PlatformState::Uninitialized,
            1 => PlatformState::Initializing,
            2 => PlatformState::Ready,
            3 => PlatformState::ShuttingDown,
            _ => PlatformState::Shutdown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PlatformState::Uninitialized => "Uninitialized",
            PlatformState::Initializing => "Initializing",
            PlatformState::Ready => "Ready",
            PlatformState::ShuttingDown => "ShuttingDown",
            PlatformState::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Display for PlatformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit registration pass run by the process entry point.
pub struct PlatformBuilder {
    config: HalConfig,
    probe: Option<Box<dyn HardwareProbe>>,
    drivers: Vec<(InterfaceId, i32, Arc<dyn Driver>)>,
    mandatory: Vec<InterfaceId>,
}

impl Default for PlatformBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformBuilder {
    pub fn new() -> Self {
        Self { config: HalConfig::default(), probe: None, drivers: Vec::new(), mandatory: Vec::new() }
    }

    pub fn config(mut self, config: HalConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the host probe. Defaults to `SystemProbe`.
    pub fn probe(mut self, probe: Box<dyn HardwareProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn register(mut self, interface: InterfaceId, priority: i32, driver: Arc<dyn Driver>) -> Self {
        self.drivers.push((interface, priority, driver));
        self
    }

    /// Registers with the driver's own `priority()`.
    pub fn register_driver(self, interface: InterfaceId, driver: Arc<dyn Driver>) -> Self {
        let priority = driver.priority();
        self.register(interface, priority, driver)
    }

    /// `initialize()` fails unless `interface` ends up with an active driver.
    pub fn mandatory(mut self, interface: InterfaceId) -> Self {
        if !self.mandatory.contains(&interface) {
            self.mandatory.push(interface);
        }
        self
    }

    pub fn build(self) -> HalResult<Platform> {
        self.config.validate()?;

        let probe = self.probe.unwrap_or_else(|| Box::new(SystemProbe::new()));
        let detector = Arc::new(CapabilityDetector::new(probe, DetectionSettings::from(&self.config)));
        let registry = DriverRegistry::new(self.config.driver_init_timeout);
        for (interface, priority, driver) in self.drivers {
            registry.register(interface, priority, driver)?;
        }

        Ok(Platform {
            state: AtomicU8::new(PlatformState::Uninitialized as u8),
            coordinator: ResourceCoordinator::new(&self.config),
            config: self.config,
            mandatory: self.mandatory,
            detector,
            registry,
            refresher: Mutex::new(None),
            init_time: RwLock::new(None),
            init_report: RwLock::new(None),
        })
    }
}

pub struct Platform {
    state: AtomicU8,
    config: HalConfig,
    mandatory: Vec<InterfaceId>,
    detector: Arc<CapabilityDetector>,
    registry: DriverRegistry,
    coordinator: ResourceCoordinator,
    refresher: Mutex<Option<BackgroundRefresher>>,
    init_time: RwLock<Option<Duration>>,
    init_report: RwLock<Option<InitReport>>,
}

impl Platform {
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::new()
    }

    pub fn state(&self) -> PlatformState {
        PlatformState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Detects capabilities, selects drivers and opens the platform.
    ///
    /// Only valid once, from `Uninitialized`. If a mandatory interface has
    /// no working driver the platform stays `Initializing` so the caller can
    /// `shutdown()` whatever did come up.
    pub fn initialize(&self) -> HalResult<()> {
        self.transition(PlatformState::Uninitialized, PlatformState::Initializing)
            .map_err(|current| ALREADY_STARTED.with_context(current.as_str()))?;

        let started = Instant::now();
        info!("Platform initializing");

        let entry = self.detector.detect(false).map_err(|e| {
            error!("Capability detection failed: {}", e);
            e
        })?;
        info!(
            "Platform: {} {} ({} tier, {} cores)",
            entry.platform_info.platform_name,
            entry.platform_info.architecture,
            entry.platform_info.performance_tier,
            entry.platform_info.cpu_cores
        );

        let report = self.registry.initialize_all(&*entry)?;
        let missing: Vec<InterfaceId> = self
            .mandatory
            .iter()
            .copied()
            .filter(|m| self.registry.get_driver(*m).is_err())
            .collect();
        *self.init_report.write().map_err(|_| LOCK_POISONED)? = Some(report);

        if let Some(first) = missing.first() {
            let names: Vec<&str> = missing.iter().map(|m| m.as_str()).collect();
            error!("Mandatory interfaces unavailable: {}", names.join(", "));
            return Err(MANDATORY_UNAVAILABLE.with_context(first.as_str()));
        }

        if let Some(interval) = self.config.background_refresh {
            match BackgroundRefresher::spawn(self.detector.clone(), interval) {
                Ok(refresher) => *self.refresher.lock().map_err(|_| LOCK_POISONED)? = Some(refresher),
                Err(e) => warn!("Background capability refresh disabled: {}", e),
            }
        }

        let elapsed = started.elapsed();
        *self.init_time.write().map_err(|_| LOCK_POISONED)? = Some(elapsed);
        self.state.store(PlatformState::Ready as u8, Ordering::Release);
        info!("Platform ready in {:?}", elapsed);
        Ok(())
    }

    /// Stops the refresher and shuts drivers down. Idempotent.
    pub fn shutdown(&self) -> HalResult<()> {
        loop {
            match self.state() {
                PlatformState::Uninitialized => {
                    if self.transition(PlatformState::Uninitialized, PlatformState::Shutdown).is_ok() {
                        return Ok(());
                    }
                }
                from @ (PlatformState::Ready | PlatformState::Initializing) => {
                    if self.transition(from, PlatformState::ShuttingDown).is_ok() {
                        break;
                    }
                }
                PlatformState::ShuttingDown | PlatformState::Shutdown => return Ok(()),
            }
        }

        info!("Platform shutting down");
        let refresher = self.refresher.lock().map_err(|_| LOCK_POISONED)?.take();
        if let Some(mut refresher) = refresher {
            refresher.stop();
        }

        let failures = self.registry.shutdown_all()?;
        if failures > 0 {
            warn!("{} drivers failed to shut down cleanly", failures);
        }
        self.state.store(PlatformState::Shutdown as u8, Ordering::Release);
        info!("Platform shut down");
        Ok(())
    }

    pub fn registry(&self) -> HalResult<&DriverRegistry> {
        self.ensure_ready()?;
        Ok(&self.registry)
    }

    pub fn coordinator(&self) -> HalResult<&ResourceCoordinator> {
        self.ensure_ready()?;
        Ok(&self.coordinator)
    }

    /// The detector is usable in every state, e.g. to invalidate.
    pub fn detector(&self) -> &CapabilityDetector {
        &self.detector
    }

    /// Current capability entry. Re-detects if it expired.
    pub fn capabilities(&self) -> HalResult<Arc<CapabilityCacheEntry>> {
        self.ensure_ready()?;
        self.detector.detect(false)
    }

    pub fn get_capability_with_confidence(&self, capability: Capability) -> (bool, f64) {
        self.detector.get_capability_with_confidence(capability)
    }

    pub fn get_driver(&self, interface: InterfaceId) -> HalResult<Arc<dyn Driver>> {
        self.ensure_ready()?;
        self.registry.get_driver(interface)
    }

    pub fn get<D: Driver>(&self, interface: InterfaceId) -> HalResult<Arc<D>> {
        self.ensure_ready()?;
        self.registry.get::<D>(interface)
    }

    pub fn request_resource(
        &self,
        resource_id: &str,
        requester_id: &str,
        mode: AccessMode,
        acquisition: Acquisition,
    ) -> HalResult<()> {
        self.ensure_ready()?;
        self.coordinator.request(resource_id, requester_id, mode, acquisition)
    }

    pub fn request_resource_with(&self, request: &ResourceRequest) -> HalResult<()> {
        self.ensure_ready()?;
        self.coordinator.request_with(request)
    }

    /// Scoped grant; the resource is released when the guard drops.
    pub fn acquire_resource(&self, request: &ResourceRequest) -> HalResult<ResourceGuard<'_>> {
        self.ensure_ready()?;
        self.coordinator.acquire(request)
    }

    pub fn release_resource(&self, resource_id: &str, requester_id: &str) -> HalResult<()> {
        self.ensure_ready()?;
        self.coordinator.release(resource_id, requester_id)
    }

    pub fn get_active_interfaces(&self) -> Vec<String> {
        self.registry.active_interfaces().iter().map(|i| i.as_str().to_string()).collect()
    }

    pub fn get_performance_stats(&self) -> PerformanceStats {
        PerformanceStats {
            init_time: self.init_time.read().ok().and_then(|t| *t).unwrap_or_default(),
            active_count: self.registry.state_count(DriverState::Active),
            failed_count: self.registry.state_count(DriverState::Failed),
            performance_tier: self.detector.current().map(|e| e.platform_info.performance_tier),
            interfaces: self.registry.interface_status(),
            capability_cache: self.detector.statistics(),
            resources: self.coordinator.statistics(),
        }
    }

    pub fn get_resource_owners(&self, resource_id: &str) -> BTreeSet<String> {
        self.coordinator.resource_owners(resource_id)
    }

    /// Outcome of driver selection, once `initialize()` got that far.
    pub fn init_report(&self) -> Option<InitReport> {
        self.init_report.read().ok().and_then(|r| r.clone())
    }

    fn ensure_ready(&self) -> HalResult<()> {
        match self.state() {
            PlatformState::Ready => Ok(()),
            other => Err(NOT_INITIALIZED.with_context(other.as_str())),
        }
    }

    fn transition(&self, from: PlatformState, to: PlatformState) -> Result<(), PlatformState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PlatformState::from_u8)
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Platform shutdown on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::detect::tests::CountingProbe;
    use crate::registry::tests::MockDriver;

    fn journal() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn builder() -> PlatformBuilder {
        let (probe, _) = CountingProbe::new(8 << 30);
        Platform::builder().config(HalConfig::default()).probe(Box::new(probe))
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let log = journal();
        let platform = builder()
            .register(InterfaceId::MEMORY, 1, Arc::new(MockDriver::new("heap", 1, &log)))
            .mandatory(InterfaceId::MEMORY)
            .build()
            .unwrap();
        assert_eq!(platform.state(), PlatformState::Uninitialized);

        platform.initialize().unwrap();
        assert_eq!(platform.state(), PlatformState::Ready);
        assert_eq!(platform.get::<MockDriver>(InterfaceId::MEMORY).unwrap().name, "heap");
        assert_eq!(platform.get_active_interfaces(), vec!["Memory".to_string()]);

        platform.request_resource("dma_0", "heap", AccessMode::Exclusive, Acquisition::NonBlocking).unwrap();
        assert_eq!(platform.get_resource_owners("dma_0"), BTreeSet::from(["heap".to_string()]));
        platform.release_resource("dma_0", "heap").unwrap();

        {
            let _dma = platform
                .acquire_resource(&ResourceRequest::new("dma_0", "heap", AccessMode::Exclusive))
                .unwrap();
            assert!(!platform.coordinator().unwrap().is_available("dma_0", AccessMode::Shared));
        }
        assert!(platform.get_resource_owners("dma_0").is_empty());

        let stats = platform.get_performance_stats();
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.failed_count, 0);
        assert_eq!(stats.resources.grants, 2);
        assert_eq!(stats.resources.releases, 2);

        let err = platform.initialize().unwrap_err();
        assert!(err.is(&ALREADY_STARTED));

        platform.shutdown().unwrap();
        assert_eq!(platform.state(), PlatformState::Shutdown);
        platform.shutdown().unwrap();
        assert_eq!(log.lock().unwrap().iter().filter(|l| *l == "shutdown heap").count(), 1);
    }

    #[test]
    fn test_calls_outside_ready_are_platform_errors() {
        let platform = builder().build().unwrap();

        let err = platform
            .request_resource("r", "a", AccessMode::Shared, Acquisition::NonBlocking)
            .unwrap_err();
        assert!(err.is(&NOT_INITIALIZED));
        assert_eq!(err.context(), Some("Uninitialized"));
        assert!(platform.get_driver(InterfaceId::MEMORY).unwrap_err().is(&NOT_INITIALIZED));
        assert!(platform.registry().is_err());

        platform.shutdown().unwrap();
        assert_eq!(platform.state(), PlatformState::Shutdown);
        assert!(platform.release_resource("r", "a").unwrap_err().is(&NOT_INITIALIZED));
        assert!(platform.initialize().unwrap_err().is(&ALREADY_STARTED));
    }

    #[test]
    fn test_missing_mandatory_interface_fails_loudly() {
        let log = journal();
        let fault = HalError::hardware(3, "no display");
        let platform = builder()
            .register(InterfaceId::MEMORY, 1, Arc::new(MockDriver::new("heap", 1, &log)))
            .register(InterfaceId::GRAPHICS, 1, Arc::new(MockDriver::new("gpu", 1, &log).failing(fault)))
            .mandatory(InterfaceId::MEMORY)
            .mandatory(InterfaceId::GRAPHICS)
            .build()
            .unwrap();

        let err = platform.initialize().unwrap_err();
        assert!(err.is(&MANDATORY_UNAVAILABLE));
        assert_eq!(err.context(), Some("Graphics"));
        assert_eq!(platform.state(), PlatformState::Initializing);
        assert!(platform.init_report().unwrap().unavailable.contains(&InterfaceId::GRAPHICS));

        // Partial-failure cleanup still reaches the driver that did come up.
        platform.shutdown().unwrap();
        assert_eq!(platform.state(), PlatformState::Shutdown);
        assert!(log.lock().unwrap().contains(&"shutdown heap".to_string()));
    }

    #[test]
    fn test_optional_interface_failure_is_degraded_success() {
        let log = journal();
        let platform = builder()
            .register(InterfaceId::MEMORY, 1, Arc::new(MockDriver::new("heap", 1, &log)))
            .register(
                InterfaceId::AUDIO,
                1,
                Arc::new(MockDriver::new("snd", 1, &log).failing(HalError::hardware(4, "no codec"))),
            )
            .mandatory(InterfaceId::MEMORY)
            .build()
            .unwrap();

        platform.initialize().unwrap();
        let stats = platform.get_performance_stats();
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.degraded().collect::<Vec<_>>(), vec!["Audio"]);
        assert!(platform.get_driver(InterfaceId::AUDIO).is_err());

        platform.shutdown().unwrap();
        let after = platform.get_performance_stats();
        assert_eq!(after.failed_count, 1);
        assert_eq!(after.active_count, 0);
    }

    #[test]
    fn test_mandatory_without_any_registration_fails() {
        let platform = builder().mandatory(InterfaceId::TIME).build().unwrap();
        let err = platform.initialize().unwrap_err();
        assert!(err.is(&MANDATORY_UNAVAILABLE));
        assert_eq!(err.context(), Some("Time"));
    }

    #[test]
    fn test_drop_shuts_drivers_down() {
        let log = journal();
        {
            let platform = builder()
                .register(InterfaceId::THREAD, 0, Arc::new(MockDriver::new("threads", 0, &log)))
                .build()
                .unwrap();
            platform.initialize().unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["init threads".to_string(), "shutdown threads".to_string()]);
    }

    #[test]
    fn test_instances_are_isolated() {
        let log = journal();
        let a = builder()
            .register(InterfaceId::MEMORY, 0, Arc::new(MockDriver::new("a", 0, &log)))
            .build()
            .unwrap();
        let b = builder()
            .register(InterfaceId::MEMORY, 0, Arc::new(MockDriver::new("b", 0, &log)))
            .build()
            .unwrap();
        a.initialize().unwrap();
        b.initialize().unwrap();

        a.request_resource("gpu_bank_0", "x", AccessMode::Exclusive, Acquisition::NonBlocking).unwrap();
        b.request_resource("gpu_bank_0", "y", AccessMode::Exclusive, Acquisition::NonBlocking).unwrap();
        assert_eq!(a.get::<MockDriver>(InterfaceId::MEMORY).unwrap().name, "a");
        assert_eq!(b.get::<MockDriver>(InterfaceId::MEMORY).unwrap().name, "b");
    }

    #[test]
    fn test_invalid_config_is_rejected_at_build() {
        let config = HalConfig { resource_timeout: Duration::ZERO, ..HalConfig::default() };
        assert!(builder().config(config).build().is_err());
    }
}
