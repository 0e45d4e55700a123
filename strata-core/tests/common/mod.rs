#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use strata_core::capability::{BenchmarkReport, HardwareIdentity, ProbeReport};
use strata_core::{
    CapabilityMask, CapabilityProvider, Driver, HalError, HalResult, HardwareProbe, PerformanceTier, PlatformInfo,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// A fixed 16 GiB, 8-core machine with 3D but no compute.
pub struct FixedProbe {
    pub probes: Arc<AtomicUsize>,
    pub total_memory: u64,
}

impl FixedProbe {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let probes = Arc::new(AtomicUsize::new(0));
        (Self { probes: probes.clone(), total_memory: 16 << 30 }, probes)
    }
}

impl HardwareProbe for FixedProbe {
    fn identity(&self) -> HalResult<HardwareIdentity> {
        Ok(HardwareIdentity {
            platform_name: "rig".into(),
            architecture: "aarch64".into(),
            total_memory: self.total_memory,
            cpu_cores: 8,
            cpu_features: 0,
        })
    }

    fn probe(&self) -> HalResult<ProbeReport> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeReport {
            identity: self.identity()?,
            has_fpu: true,
            has_simd: true,
            probed: CapabilityMask::THREADING | CapabilityMask::COMPUTE_SHADERS,
            supported: CapabilityMask::THREADING,
            inferred: CapabilityMask::HARDWARE_3D,
        })
    }

    fn benchmark(&self) -> HalResult<BenchmarkReport> {
        Ok(BenchmarkReport { memory_bytes_per_sec: 2e10 })
    }
}

/// Driver double with scripted outcomes.
#[derive(Debug)]
pub struct ScriptedDriver {
    pub name: &'static str,
    pub priority: i32,
    pub init_error: Option<HalError>,
    pub required: CapabilityMask,
    pub active: AtomicBool,
    journal: Journal,
    info: PlatformInfo,
}

impl ScriptedDriver {
    pub fn new(name: &'static str, priority: i32, journal: &Journal) -> Self {
        Self {
            name,
            priority,
            init_error: None,
            required: CapabilityMask::empty(),
            active: AtomicBool::new(false),
            journal: journal.clone(),
            info: PlatformInfo {
                platform_name: "rig".into(),
                architecture: "aarch64".into(),
                total_memory: 0,
                cpu_cores: 1,
                performance_tier: PerformanceTier::Standard,
                has_fpu: true,
                has_simd: false,
            },
        }
    }

    pub fn failing(mut self, error: HalError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn requiring(mut self, required: CapabilityMask) -> Self {
        self.required = required;
        self
    }
}

impl CapabilityProvider for ScriptedDriver {
    fn capability_mask(&self) -> CapabilityMask {
        CapabilityMask::empty()
    }

    fn performance_tier(&self) -> PerformanceTier {
        self.info.performance_tier
    }

    fn platform_info(&self) -> &PlatformInfo {
        &self.info
    }
}

impl Driver for ScriptedDriver {
    fn initialize(&self) -> HalResult<()> {
        self.journal.lock().unwrap().push(format!("init {}", self.name));
        match self.init_error {
            Some(e) => Err(e),
            None => {
                self.active.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn shutdown(&self) -> HalResult<()> {
        self.journal.lock().unwrap().push(format!("shutdown {}", self.name));
        self.active.store(false, Ordering::SeqCst);
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
