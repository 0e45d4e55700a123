use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use strata_io::platform::{arch_name, os_name};
use strata_io::{memory_bandwidth, timer_resolution, CpuFeatures, ProbeError, SystemTopology};

use super::model::CapabilityMask;
use crate::error::{HalError, HalResult};

pub const PROBE_FAILED: HalError = HalError::hardware(110, "hardware probe failed");
pub const BENCHMARK_FAILED: HalError = HalError::hardware(111, "micro-benchmark failed");

/// Timer steps at or below this count as a high precision timer.
const HIGH_PRECISION_STEP: Duration = Duration::from_micros(1);

/// Buffer and rounds for the copy benchmark: 8 MiB x 8 keeps it well under 100ms.
const BENCH_BUFFER: usize = 8 * 1024 * 1024;
const BENCH_ROUNDS: u32 = 8;

/// What the machine is, independent of what it can do. Cheap to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareIdentity {
    pub platform_name: String,
    pub architecture: String,
    pub total_memory: u64,
    pub cpu_cores: u32,
    pub cpu_features: u8,
}

impl HardwareIdentity {
    /// FNV-1a over the identity fields. Stable across builds and toolchains,
    /// which `DefaultHasher` is not.
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = OFFSET;
        let mut feed = |bytes: &[u8]| {
            for b in bytes {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(PRIME);
            }
        };
        feed(self.platform_name.as_bytes());
        feed(&[0xff]);
        feed(self.architecture.as_bytes());
        feed(&[0xff]);
        feed(&self.total_memory.to_le_bytes());
        feed(&self.cpu_cores.to_le_bytes());
        feed(&[self.cpu_features]);
        hash
    }
}

/// Output of one full probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub identity: HardwareIdentity,
    pub has_fpu: bool,
    pub has_simd: bool,
    /// Capabilities that were actually tested.
    pub probed: CapabilityMask,
    /// The subset of `probed` that was found present.
    pub supported: CapabilityMask,
    /// Capabilities known from the build target rather than a test.
    pub inferred: CapabilityMask,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkReport {
    pub memory_bytes_per_sec: f64,
}

/// Source of hardware facts for the detector.
///
/// `identity` must be cheap: it runs on every persisted-cache lookup.
/// `probe` and `benchmark` may be slow.
pub trait HardwareProbe: Send + Sync {
    fn identity(&self) -> HalResult<HardwareIdentity>;

    fn probe(&self) -> HalResult<ProbeReport>;

    fn benchmark(&self) -> HalResult<BenchmarkReport>;
}

/// Probes the machine the process is running on, through `strata-io`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }

    fn topology(&self) -> Option<SystemTopology> {
        match SystemTopology::detect() {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("Topology unavailable ({}). Memory will be reported as unknown.", e);
                None
            }
        }
    }

    fn identity_from(&self, topology: Option<&SystemTopology>, features: &CpuFeatures) -> HardwareIdentity {
        let cpu_cores = match topology {
            Some(t) => t.logical_cores(),
            None => std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        };

        HardwareIdentity {
            platform_name: os_name().to_string(),
            architecture: arch_name().to_string(),
            total_memory: topology.map(|t| t.total_ram()).unwrap_or(0),
            cpu_cores,
            cpu_features: features.bits(),
        }
    }
}

impl HardwareProbe for SystemProbe {
    fn identity(&self) -> HalResult<HardwareIdentity> {
        let topology = self.topology();
        Ok(self.identity_from(topology.as_ref(), &CpuFeatures::detect()))
    }

    fn probe(&self) -> HalResult<ProbeReport> {
        let topology = self.topology();
        let features = CpuFeatures::detect();
        let identity = self.identity_from(topology.as_ref(), &features);

        let mut probed = CapabilityMask::empty();
        let mut supported = CapabilityMask::empty();
        let mut record = |cap: CapabilityMask, present: bool| {
            probed |= cap;
            if present {
                supported |= cap;
            }
        };

        let spawned = std::thread::Builder::new()
            .name("strata-probe".into())
            .spawn(|| ())
            .map(|h| h.join().is_ok())
            .unwrap_or(false);
        record(CapabilityMask::THREADING, spawned && identity.cpu_cores > 1);
        record(CapabilityMask::ATOMIC_OPERATIONS, features.atomics64);

        if let Some(t) = topology.as_ref() {
            record(CapabilityMask::VIRTUAL_MEMORY, t.page_size() > 0);
        }

        let resolution = timer_resolution(16);
        debug!("Timer resolution: {:?}", resolution);
        record(
            CapabilityMask::HIGH_PRECISION_TIMER,
            resolution.map_or(false, |r| r <= HIGH_PRECISION_STEP),
        );

        let wall_clock_sane = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() > 946_684_800)
            .unwrap_or(false);
        record(CapabilityMask::REAL_TIME_CLOCK, wall_clock_sane);

        record(CapabilityMask::PERSISTENT_STORAGE, std::env::temp_dir().metadata().is_ok());

        let mut inferred = CapabilityMask::empty();
        if cfg!(any(unix, windows)) {
            inferred |= CapabilityMask::MEMORY_PROTECTION | CapabilityMask::NETWORKING;
        }
        if cfg!(target_os = "linux") {
            inferred |= CapabilityMask::ASYNC_IO;
        }
        if cfg!(target_family = "wasm") {
            inferred |= CapabilityMask::SANDBOX_RESTRICTIONS;
        }

        Ok(ProbeReport {
            identity,
            has_fpu: features.fpu,
            has_simd: features.has_simd(),
            probed,
            supported,
            inferred,
        })
    }

    fn benchmark(&self) -> HalResult<BenchmarkReport> {
        let sample = memory_bandwidth(BENCH_BUFFER, BENCH_ROUNDS).map_err(probe_error)?;
        Ok(BenchmarkReport { memory_bytes_per_sec: sample.bytes_per_sec() })
    }
}

fn probe_error(e: ProbeError) -> HalError {
    warn!("Probe error: {}", e);
    match e {
        ProbeError::BufferTooSmall(..) | ProbeError::Unmeasurable => BENCHMARK_FAILED,
        _ => PROBE_FAILED,
    }
}
