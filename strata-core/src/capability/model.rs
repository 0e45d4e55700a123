use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{HalError, HalResult};

pub const UNDEFINED_CAPABILITY_BITS: HalError =
    HalError::validation(100, "capability mask contains undefined bits");

/// Directly probed on this machine.
pub const CONFIDENCE_PROBED: f64 = 1.0;
/// Inferred from the tier, and a benchmark backed the tier.
pub const CONFIDENCE_BENCHMARKED: f64 = 0.85;
/// Inferred from the tier alone.
pub const CONFIDENCE_INFERRED: f64 = 0.6;
/// Neither probed nor inferred; reported absent.
pub const CONFIDENCE_ASSUMED_ABSENT: f64 = 0.5;

bitflags! {
    /// Platform feature set. Only the bits below are defined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct CapabilityMask: u32 {
        const THREADING = 1 << 0;
        const ATOMIC_OPERATIONS = 1 << 1;
        const DMA = 1 << 2;
        const VIRTUAL_MEMORY = 1 << 3;
        const MEMORY_PROTECTION = 1 << 4;
        const HARDWARE_3D = 1 << 5;
        const HARDWARE_2D = 1 << 6;
        const VERTEX_SHADERS = 1 << 7;
        const FRAGMENT_SHADERS = 1 << 8;
        const COMPUTE_SHADERS = 1 << 9;
        const HARDWARE_AUDIO = 1 << 10;
        const MULTI_CHANNEL_AUDIO = 1 << 11;
        const AUDIO_EFFECTS = 1 << 12;
        const MULTI_TOUCH = 1 << 13;
        const ACCELEROMETER = 1 << 14;
        const GAMEPAD = 1 << 15;
        const NETWORKING = 1 << 16;
        const WIFI = 1 << 17;
        const BLUETOOTH = 1 << 18;
        const HIGH_PRECISION_TIMER = 1 << 19;
        const REAL_TIME_CLOCK = 1 << 20;
        const PERSISTENT_STORAGE = 1 << 21;
        const ASYNC_IO = 1 << 22;
        const POWER_MANAGEMENT = 1 << 23;
        const SANDBOX_RESTRICTIONS = 1 << 24;
    }
}

impl CapabilityMask {
    /// Builds a mask from raw bits, refusing anything outside the defined set.
    pub fn from_raw(bits: u32) -> HalResult<Self> {
        Self::from_bits(bits).ok_or(UNDEFINED_CAPABILITY_BITS)
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.contains(capability.mask())
    }

    /// `true` when every required capability is present.
    pub fn satisfies(&self, required: CapabilityMask) -> bool {
        self.contains(required)
    }

    /// Required capabilities this mask lacks.
    pub fn missing(&self, required: CapabilityMask) -> CapabilityMask {
        required.difference(*self)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(move |c| self.has(*c))
    }
}

/// A single capability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Threading,
    AtomicOperations,
    Dma,
    VirtualMemory,
    MemoryProtection,
    Hardware3D,
    Hardware2D,
    VertexShaders,
    FragmentShaders,
    ComputeShaders,
    HardwareAudio,
    MultiChannelAudio,
    AudioEffects,
    MultiTouch,
    Accelerometer,
    Gamepad,
    Networking,
    WiFi,
    Bluetooth,
    HighPrecisionTimer,
    RealTimeClock,
    PersistentStorage,
    AsyncIo,
    PowerManagement,
    SandboxRestrictions,
}

impl Capability {
    pub const ALL: [Capability; 25] = [
        Capability::Threading,
        Capability::AtomicOperations,
        Capability::Dma,
        Capability::VirtualMemory,
        Capability::MemoryProtection,
        Capability::Hardware3D,
        Capability::Hardware2D,
        Capability::VertexShaders,
        Capability::FragmentShaders,
        Capability::ComputeShaders,
        Capability::HardwareAudio,
        Capability::MultiChannelAudio,
        Capability::AudioEffects,
        Capability::MultiTouch,
        Capability::Accelerometer,
        Capability::Gamepad,
        Capability::Networking,
        Capability::WiFi,
        Capability::Bluetooth,
        Capability::HighPrecisionTimer,
        Capability::RealTimeClock,
        Capability::PersistentStorage,
        Capability::AsyncIo,
        Capability::PowerManagement,
        Capability::SandboxRestrictions,
    ];

    /// Variants are declared in bit order, so the discriminant is the bit index.
    pub const fn mask(self) -> CapabilityMask {
        CapabilityMask::from_bits_retain(1 << (self as u32))
    }

    pub const fn name(self) -> &'static str {
        match self {
            Capability::Threading => "Threading",
            Capability::AtomicOperations => "AtomicOperations",
            Capability::Dma => "DMA",
            Capability::VirtualMemory => "VirtualMemory",
            Capability::MemoryProtection => "MemoryProtection",
            Capability::Hardware3D => "Hardware3D",
            Capability::Hardware2D => "Hardware2D",
            Capability::VertexShaders => "VertexShaders",
            Capability::FragmentShaders => "FragmentShaders",
            Capability::ComputeShaders => "ComputeShaders",
            Capability::HardwareAudio => "HardwareAudio",
            Capability::MultiChannelAudio => "MultiChannelAudio",
            Capability::AudioEffects => "AudioEffects",
            Capability::MultiTouch => "MultiTouch",
            Capability::Accelerometer => "Accelerometer",
            Capability::Gamepad => "Gamepad",
            Capability::Networking => "Networking",
            Capability::WiFi => "WiFi",
            Capability::Bluetooth => "Bluetooth",
            Capability::HighPrecisionTimer => "HighPrecisionTimer",
            Capability::RealTimeClock => "RealTimeClock",
            Capability::PersistentStorage => "PersistentStorage",
            Capability::AsyncIo => "AsyncIO",
            Capability::PowerManagement => "PowerManagement",
            Capability::SandboxRestrictions => "SandboxRestrictions",
        }
    }

    /// Whether a software path exists when the hardware feature is absent.
    pub const fn has_fallback(self) -> bool {
        matches!(self, Capability::Hardware3D | Capability::Hardware2D | Capability::HardwareAudio)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse classification of the machine, from a 16MB console up to a workstation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PerformanceTier {
    Minimal,
    Limited,
    Standard,
    High,
}

impl PerformanceTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            PerformanceTier::Minimal => "Minimal",
            PerformanceTier::Limited => "Limited",
            PerformanceTier::Standard => "Standard",
            PerformanceTier::High => "High",
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Below this copy bandwidth a machine is not treated as High tier.
pub const HIGH_TIER_MIN_BANDWIDTH: f64 = GIB as f64;

/// Classifies declared memory and core count.
///
/// A zero `total_memory` means memory could not be read; such machines are
/// assumed Standard.
pub fn classify_tier(total_memory: u64, cpu_cores: u32) -> PerformanceTier {
    match total_memory {
        0 => PerformanceTier::Standard,
        m if m < 32 * MIB => PerformanceTier::Minimal,
        m if m < 512 * MIB => PerformanceTier::Limited,
        m if m >= 16 * GIB && cpu_cores >= 8 => PerformanceTier::High,
        _ => PerformanceTier::Standard,
    }
}

/// Lowers a High classification when measured memory throughput disagrees.
pub fn refine_tier(tier: PerformanceTier, bytes_per_sec: f64) -> PerformanceTier {
    if tier == PerformanceTier::High && bytes_per_sec < HIGH_TIER_MIN_BANDWIDTH {
        PerformanceTier::Standard
    } else {
        tier
    }
}

/// Capabilities assumed present for a tier when they cannot be probed (GPU, audio, I/O).
pub fn inferred_for_tier(tier: PerformanceTier) -> CapabilityMask {
    let minimal = CapabilityMask::HARDWARE_2D | CapabilityMask::DMA;
    let limited = minimal | CapabilityMask::HARDWARE_3D | CapabilityMask::HARDWARE_AUDIO;
    let standard = limited
        | CapabilityMask::VERTEX_SHADERS
        | CapabilityMask::FRAGMENT_SHADERS
        | CapabilityMask::MULTI_CHANNEL_AUDIO
        | CapabilityMask::NETWORKING
        | CapabilityMask::ASYNC_IO
        | CapabilityMask::MEMORY_PROTECTION;

    match tier {
        PerformanceTier::Minimal => minimal,
        PerformanceTier::Limited => limited,
        PerformanceTier::Standard => standard,
        PerformanceTier::High => standard | CapabilityMask::COMPUTE_SHADERS | CapabilityMask::AUDIO_EFFECTS,
    }
}

/// Description of the platform produced once per detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub platform_name: String,
    pub architecture: String,
    pub total_memory: u64,
    pub cpu_cores: u32,
    pub performance_tier: PerformanceTier,
    pub has_fpu: bool,
    pub has_simd: bool,
}

/// Read-only view of what a platform (or a driver) can do.
pub trait CapabilityProvider: Send + Sync {
    fn capability_mask(&self) -> CapabilityMask;

    fn performance_tier(&self) -> PerformanceTier;

    fn platform_info(&self) -> &PlatformInfo;

    fn supports(&self, capability: Capability) -> bool {
        self.capability_mask().has(capability)
    }
}

/// A fixed capability envelope, for drivers that declare rather than probe.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticCapabilities {
    mask: CapabilityMask,
    info: PlatformInfo,
}

impl StaticCapabilities {
    pub fn new(mask: CapabilityMask, info: PlatformInfo) -> Self {
        Self { mask, info }
    }
}

impl CapabilityProvider for StaticCapabilities {
    fn capability_mask(&self) -> CapabilityMask {
        self.mask
    }

    fn performance_tier(&self) -> PerformanceTier {
        self.info.performance_tier
    }

    fn platform_info(&self) -> &PlatformInfo {
        &self.info
    }
}

/// Where the current entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionSource {
    Probe,
    Persisted,
}

/// One complete detection result. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCacheEntry {
    pub capabilities: CapabilityMask,
    pub platform_info: PlatformInfo,
    pub confidence: BTreeMap<Capability, f64>,
    pub detected_at: SystemTime,
    pub ttl: Option<Duration>,
    /// Fingerprint of the hardware identity the entry was detected on.
    pub hardware_id: u64,
    /// Measured copy bandwidth, when benchmarks ran.
    pub memory_bandwidth: Option<f64>,
    pub source: DetectionSource,
}

impl CapabilityCacheEntry {
    /// Wall-clock expiry check, used for persisted entries.
    ///
    /// A clock that moved backwards past `detected_at` counts as expired.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => match now.duration_since(self.detected_at) {
                Ok(age) => age > ttl,
                Err(_) => true,
            },
        }
    }

    pub fn confidence(&self, capability: Capability) -> f64 {
        self.confidence.get(&capability).copied().unwrap_or(0.0)
    }

    pub fn capability_with_confidence(&self, capability: Capability) -> (bool, f64) {
        (self.capabilities.has(capability), self.confidence(capability))
    }
}

impl CapabilityProvider for CapabilityCacheEntry {
    fn capability_mask(&self) -> CapabilityMask {
        self.capabilities
    }

    fn performance_tier(&self) -> PerformanceTier {
        self.platform_info.performance_tier
    }

    fn platform_info(&self) -> &PlatformInfo {
        &self.platform_info
    }
}
