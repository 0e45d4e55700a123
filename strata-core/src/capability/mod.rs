//! Capability model, hardware probing, and the detection cache.

pub mod detect;
pub mod model;
pub mod persist;
pub mod predict;
pub mod probe;
pub mod refresh;

pub use detect::{CacheStatistics, CapabilityDetector, DetectionSettings, InvalidationReason};
pub use model::{
    classify_tier, Capability, CapabilityCacheEntry, CapabilityMask, CapabilityProvider, DetectionSource,
    PerformanceTier, PlatformInfo, StaticCapabilities,
};
pub use predict::predict;
pub use probe::{BenchmarkReport, HardwareIdentity, HardwareProbe, ProbeReport, SystemProbe};
pub use refresh::BackgroundRefresher;
