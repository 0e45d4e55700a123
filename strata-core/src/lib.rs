//! Strata: the coordination core of a hardware abstraction layer.
//!
//! Probes what the machine can do, picks one working driver per interface
//! type, arbitrates scarce resources between drivers, and runs the whole
//! thing through one explicit `Platform` context.
//!
//! ```no_run
//! use strata_core::{HalConfig, Platform};
//!
//! let platform = Platform::builder()
//!     .config(HalConfig::for_use_case("desktop")?.from_env()?)
//!     .build()?;
//! platform.initialize()?;
//! println!("{:?}", platform.get_active_interfaces());
//! # Ok::<(), strata_core::HalError>(())
//! ```

pub mod capability;
pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod platform;
pub mod registry;

pub use capability::{
    Capability, CapabilityCacheEntry, CapabilityDetector, CapabilityMask, CapabilityProvider, HardwareProbe,
    InvalidationReason, PerformanceTier, PlatformInfo, StaticCapabilities, SystemProbe,
};
pub use config::HalConfig;
pub use coordinator::{
    AccessMode, Acquisition, ResourceCategory, ResourceCoordinator, ResourceGuard, ResourceRequest,
};
pub use diagnostics::{InterfaceStatus, PerformanceStats};
pub use error::{failure, success, ErrorCategory, HalError, HalResult};
pub use platform::{Platform, PlatformBuilder, PlatformState};
pub use registry::{Driver, DriverRegistry, DriverState, InterfaceId};
