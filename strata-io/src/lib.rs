//! Strata I/O: raw platform interrogation.
//!
//! This crate talks to the OS and the CPU directly and reports plain numbers.
//! It has no notion of capabilities, tiers or drivers; `strata-core` turns
//! these readings into the capability model.

pub mod bench;
pub mod error;
pub mod platform;

// Re-exports for easier access by strata-core
pub use bench::{memory_bandwidth, BandwidthSample};
pub use error::ProbeError;
pub use platform::clock::timer_resolution;
pub use platform::features::CpuFeatures;
pub use platform::topology::SystemTopology;
