//! Portable software drivers. Every host gets these as the lowest-priority
//! fallback for the interfaces the boot sequence treats as mandatory.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;
use strata_core::{
    CapabilityMask, CapabilityProvider, Driver, HalError, HalResult, PerformanceTier, PlatformInfo,
};

pub const SOFTWARE_PRIORITY: i32 = 0;

pub const OUT_OF_MEMORY: HalError = HalError::resource(900, "software heap budget exhausted");
pub const NOT_ACTIVE: HalError = HalError::driver(901, "driver is not active");

fn software_info() -> PlatformInfo {
    PlatformInfo {
        platform_name: "software".into(),
        architecture: std::env::consts::ARCH.into(),
        total_memory: 0,
        cpu_cores: thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        performance_tier: PerformanceTier::Standard,
        has_fpu: true,
        has_simd: false,
    }
}

/// Bookkeeping heap: tracks reservations against a fixed budget.
pub struct HeapMemory {
    info: PlatformInfo,
    active: AtomicBool,
    limit: u64,
    reserved: AtomicU64,
}

impl HeapMemory {
    pub fn new(limit: u64) -> Self {
        Self { info: software_info(), active: AtomicBool::new(false), limit, reserved: AtomicU64::new(0) }
    }

    pub fn reserve(&self, bytes: u64) -> HalResult<()> {
        if !self.is_active() {
            return Err(NOT_ACTIVE);
        }
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                cur.checked_add(bytes).filter(|next| *next <= self.limit)
            })
            .map(|_| ())
            .map_err(|_| OUT_OF_MEMORY)
    }

    pub fn free(&self, bytes: u64) {
        let _ = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| Some(cur.saturating_sub(bytes)));
    }

    pub fn reserved(&self) -> u64 {
        self.reserved.load(Ordering::Acquire)
    }
}

impl CapabilityProvider for HeapMemory {
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

impl Driver for HeapMemory {
    fn initialize(&self) -> HalResult<()> {
        self.active.store(true, Ordering::Release);
        debug!("Software heap online ({} bytes)", self.limit);
        Ok(())
    }

    fn shutdown(&self) -> HalResult<()> {
        self.active.store(false, Ordering::Release);
        self.reserved.store(0, Ordering::Release);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn priority(&self) -> i32 {
        SOFTWARE_PRIORITY
    }

    fn name(&self) -> &str {
        "software-heap"
    }
}

/// Monotonic clock anchored at driver initialization.
pub struct MonotonicClock {
    info: PlatformInfo,
    origin: Instant,
    active: AtomicBool,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { info: software_info(), origin: Instant::now(), active: AtomicBool::new(false) }
    }

    pub fn uptime(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProvider for MonotonicClock {
    fn capability_mask(&self) -> CapabilityMask {
        CapabilityMask::HIGH_PRECISION_TIMER
    }

    fn performance_tier(&self) -> PerformanceTier {
        self.info.performance_tier
    }

    fn platform_info(&self) -> &PlatformInfo {
        &self.info
    }
}

impl Driver for MonotonicClock {
    fn initialize(&self) -> HalResult<()> {
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) -> HalResult<()> {
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn priority(&self) -> i32 {
        SOFTWARE_PRIORITY
    }

    fn name(&self) -> &str {
        "monotonic-clock"
    }
}

/// OS threads. Needs real parallelism to be worth selecting.
pub struct OsThreads {
    info: PlatformInfo,
    active: AtomicBool,
}

impl OsThreads {
    pub fn new() -> Self {
        Self { info: software_info(), active: AtomicBool::new(false) }
    }

    pub fn spawn<F>(&self, name: &str, f: F) -> HalResult<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_active() {
            return Err(NOT_ACTIVE);
        }
        thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|_| HalError::resource(902, "thread spawn failed"))
    }
}

impl Default for OsThreads {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProvider for OsThreads {
    fn capability_mask(&self) -> CapabilityMask {
        CapabilityMask::THREADING | CapabilityMask::ATOMIC_OPERATIONS
    }

    fn performance_tier(&self) -> PerformanceTier {
        self.info.performance_tier
    }

    fn platform_info(&self) -> &PlatformInfo {
        &self.info
    }
}

impl Driver for OsThreads {
    fn initialize(&self) -> HalResult<()> {
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) -> HalResult<()> {
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn priority(&self) -> i32 {
        SOFTWARE_PRIORITY
    }

    fn name(&self) -> &str {
        "os-threads"
    }

    fn required_capabilities(&self) -> CapabilityMask {
        CapabilityMask::THREADING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_enforces_limit() {
        let heap = HeapMemory::new(100);
        assert_eq!(heap.reserve(1), Err(NOT_ACTIVE));

        heap.initialize().unwrap();
        heap.reserve(60).unwrap();
        assert_eq!(heap.reserve(60), Err(OUT_OF_MEMORY));
        heap.free(60);
        heap.reserve(100).unwrap();
        assert_eq!(heap.reserved(), 100);

        heap.shutdown().unwrap();
        assert_eq!(heap.reserved(), 0);
    }

    #[test]
    fn test_threads_spawn_only_when_active() {
        let threads = OsThreads::default();
        assert!(threads.spawn("t", || ()).is_err());
        threads.initialize().unwrap();
        threads.spawn("t", || ()).unwrap().join().unwrap();
    }

    #[test]
    fn test_clock_uptime_advances() {
        let clock = MonotonicClock::default();
        clock.initialize().unwrap();
        assert!(clock.is_active());
        let first = clock.uptime();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.uptime() > first);
    }
}
