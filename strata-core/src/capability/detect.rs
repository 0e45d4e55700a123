use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info, warn};
use serde::Serialize;

use super::model::{
    classify_tier, inferred_for_tier, refine_tier, Capability, CapabilityCacheEntry, DetectionSource, PlatformInfo,
    CONFIDENCE_ASSUMED_ABSENT, CONFIDENCE_BENCHMARKED, CONFIDENCE_INFERRED, CONFIDENCE_PROBED,
};
use super::persist;
use super::probe::HardwareProbe;
use crate::config::HalConfig;
use crate::error::{HalResult, LOCK_POISONED};

/// Why the current entry stopped being trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvalidationReason {
    Manual,
    HardwareChange,
    DriverUpdate,
    ConfigChange,
}

/// Knobs the detector reads from `HalConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub ttl: Option<Duration>,
    pub benchmarks: bool,
    pub cache_path: Option<PathBuf>,
}

impl From<&HalConfig> for DetectionSettings {
    fn from(config: &HalConfig) -> Self {
        Self {
            ttl: config.capability_ttl,
            benchmarks: config.benchmarks,
            cache_path: config.capability_cache_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub probes: u64,
    pub invalidations: u64,
    pub persisted_hits: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    probes: AtomicU64,
    invalidations: AtomicU64,
    persisted_hits: AtomicU64,
}

struct Slot {
    entry: Arc<CapabilityCacheEntry>,
    stored_at: Instant,
    invalidated: bool,
}

impl Slot {
    fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        !self.invalidated && ttl.map_or(true, |ttl| self.stored_at.elapsed() <= ttl)
    }
}

/// Turns expensive probing into a cheap, invalidatable lookup.
///
/// Holds exactly one current entry. Readers get an `Arc` to an immutable
/// entry; a new detection swaps the `Arc`, so nobody observes a torn value.
pub struct CapabilityDetector {
    probe: Box<dyn HardwareProbe>,
    settings: DetectionSettings,
    slot: RwLock<Option<Slot>>,
    // Serializes probing so concurrent misses produce one detection.
    detecting: Mutex<()>,
    // Set by `invalidate`; the persisted entry is not trusted until a probe succeeds.
    distrust_persisted: AtomicBool,
    counters: Counters,
}

impl CapabilityDetector {
    pub fn new(probe: Box<dyn HardwareProbe>, settings: DetectionSettings) -> Self {
        Self {
            probe,
            settings,
            slot: RwLock::new(None),
            detecting: Mutex::new(()),
            distrust_persisted: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Returns the cached entry when it is still valid, otherwise probes.
    ///
    /// `force` skips both the in-memory and the persisted entry.
    pub fn detect(&self, force: bool) -> HalResult<Arc<CapabilityCacheEntry>> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        if !force {
            if let Some(entry) = self.fresh_entry()? {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry);
            }
        }

        let _guard = self.detecting.lock().map_err(|_| LOCK_POISONED)?;

        if !force {
            // Another thread may have finished a detection while we waited.
            if let Some(entry) = self.fresh_entry()? {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry);
            }
            if let Some(entry) = self.persisted_entry()? {
                self.counters.persisted_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(self.run_detection()?);
        self.store(entry.clone(), Instant::now())?;
        self.distrust_persisted.store(false, Ordering::Release);

        if let Some(path) = &self.settings.cache_path {
            if let Err(e) = persist::save(path, &entry) {
                warn!("Capability entry not persisted: {}", e);
            }
        }

        Ok(entry)
    }

    /// Marks the current entry stale. The next `detect` probes again, even
    /// when nothing was detected yet and a persisted entry exists.
    pub fn invalidate(&self, reason: InvalidationReason) -> HalResult<()> {
        self.distrust_persisted.store(true, Ordering::Release);
        {
            let mut slot = self.slot.write().map_err(|_| LOCK_POISONED)?;
            if let Some(slot) = slot.as_mut() {
                slot.invalidated = true;
            }
        }
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        info!("Capability cache invalidated ({:?})", reason);

        if reason == InvalidationReason::HardwareChange {
            if let Some(path) = &self.settings.cache_path {
                if let Err(e) = persist::discard(path) {
                    warn!("Could not discard persisted capability entry: {}", e);
                }
            }
        }
        Ok(())
    }

    /// The last detection result, stale or not. Never probes.
    pub fn current(&self) -> Option<Arc<CapabilityCacheEntry>> {
        self.slot.read().ok()?.as_ref().map(|s| s.entry.clone())
    }

    /// Support flag and confidence from the last detection.
    ///
    /// `(false, 0.0)` before the first detection.
    pub fn get_capability_with_confidence(&self, capability: Capability) -> (bool, f64) {
        self.current()
            .map(|e| e.capability_with_confidence(capability))
            .unwrap_or((false, 0.0))
    }

    pub fn statistics(&self) -> CacheStatistics {
        let c = &self.counters;
        CacheStatistics {
            requests: c.requests.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            probes: c.probes.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            persisted_hits: c.persisted_hits.load(Ordering::Relaxed),
        }
    }

    fn fresh_entry(&self) -> HalResult<Option<Arc<CapabilityCacheEntry>>> {
        let slot = self.slot.read().map_err(|_| LOCK_POISONED)?;
        Ok(slot
            .as_ref()
            .filter(|s| s.is_fresh(self.settings.ttl))
            .map(|s| s.entry.clone()))
    }

    fn store(&self, entry: Arc<CapabilityCacheEntry>, stored_at: Instant) -> HalResult<()> {
        let mut slot = self.slot.write().map_err(|_| LOCK_POISONED)?;
        *slot = Some(Slot { entry, stored_at, invalidated: false });
        Ok(())
    }

    /// Only consulted at startup, before any in-memory entry exists.
    fn persisted_entry(&self) -> HalResult<Option<Arc<CapabilityCacheEntry>>> {
        let Some(path) = &self.settings.cache_path else {
            return Ok(None);
        };
        if self.distrust_persisted.load(Ordering::Acquire) {
            debug!("Persisted capability entry skipped after invalidation");
            return Ok(None);
        }
        if self.slot.read().map_err(|_| LOCK_POISONED)?.is_some() {
            return Ok(None);
        }

        let mut entry = match persist::load(path) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("Ignoring persisted capability entry: {}", e);
                return Ok(None);
            }
        };

        let current_id = self.probe.identity()?.fingerprint();
        if entry.hardware_id != current_id {
            info!(
                "Persisted capability entry is for other hardware ({:016x} != {:016x}). Re-detecting.",
                entry.hardware_id, current_id
            );
            return Ok(None);
        }

        entry.ttl = self.settings.ttl;
        let now = SystemTime::now();
        if entry.is_expired_at(now) {
            debug!("Persisted capability entry expired");
            return Ok(None);
        }

        let age = now.duration_since(entry.detected_at).unwrap_or_default();
        let stored_at = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
        entry.source = DetectionSource::Persisted;

        let entry = Arc::new(entry);
        self.store(entry.clone(), stored_at)?;
        info!("Capability entry restored from {}", path.display());
        Ok(Some(entry))
    }

    fn run_detection(&self) -> HalResult<CapabilityCacheEntry> {
        let started = Instant::now();
        self.counters.probes.fetch_add(1, Ordering::Relaxed);

        let report = self.probe.probe()?;
        let identity = &report.identity;
        let mut tier = classify_tier(identity.total_memory, identity.cpu_cores);

        let mut bandwidth = None;
        if self.settings.benchmarks {
            match self.probe.benchmark() {
                Ok(bench) => {
                    tier = refine_tier(tier, bench.memory_bytes_per_sec);
                    bandwidth = Some(bench.memory_bytes_per_sec);
                }
                Err(e) => warn!("Benchmark failed, keeping declared tier: {}", e),
            }
        }

        let inferred = (inferred_for_tier(tier) | report.inferred).difference(report.probed);
        let capabilities = report.supported | inferred;
        let inferred_confidence = if bandwidth.is_some() { CONFIDENCE_BENCHMARKED } else { CONFIDENCE_INFERRED };

        let confidence: BTreeMap<Capability, f64> = Capability::ALL
            .into_iter()
            .map(|cap| {
                let score = if report.probed.has(cap) {
                    CONFIDENCE_PROBED
                } else if inferred.has(cap) {
                    inferred_confidence
                } else {
                    CONFIDENCE_ASSUMED_ABSENT
                };
                (cap, score)
            })
            .collect();

        let entry = CapabilityCacheEntry {
            capabilities,
            platform_info: PlatformInfo {
                platform_name: identity.platform_name.clone(),
                architecture: identity.architecture.clone(),
                total_memory: identity.total_memory,
                cpu_cores: identity.cpu_cores,
                performance_tier: tier,
                has_fpu: report.has_fpu,
                has_simd: report.has_simd,
            },
            confidence,
            detected_at: SystemTime::now(),
            ttl: self.settings.ttl,
            hardware_id: identity.fingerprint(),
            memory_bandwidth: bandwidth,
            source: DetectionSource::Probe,
        };

        info!(
            "Capability detection complete in {:?}: {} {} tier {}, {} capabilities",
            started.elapsed(),
            entry.platform_info.platform_name,
            entry.platform_info.architecture,
            tier,
            capabilities.bits().count_ones()
        );
        Ok(entry)
    }
}
