//! Validated configuration consumed by the orchestrator.
//!
//! Loading is deliberately thin: a struct with defaults, a few use-case
//! presets, and environment overrides. Bad values are rejected with a
//! `Configuration` error naming the offending key; nothing is clamped.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::coordinator::ResourceCategory;
use crate::error::{HalError, HalResult};

pub const INVALID_NUMBER: HalError = HalError::configuration(1, "value is not a non-negative integer");
pub const INVALID_FLAG: HalError = HalError::configuration(2, "value is not a boolean flag");
pub const ZERO_TIMEOUT: HalError = HalError::configuration(3, "timeout must be greater than zero");
pub const ZERO_TTL: HalError = HalError::configuration(4, "capability TTL of zero would never cache; use `never` to disable expiry");
pub const ZERO_INTERVAL: HalError = HalError::configuration(5, "background refresh interval must be greater than zero");
pub const UNKNOWN_USE_CASE: HalError = HalError::configuration(6, "unknown configuration use case");

pub const ENV_TTL: &str = "STRATA_CAPABILITY_TTL_SECS";
pub const ENV_DRIVER_INIT_TIMEOUT: &str = "STRATA_DRIVER_INIT_TIMEOUT_MS";
pub const ENV_RESOURCE_TIMEOUT: &str = "STRATA_RESOURCE_TIMEOUT_MS";
pub const ENV_DEADLOCK_CHECK: &str = "STRATA_DEADLOCK_CHECK";
pub const ENV_BENCHMARKS: &str = "STRATA_BENCHMARKS";
pub const ENV_CACHE_PATH: &str = "STRATA_CAPABILITY_CACHE";
pub const ENV_BACKGROUND_REFRESH: &str = "STRATA_BACKGROUND_REFRESH_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalConfig {
    /// How long a capability detection stays valid. `None` never expires
    /// (fixed embedded hardware).
    pub capability_ttl: Option<Duration>,
    /// Driver `initialize()` calls slower than this are reported as slow.
    pub driver_init_timeout: Duration,
    /// Wait bound for `Acquisition::Blocking` resource requests.
    pub resource_timeout: Duration,
    pub deadlock_detection: bool,
    /// Run micro-benchmarks during capability detection.
    pub benchmarks: bool,
    /// Where to persist the capability entry across restarts.
    pub capability_cache_path: Option<PathBuf>,
    pub background_refresh: Option<Duration>,
    /// Per-category resource budgets. Missing categories are unbounded.
    pub budgets: BTreeMap<ResourceCategory, u64>,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            capability_ttl: Some(Duration::from_secs(300)),
            driver_init_timeout: Duration::from_secs(2),
            resource_timeout: Duration::from_millis(500),
            deadlock_detection: true,
            benchmarks: false,
            capability_cache_path: None,
            background_refresh: None,
            budgets: BTreeMap::new(),
        }
    }
}

impl HalConfig {
    /// Fixed hardware: probing is expensive and results never change.
    pub fn embedded() -> Self {
        Self {
            capability_ttl: None,
            resource_timeout: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Short TTL so hardware changes on a dev box show up quickly.
    pub fn development() -> Self {
        Self {
            capability_ttl: Some(Duration::from_secs(30)),
            benchmarks: true,
            ..Self::default()
        }
    }

    pub fn desktop() -> Self {
        Self {
            capability_ttl: Some(Duration::from_secs(3600)),
            benchmarks: true,
            background_refresh: Some(Duration::from_secs(600)),
            ..Self::default()
        }
    }

    /// Cloud hosts can migrate under us, so re-detect often in the background.
    pub fn server() -> Self {
        Self {
            capability_ttl: Some(Duration::from_secs(60)),
            background_refresh: Some(Duration::from_secs(30)),
            ..Self::default()
        }
    }

    pub fn for_use_case(name: &str) -> HalResult<Self> {
        match name {
            "default" => Ok(Self::default()),
            "embedded" => Ok(Self::embedded()),
            "development" => Ok(Self::development()),
            "desktop" => Ok(Self::desktop()),
            "server" => Ok(Self::server()),
            _ => Err(UNKNOWN_USE_CASE),
        }
    }

    pub fn budget(&self, category: ResourceCategory) -> Option<u64> {
        self.budgets.get(&category).copied()
    }

    pub fn with_budget(mut self, category: ResourceCategory, limit: u64) -> Self {
        self.budgets.insert(category, limit);
        self
    }

    /// Applies `STRATA_*` environment overrides on top of `self`.
    pub fn from_env(self) -> HalResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup. `from_env` is this with `std::env::var`.
    pub fn with_overrides<F>(mut self, lookup: F) -> HalResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_TTL) {
            self.capability_ttl = match raw.trim() {
                "never" | "none" => None,
                other => Some(Duration::from_secs(parse_number(other, ENV_TTL)?)),
            };
        }
        if let Some(raw) = lookup(ENV_DRIVER_INIT_TIMEOUT) {
            self.driver_init_timeout = Duration::from_millis(parse_number(&raw, ENV_DRIVER_INIT_TIMEOUT)?);
        }
        if let Some(raw) = lookup(ENV_RESOURCE_TIMEOUT) {
            self.resource_timeout = Duration::from_millis(parse_number(&raw, ENV_RESOURCE_TIMEOUT)?);
        }
        if let Some(raw) = lookup(ENV_DEADLOCK_CHECK) {
            self.deadlock_detection = parse_flag(&raw, ENV_DEADLOCK_CHECK)?;
        }
        if let Some(raw) = lookup(ENV_BENCHMARKS) {
            self.benchmarks = parse_flag(&raw, ENV_BENCHMARKS)?;
        }
        if let Some(raw) = lookup(ENV_CACHE_PATH) {
            let raw = raw.trim();
            self.capability_cache_path = if raw.is_empty() { None } else { Some(PathBuf::from(raw)) };
        }
        if let Some(raw) = lookup(ENV_BACKGROUND_REFRESH) {
            self.background_refresh = match raw.trim() {
                "off" | "none" => None,
                other => Some(Duration::from_secs(parse_number(other, ENV_BACKGROUND_REFRESH)?)),
            };
        }
        for category in ResourceCategory::ALL {
            let key = category.budget_env_key();
            if let Some(raw) = lookup(key) {
                let limit = parse_number(&raw, key)?;
                self.budgets.insert(category, limit);
            }
        }

        self.validate()?;
        debug!("Configuration resolved: {:?}", self);
        Ok(self)
    }

    pub fn validate(&self) -> HalResult<()> {
        if self.capability_ttl == Some(Duration::ZERO) {
            return Err(ZERO_TTL.with_context(ENV_TTL));
        }
        if self.driver_init_timeout.is_zero() {
            return Err(ZERO_TIMEOUT.with_context(ENV_DRIVER_INIT_TIMEOUT));
        }
        if self.resource_timeout.is_zero() {
            return Err(ZERO_TIMEOUT.with_context(ENV_RESOURCE_TIMEOUT));
        }
        if self.background_refresh == Some(Duration::ZERO) {
            return Err(ZERO_INTERVAL.with_context(ENV_BACKGROUND_REFRESH));
        }
        Ok(())
    }
}

fn parse_number(raw: &str, key: &'static str) -> HalResult<u64> {
    raw.trim().parse::<u64>().map_err(|_| INVALID_NUMBER.with_context(key))
}

fn parse_flag(raw: &str, key: &'static str) -> HalResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(INVALID_FLAG.with_context(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_validate() {
        assert!(HalConfig::default().validate().is_ok());
        for name in ["default", "embedded", "development", "desktop", "server"] {
            let cfg = HalConfig::for_use_case(name).unwrap();
            assert!(cfg.validate().is_ok(), "{} preset should be valid", name);
        }
        assert_eq!(HalConfig::embedded().capability_ttl, None);
    }

    #[test]
    fn test_unknown_use_case_is_rejected() {
        assert_eq!(HalConfig::for_use_case("toaster"), Err(UNKNOWN_USE_CASE));
    }

    #[test]
    fn test_overrides_apply() {
        let cfg = HalConfig::default()
            .with_overrides(lookup_from(&[
                (ENV_TTL, "never"),
                (ENV_RESOURCE_TIMEOUT, "250"),
                (ENV_DEADLOCK_CHECK, "off"),
                ("STRATA_BUDGET_GPU_MEMORY", "8388608"),
            ]))
            .unwrap();

        assert_eq!(cfg.capability_ttl, None);
        assert_eq!(cfg.resource_timeout, Duration::from_millis(250));
        assert!(!cfg.deadlock_detection);
        assert_eq!(cfg.budget(ResourceCategory::GpuMemory), Some(8 * 1024 * 1024));
        assert_eq!(cfg.budget(ResourceCategory::Dma), None);
    }

    #[test]
    fn test_bad_values_are_rejected_not_clamped() {
        let err = HalConfig::default()
            .with_overrides(lookup_from(&[(ENV_RESOURCE_TIMEOUT, "-5")]))
            .unwrap_err();
        assert!(err.is(&INVALID_NUMBER));
        assert_eq!(err.context(), Some(ENV_RESOURCE_TIMEOUT));

        let err = HalConfig::default()
            .with_overrides(lookup_from(&[(ENV_DRIVER_INIT_TIMEOUT, "0")]))
            .unwrap_err();
        assert!(err.is(&ZERO_TIMEOUT));

        let err = HalConfig::default()
            .with_overrides(lookup_from(&[(ENV_BENCHMARKS, "maybe")]))
            .unwrap_err();
        assert!(err.is(&INVALID_FLAG));

        let err = HalConfig::default()
            .with_overrides(lookup_from(&[(ENV_TTL, "0")]))
            .unwrap_err();
        assert!(err.is(&ZERO_TTL));
    }

    #[test]
    fn test_round_trips_through_json() {
        let cfg = HalConfig::desktop().with_budget(ResourceCategory::Dma, 4);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: HalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
