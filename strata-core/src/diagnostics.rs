//! Read-only snapshots for external monitoring.

use std::time::Duration;

use serde::Serialize;

use crate::capability::{CacheStatistics, PerformanceTier};
use crate::coordinator::CoordinatorStats;
use crate::error::HalError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceStatus {
    pub interface: String,
    pub active_driver: Option<String>,
    pub candidates: usize,
    pub failed_candidates: usize,
    /// How long the active driver's `initialize()` took.
    pub init_time: Option<Duration>,
    /// Most recent candidate failure, if any.
    pub last_error: Option<HalError>,
}

impl InterfaceStatus {
    pub fn is_available(&self) -> bool {
        self.active_driver.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Wall time of `Platform::initialize`.
    pub init_time: Duration,
    pub active_count: usize,
    pub failed_count: usize,
    /// Tier of the last detection, if any ran.
    pub performance_tier: Option<PerformanceTier>,
    pub interfaces: Vec<InterfaceStatus>,
    pub capability_cache: CacheStatistics,
    pub resources: CoordinatorStats,
}

impl PerformanceStats {
    /// Interfaces that ended up without a driver.
    pub fn degraded(&self) -> impl Iterator<Item = &str> + '_ {
        self.interfaces.iter().filter(|s| !s.is_available()).map(|s| s.interface.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_lists_interfaces_without_driver() {
        let status = |name: &str, driver: Option<&str>| InterfaceStatus {
            interface: name.to_string(),
            active_driver: driver.map(String::from),
            candidates: 1,
            failed_candidates: usize::from(driver.is_none()),
            init_time: None,
            last_error: None,
        };
        let stats = PerformanceStats {
            init_time: Duration::from_millis(3),
            active_count: 1,
            failed_count: 1,
            performance_tier: Some(PerformanceTier::Standard),
            interfaces: vec![status("Memory", Some("heap")), status("Audio", None)],
            capability_cache: CacheStatistics::default(),
            resources: CoordinatorStats::default(),
        };

        assert_eq!(stats.degraded().collect::<Vec<_>>(), vec!["Audio"]);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["interfaces"][0]["active_driver"], "heap");
        assert_eq!(json["performance_tier"], "Standard");
    }
}
