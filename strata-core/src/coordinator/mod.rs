//! Arbitration of named scarce resources (GPU banks, DMA channels, timers).
//!
//! One mutex guards the lock table, the waiting map and budget usage, so
//! every grant, release and wait-edge change is a single critical section.
//! Blocked requesters park on a condvar that every release signals.

pub mod deadlock;
pub mod guard;
pub mod lock;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub use deadlock::WaitEdge;
pub use guard::ResourceGuard;
pub use lock::ResourceLock;

use crate::config::HalConfig;
use crate::error::{HalError, HalResult, LOCK_POISONED};

pub const RESOURCE_CONFLICT: HalError = HalError::resource(200, "resource is held in a conflicting mode");
pub const RESOURCE_TIMEOUT: HalError = HalError::resource(201, "timed out waiting for resource");
pub const DEADLOCK_REFUSED: HalError = HalError::resource(202, "waiting would deadlock; request refused");
pub const BUDGET_EXCEEDED: HalError = HalError::resource(203, "resource category budget exhausted");
pub const NOT_HELD: HalError = HalError::resource(204, "resource is not held by this requester");
pub const ALREADY_HELD: HalError = HalError::validation(205, "requester already holds this resource");
pub const EMPTY_ID: HalError = HalError::validation(206, "resource and requester ids must be non-empty");
pub const ALREADY_WAITING: HalError = HalError::validation(207, "requester is already blocked on another resource");
pub const WAIT_OUT_OF_RANGE: HalError = HalError::validation(208, "wait timeout is too large to schedule");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Exclusive,
    Shared,
}

/// How a request behaves when the resource is held in a conflicting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// Fail immediately on conflict.
    NonBlocking,
    /// Wait up to the configured `resource_timeout`.
    Blocking,
    Timeout(Duration),
    /// Non-blocking, and may exceed the category budget.
    Emergency,
}

/// Budget bucket a resource is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceCategory {
    GpuMemory,
    Dma,
    Timer,
    Audio,
    Generic,
}

impl ResourceCategory {
    pub const ALL: [ResourceCategory; 5] = [
        ResourceCategory::GpuMemory,
        ResourceCategory::Dma,
        ResourceCategory::Timer,
        ResourceCategory::Audio,
        ResourceCategory::Generic,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceCategory::GpuMemory => "gpu_memory",
            ResourceCategory::Dma => "dma",
            ResourceCategory::Timer => "timer",
            ResourceCategory::Audio => "audio",
            ResourceCategory::Generic => "generic",
        }
    }

    /// Environment key holding this category's budget.
    pub const fn budget_env_key(self) -> &'static str {
        match self {
            ResourceCategory::GpuMemory => "STRATA_BUDGET_GPU_MEMORY",
            ResourceCategory::Dma => "STRATA_BUDGET_DMA",
            ResourceCategory::Timer => "STRATA_BUDGET_TIMER",
            ResourceCategory::Audio => "STRATA_BUDGET_AUDIO",
            ResourceCategory::Generic => "STRATA_BUDGET_GENERIC",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub resource_id: String,
    pub requester_id: String,
    pub mode: AccessMode,
    pub acquisition: Acquisition,
    pub category: ResourceCategory,
    /// Units charged to `category` when this request creates the lock.
    pub amount: u64,
}

impl ResourceRequest {
    pub fn new(resource_id: impl Into<String>, requester_id: impl Into<String>, mode: AccessMode) -> Self {
        Self {
            resource_id: resource_id.into(),
            requester_id: requester_id.into(),
            mode,
            acquisition: Acquisition::NonBlocking,
            category: ResourceCategory::Generic,
            amount: 0,
        }
    }

    pub fn acquisition(mut self, acquisition: Acquisition) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn charge(mut self, category: ResourceCategory, amount: u64) -> Self {
        self.category = category;
        self.amount = amount;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub grants: u64,
    pub conflicts: u64,
    pub timeouts: u64,
    pub deadlocks_refused: u64,
    pub releases: u64,
}

#[derive(Default)]
struct Counters {
    grants: CachePadded<AtomicU64>,
    conflicts: CachePadded<AtomicU64>,
    timeouts: CachePadded<AtomicU64>,
    deadlocks_refused: CachePadded<AtomicU64>,
    releases: CachePadded<AtomicU64>,
}

#[derive(Default)]
struct State {
    locks: BTreeMap<String, ResourceLock>,
    /// requester -> resource it is blocked on.
    waiting: BTreeMap<String, String>,
    usage: BTreeMap<ResourceCategory, u64>,
}

pub struct ResourceCoordinator {
    state: Mutex<State>,
    released: Condvar,
    budgets: BTreeMap<ResourceCategory, u64>,
    default_timeout: Duration,
    deadlock_detection: bool,
    counters: Counters,
}

impl ResourceCoordinator {
    pub fn new(config: &HalConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            released: Condvar::new(),
            budgets: config.budgets.clone(),
            default_timeout: config.resource_timeout,
            deadlock_detection: config.deadlock_detection,
            counters: Counters::default(),
        }
    }

    /// Requests `resource_id` in `mode`, charged to the generic category.
    pub fn request(
        &self,
        resource_id: &str,
        requester_id: &str,
        mode: AccessMode,
        acquisition: Acquisition,
    ) -> HalResult<()> {
        self.request_with(&ResourceRequest::new(resource_id, requester_id, mode).acquisition(acquisition))
    }

    pub fn request_with(&self, req: &ResourceRequest) -> HalResult<()> {
        if req.resource_id.is_empty() || req.requester_id.is_empty() {
            return Err(EMPTY_ID);
        }

        let wait = match req.acquisition {
            Acquisition::Blocking => Some(self.default_timeout),
            Acquisition::Timeout(t) => Some(t),
            Acquisition::NonBlocking | Acquisition::Emergency => None,
        };
        let deadline = match wait {
            Some(wait) => Some(Instant::now().checked_add(wait).ok_or(WAIT_OUT_OF_RANGE)?),
            None => None,
        };

        let mut state = self.lock_state()?;
        if state.locks.get(&req.resource_id).map_or(false, |l| l.is_owned_by(&req.requester_id)) {
            return Err(ALREADY_HELD);
        }

        let mut parked = false;
        let result = loop {
            match self.try_grant(&mut state, req) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            }

            let Some(deadline) = deadline else {
                self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                break Err(RESOURCE_CONFLICT);
            };

            if !parked {
                if self.deadlock_detection {
                    if let Some(cycle) =
                        deadlock::find_cycle(&req.requester_id, &req.resource_id, &state.locks, &state.waiting)
                    {
                        let path: Vec<String> = cycle.iter().map(|e| e.to_string()).collect();
                        warn!("Refusing {} on {}: wait cycle {}", req.requester_id, req.resource_id, path.join(", "));
                        self.counters.deadlocks_refused.fetch_add(1, Ordering::Relaxed);
                        break Err(DEADLOCK_REFUSED);
                    }
                }
                if state.waiting.contains_key(&req.requester_id) {
                    break Err(ALREADY_WAITING);
                }
                state.waiting.insert(req.requester_id.clone(), req.resource_id.clone());
                parked = true;
                debug!("{} waiting on {}", req.requester_id, req.resource_id);
            }

            let now = Instant::now();
            if now >= deadline {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                break Err(RESOURCE_TIMEOUT);
            }
            state = match self.released.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return Err(LOCK_POISONED),
            };
        };

        if parked {
            state.waiting.remove(&req.requester_id);
        }
        if result.is_ok() {
            self.counters.grants.fetch_add(1, Ordering::Relaxed);
            debug!("{} granted {} ({:?})", req.requester_id, req.resource_id, req.mode);
        }
        result
    }

    /// Like `request_with`, but the grant is released when the guard drops.
    pub fn acquire(&self, req: &ResourceRequest) -> HalResult<ResourceGuard<'_>> {
        self.request_with(req)?;
        Ok(ResourceGuard::new(self, req.resource_id.clone(), req.requester_id.clone()))
    }

    /// Drops `requester_id` from the owners. The last owner deletes the lock
    /// and refunds its budget charge.
    pub fn release(&self, resource_id: &str, requester_id: &str) -> HalResult<()> {
        let mut state = self.lock_state()?;

        let lock = state.locks.get_mut(resource_id).ok_or(NOT_HELD)?;
        if !lock.remove_owner(requester_id) {
            return Err(NOT_HELD);
        }
        if lock.is_empty() {
            let (category, charged) = (lock.category(), lock.charged());
            state.locks.remove(resource_id);
            if let Some(used) = state.usage.get_mut(&category) {
                *used = used.saturating_sub(charged);
            }
        }
        drop(state);

        self.counters.releases.fetch_add(1, Ordering::Relaxed);
        debug!("{} released {}", requester_id, resource_id);
        self.released.notify_all();
        Ok(())
    }

    /// Whether a request in `mode` would be granted right now. Advisory.
    pub fn is_available(&self, resource_id: &str, mode: AccessMode) -> bool {
        match self.state.lock() {
            Ok(state) => state.locks.get(resource_id).map_or(true, |l| l.admits(mode)),
            Err(_) => false,
        }
    }

    pub fn resource_owners(&self, resource_id: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.locks.get(resource_id).map(|l| l.owners().clone()))
            .unwrap_or_default()
    }

    pub fn is_waiting(&self, requester_id: &str) -> bool {
        self.state.lock().map(|s| s.waiting.contains_key(requester_id)).unwrap_or(false)
    }

    pub fn lock_count(&self) -> usize {
        self.state.lock().map(|s| s.locks.len()).unwrap_or(0)
    }

    /// Units currently charged to `category`.
    pub fn usage(&self, category: ResourceCategory) -> u64 {
        self.state.lock().ok().and_then(|s| s.usage.get(&category).copied()).unwrap_or(0)
    }

    pub fn statistics(&self) -> CoordinatorStats {
        let c = &self.counters;
        CoordinatorStats {
            grants: c.grants.load(Ordering::Relaxed),
            conflicts: c.conflicts.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            deadlocks_refused: c.deadlocks_refused.load(Ordering::Relaxed),
            releases: c.releases.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> HalResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| LOCK_POISONED)
    }

    /// `Ok(false)` on a mode conflict, errors on budget refusal.
    fn try_grant(&self, state: &mut State, req: &ResourceRequest) -> HalResult<bool> {
        if let Some(lock) = state.locks.get_mut(&req.resource_id) {
            if !lock.admits(req.mode) {
                return Ok(false);
            }
            lock.add_owner(&req.requester_id);
            return Ok(true);
        }

        let used = state.usage.get(&req.category).copied().unwrap_or(0);
        if let Some(limit) = self.budgets.get(&req.category) {
            if used.saturating_add(req.amount) > *limit {
                if req.acquisition != Acquisition::Emergency {
                    debug!(
                        "{} budget refused {} for {}: {} + {} > {}",
                        req.category, req.resource_id, req.requester_id, used, req.amount, limit
                    );
                    return Err(BUDGET_EXCEEDED);
                }
                warn!("Emergency grant of {} exceeds {} budget", req.resource_id, req.category);
            }
        }

        state.usage.insert(req.category, used.saturating_add(req.amount));
        state.locks.insert(
            req.resource_id.clone(),
            ResourceLock::new(&req.requester_id, req.mode, req.category, req.amount),
        );
        Ok(true)
    }
}
