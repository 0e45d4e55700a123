use std::collections::BTreeSet;

use super::{AccessMode, ResourceCategory};

/// One live lock in the coordinator table.
///
/// Never empty: the coordinator deletes a lock when its last owner leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLock {
    mode: AccessMode,
    owners: BTreeSet<String>,
    category: ResourceCategory,
    /// Budget charged when the lock was created, refunded on deletion.
    charged: u64,
}

impl ResourceLock {
    pub(crate) fn new(owner: &str, mode: AccessMode, category: ResourceCategory, charged: u64) -> Self {
        let mut owners = BTreeSet::new();
        owners.insert(owner.to_string());
        Self { mode, owners, category, charged }
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn owners(&self) -> &BTreeSet<String> {
        &self.owners
    }

    pub fn category(&self) -> ResourceCategory {
        self.category
    }

    pub fn charged(&self) -> u64 {
        self.charged
    }

    pub fn is_owned_by(&self, requester: &str) -> bool {
        self.owners.contains(requester)
    }

    /// Only shared joins shared.
    pub fn admits(&self, mode: AccessMode) -> bool {
        self.mode == AccessMode::Shared && mode == AccessMode::Shared
    }

    pub(crate) fn add_owner(&mut self, requester: &str) {
        debug_assert!(self.admits(AccessMode::Shared));
        self.owners.insert(requester.to_string());
    }

    /// Returns `false` if `requester` was not an owner.
    pub(crate) fn remove_owner(&mut self, requester: &str) -> bool {
        self.owners.remove(requester)
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
