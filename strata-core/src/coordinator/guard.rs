use std::fmt;

use log::warn;

use super::ResourceCoordinator;
use crate::error::HalResult;

/// Scoped ownership of one resource. Releases on drop.
///
/// Returned by `ResourceCoordinator::acquire`. Use `release()` when the
/// caller needs to see a release failure; drop only logs it.
#[must_use = "dropping the guard releases the resource immediately"]
pub struct ResourceGuard<'a> {
    coordinator: &'a ResourceCoordinator,
    resource_id: String,
    requester_id: String,
    held: bool,
}

impl<'a> ResourceGuard<'a> {
    pub(super) fn new(coordinator: &'a ResourceCoordinator, resource_id: String, requester_id: String) -> Self {
        Self { coordinator, resource_id, requester_id, held: true }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }

    pub fn release(mut self) -> HalResult<()> {
        self.held = false;
        self.coordinator.release(&self.resource_id, &self.requester_id)
    }
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = self.coordinator.release(&self.resource_id, &self.requester_id) {
            warn!("{} could not release {} on drop: {}", self.requester_id, self.resource_id, e);
        }
    }
}

impl fmt::Debug for ResourceGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource_id", &self.resource_id)
            .field("requester_id", &self.requester_id)
            .field("held", &self.held)
            .finish()
    }
}
