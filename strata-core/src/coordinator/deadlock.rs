//! Wait-for graph cycle detection.
//!
//! The graph is never stored. Edges are derived on demand from the lock table
//! (who holds what) and the waiting map (who is blocked on what), both read
//! under the coordinator mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::lock::ResourceLock;

/// `waiter` is blocked on `resource_id`, which `holder` owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitEdge {
    pub waiter: String,
    pub holder: String,
    pub resource_id: String,
}

impl fmt::Display for WaitEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.waiter, self.resource_id, self.holder)
    }
}

/// Returns the cycle that `requester` waiting on `resource_id` would close,
/// starting with the requester's own edge.
pub fn find_cycle(
    requester: &str,
    resource_id: &str,
    locks: &BTreeMap<String, ResourceLock>,
    waiting: &BTreeMap<String, String>,
) -> Option<Vec<WaitEdge>> {
    let lock = locks.get(resource_id)?;
    let mut visited = BTreeSet::new();
    let mut path = Vec::new();

    for holder in lock.owners().iter().filter(|h| h.as_str() != requester) {
        path.push(edge(requester, holder, resource_id));
        if visit(holder, requester, locks, waiting, &mut visited, &mut path) {
            return Some(path);
        }
        path.pop();
    }
    None
}

fn visit<'a>(
    node: &'a str,
    target: &str,
    locks: &'a BTreeMap<String, ResourceLock>,
    waiting: &'a BTreeMap<String, String>,
    visited: &mut BTreeSet<&'a str>,
    path: &mut Vec<WaitEdge>,
) -> bool {
    if node == target {
        return true;
    }
    if !visited.insert(node) {
        return false;
    }
    let Some(resource) = waiting.get(node) else {
        return false;
    };
    let Some(lock) = locks.get(resource) else {
        return false;
    };

    for holder in lock.owners().iter().filter(|h| h.as_str() != node) {
        path.push(edge(node, holder, resource));
        if visit(holder, target, locks, waiting, visited, path) {
            return true;
        }
        path.pop();
    }
    false
}

fn edge(waiter: &str, holder: &str, resource_id: &str) -> WaitEdge {
    WaitEdge { waiter: waiter.to_string(), holder: holder.to_string(), resource_id: resource_id.to_string() }
}
