//! Identifier types shared across the scheduler and the resource ledger.
//!
//! Cross references between tasks, nodes and allocations are always id
//! lookups into the owning map, never shared pointers.

use uuid::Uuid;

/// Task identifier.
pub type TaskId = String;
/// Worker node identifier, as reported by the node registry.
pub type NodeId = String;
/// Allocation record identifier.
pub type AllocationId = String;

/// Generate a fresh task identifier.
#[must_use]
pub fn new_task_id() -> TaskId {
    format!("task_{}", Uuid::new_v4().simple())
}

/// Generate a fresh allocation identifier.
#[must_use]
pub fn new_allocation_id() -> AllocationId {
    format!("alloc_{}", Uuid::new_v4().simple())
}

/// Generate a fresh event identifier.
#[must_use]
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}
