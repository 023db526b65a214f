//! Rebalance planning for fragmented and underutilized nodes.
//!
//! Planners only propose migrations. Moving running work needs executor
//! support for checkpoint/restore, so the ledger records plans and leaves
//! execution to whoever owns that capability.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::ResourceVector;
use crate::util::{AllocationId, NodeId, TaskId};

use super::node_state::{Allocation, NodeResourceState};
use super::strategy::suitability_score;

/// Why a migration was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationReason {
    /// Source node is fragmented.
    Defragmentation,
    /// Source node is underutilized and could be drained.
    Consolidation,
}

/// Proposed move of one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Allocation to move.
    pub allocation_id: AllocationId,
    /// Task holding it.
    pub task_id: TaskId,
    /// Current node.
    pub from_node: NodeId,
    /// Proposed node.
    pub to_node: NodeId,
    /// Trigger.
    pub reason: MigrationReason,
}

/// Read-only view of ledger state handed to planners.
pub struct LedgerView<'a> {
    /// Per-node accounting.
    pub nodes: &'a HashMap<NodeId, NodeResourceState>,
    /// All allocation records.
    pub allocations: &'a HashMap<AllocationId, Allocation>,
    /// Admission buffer ratio.
    pub buffer_ratio: f64,
}

impl LedgerView<'_> {
    /// Active allocations on `node_id`, oldest first.
    #[must_use]
    pub fn active_on(&self, node_id: &str) -> Vec<&Allocation> {
        let mut out: Vec<&Allocation> = self
            .allocations
            .values()
            .filter(|a| a.is_active() && a.node_id == node_id)
            .collect();
        out.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Best other node able to admit `request` on top of `extra`, excluding
    /// `exclude` and nodes rejected by `accept`.
    fn best_target<F>(
        &self,
        request: &ResourceVector,
        exclude: &str,
        extra: &HashMap<NodeId, ResourceVector>,
        accept: F,
    ) -> Option<NodeId>
    where
        F: Fn(&NodeResourceState) -> bool,
    {
        let mut ids: Vec<&NodeId> = self.nodes.keys().filter(|id| id.as_str() != exclude).collect();
        ids.sort();
        let mut best: Option<(&NodeId, f64)> = None;
        for id in ids {
            let node = &self.nodes[id];
            if !accept(node) {
                continue;
            }
            let pending = extra.get(id).copied().unwrap_or_default();
            if !node.can_admit(&request.add(&pending), self.buffer_ratio) {
                continue;
            }
            let score = suitability_score(node, request);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((id, score));
            }
        }
        best.map(|(id, _)| id.clone())
    }
}

/// Pluggable defragmentation/consolidation policy.
pub trait RebalancePlanner: Send + Sync {
    /// Planner name for logs.
    fn name(&self) -> &'static str;
    /// Moves that would relieve a fragmented node.
    fn plan_defragmentation(&self, view: &LedgerView<'_>, node_id: &str) -> Vec<MigrationPlan>;
    /// Moves that would drain an underutilized node.
    fn plan_consolidation(&self, view: &LedgerView<'_>, node_id: &str) -> Vec<MigrationPlan>;
}

/// Planner that never proposes anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlanner;

impl RebalancePlanner for NoopPlanner {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn plan_defragmentation(&self, _view: &LedgerView<'_>, _node_id: &str) -> Vec<MigrationPlan> {
        Vec::new()
    }

    fn plan_consolidation(&self, _view: &LedgerView<'_>, _node_id: &str) -> Vec<MigrationPlan> {
        Vec::new()
    }
}

/// Planner proposing allocation moves between nodes.
///
/// Defragmentation moves the smallest active allocation off a fragmented node.
/// Consolidation proposes moving every allocation off an underutilized node,
/// or nothing if any of them has no home elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct MigrationPlanner;

impl RebalancePlanner for MigrationPlanner {
    fn name(&self) -> &'static str {
        "migration"
    }

    fn plan_defragmentation(&self, view: &LedgerView<'_>, node_id: &str) -> Vec<MigrationPlan> {
        let smallest = view.active_on(node_id).into_iter().min_by(|a, b| {
            let size = |r: &ResourceVector| r.cpu + r.memory + r.gpu;
            size(&a.resources).total_cmp(&size(&b.resources))
        });
        let Some(alloc) = smallest else {
            return Vec::new();
        };
        view.best_target(&alloc.resources, node_id, &HashMap::new(), |n| !n.is_fragmented())
            .map(|to_node| MigrationPlan {
                allocation_id: alloc.id.clone(),
                task_id: alloc.task_id.clone(),
                from_node: node_id.to_string(),
                to_node,
                reason: MigrationReason::Defragmentation,
            })
            .into_iter()
            .collect()
    }

    fn plan_consolidation(&self, view: &LedgerView<'_>, node_id: &str) -> Vec<MigrationPlan> {
        let allocations = view.active_on(node_id);
        let mut extra: HashMap<NodeId, ResourceVector> = HashMap::new();
        let mut plans = Vec::with_capacity(allocations.len());
        for alloc in allocations {
            let Some(to_node) = view.best_target(&alloc.resources, node_id, &extra, |n| {
                !n.is_underutilized()
            }) else {
                return Vec::new();
            };
            let entry = extra.entry(to_node.clone()).or_default();
            *entry = entry.add(&alloc.resources);
            plans.push(MigrationPlan {
                allocation_id: alloc.id.clone(),
                task_id: alloc.task_id.clone(),
                from_node: node_id.to_string(),
                to_node,
                reason: MigrationReason::Consolidation,
            });
        }
        plans
    }
}
