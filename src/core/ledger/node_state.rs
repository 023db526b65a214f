//! Per-node resource accounting and the allocation record.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::{ResourceKind, ResourceVector};
use crate::util::{AllocationId, NodeId, TaskId};

/// Utilization above which a dimension counts toward fragmentation.
const FRAGMENTATION_UTILIZATION: f64 = 0.5;
/// Availability below which a dimension counts toward fragmentation.
const FRAGMENTATION_AVAILABILITY: f64 = 0.3;
/// Fragmentation score above which a node is flagged.
pub const FRAGMENTED_THRESHOLD: f64 = 0.3;
/// Mean utilization below which a node is flagged underutilized.
pub const UNDERUTILIZED_THRESHOLD: f64 = 0.3;

/// Allocation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Resources held.
    Active,
    /// Resources released.
    Completed,
}

/// Append-only record of one reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Record id.
    pub id: AllocationId,
    /// Task holding the reservation.
    pub task_id: TaskId,
    /// Node providing it.
    pub node_id: NodeId,
    /// Reserved amounts.
    pub resources: ResourceVector,
    /// Reservation time.
    pub created_at_ms: u64,
    /// Release time.
    pub released_at_ms: Option<u64>,
    /// Lifecycle state.
    pub status: AllocationStatus,
}

impl Allocation {
    /// Whether resources are still held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }
}

/// One utilization sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    /// Sample time.
    pub timestamp_ms: u64,
    /// Per-type `allocated / total`.
    pub utilization: ResourceVector,
    /// Mean over types with capacity.
    pub mean: f64,
}

/// Execution track record of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePerformance {
    /// Successful attempts.
    pub completed: u64,
    /// Failed attempts.
    pub failed: u64,
    /// Summed execution time of successful attempts.
    pub total_execution_ms: u64,
}

impl NodePerformance {
    /// Share of successful attempts; `1.0` with no history.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            1.0
        } else {
            self.completed as f64 / total as f64
        }
    }

    /// Mean execution time of successful attempts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_execution_ms(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_execution_ms as f64 / self.completed as f64
        }
    }

    /// Multiplier applied to suitability scores, in `[0.5, 1.0]`.
    #[must_use]
    pub fn factor(&self) -> f64 {
        0.5 + 0.5 * self.success_rate()
    }

    /// Score used by the performance strategy: success rate discounted by
    /// mean runtime in minutes.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.success_rate() / (1.0 + self.average_execution_ms() / 60_000.0)
    }
}

/// Resource accounting for one node.
///
/// Invariant: `allocated + available == total` per type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResourceState {
    /// Node.
    pub node_id: NodeId,
    /// Capacity.
    pub total: ResourceVector,
    /// Held by active allocations.
    pub allocated: ResourceVector,
    /// `total - allocated`.
    pub available: ResourceVector,
    /// Buffer headroom (`total * buffer_ratio`).
    pub reserved: ResourceVector,
    /// Bounded utilization history.
    pub utilization_history: VecDeque<UtilizationSample>,
    /// Bounded history of allocation ids made on this node.
    pub allocation_history: VecDeque<AllocationId>,
    /// Active allocation count.
    pub active_allocations: usize,
    /// Execution track record, once any outcome was reported.
    pub performance: Option<NodePerformance>,
}

impl NodeResourceState {
    /// Empty node with the given capacity.
    #[must_use]
    pub fn new(node_id: NodeId, total: ResourceVector, buffer_ratio: f64) -> Self {
        Self {
            node_id,
            total,
            allocated: ResourceVector::default(),
            available: total,
            reserved: total.scale(buffer_ratio),
            utilization_history: VecDeque::new(),
            allocation_history: VecDeque::new(),
            active_allocations: 0,
            performance: None,
        }
    }

    /// `allocated / total` for one type, `0.0` without capacity.
    #[must_use]
    pub fn utilization(&self, kind: ResourceKind) -> f64 {
        let total = self.total.get(kind);
        if total > 0.0 {
            self.allocated.get(kind) / total
        } else {
            0.0
        }
    }

    /// Utilization after adding `request`, `0.0` without capacity.
    #[must_use]
    pub fn utilization_after(&self, kind: ResourceKind, request: &ResourceVector) -> f64 {
        let total = self.total.get(kind);
        if total > 0.0 {
            (self.allocated.get(kind) + request.get(kind)) / total
        } else {
            0.0
        }
    }

    /// Per-type utilization.
    #[must_use]
    pub fn utilization_vector(&self) -> ResourceVector {
        ResourceVector::from_fn(|k| self.utilization(k))
    }

    /// Mean utilization over types with capacity.
    #[must_use]
    pub fn mean_utilization(&self) -> f64 {
        let (sum, n) = ResourceKind::ALL
            .into_iter()
            .filter(|k| self.total.get(*k) > 0.0)
            .fold((0.0, 0_u32), |(sum, n), k| (sum + self.utilization(k), n + 1));
        if n == 0 {
            0.0
        } else {
            sum / f64::from(n)
        }
    }

    /// Average of `utilization - availability` over types that are more than
    /// half used yet still have a sliver (under 30%) left.
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        let mut sum = 0.0;
        let mut counted = 0_u32;
        for kind in ResourceKind::ALL {
            let total = self.total.get(kind);
            if total <= 0.0 {
                continue;
            }
            let util = self.allocated.get(kind) / total;
            let avail = self.available.get(kind) / total;
            if util > FRAGMENTATION_UTILIZATION && avail > 0.0 && avail < FRAGMENTATION_AVAILABILITY {
                sum += util - avail;
                counted += 1;
            }
        }
        if counted == 0 {
            0.0
        } else {
            sum / f64::from(counted)
        }
    }

    /// Fragmentation above the flag threshold.
    #[must_use]
    pub fn is_fragmented(&self) -> bool {
        self.fragmentation() > FRAGMENTED_THRESHOLD
    }

    /// Mean utilization below the flag threshold.
    #[must_use]
    pub fn is_underutilized(&self) -> bool {
        self.mean_utilization() < UNDERUTILIZED_THRESHOLD
    }

    /// Buffer-aware admission: every requested type must satisfy
    /// `available - available * buffer_ratio >= requested`.
    ///
    /// # Errors
    ///
    /// Names the first resource type that falls short.
    pub fn check_admission(&self, request: &ResourceVector, buffer_ratio: f64) -> Result<(), String> {
        for (kind, amount) in request.requested() {
            let available = self.available.get(kind);
            let usable = available - available * buffer_ratio;
            if usable < amount {
                return Err(format!(
                    "{kind}: requested {amount:.2}, usable {usable:.2} of {available:.2} available"
                ));
            }
        }
        Ok(())
    }

    /// Whether [`NodeResourceState::check_admission`] passes.
    #[must_use]
    pub fn can_admit(&self, request: &ResourceVector, buffer_ratio: f64) -> bool {
        self.check_admission(request, buffer_ratio).is_ok()
    }

    /// Request fits while leaving the full buffer headroom untouched.
    #[must_use]
    pub fn fits_outside_buffer(&self, kind: ResourceKind, amount: f64) -> bool {
        self.available.get(kind) - amount >= self.reserved.get(kind)
    }

    /// Move `request` from available to allocated.
    pub(crate) fn apply(&mut self, request: &ResourceVector) {
        for (kind, amount) in request.requested() {
            let allocated = self.allocated.get_mut(kind);
            *allocated += amount;
            let allocated = *allocated;
            *self.available.get_mut(kind) = self.total.get(kind) - allocated;
        }
        self.active_allocations += 1;
    }

    /// Move `request` from allocated back to available.
    pub(crate) fn release(&mut self, request: &ResourceVector) {
        for (kind, amount) in request.requested() {
            let allocated = self.allocated.get_mut(kind);
            *allocated = (*allocated - amount).max(0.0);
            let allocated = *allocated;
            *self.available.get_mut(kind) = self.total.get(kind) - allocated;
        }
        self.active_allocations = self.active_allocations.saturating_sub(1);
    }

    /// Append an allocation id to the bounded history.
    pub(crate) fn push_allocation(&mut self, id: AllocationId, capacity: usize) {
        if self.allocation_history.len() >= capacity {
            self.allocation_history.pop_front();
        }
        self.allocation_history.push_back(id);
    }

    /// Append a utilization sample to the bounded history.
    pub(crate) fn record_sample(&mut self, timestamp_ms: u64, capacity: usize) {
        if self.utilization_history.len() >= capacity {
            self.utilization_history.pop_front();
        }
        self.utilization_history.push_back(UtilizationSample {
            timestamp_ms,
            utilization: self.utilization_vector(),
            mean: self.mean_utilization(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeResourceState {
        NodeResourceState::new(
            "n1".into(),
            ResourceVector {
                cpu: 10.0,
                memory: 100.0,
                ..ResourceVector::default()
            },
            0.1,
        )
    }

    #[test]
    fn admission_keeps_buffer_of_available() {
        let n = node();
        let ok = ResourceVector {
            cpu: 9.0,
            ..ResourceVector::default()
        };
        let too_much = ResourceVector {
            cpu: 9.5,
            ..ResourceVector::default()
        };
        assert!(n.can_admit(&ok, 0.1));
        assert!(!n.can_admit(&too_much, 0.1));
        let reason = n.check_admission(&too_much, 0.1).unwrap_err();
        assert!(reason.starts_with("cpu"));
    }

    #[test]
    fn zero_capacity_type_rejects_positive_request() {
        let n = node();
        let gpu = ResourceVector {
            gpu: 1.0,
            ..ResourceVector::default()
        };
        assert!(!n.can_admit(&gpu, 0.0));
    }

    #[test]
    fn fragmentation_counts_tight_types_only() {
        let mut n = node();
        // cpu 80% used, 20% left: counted as 0.8 - 0.2 = 0.6
        // memory 10% used: not counted
        n.apply(&ResourceVector {
            cpu: 8.0,
            memory: 10.0,
            ..ResourceVector::default()
        });
        assert!((n.fragmentation() - 0.6).abs() < 1e-9);
        assert!(n.is_fragmented());

        // Fully used: availability 0 is not fragmentation
        n.apply(&ResourceVector {
            cpu: 2.0,
            ..ResourceVector::default()
        });
        assert!(n.fragmentation().abs() < 1e-9);
    }

    #[test]
    fn underutilization_uses_types_with_capacity() {
        let mut n = node();
        assert!(n.is_underutilized());
        n.apply(&ResourceVector {
            cpu: 5.0,
            memory: 50.0,
            ..ResourceVector::default()
        });
        assert!((n.mean_utilization() - 0.5).abs() < 1e-9);
        assert!(!n.is_underutilized());
    }

    #[test]
    fn histories_are_bounded() {
        let mut n = node();
        for i in 0..5 {
            n.push_allocation(format!("a{i}"), 3);
            n.record_sample(i, 3);
        }
        assert_eq!(n.allocation_history.len(), 3);
        assert_eq!(n.allocation_history.front().map(String::as_str), Some("a2"));
        assert_eq!(n.utilization_history.len(), 3);
    }

    #[test]
    fn performance_factor_tracks_success_rate() {
        let perf = NodePerformance {
            completed: 3,
            failed: 1,
            total_execution_ms: 3_000,
        };
        assert!((perf.success_rate() - 0.75).abs() < 1e-9);
        assert!((perf.factor() - 0.875).abs() < 1e-9);
        assert!((perf.average_execution_ms() - 1_000.0).abs() < 1e-9);
    }
}
