//! Resource ledger: per-node multi-resource accounting.
//!
//! The ledger owns one [`NodeResourceState`] per node and an append-only
//! record of every [`Allocation`]. All state sits behind a single
//! `parking_lot::Mutex`, so availability read while scoring and written
//! while allocating never interleave.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_compute_coordinator::config::LedgerConfig;
//! use prometheus_compute_coordinator::core::{ResourceLedger, ResourceVector, TracingEventSink};
//!
//! let ledger = ResourceLedger::new(LedgerConfig::default(), Arc::new(TracingEventSink));
//! ledger.register_node("gpu-1", ResourceVector { cpu: 16.0, memory: 64.0, gpu: 24.0, ..Default::default() });
//! let req = ResourceVector { cpu: 2.0, memory: 8.0, ..Default::default() };
//! if ledger.can_allocate("gpu-1", &req) {
//!     let alloc = ledger.allocate("task-1", "gpu-1", &req)?;
//!     ledger.deallocate(&alloc.id)?;
//! }
//! ```

mod node_state;
mod planner;
mod strategy;

pub use node_state::{
    Allocation, AllocationStatus, NodePerformance, NodeResourceState, UtilizationSample,
    FRAGMENTED_THRESHOLD, UNDERUTILIZED_THRESHOLD,
};
pub use planner::{LedgerView, MigrationPlan, MigrationPlanner, MigrationReason, NoopPlanner, RebalancePlanner};
pub use strategy::{strategy_score, suitability_score, TARGET_UTILIZATION};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AllocationStrategy, LedgerConfig};
use crate::core::{
    CoordinatorEvent, EventRecord, EventSink, NodeSnapshot, ResourceKind, ResourceVector,
    SchedulerError,
};
use crate::util::{new_allocation_id, now_ms, AllocationId, NodeId, TaskId, HOUR_MS};

/// Raw resource request waiting for placement by the allocation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Task the reservation is for.
    pub task_id: TaskId,
    /// Amounts to reserve.
    pub resources: ResourceVector,
    /// Node to try before running the strategy.
    #[serde(default)]
    pub preferred_node: Option<NodeId>,
    /// Queueing time.
    #[serde(default)]
    pub requested_at_ms: u64,
}

impl AllocationRequest {
    /// Request without a preferred node, stamped now.
    #[must_use]
    pub fn new(task_id: impl Into<TaskId>, resources: ResourceVector) -> Self {
        Self {
            task_id: task_id.into(),
            resources,
            preferred_node: None,
            requested_at_ms: now_ms(),
        }
    }
}

/// Allocation query filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationFilter {
    /// Node.
    pub node_id: Option<NodeId>,
    /// Task.
    pub task_id: Option<TaskId>,
    /// Status.
    pub status: Option<AllocationStatus>,
}

/// Result of one optimisation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    /// Pass time.
    pub run_at_ms: u64,
    /// Nodes flagged fragmented.
    pub fragmented_nodes: Vec<NodeId>,
    /// Nodes flagged underutilized.
    pub underutilized_nodes: Vec<NodeId>,
    /// Proposed migrations.
    pub plans: Vec<MigrationPlan>,
}

/// Result of one allocation tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationTickReport {
    /// Requests taken off the queue.
    pub processed: usize,
    /// Allocations made.
    pub allocated: Vec<Allocation>,
    /// Requests put back for a later tick.
    pub deferred: usize,
    /// Optimisation pass, when dynamic allocation is enabled.
    pub optimization: Option<OptimizationReport>,
}

/// Per-node summary for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResourceSummary {
    /// Node.
    pub node_id: NodeId,
    /// Capacity.
    pub total: ResourceVector,
    /// Held.
    pub allocated: ResourceVector,
    /// Free.
    pub available: ResourceVector,
    /// Buffer headroom.
    pub reserved: ResourceVector,
    /// Per-type utilization.
    pub utilization: ResourceVector,
    /// Fragmentation score.
    pub fragmentation: f64,
    /// Fragmentation flag.
    pub fragmented: bool,
    /// Underutilization flag.
    pub underutilized: bool,
    /// Active allocation count.
    pub active_allocations: usize,
    /// Execution track record.
    pub performance: Option<NodePerformance>,
}

/// Global ledger status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// Configured strategy.
    pub strategy: AllocationStrategy,
    /// Configured buffer ratio.
    pub buffer_ratio: f64,
    /// Summed capacity.
    pub total: ResourceVector,
    /// Summed holdings.
    pub allocated: ResourceVector,
    /// Summed free capacity.
    pub available: ResourceVector,
    /// Global utilization from the last metrics tick.
    pub utilization: ResourceVector,
    /// Nodes ordered by id.
    pub nodes: Vec<NodeResourceSummary>,
    /// Active allocation count.
    pub active_allocations: usize,
    /// Allocation requests waiting for placement.
    pub pending_requests: usize,
    /// Last optimisation pass.
    pub last_optimization: Option<OptimizationReport>,
}

/// Global per-type pools mirroring the per-node counters.
#[derive(Debug, Default)]
struct GlobalPools {
    total: ResourceVector,
    allocated: ResourceVector,
    available: ResourceVector,
}

#[derive(Default)]
struct LedgerState {
    nodes: HashMap<NodeId, NodeResourceState>,
    allocations: HashMap<AllocationId, Allocation>,
    active_by_task: HashMap<TaskId, AllocationId>,
    pending: VecDeque<AllocationRequest>,
    global: GlobalPools,
    utilization: ResourceVector,
    last_optimization: Option<OptimizationReport>,
}

impl LedgerState {
    fn allocate(
        &mut self,
        config: &LedgerConfig,
        task_id: &str,
        node_id: &str,
        request: &ResourceVector,
    ) -> Result<Allocation, SchedulerError> {
        if let Some(existing) = self.active_by_task.get(task_id) {
            return Err(SchedulerError::Allocation {
                node: node_id.to_string(),
                reason: format!("task {task_id} already holds allocation {existing}"),
            });
        }
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        node.check_admission(request, config.resource_buffer_ratio)
            .map_err(|reason| SchedulerError::Allocation {
                node: node_id.to_string(),
                reason,
            })?;

        let allocation = Allocation {
            id: new_allocation_id(),
            task_id: task_id.to_string(),
            node_id: node_id.to_string(),
            resources: *request,
            created_at_ms: now_ms(),
            released_at_ms: None,
            status: AllocationStatus::Active,
        };
        node.apply(request);
        node.push_allocation(allocation.id.clone(), config.history_capacity);

        for (kind, amount) in request.requested() {
            *self.global.allocated.get_mut(kind) += amount;
            *self.global.available.get_mut(kind) -= amount;
        }
        self.active_by_task
            .insert(task_id.to_string(), allocation.id.clone());
        self.allocations
            .insert(allocation.id.clone(), allocation.clone());
        Ok(allocation)
    }

    fn deallocate(&mut self, allocation_id: &str) -> Result<Allocation, SchedulerError> {
        let allocation = self
            .allocations
            .get_mut(allocation_id)
            .ok_or_else(|| SchedulerError::AllocationNotFound(allocation_id.to_string()))?;
        if !allocation.is_active() {
            return Err(SchedulerError::AllocationAlreadyReleased(
                allocation_id.to_string(),
            ));
        }
        allocation.status = AllocationStatus::Completed;
        allocation.released_at_ms = Some(now_ms());
        let allocation = allocation.clone();

        if let Some(node) = self.nodes.get_mut(&allocation.node_id) {
            node.release(&allocation.resources);
        }
        for (kind, amount) in allocation.resources.requested() {
            let allocated = self.global.allocated.get_mut(kind);
            *allocated = (*allocated - amount).max(0.0);
            *self.global.available.get_mut(kind) += amount;
        }
        if self.active_by_task.get(&allocation.task_id).map(String::as_str) == Some(allocation_id) {
            self.active_by_task.remove(&allocation.task_id);
        }
        Ok(allocation)
    }

    /// Candidate ids in a stable order.
    fn sorted_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn select_node(
        &self,
        config: &LedgerConfig,
        strategy: AllocationStrategy,
        request: &ResourceVector,
    ) -> Option<NodeId> {
        let mut best: Option<(NodeId, f64, f64)> = None;
        for id in self.sorted_node_ids() {
            let node = &self.nodes[&id];
            if !node.can_admit(request, config.resource_buffer_ratio) {
                continue;
            }
            let primary = strategy_score(strategy, node, request);
            let tie_break = suitability_score(node, request);
            let better = best.as_ref().is_none_or(|(_, p, t)| {
                primary > *p || ((primary - *p).abs() < f64::EPSILON && tie_break > *t)
            });
            if better {
                best = Some((id, primary, tie_break));
            }
        }
        best.map(|(id, _, _)| id)
    }
}

/// Multi-resource accounting for every node known to the coordinator.
pub struct ResourceLedger {
    config: LedgerConfig,
    state: Mutex<LedgerState>,
    planner: Box<dyn RebalancePlanner>,
    events: Arc<dyn EventSink>,
}

impl ResourceLedger {
    /// Ledger with the advisory [`MigrationPlanner`].
    #[must_use]
    pub fn new(config: LedgerConfig, events: Arc<dyn EventSink>) -> Self {
        Self::with_planner(config, events, Box::new(MigrationPlanner))
    }

    /// Ledger with a custom rebalance planner.
    #[must_use]
    pub fn with_planner(
        config: LedgerConfig,
        events: Arc<dyn EventSink>,
        planner: Box<dyn RebalancePlanner>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(LedgerState::default()),
            planner,
            events,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Start tracking a node. Returns `false` if it was already tracked, in
    /// which case its counters are left untouched.
    pub fn register_node(&self, node_id: impl Into<NodeId>, total: ResourceVector) -> bool {
        let node_id = node_id.into();
        let mut state = self.state.lock();
        if state.nodes.contains_key(&node_id) {
            return false;
        }
        state.global.total = state.global.total.add(&total);
        state.global.available = state.global.available.add(&total);
        let node = NodeResourceState::new(node_id.clone(), total, self.config.resource_buffer_ratio);
        state.nodes.insert(node_id.clone(), node);
        info!(node_id = %node_id, cpu = total.cpu, memory = total.memory, gpu = total.gpu, "node registered in ledger");
        true
    }

    /// Register a registry snapshot's node if it is not tracked yet.
    pub fn sync_node(&self, node: &NodeSnapshot) -> bool {
        if self.state.lock().nodes.contains_key(&node.id) {
            return false;
        }
        self.register_node(node.id.clone(), node.specs.total_resources())
    }

    /// Stop tracking a node.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NodeNotFound`] for unknown nodes and
    /// [`SchedulerError::NodeBusy`] while allocations are active.
    pub fn remove_node(&self, node_id: &str) -> Result<NodeResourceState, SchedulerError> {
        let mut state = self.state.lock();
        let node = state
            .nodes
            .get(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        if node.active_allocations > 0 {
            return Err(SchedulerError::NodeBusy(node_id.to_string()));
        }
        let node = state
            .nodes
            .remove(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        state.global.total = state.global.total.saturating_sub(&node.total);
        state.global.available = state.global.available.saturating_sub(&node.available);
        info!(node_id, "node removed from ledger");
        Ok(node)
    }

    /// Whether `node_id` admits `request` with the buffer kept free.
    #[must_use]
    pub fn can_allocate(&self, node_id: &str, request: &ResourceVector) -> bool {
        self.state
            .lock()
            .nodes
            .get(node_id)
            .is_some_and(|n| n.can_admit(request, self.config.resource_buffer_ratio))
    }

    /// Suitability of `node_id` for `request`, `None` for unknown nodes.
    #[must_use]
    pub fn suitability(&self, node_id: &str, request: &ResourceVector) -> Option<f64> {
        self.state
            .lock()
            .nodes
            .get(node_id)
            .map(|n| suitability_score(n, request))
    }

    /// Pick a node for `request` with `strategy` (configured strategy when
    /// `None`). Only nodes passing admission are considered; strategy ties
    /// fall back to suitability.
    #[must_use]
    pub fn select_node(&self, request: &ResourceVector, strategy: Option<AllocationStrategy>) -> Option<NodeId> {
        let strategy = strategy.unwrap_or(self.config.allocation_strategy);
        self.state.lock().select_node(&self.config, strategy, request)
    }

    /// Reserve `request` on `node_id` for `task_id`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Allocation`] when admission fails or the task
    /// already holds an allocation, [`SchedulerError::NodeNotFound`] for
    /// unknown nodes.
    pub fn allocate(&self, task_id: &str, node_id: &str, request: &ResourceVector) -> Result<Allocation, SchedulerError> {
        let allocation = self
            .state
            .lock()
            .allocate(&self.config, task_id, node_id, request)?;
        debug!(
            allocation_id = %allocation.id,
            task_id,
            node_id,
            cpu = request.cpu,
            memory = request.memory,
            gpu = request.gpu,
            "resources allocated"
        );
        self.events.emit(EventRecord::new(CoordinatorEvent::ResourcesAllocated {
            allocation_id: allocation.id.clone(),
            task_id: allocation.task_id.clone(),
            node_id: allocation.node_id.clone(),
        }));
        Ok(allocation)
    }

    /// Release an allocation.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::AllocationNotFound`] for unknown ids and
    /// [`SchedulerError::AllocationAlreadyReleased`] on a repeated call; a
    /// repeat never credits capacity twice.
    pub fn deallocate(&self, allocation_id: &str) -> Result<Allocation, SchedulerError> {
        let allocation = self.state.lock().deallocate(allocation_id)?;
        debug!(allocation_id, task_id = %allocation.task_id, node_id = %allocation.node_id, "resources deallocated");
        self.events.emit(EventRecord::new(CoordinatorEvent::ResourcesDeallocated {
            allocation_id: allocation.id.clone(),
            task_id: allocation.task_id.clone(),
            node_id: allocation.node_id.clone(),
        }));
        Ok(allocation)
    }

    /// Release whatever `task_id` currently holds; `None` if nothing.
    pub fn release_task(&self, task_id: &str) -> Option<Allocation> {
        let allocation_id = self.state.lock().active_by_task.get(task_id).cloned()?;
        match self.deallocate(&allocation_id) {
            Ok(allocation) => Some(allocation),
            Err(e) => {
                warn!(task_id, error = %e, "failed to release task allocation");
                None
            }
        }
    }

    /// Active allocation of `task_id`.
    #[must_use]
    pub fn active_allocation(&self, task_id: &str) -> Option<Allocation> {
        let state = self.state.lock();
        state
            .active_by_task
            .get(task_id)
            .and_then(|id| state.allocations.get(id))
            .cloned()
    }

    /// Feed an execution outcome into the node's performance record.
    pub fn record_task_outcome(&self, node_id: &str, success: bool, execution_time_ms: u64) {
        let mut state = self.state.lock();
        let Some(node) = state.nodes.get_mut(node_id) else {
            return;
        };
        let perf = node.performance.get_or_insert_with(NodePerformance::default);
        if success {
            perf.completed += 1;
            perf.total_execution_ms = perf.total_execution_ms.saturating_add(execution_time_ms);
        } else {
            perf.failed += 1;
        }
    }

    /// Fragmentation score of a node.
    #[must_use]
    pub fn fragmentation(&self, node_id: &str) -> Option<f64> {
        self.state.lock().nodes.get(node_id).map(NodeResourceState::fragmentation)
    }

    /// Whether a node is flagged fragmented.
    #[must_use]
    pub fn is_fragmented(&self, node_id: &str) -> bool {
        self.state
            .lock()
            .nodes
            .get(node_id)
            .is_some_and(NodeResourceState::is_fragmented)
    }

    /// Whether a node is flagged underutilized.
    #[must_use]
    pub fn is_underutilized(&self, node_id: &str) -> bool {
        self.state
            .lock()
            .nodes
            .get(node_id)
            .is_some_and(NodeResourceState::is_underutilized)
    }

    /// Copy of one node's accounting.
    #[must_use]
    pub fn node_state(&self, node_id: &str) -> Option<NodeResourceState> {
        self.state.lock().nodes.get(node_id).cloned()
    }

    /// Queue a raw request for the next allocation tick.
    pub fn request_allocation(&self, request: AllocationRequest) {
        debug!(task_id = %request.task_id, "allocation request queued");
        self.state.lock().pending.push_back(request);
    }

    /// Drain up to `max_requests_per_tick` queued requests, then run the
    /// optimisation pass when dynamic allocation is enabled.
    pub fn allocation_tick(&self) -> AllocationTickReport {
        let mut report = AllocationTickReport::default();
        let mut made = Vec::new();
        {
            let mut state = self.state.lock();
            let mut deferred = Vec::new();
            while report.processed < self.config.max_requests_per_tick {
                let Some(request) = state.pending.pop_front() else {
                    break;
                };
                report.processed += 1;

                let node_id = request
                    .preferred_node
                    .clone()
                    .filter(|id| {
                        state
                            .nodes
                            .get(id)
                            .is_some_and(|n| n.can_admit(&request.resources, self.config.resource_buffer_ratio))
                    })
                    .or_else(|| {
                        state.select_node(&self.config, self.config.allocation_strategy, &request.resources)
                    });

                let placed = node_id.and_then(|node_id| {
                    match state.allocate(&self.config, &request.task_id, &node_id, &request.resources) {
                        Ok(allocation) => Some(allocation),
                        Err(e) => {
                            debug!(task_id = %request.task_id, error = %e, "allocation request deferred");
                            None
                        }
                    }
                });
                match placed {
                    Some(allocation) => made.push(allocation),
                    None => deferred.push(request),
                }
            }
            report.deferred = deferred.len();
            state.pending.extend(deferred);
        }

        for allocation in &made {
            self.events.emit(EventRecord::new(CoordinatorEvent::ResourcesAllocated {
                allocation_id: allocation.id.clone(),
                task_id: allocation.task_id.clone(),
                node_id: allocation.node_id.clone(),
            }));
        }
        report.allocated = made;

        if self.config.enable_dynamic_allocation {
            report.optimization = Some(self.optimize());
        }
        if report.processed > 0 {
            info!(
                processed = report.processed,
                allocated = report.allocated.len(),
                deferred = report.deferred,
                "allocation tick complete"
            );
        }
        report
    }

    /// Run defragmentation over fragmented nodes and consolidation over
    /// underutilized nodes that hold work.
    pub fn optimize(&self) -> OptimizationReport {
        let mut state = self.state.lock();
        let mut report = OptimizationReport {
            run_at_ms: now_ms(),
            ..OptimizationReport::default()
        };
        let ids = state.sorted_node_ids();
        {
            let view = LedgerView {
                nodes: &state.nodes,
                allocations: &state.allocations,
                buffer_ratio: self.config.resource_buffer_ratio,
            };
            for id in &ids {
                let node = &view.nodes[id];
                if node.is_fragmented() {
                    report.fragmented_nodes.push(id.clone());
                    report.plans.extend(self.planner.plan_defragmentation(&view, id));
                } else if node.is_underutilized() && node.active_allocations > 0 {
                    report.underutilized_nodes.push(id.clone());
                    report.plans.extend(self.planner.plan_consolidation(&view, id));
                }
            }
        }
        if !report.plans.is_empty() {
            info!(
                planner = self.planner.name(),
                fragmented = report.fragmented_nodes.len(),
                underutilized = report.underutilized_nodes.len(),
                plans = report.plans.len(),
                "rebalance plans proposed"
            );
        }
        state.last_optimization = Some(report.clone());
        report
    }

    /// Recompute global utilization and append a sample to every node's
    /// history.
    pub fn metrics_tick(&self) -> ResourceVector {
        let now = now_ms();
        let mut state = self.state.lock();
        let capacity = self.config.history_capacity;
        for node in state.nodes.values_mut() {
            node.record_sample(now, capacity);
        }
        let utilization = ResourceVector::from_fn(|k| {
            let total = state.global.total.get(k);
            if total > 0.0 {
                state.global.allocated.get(k) / total
            } else {
                0.0
            }
        });
        state.utilization = utilization;
        debug!(
            cpu = utilization.cpu,
            memory = utilization.memory,
            gpu = utilization.gpu,
            nodes = state.nodes.len(),
            "ledger metrics updated"
        );
        utilization
    }

    /// Global and per-node status.
    #[must_use]
    pub fn resource_status(&self) -> ResourceStatus {
        let state = self.state.lock();
        let nodes = state
            .sorted_node_ids()
            .into_iter()
            .map(|id| {
                let n = &state.nodes[&id];
                NodeResourceSummary {
                    node_id: id.clone(),
                    total: n.total,
                    allocated: n.allocated,
                    available: n.available,
                    reserved: n.reserved,
                    utilization: n.utilization_vector(),
                    fragmentation: n.fragmentation(),
                    fragmented: n.is_fragmented(),
                    underutilized: n.is_underutilized(),
                    active_allocations: n.active_allocations,
                    performance: n.performance,
                }
            })
            .collect();
        ResourceStatus {
            strategy: self.config.allocation_strategy,
            buffer_ratio: self.config.resource_buffer_ratio,
            total: state.global.total,
            allocated: state.global.allocated,
            available: state.global.available,
            utilization: state.utilization,
            nodes,
            active_allocations: state.active_by_task.len(),
            pending_requests: state.pending.len(),
            last_optimization: state.last_optimization.clone(),
        }
    }

    /// Allocation records matching `filter`, oldest first.
    #[must_use]
    pub fn allocations(&self, filter: &AllocationFilter) -> Vec<Allocation> {
        let state = self.state.lock();
        let mut out: Vec<Allocation> = state
            .allocations
            .values()
            .filter(|a| filter.node_id.as_ref().is_none_or(|n| *n == a.node_id))
            .filter(|a| filter.task_id.as_ref().is_none_or(|t| *t == a.task_id))
            .filter(|a| filter.status.is_none_or(|s| s == a.status))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Utilization samples of a node from the last `hours` hours.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NodeNotFound`] for unknown nodes.
    pub fn resource_history(&self, node_id: &str, hours: u64) -> Result<Vec<UtilizationSample>, SchedulerError> {
        let since = now_ms().saturating_sub(hours.saturating_mul(HOUR_MS));
        let state = self.state.lock();
        let node = state
            .nodes
            .get(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        Ok(node
            .utilization_history
            .iter()
            .filter(|s| s.timestamp_ms >= since)
            .cloned()
            .collect())
    }

    /// Per-type `allocated + available` drift from `total` for a node;
    /// all zeros while the ledger invariant holds.
    #[must_use]
    pub fn accounting_drift(&self, node_id: &str) -> Option<ResourceVector> {
        self.state.lock().nodes.get(node_id).map(|n| {
            ResourceVector::from_fn(|k: ResourceKind| {
                (n.allocated.get(k) + n.available.get(k) - n.total.get(k)).abs()
            })
        })
    }

    /// Run the allocation tick on its interval until `shutdown` fires.
    pub async fn run_allocation_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.allocation_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.config.allocation_interval_ms, "allocation loop started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.allocation_tick();
                }
            }
        }
        info!("allocation loop stopped");
    }

    /// Run the metrics tick on its interval until `shutdown` fires.
    pub async fn run_metrics_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.metrics_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.config.metrics_interval_ms, "metrics loop started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.metrics_tick();
                }
            }
        }
        info!("metrics loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InMemoryEventSink;

    fn ledger() -> (ResourceLedger, Arc<InMemoryEventSink>) {
        let sink = Arc::new(InMemoryEventSink::new(100));
        let ledger = ResourceLedger::new(LedgerConfig::default(), sink.clone());
        (ledger, sink)
    }

    fn cpu_mem(cpu: f64, memory: f64) -> ResourceVector {
        ResourceVector {
            cpu,
            memory,
            ..ResourceVector::default()
        }
    }

    #[test]
    fn register_is_idempotent() {
        let (ledger, _) = ledger();
        assert!(ledger.register_node("n1", cpu_mem(8.0, 32.0)));
        assert!(!ledger.register_node("n1", cpu_mem(64.0, 64.0)));
        assert_eq!(ledger.resource_status().total.cpu, 8.0);
    }

    #[test]
    fn allocate_updates_node_and_global_pools() {
        let (ledger, sink) = ledger();
        ledger.register_node("n1", cpu_mem(8.0, 32.0));
        ledger.register_node("n2", cpu_mem(8.0, 32.0));

        let alloc = ledger.allocate("t1", "n1", &cpu_mem(2.0, 8.0)).unwrap();
        let status = ledger.resource_status();
        assert_eq!(status.allocated.cpu, 2.0);
        assert_eq!(status.available.cpu, 14.0);
        assert_eq!(status.active_allocations, 1);

        let node = ledger.node_state("n1").unwrap();
        assert_eq!(node.available.memory, 24.0);
        assert_eq!(node.allocation_history.back(), Some(&alloc.id));
        assert_eq!(sink.names_for("t1"), vec!["resources_allocated"]);
    }

    #[test]
    fn task_holds_one_allocation_at_a_time() {
        let (ledger, _) = ledger();
        ledger.register_node("n1", cpu_mem(8.0, 32.0));
        ledger.allocate("t1", "n1", &cpu_mem(1.0, 1.0)).unwrap();
        assert!(matches!(
            ledger.allocate("t1", "n1", &cpu_mem(1.0, 1.0)),
            Err(SchedulerError::Allocation { .. })
        ));
        assert!(ledger.release_task("t1").is_some());
        assert!(ledger.release_task("t1").is_none());
        assert!(ledger.allocate("t1", "n1", &cpu_mem(1.0, 1.0)).is_ok());
    }

    #[test]
    fn remove_node_refuses_while_busy() {
        let (ledger, _) = ledger();
        ledger.register_node("n1", cpu_mem(8.0, 32.0));
        let alloc = ledger.allocate("t1", "n1", &cpu_mem(1.0, 1.0)).unwrap();
        assert!(matches!(ledger.remove_node("n1"), Err(SchedulerError::NodeBusy(_))));
        ledger.deallocate(&alloc.id).unwrap();
        assert!(ledger.remove_node("n1").is_ok());
        assert_eq!(ledger.resource_status().total.cpu, 0.0);
    }

    #[test]
    fn allocation_tick_places_and_defers() {
        let (ledger, _) = ledger();
        ledger.register_node("n1", cpu_mem(4.0, 16.0));
        ledger.request_allocation(AllocationRequest::new("fits", cpu_mem(2.0, 4.0)));
        ledger.request_allocation(AllocationRequest::new("too-big", cpu_mem(64.0, 4.0)));

        let report = ledger.allocation_tick();
        assert_eq!(report.processed, 2);
        assert_eq!(report.allocated.len(), 1);
        assert_eq!(report.allocated[0].task_id, "fits");
        assert_eq!(report.deferred, 1);
        assert_eq!(ledger.resource_status().pending_requests, 1);
        assert!(report.optimization.is_some());
    }

    #[test]
    fn allocation_tick_drains_at_most_configured_requests() {
        let (ledger, _) = ledger();
        ledger.register_node("n1", cpu_mem(1000.0, 1000.0));
        for i in 0..15 {
            ledger.request_allocation(AllocationRequest::new(format!("t{i}"), cpu_mem(1.0, 1.0)));
        }
        assert_eq!(ledger.allocation_tick().processed, 10);
        assert_eq!(ledger.allocation_tick().processed, 5);
    }

    #[test]
    fn metrics_tick_records_history() {
        let (ledger, _) = ledger();
        ledger.register_node("n1", cpu_mem(10.0, 10.0));
        ledger.allocate("t1", "n1", &cpu_mem(5.0, 2.0)).unwrap();
        let util = ledger.metrics_tick();
        assert!((util.cpu - 0.5).abs() < 1e-9);
        let history = ledger.resource_history("n1", 1).unwrap();
        assert_eq!(history.len(), 1);
        assert!((history[0].utilization.memory - 0.2).abs() < 1e-9);
        assert!(ledger.resource_history("missing", 1).is_err());
    }
}
