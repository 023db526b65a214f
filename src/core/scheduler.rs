//! Task scheduler: priority queue, node matching and the task lifecycle.
//!
//! The scheduler is the single authority over task state. Task records live
//! in an arena keyed by id behind one `parking_lot::Mutex`; the ledger is only
//! ever locked while that mutex is held, never the other way round, and
//! neither lock is held across an `.await`.
//!
//! Every dispatched attempt runs on its own tokio task and carries a
//! [`CancellationToken`]. Timeouts, cancellation and shutdown fire the token;
//! a result arriving for an attempt that is no longer current is dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::{
    Allocation, CoordinatorEvent, EventRecord, EventSink, ExecutionError, ExecutionOutcome,
    ExecutionRequest, ExecutorRegistry, FailureReason, NodeRegistry, NodeSnapshot, Priority,
    QueueEntry, ResourceLedger, ResourceUsage, SchedulerError, Task, TaskFailure, TaskQueue,
    TaskSpec, TaskStatus, TaskType, ValidationError,
};
use crate::infra::InMemoryQueue;
use crate::util::{new_task_id, now_ms, AllocationId, NodeId, TaskId};

/// Task query filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Lifecycle state.
    pub status: Option<TaskStatus>,
    /// Task kind.
    pub task_type: Option<TaskType>,
    /// Assigned node.
    pub node_id: Option<NodeId>,
    /// Inclusive priority floor.
    pub min_priority: Option<Priority>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| s == task.status)
            && self.task_type.is_none_or(|t| t == task.task_type)
            && self
                .node_id
                .as_ref()
                .is_none_or(|n| task.assigned_node.as_ref() == Some(n))
            && self.min_priority.is_none_or(|p| task.priority >= p)
    }
}

/// Counters reported by [`Scheduler::get_system_stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    /// Tasks ever accepted.
    pub total_tasks: usize,
    /// Tasks per lifecycle state.
    pub by_status: HashMap<TaskStatus, usize>,
    /// Current queue depth.
    pub queue_length: usize,
    /// Attempts assigned or running.
    pub active_attempts: usize,
    /// Concurrency cap.
    pub max_concurrent_tasks: usize,
    /// Successful completions.
    pub completed: u64,
    /// Terminal failures, cascades included.
    pub failed: u64,
    /// Cancellations.
    pub cancelled: u64,
    /// Retries issued.
    pub retries: u64,
    /// Attempts failed by the timeout check.
    pub timeouts: u64,
    /// Mean executor-reported time of successful tasks.
    pub average_execution_ms: f64,
    /// Summed executor-reported cost.
    pub total_cost: f64,
}

/// One assignment made by a scheduling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Task.
    pub task_id: TaskId,
    /// Node.
    pub node_id: NodeId,
    /// Compatibility score of the chosen node.
    pub score: f64,
    /// Ledger reservation backing the assignment.
    pub allocation_id: AllocationId,
}

/// Result of one scheduling tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Pending tasks moved into the queue.
    pub promoted: usize,
    /// Nodes that were candidates this tick.
    pub available_nodes: usize,
    /// Assignments made.
    pub assigned: Vec<Assignment>,
    /// Queue depth after the tick.
    pub still_queued: usize,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    cancelled: u64,
    retries: u64,
    timeouts: u64,
    total_execution_ms: u64,
    total_cost: f64,
}

/// Bookkeeping for the current attempt of an assigned or running task.
#[derive(Debug)]
struct Attempt {
    number: u32,
    node_id: NodeId,
    token: CancellationToken,
    load_acquired: bool,
}

/// Work handed from a tick to the dispatcher once locks are released.
struct Dispatch {
    request: ExecutionRequest,
    token: CancellationToken,
}

/// Side effects collected under the lock and applied after it is dropped.
#[derive(Default)]
struct Effects {
    events: Vec<CoordinatorEvent>,
    decrements: Vec<NodeId>,
}

struct SchedulerState {
    tasks: HashMap<TaskId, Task>,
    queue: Box<dyn TaskQueue>,
    attempts: HashMap<TaskId, Attempt>,
    counters: Counters,
    seq: u64,
}

impl SchedulerState {
    fn is_current(&self, task_id: &str, attempt: u32) -> bool {
        self.attempts.get(task_id).is_some_and(|a| a.number == attempt)
    }

    fn enqueue(&mut self, task_id: &str) -> Result<(), SchedulerError> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
        self.seq += 1;
        self.queue.enqueue(QueueEntry {
            task_id: task.id.clone(),
            priority: task.priority,
            created_at_ms: task.created_at_ms,
            seq: self.seq,
        })
    }

    /// Move a pending task into the queue. Returns `false` and leaves it
    /// pending when the queue is full.
    fn promote(&mut self, task_id: &str, fx: &mut Effects) -> bool {
        if let Err(e) = self.enqueue(task_id) {
            debug!(task_id, error = %e, "task left pending");
            return false;
        }
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.status = TaskStatus::Queued;
            fx.events.push(CoordinatorEvent::TaskQueued {
                task_id: task.id.clone(),
                priority: task.priority,
            });
        }
        true
    }
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    tick_guard: tokio::sync::Mutex<()>,
    registry: Arc<dyn NodeRegistry>,
    executors: ExecutorRegistry,
    ledger: Arc<ResourceLedger>,
    events: Arc<dyn EventSink>,
    root_token: CancellationToken,
}

/// Cheaply cloneable handle to the scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Scheduler over an in-memory queue sized by `max_queue_depth`.
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<dyn NodeRegistry>,
        executors: ExecutorRegistry,
        ledger: Arc<ResourceLedger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let queue = Box::new(InMemoryQueue::new(config.max_queue_depth));
        Self::with_queue(config, registry, executors, ledger, events, queue)
    }

    /// Scheduler over a custom queue backend.
    #[must_use]
    pub fn with_queue(
        config: SchedulerConfig,
        registry: Arc<dyn NodeRegistry>,
        executors: ExecutorRegistry,
        ledger: Arc<ResourceLedger>,
        events: Arc<dyn EventSink>,
        queue: Box<dyn TaskQueue>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SchedulerState {
                    tasks: HashMap::new(),
                    queue,
                    attempts: HashMap::new(),
                    counters: Counters::default(),
                    seq: 0,
                }),
                tick_guard: tokio::sync::Mutex::new(()),
                registry,
                executors,
                ledger,
                events,
                root_token: CancellationToken::new(),
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Ledger this scheduler reserves resources in.
    #[must_use]
    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.inner.ledger
    }

    /// Validate and store a task.
    ///
    /// The task is queued right away when it has no unfinished dependencies,
    /// parked in `waiting_dependencies` otherwise, and failed on the spot if
    /// a dependency already failed or was cancelled.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Validation`] for malformed submissions, unknown or
    /// cyclic dependencies and duplicate ids; [`SchedulerError::QueueFull`]
    /// when the task would be queued and the queue is at capacity. Rejected
    /// tasks are never stored.
    pub fn submit_task(&self, spec: TaskSpec) -> Result<TaskId, SchedulerError> {
        let priority = spec.validate()?;
        if !self.inner.executors.supports(spec.task_type) {
            return Err(ValidationError::NoExecutor(spec.task_type.to_string()).into());
        }
        let id = spec.id.clone().unwrap_or_else(new_task_id);

        let mut fx = Effects::default();
        {
            let mut state = self.inner.state.lock();
            if state.tasks.contains_key(&id) {
                return Err(ValidationError::DuplicateTaskId(id).into());
            }
            if let Some(unknown) = spec.dependencies.iter().find(|d| !state.tasks.contains_key(*d)) {
                return Err(ValidationError::UnknownDependency(unknown.clone()).into());
            }
            if let Some(path) = find_cycle(&state.tasks, &id, &spec.dependencies) {
                return Err(ValidationError::CyclicDependency(path).into());
            }

            let now = now_ms();
            let mut task = Task::from_spec(id.clone(), spec, priority, now, self.inner.config.default_max_retries);
            let dependency_failed = task.dependencies.iter().find(|d| {
                state
                    .tasks
                    .get(*d)
                    .is_some_and(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
            });
            let blocked = task.dependencies.iter().any(|d| {
                state
                    .tasks
                    .get(d)
                    .is_some_and(|t| t.status != TaskStatus::Completed)
            });

            fx.events.push(CoordinatorEvent::TaskCreated {
                task_id: id.clone(),
                task_type: task.task_type,
                priority,
            });

            if let Some(dep) = dependency_failed.cloned() {
                let failure = TaskFailure {
                    reason: FailureReason::DependencyFailed,
                    message: format!("dependency {dep} already failed"),
                };
                task.status = TaskStatus::Failed;
                task.completed_at_ms = Some(now);
                task.error = Some(failure.clone());
                state.counters.failed += 1;
                fx.events.push(CoordinatorEvent::TaskFailed {
                    task_id: id.clone(),
                    reason: failure.reason,
                    message: failure.message,
                });
            } else if blocked {
                task.status = TaskStatus::WaitingDependencies;
            } else {
                state.seq += 1;
                let seq = state.seq;
                state.queue.enqueue(QueueEntry {
                    task_id: id.clone(),
                    priority,
                    created_at_ms: now,
                    seq,
                })?;
                task.status = TaskStatus::Queued;
                fx.events.push(CoordinatorEvent::TaskQueued {
                    task_id: id.clone(),
                    priority,
                });
            }

            for dep in &task.dependencies {
                if let Some(parent) = state.tasks.get_mut(dep) {
                    parent.dependents.push(id.clone());
                }
            }
            info!(
                task_id = %id,
                task_type = %task.task_type,
                priority = priority.value(),
                status = %task.status,
                "task submitted"
            );
            state.tasks.insert(id.clone(), task);
        }
        self.emit(fx.events);
        Ok(id)
    }

    /// One scheduling pass: promote pending tasks, then walk the queue in
    /// order assigning each task to the best remaining node the ledger
    /// admits. A node receives at most one assignment per tick.
    ///
    /// # Errors
    ///
    /// Propagates node registry failures; nothing is assigned in that case.
    pub async fn schedule_tick(&self) -> Result<TickReport, SchedulerError> {
        let _guard = self.inner.tick_guard.lock().await;
        let mut fx = Effects::default();
        let mut report = TickReport {
            promoted: self.promote_pending(&mut fx),
            ..TickReport::default()
        };

        let nodes: Vec<NodeSnapshot> = match self.inner.registry.active_nodes().await {
            Ok(nodes) => nodes.into_iter().filter(NodeSnapshot::is_available).collect(),
            Err(e) => {
                self.apply(fx).await;
                return Err(e);
            }
        };
        for node in &nodes {
            self.inner.ledger.sync_node(node);
        }
        report.available_nodes = nodes.len();

        let mut dispatches = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let slots = self
                .inner
                .config
                .max_concurrent_tasks
                .saturating_sub(state.attempts.len());
            let limit = state.queue.len().min(nodes.len()).min(slots);
            let mut candidates: Vec<&NodeSnapshot> = nodes.iter().collect();

            for task_id in state.queue.ordered_ids() {
                if report.assigned.len() >= limit || candidates.is_empty() {
                    break;
                }
                let Some(task) = state.tasks.get(&task_id) else {
                    continue;
                };
                let best = candidates
                    .iter()
                    .enumerate()
                    .map(|(i, node)| (i, task.compatibility_score(node)))
                    .filter(|(i, score)| {
                        let node = candidates[*i];
                        let request = task.requirements.resource_request_on(node);
                        *score > 0.0 && self.inner.ledger.can_allocate(&node.id, &request)
                    })
                    .fold(None, |best: Option<(usize, f64)>, (i, score)| match best {
                        Some((_, top)) if top >= score => best,
                        _ => Some((i, score)),
                    });
                let Some((idx, score)) = best else {
                    debug!(task_id = %task_id, "no compatible node this tick");
                    continue;
                };
                let node_id = candidates[idx].id.clone();
                let request = task.requirements.resource_request_on(candidates[idx]);
                let allocation = match self.inner.ledger.allocate(&task_id, &node_id, &request) {
                    Ok(allocation) => allocation,
                    Err(e) => {
                        debug!(task_id = %task_id, node_id = %node_id, error = %e, "allocation refused");
                        continue;
                    }
                };
                candidates.remove(idx);
                state.queue.remove(&task_id);

                let token = self.inner.root_token.child_token();
                let Some(task) = state.tasks.get_mut(&task_id) else {
                    continue;
                };
                task.status = TaskStatus::Assigned;
                task.assigned_node = Some(node_id.clone());
                task.scheduled_at_ms = Some(now_ms());
                let attempt = task.retry_count;
                let request = ExecutionRequest {
                    task_id: task_id.clone(),
                    node_id: node_id.clone(),
                    task_type: task.task_type,
                    subtype: task.subtype.clone(),
                    payload: task.payload.clone(),
                    parameters: task.parameters.clone(),
                    attempt,
                };
                state.attempts.insert(
                    task_id.clone(),
                    Attempt {
                        number: attempt,
                        node_id: node_id.clone(),
                        token: token.clone(),
                        load_acquired: false,
                    },
                );
                info!(task_id = %task_id, node_id = %node_id, score, attempt, "task assigned");
                fx.events.push(CoordinatorEvent::TaskAssigned {
                    task_id: task_id.clone(),
                    node_id: node_id.clone(),
                    score,
                });
                report.assigned.push(Assignment {
                    task_id,
                    node_id,
                    score,
                    allocation_id: allocation.id,
                });
                dispatches.push(Dispatch { request, token });
            }
            report.still_queued = state.queue.len();
        }

        self.apply(fx).await;
        for dispatch in dispatches {
            self.dispatch(dispatch).await;
        }
        Ok(report)
    }

    /// Fail every running attempt older than `task_timeout_ms`, exactly as if
    /// its executor had failed. Returns the affected task ids.
    pub async fn check_timeouts(&self) -> Vec<TaskId> {
        let timeout = self.inner.config.task_timeout_ms;
        let now = now_ms();
        let mut fx = Effects::default();
        let expired = {
            let mut state = self.inner.state.lock();
            let mut expired: Vec<(TaskId, u64)> = state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .filter_map(|t| {
                    let elapsed = now.saturating_sub(t.started_at_ms?);
                    (elapsed > timeout).then(|| (t.id.clone(), elapsed))
                })
                .collect();
            expired.sort();

            for (task_id, elapsed) in &expired {
                let Some((attempt, _)) = self.release_attempt(&mut state, task_id, &mut fx) else {
                    continue;
                };
                warn!(task_id = %task_id, node_id = %attempt.node_id, elapsed_ms = elapsed, "task timed out");
                state.counters.timeouts += 1;
                self.inner
                    .ledger
                    .record_task_outcome(&attempt.node_id, false, *elapsed);
                self.fail_attempt(
                    &mut state,
                    task_id,
                    FailureReason::Timeout,
                    format!("exceeded timeout of {timeout} ms"),
                    &mut fx,
                );
            }
            expired.into_iter().map(|(id, _)| id).collect()
        };
        self.apply(fx).await;
        expired
    }

    /// Cancel a pending, queued or assigned task. Dependents can no longer
    /// run and are failed with `dependency_failed`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::TaskNotFound`] for unknown ids and
    /// [`SchedulerError::InvalidState`] for tasks waiting on dependencies,
    /// running or finished.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task, SchedulerError> {
        self.stop_task(task_id, "cancelled", TaskStatus::is_cancellable).await
    }

    /// Interrupt a running task: its cancellation token fires, resources are
    /// released and the task ends cancelled without retry.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::TaskNotFound`] for unknown ids and
    /// [`SchedulerError::InvalidState`] unless the task is running.
    pub async fn interrupt_task(&self, task_id: &str) -> Result<Task, SchedulerError> {
        self.stop_task(task_id, "interrupted", |s| s == TaskStatus::Running)
            .await
    }

    async fn stop_task(
        &self,
        task_id: &str,
        action: &'static str,
        allowed: impl Fn(TaskStatus) -> bool,
    ) -> Result<Task, SchedulerError> {
        let mut fx = Effects::default();
        let task = {
            let mut state = self.inner.state.lock();
            let status = state
                .tasks
                .get(task_id)
                .map(|t| t.status)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
            if !allowed(status) {
                return Err(SchedulerError::InvalidState {
                    task: task_id.to_string(),
                    action,
                    status: status.to_string(),
                });
            }
            state.queue.remove(task_id);
            self.release_attempt(&mut state, task_id, &mut fx);

            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
            task.status = TaskStatus::Cancelled;
            task.completed_at_ms = Some(now_ms());
            let snapshot = task.clone();
            state.counters.cancelled += 1;
            info!(task_id, previous = %status, "task {action}");
            fx.events.push(CoordinatorEvent::TaskCancelled {
                task_id: task_id.to_string(),
            });
            self.cascade(&mut state, task_id, &mut fx);
            snapshot
        };
        self.apply(fx).await;
        Ok(task)
    }

    /// Copy of one task.
    #[must_use]
    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.state.lock().tasks.get(task_id).cloned()
    }

    /// Tasks matching `filter`, oldest first.
    #[must_use]
    pub fn get_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let state = self.inner.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Queued task ids in dispatch order.
    #[must_use]
    pub fn queued_ids(&self) -> Vec<TaskId> {
        self.inner.state.lock().queue.ordered_ids()
    }

    /// Aggregate counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_system_stats(&self) -> SystemStats {
        let state = self.inner.state.lock();
        let mut by_status = HashMap::new();
        for task in state.tasks.values() {
            *by_status.entry(task.status).or_insert(0) += 1;
        }
        let c = &state.counters;
        SystemStats {
            total_tasks: state.tasks.len(),
            by_status,
            queue_length: state.queue.len(),
            active_attempts: state.attempts.len(),
            max_concurrent_tasks: self.inner.config.max_concurrent_tasks,
            completed: c.completed,
            failed: c.failed,
            cancelled: c.cancelled,
            retries: c.retries,
            timeouts: c.timeouts,
            average_execution_ms: if c.completed == 0 {
                0.0
            } else {
                c.total_execution_ms as f64 / c.completed as f64
            },
            total_cost: c.total_cost,
        }
    }

    /// Fire the token of every in-flight attempt. Task records are left as
    /// they are.
    pub fn cancel_in_flight(&self) {
        self.inner.root_token.cancel();
    }

    /// Run scheduling ticks on their interval until `shutdown` fires.
    pub async fn run_scheduling_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.config.scheduling_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.inner.config.scheduling_interval_ms, "scheduling loop started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.schedule_tick().await {
                        warn!(error = %e, "scheduling tick failed");
                    }
                }
            }
        }
        info!("scheduling loop stopped");
    }

    /// Run timeout checks on their interval until `shutdown` fires.
    pub async fn run_timeout_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.config.timeout_check_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.inner.config.timeout_check_interval_ms, "timeout loop started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.check_timeouts().await;
                }
            }
        }
        info!("timeout loop stopped");
    }

    fn promote_pending(&self, fx: &mut Effects) -> usize {
        let mut state = self.inner.state.lock();
        let mut pending: Vec<(u64, TaskId)> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| (t.created_at_ms, t.id.clone()))
            .collect();
        pending.sort();
        let mut promoted = 0;
        for (_, task_id) in pending {
            if !state.promote(&task_id, fx) {
                break;
            }
            promoted += 1;
        }
        promoted
    }

    /// Acquire node load for a fresh assignment and spawn its execution.
    async fn dispatch(&self, dispatch: Dispatch) {
        let Dispatch { request, token } = dispatch;
        let task_id = request.task_id.clone();
        let node_id = request.node_id.clone();

        match self.inner.registry.increment_load(&node_id).await {
            Ok(()) => {
                let still_current = {
                    let mut state = self.inner.state.lock();
                    match state.attempts.get_mut(&task_id) {
                        Some(a) if a.number == request.attempt => {
                            a.load_acquired = true;
                            true
                        }
                        _ => false,
                    }
                };
                if !still_current {
                    debug!(task_id = %task_id, node_id = %node_id, "attempt ended before dispatch");
                    self.decrement_load(&node_id).await;
                    return;
                }
            }
            Err(e) => warn!(task_id = %task_id, node_id = %node_id, error = %e, "failed to increment node load"),
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_attempt(request, token).await;
        });
    }

    async fn run_attempt(&self, request: ExecutionRequest, token: CancellationToken) {
        let task_id = request.task_id.clone();
        let attempt = request.attempt;

        let Some(executor) = self.inner.executors.get(request.task_type) else {
            let err = ExecutionError::Rejected(format!("no executor for {}", request.task_type));
            self.complete_attempt(&task_id, attempt, Err(err)).await;
            return;
        };

        {
            let mut state = self.inner.state.lock();
            if !state.is_current(&task_id, attempt) {
                return;
            }
            let Some(task) = state.tasks.get_mut(&task_id) else {
                return;
            };
            task.status = TaskStatus::Running;
            task.started_at_ms = Some(now_ms());
        }
        debug!(task_id = %task_id, node_id = %request.node_id, attempt, "executing task");
        self.emit(vec![CoordinatorEvent::TaskStarted {
            task_id: task_id.clone(),
            node_id: request.node_id.clone(),
        }]);

        let result = tokio::select! {
            biased;
            () = token.cancelled() => Err(ExecutionError::Cancelled),
            result = executor.execute(request, token.clone()) => result,
        };
        if token.is_cancelled() {
            debug!(task_id = %task_id, attempt, "attempt superseded, result dropped");
            return;
        }
        self.complete_attempt(&task_id, attempt, result).await;
    }

    async fn complete_attempt(
        &self,
        task_id: &str,
        attempt: u32,
        result: Result<ExecutionOutcome, ExecutionError>,
    ) {
        let mut fx = Effects::default();
        {
            let mut state = self.inner.state.lock();
            if !state.is_current(task_id, attempt) {
                debug!(task_id, attempt, "stale result ignored");
                return;
            }
            let Some((current, allocation)) = self.release_attempt(&mut state, task_id, &mut fx) else {
                return;
            };
            let node_id = current.node_id;
            let ledger = &self.inner.ledger;
            match result {
                Ok(outcome) if outcome.success => {
                    ledger.record_task_outcome(&node_id, true, outcome.execution_time_ms);
                    self.complete_task(&mut state, task_id, &node_id, outcome, allocation, &mut fx);
                }
                Ok(outcome) => {
                    ledger.record_task_outcome(&node_id, false, outcome.execution_time_ms);
                    let message = format!("executor reported failure: {}", outcome.result);
                    self.fail_attempt(&mut state, task_id, FailureReason::ExecutionError, message, &mut fx);
                }
                Err(e) => {
                    ledger.record_task_outcome(&node_id, false, 0);
                    self.fail_attempt(&mut state, task_id, FailureReason::ExecutionError, e.to_string(), &mut fx);
                }
            }
        }
        self.apply(fx).await;
    }

    /// Drop the current attempt: fire its token, release its ledger
    /// allocation and schedule a load decrement if load was taken.
    fn release_attempt(
        &self,
        state: &mut SchedulerState,
        task_id: &str,
        fx: &mut Effects,
    ) -> Option<(Attempt, Option<Allocation>)> {
        let attempt = state.attempts.remove(task_id)?;
        attempt.token.cancel();
        let allocation = self.inner.ledger.release_task(task_id);
        if attempt.load_acquired {
            fx.decrements.push(attempt.node_id.clone());
        }
        Some((attempt, allocation))
    }

    fn complete_task(
        &self,
        state: &mut SchedulerState,
        task_id: &str,
        node_id: &str,
        outcome: ExecutionOutcome,
        allocation: Option<Allocation>,
        fx: &mut Effects,
    ) {
        let Some(task) = state.tasks.get_mut(task_id) else {
            return;
        };
        task.status = TaskStatus::Completed;
        task.completed_at_ms = Some(now_ms());
        task.resource_usage = Some(ResourceUsage {
            reserved: allocation.map(|a| a.resources).unwrap_or_default(),
            execution_time_ms: outcome.execution_time_ms,
            cost: outcome.cost,
        });
        task.result = Some(outcome.result);

        let c = &mut state.counters;
        c.completed += 1;
        c.total_execution_ms = c.total_execution_ms.saturating_add(outcome.execution_time_ms);
        c.total_cost += outcome.cost;

        info!(
            task_id,
            node_id,
            execution_time_ms = outcome.execution_time_ms,
            cost = outcome.cost,
            "task completed"
        );
        fx.events.push(CoordinatorEvent::TaskCompleted {
            task_id: task_id.to_string(),
            node_id: node_id.to_string(),
            execution_time_ms: outcome.execution_time_ms,
            cost: outcome.cost,
        });
        self.resolve_dependents(state, task_id, fx);
    }

    /// Retry with a priority bump while the budget allows, otherwise fail
    /// terminally and cascade.
    fn fail_attempt(
        &self,
        state: &mut SchedulerState,
        task_id: &str,
        reason: FailureReason,
        message: String,
        fx: &mut Effects,
    ) {
        let enable_retries = self.inner.config.enable_retries;
        let Some(task) = state.tasks.get_mut(task_id) else {
            return;
        };
        task.assigned_node = None;
        task.started_at_ms = None;
        task.error = Some(TaskFailure {
            reason,
            message: message.clone(),
        });

        if enable_retries && task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.priority = task.priority.bumped();
            task.status = TaskStatus::Pending;
            let (retry_count, priority) = (task.retry_count, task.priority);
            state.counters.retries += 1;
            warn!(task_id, retry_count, priority = priority.value(), detail = %message, "attempt failed, retrying");
            fx.events.push(CoordinatorEvent::TaskRetried {
                task_id: task_id.to_string(),
                retry_count,
                priority,
                reason,
            });
            state.promote(task_id, fx);
            return;
        }

        task.status = TaskStatus::Failed;
        task.completed_at_ms = Some(now_ms());
        state.counters.failed += 1;
        warn!(task_id, ?reason, detail = %message, "task failed");
        fx.events.push(CoordinatorEvent::TaskFailed {
            task_id: task_id.to_string(),
            reason,
            message,
        });
        self.cascade(state, task_id, fx);
    }

    /// Fail every direct and transitive dependent of `root` that is not yet
    /// terminal. Cascaded tasks are never retried.
    fn cascade(&self, state: &mut SchedulerState, root: &str, fx: &mut Effects) {
        let now = now_ms();
        let mut frontier: VecDeque<(TaskId, TaskId)> = state
            .tasks
            .get(root)
            .map(|t| t.dependents.iter().map(|d| (d.clone(), root.to_string())).collect())
            .unwrap_or_default();
        let mut visited: HashSet<TaskId> = HashSet::new();

        while let Some((task_id, cause)) = frontier.pop_front() {
            if !visited.insert(task_id.clone()) {
                continue;
            }
            let terminal = state.tasks.get(&task_id).is_none_or(Task::is_terminal);
            if terminal {
                continue;
            }
            state.queue.remove(&task_id);
            self.release_attempt(state, &task_id, fx);

            let Some(task) = state.tasks.get_mut(&task_id) else {
                continue;
            };
            let message = format!("dependency {cause} did not complete");
            task.status = TaskStatus::Failed;
            task.completed_at_ms = Some(now);
            task.error = Some(TaskFailure {
                reason: FailureReason::DependencyFailed,
                message: message.clone(),
            });
            frontier.extend(task.dependents.iter().map(|d| (d.clone(), task_id.clone())));
            state.counters.failed += 1;
            debug!(task_id = %task_id, cause = %cause, "dependent failed by cascade");
            fx.events.push(CoordinatorEvent::TaskFailed {
                task_id,
                reason: FailureReason::DependencyFailed,
                message,
            });
        }
    }

    /// Queue dependents of `completed` whose dependencies have all completed.
    fn resolve_dependents(&self, state: &mut SchedulerState, completed: &str, fx: &mut Effects) {
        let dependents = state
            .tasks
            .get(completed)
            .map(|t| t.dependents.clone())
            .unwrap_or_default();
        for dep_id in dependents {
            let ready = state.tasks.get(&dep_id).is_some_and(|t| {
                t.status == TaskStatus::WaitingDependencies
                    && t.dependencies.iter().all(|d| {
                        state
                            .tasks
                            .get(d)
                            .is_some_and(|p| p.status == TaskStatus::Completed)
                    })
            });
            if !ready {
                continue;
            }
            if let Some(task) = state.tasks.get_mut(&dep_id) {
                task.status = TaskStatus::Pending;
            }
            debug!(task_id = %dep_id, unblocked_by = completed, "dependencies satisfied");
            state.promote(&dep_id, fx);
        }
    }

    fn emit(&self, events: Vec<CoordinatorEvent>) {
        for event in events {
            self.inner.events.emit(EventRecord::new(event));
        }
    }

    async fn apply(&self, fx: Effects) {
        self.emit(fx.events);
        for node_id in fx.decrements {
            self.decrement_load(&node_id).await;
        }
    }

    async fn decrement_load(&self, node_id: &str) {
        if let Err(e) = self.inner.registry.decrement_load(node_id).await {
            warn!(node_id, error = %e, "failed to decrement node load");
        }
    }
}

/// Path `id -> .. -> id` if adding `id` with `deps` would close a cycle.
fn find_cycle(tasks: &HashMap<TaskId, Task>, id: &str, deps: &[TaskId]) -> Option<Vec<TaskId>> {
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();
    for dep in deps {
        if dep == id {
            return Some(vec![id.to_string(), id.to_string()]);
        }
        if !parent.contains_key(dep.as_str()) {
            parent.insert(dep.as_str(), id);
            stack.push(dep.as_str());
        }
    }
    while let Some(current) = stack.pop() {
        let Some(task) = tasks.get(current) else {
            continue;
        };
        for next in &task.dependencies {
            if next == id {
                let mut chain = vec![current];
                let mut cursor = current;
                while let Some(&p) = parent.get(cursor) {
                    if p == id {
                        break;
                    }
                    chain.push(p);
                    cursor = p;
                }
                chain.reverse();
                let mut path = vec![id.to_string()];
                path.extend(chain.into_iter().map(str::to_string));
                path.push(id.to_string());
                return Some(path);
            }
            if !parent.contains_key(next.as_str()) {
                parent.insert(next.as_str(), current);
                stack.push(next.as_str());
            }
        }
    }
    None
}
