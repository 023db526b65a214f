//! API-facing request/response models.
//!
//! Transport is left to the embedding service; these types only fix the
//! wire shape and map onto scheduler calls.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{
    Priority, ResourceLedger, Scheduler, SchedulerError, Task, TaskFailure, TaskRequirements,
    TaskSpec, TaskStatus, TaskType,
};
use crate::util::{NodeId, TaskId};

/// Task submission payload. The type arrives as a string so unknown kinds
/// surface as validation errors rather than decode failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Caller-chosen id.
    #[serde(default)]
    pub id: Option<TaskId>,
    /// Task kind name.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Free-form subtype.
    #[serde(default)]
    pub subtype: Option<String>,
    /// Raw priority.
    #[serde(default)]
    pub priority: Option<u8>,
    /// Constraints.
    #[serde(default)]
    pub requirements: TaskRequirements,
    /// Workload payload.
    #[serde(default)]
    pub payload: Value,
    /// Executor parameters.
    #[serde(default)]
    pub parameters: Value,
    /// Dependencies.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Retry budget override.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TryFrom<TaskSubmission> for TaskSpec {
    type Error = SchedulerError;

    fn try_from(req: TaskSubmission) -> Result<Self, Self::Error> {
        let task_type = TaskType::from_str(&req.task_type)?;
        Ok(Self {
            id: req.id,
            task_type,
            subtype: req.subtype,
            priority: req.priority.unwrap_or(Priority::DEFAULT.value()),
            requirements: req.requirements,
            payload: req.payload,
            parameters: req.parameters,
            dependencies: req.dependencies,
            max_retries: req.max_retries,
        })
    }
}

/// Task status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: TaskStatus,
    /// Current priority.
    pub priority: Priority,
    /// Assigned node.
    pub assigned_node: Option<NodeId>,
    /// Retries consumed.
    pub retry_count: u32,
    /// Last failure.
    pub error: Option<TaskFailure>,
    /// Result on success.
    pub result: Option<Value>,
}

impl From<&Task> for TaskStatusResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            priority: task.priority,
            assigned_node: task.assigned_node.clone(),
            retry_count: task.retry_count,
            error: task.error.clone(),
            result: task.result.clone(),
        }
    }
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Loops running.
    pub ok: bool,
    /// Queue depth.
    pub queue_length: usize,
    /// Attempts assigned or running.
    pub active_attempts: usize,
    /// Active ledger allocations.
    pub active_allocations: usize,
}

impl Health {
    /// Snapshot counters from a scheduler and its ledger.
    #[must_use]
    pub fn from_parts(scheduler: &Scheduler, ledger: &ResourceLedger, ok: bool) -> Self {
        let stats = scheduler.get_system_stats();
        Self {
            ok,
            queue_length: stats.queue_length,
            active_attempts: stats.active_attempts,
            active_allocations: ledger.resource_status().active_allocations,
        }
    }
}

/// Submit a task.
///
/// # Errors
///
/// Returns the rendered [`SchedulerError`] when the submission is rejected.
pub fn submit_task(scheduler: &Scheduler, req: TaskSubmission) -> Result<TaskStatusResponse, String> {
    let spec = TaskSpec::try_from(req).map_err(|e| e.to_string())?;
    let id = scheduler.submit_task(spec).map_err(|e| e.to_string())?;
    scheduler
        .get_task(&id)
        .map(|t| TaskStatusResponse::from(&t))
        .ok_or_else(|| format!("task {id} vanished after submission"))
}

/// Current status of one task.
#[must_use]
pub fn task_status(scheduler: &Scheduler, task_id: &str) -> Option<TaskStatusResponse> {
    scheduler.get_task(task_id).map(|t| TaskStatusResponse::from(&t))
}

/// Cancel a task.
///
/// # Errors
///
/// Returns the rendered [`SchedulerError`] for unknown or non-cancellable tasks.
pub async fn cancel_task(scheduler: &Scheduler, task_id: &str) -> Result<TaskStatusResponse, String> {
    scheduler
        .cancel_task(task_id)
        .await
        .map(|t| TaskStatusResponse::from(&t))
        .map_err(|e| e.to_string())
}
