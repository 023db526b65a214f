//! Error types for scheduler and ledger operations.

use thiserror::Error;

use crate::util::{AllocationId, NodeId, TaskId};

/// Structural problems with a task submission. A submission that fails
/// validation is rejected synchronously and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Task type name is not one of the known kinds.
    #[error("unknown task type `{0}`")]
    UnknownTaskType(String),
    /// Priority outside the accepted `1..=10` band.
    #[error("priority {0} out of range 1..=10")]
    PriorityOutOfRange(u8),
    /// Payload is absent (`null`).
    #[error("payload is required")]
    MissingPayload,
    /// No executor is registered for the task's type.
    #[error("no executor registered for task type `{0}`")]
    NoExecutor(String),
    /// A dependency names a task the scheduler does not know.
    #[error("unknown dependency `{0}`")]
    UnknownDependency(TaskId),
    /// The dependency graph would contain a cycle.
    #[error("cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<TaskId>),
    /// A task with the same id already exists.
    #[error("duplicate task id `{0}`")]
    DuplicateTaskId(TaskId),
}

/// Errors produced by scheduler and ledger components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Submission rejected by validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// Pending queue is full.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// Unknown task id.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// Unknown node id.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    /// Unknown allocation id.
    #[error("allocation not found: {0}")]
    AllocationNotFound(AllocationId),
    /// Allocation was already released; releasing twice never credits twice.
    #[error("allocation already released: {0}")]
    AllocationAlreadyReleased(AllocationId),
    /// Node lacks buffered capacity for the request.
    #[error("insufficient capacity on node {node}: {reason}")]
    Allocation {
        /// Node that rejected the request.
        node: NodeId,
        /// Which resource fell short.
        reason: String,
    },
    /// Node still holds active allocations.
    #[error("node {0} has active allocations")]
    NodeBusy(NodeId),
    /// Operation not allowed in the task's current state.
    #[error("task {task} cannot be {action} while {status}")]
    InvalidState {
        /// Task identifier.
        task: TaskId,
        /// Attempted operation.
        action: &'static str,
        /// Current status name.
        status: String,
    },
    /// Node registry call failed.
    #[error("node registry error: {0}")]
    Registry(String),
    /// Configuration rejected.
    #[error("config invalid: {0}")]
    Config(String),
}

/// Failure reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The executor ran the workload and it failed.
    #[error("execution failed: {0}")]
    Failed(String),
    /// The node refused the workload.
    #[error("execution rejected: {0}")]
    Rejected(String),
    /// Execution stopped because its cancellation token fired.
    #[error("execution cancelled")]
    Cancelled,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
