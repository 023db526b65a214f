//! Executor seam: one handler per task kind, resolved once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{ExecutionError, TaskType};
use crate::util::{NodeId, TaskId};

/// Everything an executor needs to run one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Task being executed.
    pub task_id: TaskId,
    /// Node the task was assigned to.
    pub node_id: NodeId,
    /// Task kind.
    pub task_type: TaskType,
    /// Free-form subtype.
    pub subtype: Option<String>,
    /// Workload payload.
    pub payload: Value,
    /// Executor parameters.
    pub parameters: Value,
    /// Zero-based attempt number.
    pub attempt: u32,
}

/// Outcome reported by an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether the workload succeeded.
    pub success: bool,
    /// Workload result.
    #[serde(default)]
    pub result: Value,
    /// Cost charged for the run.
    #[serde(default)]
    pub cost: f64,
    /// Wall time reported by the node.
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    /// Successful outcome.
    #[must_use]
    pub const fn success(result: Value, cost: f64, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            result,
            cost,
            execution_time_ms,
        }
    }
}

/// Runs workloads of one task kind on remote nodes.
///
/// Implementations should check `cancel` at safe points; the scheduler also
/// drops the returned future once the token fires.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_compute_coordinator::core::{
///     ExecutionError, ExecutionOutcome, ExecutionRequest, TaskExecutor,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// struct EchoExecutor;
///
/// #[async_trait]
/// impl TaskExecutor for EchoExecutor {
///     async fn execute(
///         &self,
///         request: ExecutionRequest,
///         _cancel: CancellationToken,
///     ) -> Result<ExecutionOutcome, ExecutionError> {
///         Ok(ExecutionOutcome::success(request.payload, 0.0, 1))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Execute one attempt.
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Handler map from task kind to executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for `task_type`.
    pub fn register(&mut self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) {
        self.handlers.insert(task_type, executor);
    }

    /// Builder-style [`ExecutorRegistry::register`].
    #[must_use]
    pub fn with(mut self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) -> Self {
        self.register(task_type, executor);
        self
    }

    /// Executor for `task_type`.
    #[must_use]
    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskExecutor>> {
        self.handlers.get(&task_type).cloned()
    }

    /// Whether `task_type` has an executor.
    #[must_use]
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    /// Registered kinds.
    #[must_use]
    pub fn kinds(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.supports(*t))
            .collect()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl TaskExecutor for Noop {
        async fn execute(
            &self,
            _request: ExecutionRequest,
            _cancel: CancellationToken,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            Ok(ExecutionOutcome::success(Value::Null, 0.0, 0))
        }
    }

    #[test]
    fn registry_resolves_registered_kinds() {
        let registry = ExecutorRegistry::new()
            .with(TaskType::Inference, Arc::new(Noop))
            .with(TaskType::Custom, Arc::new(Noop));
        assert!(registry.supports(TaskType::Inference));
        assert!(!registry.supports(TaskType::Training));
        assert_eq!(registry.kinds(), vec![TaskType::Inference, TaskType::Custom]);
        assert!(registry.get(TaskType::Custom).is_some());
    }
}
