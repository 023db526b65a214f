//! Task model: kinds, requirements, lifecycle state and node fitness scoring.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{NodeSnapshot, NodeStatus, ResourceVector, ValidationError};
use crate::util::{NodeId, TaskId};

/// Closed set of task kinds. Each kind resolves to one registered executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Model inference.
    Inference,
    /// Model training or fine-tuning.
    Training,
    /// Data processing.
    Processing,
    /// Anything else.
    Custom,
}

impl TaskType {
    /// Every task kind.
    pub const ALL: [Self; 4] = [Self::Inference, Self::Training, Self::Processing, Self::Custom];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Training => "training",
            Self::Processing => "processing",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownTaskType(s.to_string()))
    }
}

/// Task priority in `1..=10`; higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Lowest priority.
    pub const MIN: Self = Self(1);
    /// Highest priority.
    pub const MAX: Self = Self(10);
    /// Priority used when a submission does not state one.
    pub const DEFAULT: Self = Self(5);

    /// Validate a raw priority.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::PriorityOutOfRange`] outside `1..=10`.
    pub const fn new(value: u8) -> Result<Self, ValidationError> {
        if value >= Self::MIN.0 && value <= Self::MAX.0 {
            Ok(Self(value))
        } else {
            Err(ValidationError::PriorityOutOfRange(value))
        }
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// One step higher, capped at [`Priority::MAX`].
    #[must_use]
    pub const fn bumped(self) -> Self {
        if self.0 >= Self::MAX.0 {
            Self::MAX
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Priority {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet queued.
    Pending,
    /// Blocked on unfinished dependencies.
    WaitingDependencies,
    /// In the priority queue.
    Queued,
    /// Node chosen and resources reserved.
    Assigned,
    /// Executor running.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed terminally.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed or cancelled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States from which [`crate::core::Scheduler::cancel_task`] is accepted.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Assigned)
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::WaitingDependencies => "waiting_dependencies",
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an attempt or a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Executor returned an error or an unsuccessful outcome.
    ExecutionError,
    /// Running longer than the configured task timeout.
    Timeout,
    /// An ancestor failed terminally or was cancelled.
    DependencyFailed,
}

/// Failure details recorded on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Failure class.
    pub reason: FailureReason,
    /// Human-readable detail.
    pub message: String,
}

/// Resource and capability constraints of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRequirements {
    /// Hard minimum system memory.
    pub min_memory_gb: Option<f64>,
    /// Hard GPU requirement.
    pub requires_gpu: bool,
    /// Hard minimum GPU memory (only checked with `requires_gpu`).
    pub min_gpu_memory_gb: Option<f64>,
    /// Hard capability set.
    pub required_capabilities: Vec<String>,
    /// CPU cores reserved on the node.
    pub cpu_cores: Option<f64>,
    /// Network bandwidth reserved on the node.
    pub network_mbps: Option<f64>,
    /// Storage reserved on the node.
    pub storage_gb: Option<f64>,
    /// Soft preference for CPU cores.
    pub preferred_cpu_cores: Option<f64>,
    /// Soft preference for memory.
    pub preferred_memory_gb: Option<f64>,
    /// Soft preference for region.
    pub preferred_region: Option<String>,
    /// Soft preference for node classes.
    pub preferred_node_types: Vec<String>,
}

impl TaskRequirements {
    /// Amounts the ledger reserves on the assigned node.
    #[must_use]
    pub fn resource_request(&self) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu_cores.unwrap_or(0.0),
            memory: self.min_memory_gb.unwrap_or(0.0),
            gpu: if self.requires_gpu {
                self.min_gpu_memory_gb.unwrap_or(0.0)
            } else {
                0.0
            },
            network: self.network_mbps.unwrap_or(0.0),
            storage: self.storage_gb.unwrap_or(0.0),
        }
    }

    /// [`Self::resource_request`] narrowed to what `node` reports. Kinds the
    /// node has no capacity for are dropped; hard minimums on those kinds
    /// already fail [`Task::can_execute_on`].
    #[must_use]
    pub fn resource_request_on(&self, node: &NodeSnapshot) -> ResourceVector {
        let request = self.resource_request();
        let total = node.specs.total_resources();
        ResourceVector::from_fn(|kind| {
            if total.get(kind) > 0.0 {
                request.get(kind)
            } else {
                0.0
            }
        })
    }
}

/// Resources actually consumed by a finished task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Amounts that were reserved for the run.
    pub reserved: ResourceVector,
    /// Wall time reported by the executor.
    pub execution_time_ms: u64,
    /// Cost reported by the executor.
    pub cost: f64,
}

/// A task submission as received from callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Caller-chosen id; generated when absent.
    #[serde(default)]
    pub id: Option<TaskId>,
    /// Task kind.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Free-form refinement of the kind (e.g. `text-generation`).
    #[serde(default)]
    pub subtype: Option<String>,
    /// Raw priority, validated into [`Priority`].
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Resource and capability constraints.
    #[serde(default)]
    pub requirements: TaskRequirements,
    /// Workload payload handed to the executor.
    #[serde(default)]
    pub payload: Value,
    /// Executor parameters.
    #[serde(default)]
    pub parameters: Value,
    /// Tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Retry budget override.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

const fn default_priority() -> u8 {
    Priority::DEFAULT.value()
}

impl TaskSpec {
    /// Minimal submission with default priority.
    #[must_use]
    pub fn new(task_type: TaskType, payload: Value) -> Self {
        Self {
            id: None,
            task_type,
            subtype: None,
            priority: default_priority(),
            requirements: TaskRequirements::default(),
            payload,
            parameters: Value::Null,
            dependencies: Vec::new(),
            max_retries: None,
        }
    }

    /// Set a caller-chosen id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the subtype.
    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Set the raw priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set requirements.
    #[must_use]
    pub fn with_requirements(mut self, requirements: TaskRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Set executor parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Structural checks that need no scheduler state.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<Priority, ValidationError> {
        let priority = Priority::new(self.priority)?;
        if self.payload.is_null() {
            return Err(ValidationError::MissingPayload);
        }
        if let Some(id) = &self.id {
            if self.dependencies.iter().any(|d| d == id) {
                return Err(ValidationError::CyclicDependency(vec![id.clone(), id.clone()]));
            }
        }
        Ok(priority)
    }
}

/// One unit of work and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identifier.
    pub id: TaskId,
    /// Kind.
    pub task_type: TaskType,
    /// Free-form subtype.
    pub subtype: Option<String>,
    /// Current priority (raised by retries).
    pub priority: Priority,
    /// Constraints.
    pub requirements: TaskRequirements,
    /// Workload payload.
    pub payload: Value,
    /// Executor parameters.
    pub parameters: Value,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Node currently or last assigned.
    pub assigned_node: Option<NodeId>,
    /// Retries consumed.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Tasks this one waits on.
    pub dependencies: Vec<TaskId>,
    /// Tasks waiting on this one.
    pub dependents: Vec<TaskId>,
    /// Creation time (ms since epoch).
    pub created_at_ms: u64,
    /// Last assignment time.
    pub scheduled_at_ms: Option<u64>,
    /// Last execution start time.
    pub started_at_ms: Option<u64>,
    /// Terminal transition time.
    pub completed_at_ms: Option<u64>,
    /// Executor result on success.
    pub result: Option<Value>,
    /// Last failure.
    pub error: Option<TaskFailure>,
    /// Usage snapshot after completion.
    pub resource_usage: Option<ResourceUsage>,
}

impl Task {
    /// Build a pending task from a validated submission.
    #[must_use]
    pub fn from_spec(id: TaskId, spec: TaskSpec, priority: Priority, now_ms: u64, default_max_retries: u32) -> Self {
        Self {
            id,
            task_type: spec.task_type,
            subtype: spec.subtype,
            priority,
            requirements: spec.requirements,
            payload: spec.payload,
            parameters: spec.parameters,
            status: TaskStatus::Pending,
            assigned_node: None,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            dependencies: spec.dependencies,
            dependents: Vec::new(),
            created_at_ms: now_ms,
            scheduled_at_ms: None,
            started_at_ms: None,
            completed_at_ms: None,
            result: None,
            error: None,
            resource_usage: None,
        }
    }

    /// Whether every hard constraint holds on `node`.
    #[must_use]
    pub fn can_execute_on(&self, node: &NodeSnapshot) -> bool {
        if node.status != NodeStatus::Active || node.current_load >= node.max_load {
            return false;
        }
        let req = &self.requirements;
        if let Some(min) = req.min_memory_gb {
            if node.specs.memory_gb < min {
                return false;
            }
        }
        if req.requires_gpu {
            if !node.specs.gpu_present() {
                return false;
            }
            if let Some(min) = req.min_gpu_memory_gb {
                if node.specs.gpu_memory_gb < min {
                    return false;
                }
            }
        }
        req.required_capabilities
            .iter()
            .all(|cap| node.capabilities.iter().any(|c| c == cap))
    }

    /// Rank `node` for this task. `0.0` means not executable; otherwise the
    /// score is at least `1.0`.
    #[must_use]
    pub fn compatibility_score(&self, node: &NodeSnapshot) -> f64 {
        if !self.can_execute_on(node) {
            return 0.0;
        }
        let req = &self.requirements;
        let mut score = 100.0;

        if let Some(pref) = req.preferred_cpu_cores.filter(|p| *p > 0.0) {
            score += (node.specs.cpu_cores / pref).min(1.0) * 20.0;
        }
        if let Some(pref) = req.preferred_memory_gb.filter(|p| *p > 0.0) {
            score += (node.specs.memory_gb / pref).min(1.0) * 20.0;
        }

        score -= node.load_ratio() * 30.0;

        if let (Some(pref), Some(region)) = (&req.preferred_region, &node.region) {
            if pref == region {
                score += 15.0;
            }
        }
        if let Some(node_type) = &node.node_type {
            if req.preferred_node_types.iter().any(|t| t == node_type) {
                score += 25.0;
            }
        }

        f64::max(score, 1.0)
    }

    /// True once no further transitions happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeSpecs;
    use serde_json::json;

    fn gpu_node() -> NodeSnapshot {
        NodeSnapshot::new(
            "gpu-1",
            4,
            NodeSpecs {
                cpu_cores: 16.0,
                memory_gb: 64.0,
                has_gpu: true,
                gpu_memory_gb: 24.0,
                ..NodeSpecs::default()
            },
        )
        .with_capabilities(["text-generation", "image-generation"])
        .with_region("us-west")
        .with_node_type("rtx4090")
    }

    fn task(requirements: TaskRequirements) -> Task {
        let spec = TaskSpec::new(TaskType::Inference, json!({"prompt": "hi"})).with_requirements(requirements);
        Task::from_spec("t1".into(), spec, Priority::DEFAULT, 0, 3)
    }

    #[test]
    fn task_type_parses_known_names_only() {
        assert_eq!("Inference".parse::<TaskType>(), Ok(TaskType::Inference));
        assert_eq!(
            "quantum".parse::<TaskType>(),
            Err(ValidationError::UnknownTaskType("quantum".into()))
        );
    }

    #[test]
    fn priority_bounds_and_bump() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(11).is_err());
        assert_eq!(Priority::new(9).unwrap().bumped().value(), 10);
        assert_eq!(Priority::MAX.bumped(), Priority::MAX);
    }

    #[test]
    fn spec_validation() {
        let ok = TaskSpec::new(TaskType::Training, json!({}));
        assert_eq!(ok.validate(), Ok(Priority::DEFAULT));

        let no_payload = TaskSpec::new(TaskType::Training, Value::Null);
        assert_eq!(no_payload.validate(), Err(ValidationError::MissingPayload));

        let bad_priority = TaskSpec::new(TaskType::Training, json!({})).with_priority(0);
        assert_eq!(bad_priority.validate(), Err(ValidationError::PriorityOutOfRange(0)));

        let self_dep = TaskSpec::new(TaskType::Training, json!({}))
            .with_id("a")
            .with_dependencies(["a"]);
        assert!(matches!(self_dep.validate(), Err(ValidationError::CyclicDependency(_))));
    }

    #[test]
    fn spec_deserializes_type_field() {
        let spec: TaskSpec = serde_json::from_str(r#"{"type":"processing","payload":{"x":1},"priority":7}"#).unwrap();
        assert_eq!(spec.task_type, TaskType::Processing);
        assert_eq!(spec.priority, 7);

        let unknown = serde_json::from_str::<TaskSpec>(r#"{"type":"quantum","payload":{}}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn hard_requirements_gate_execution() {
        let node = gpu_node();
        assert!(task(TaskRequirements {
            min_memory_gb: Some(8.0),
            requires_gpu: true,
            ..TaskRequirements::default()
        })
        .can_execute_on(&node));

        assert!(!task(TaskRequirements {
            min_gpu_memory_gb: Some(48.0),
            requires_gpu: true,
            ..TaskRequirements::default()
        })
        .can_execute_on(&node));

        assert!(!task(TaskRequirements {
            required_capabilities: vec!["training".into()],
            ..TaskRequirements::default()
        })
        .can_execute_on(&node));

        let mut full = gpu_node();
        full.current_load = 4;
        assert!(!task(TaskRequirements::default()).can_execute_on(&full));
    }

    #[test]
    fn compatibility_score_components() {
        let node = gpu_node();
        assert!((task(TaskRequirements::default()).compatibility_score(&node) - 100.0).abs() < 1e-9);

        let preferred = task(TaskRequirements {
            preferred_cpu_cores: Some(32.0),
            preferred_memory_gb: Some(32.0),
            preferred_region: Some("us-west".into()),
            preferred_node_types: vec!["rtx4090".into()],
            ..TaskRequirements::default()
        });
        // 100 + 10 (half the preferred cores) + 20 + 15 + 25
        assert!((preferred.compatibility_score(&node) - 170.0).abs() < 1e-9);

        let mut loaded = gpu_node();
        loaded.current_load = 2;
        assert!((task(TaskRequirements::default()).compatibility_score(&loaded) - 85.0).abs() < 1e-9);
    }

    #[test]
    fn incompatible_node_scores_zero() {
        let mut node = gpu_node();
        node.status = NodeStatus::Offline;
        assert_eq!(task(TaskRequirements::default()).compatibility_score(&node), 0.0);
    }

    #[test]
    fn resource_request_ignores_gpu_without_requirement() {
        let req = TaskRequirements {
            min_gpu_memory_gb: Some(16.0),
            min_memory_gb: Some(8.0),
            ..TaskRequirements::default()
        };
        let v = req.resource_request();
        assert_eq!(v.gpu, 0.0);
        assert_eq!(v.memory, 8.0);
        assert_eq!(v.cpu, 0.0);
    }

    #[test]
    fn resource_request_on_drops_kinds_the_node_lacks() {
        let node = NodeSnapshot::new(
            "lean",
            4,
            NodeSpecs {
                memory_gb: 16.0,
                has_gpu: true,
                ..NodeSpecs::default()
            },
        );
        let req = TaskRequirements {
            min_memory_gb: Some(8.0),
            requires_gpu: true,
            cpu_cores: Some(2.0),
            network_mbps: Some(100.0),
            ..TaskRequirements::default()
        };
        let v = req.resource_request_on(&node);
        assert_eq!(v.cpu, 0.0);
        assert_eq!(v.network, 0.0);
        assert_eq!(v.memory, 8.0);
        assert_eq!(req.resource_request().cpu, 2.0);
    }

    #[test]
    fn waiting_tasks_are_not_cancellable() {
        assert!(TaskStatus::Pending.is_cancellable());
        assert!(TaskStatus::Queued.is_cancellable());
        assert!(TaskStatus::Assigned.is_cancellable());
        assert!(!TaskStatus::WaitingDependencies.is_cancellable());
        assert!(!TaskStatus::Running.is_cancellable());
    }
}
