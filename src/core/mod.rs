//! Core coordination model: tasks, nodes, the scheduler and the resource ledger.

pub mod error;
pub mod events;
pub mod executor;
pub mod ledger;
pub mod node;
pub mod queue;
pub mod resources;
pub mod scheduler;
pub mod task;

pub use error::{AppResult, ExecutionError, SchedulerError, ValidationError};
pub use events::{
    BroadcastEventSink, CoordinatorEvent, EventRecord, EventSink, InMemoryEventSink,
    TracingEventSink,
};
pub use executor::{ExecutionOutcome, ExecutionRequest, ExecutorRegistry, TaskExecutor};
pub use ledger::{
    Allocation, AllocationFilter, AllocationRequest, AllocationStatus, AllocationTickReport,
    LedgerView, MigrationPlan, MigrationPlanner, MigrationReason, NodePerformance,
    NodeResourceState, NodeResourceSummary, NoopPlanner, OptimizationReport, RebalancePlanner,
    ResourceLedger, ResourceStatus, UtilizationSample,
};
pub use node::{NodeRegistry, NodeSnapshot, NodeSpecs, NodeStatus};
pub use queue::{QueueEntry, TaskQueue};
pub use resources::{ResourceKind, ResourceVector};
pub use scheduler::{Assignment, Scheduler, SystemStats, TaskFilter, TickReport};
pub use task::{
    FailureReason, Priority, ResourceUsage, Task, TaskFailure, TaskRequirements, TaskSpec,
    TaskStatus, TaskType,
};
