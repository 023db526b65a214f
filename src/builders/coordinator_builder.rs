//! Builder constructing a coordinator from configuration.

use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::core::{
    EventSink, ExecutorRegistry, MigrationPlanner, NodeRegistry, RebalancePlanner, ResourceLedger,
    Scheduler, SchedulerError, TaskExecutor, TaskQueue, TaskType, TracingEventSink,
};
use crate::runtime::Coordinator;

/// Collects the collaborators a coordinator needs and wires them together.
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    registry: Option<Arc<dyn NodeRegistry>>,
    executors: ExecutorRegistry,
    events: Option<Arc<dyn EventSink>>,
    planner: Option<Box<dyn RebalancePlanner>>,
    queue: Option<Box<dyn TaskQueue>>,
}

impl CoordinatorBuilder {
    /// Start from a configuration.
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            registry: None,
            executors: ExecutorRegistry::new(),
            events: None,
            planner: None,
            queue: None,
        }
    }

    /// Node registry (required).
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn NodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register the executor for one task kind.
    #[must_use]
    pub fn executor(mut self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executors.register(task_type, executor);
        self
    }

    /// Replace the whole executor map.
    #[must_use]
    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    /// Event sink shared by scheduler and ledger; defaults to tracing.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Rebalance planner; defaults to [`MigrationPlanner`].
    #[must_use]
    pub fn planner(mut self, planner: Box<dyn RebalancePlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Queue backend; defaults to the in-memory queue.
    #[must_use]
    pub fn queue(mut self, queue: Box<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Validate the configuration and build.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Config`] for invalid configuration, a missing
    /// registry or an empty executor map.
    pub fn build(self) -> Result<Coordinator, SchedulerError> {
        self.config.validate().map_err(SchedulerError::Config)?;
        let registry = self
            .registry
            .ok_or_else(|| SchedulerError::Config("node registry is required".into()))?;
        if self.executors.kinds().is_empty() {
            return Err(SchedulerError::Config("at least one executor is required".into()));
        }

        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));
        let planner = self.planner.unwrap_or_else(|| Box::new(MigrationPlanner));
        let ledger = Arc::new(ResourceLedger::with_planner(
            self.config.ledger.clone(),
            Arc::clone(&events),
            planner,
        ));
        let scheduler_config = self.config.scheduler.clone();
        let scheduler = match self.queue {
            Some(queue) => Scheduler::with_queue(
                scheduler_config,
                registry,
                self.executors,
                Arc::clone(&ledger),
                events,
                queue,
            ),
            None => Scheduler::new(scheduler_config, registry, self.executors, Arc::clone(&ledger), events),
        };
        Ok(Coordinator::new(self.config, scheduler, ledger))
    }
}
