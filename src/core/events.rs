//! Lifecycle events and event sinks.
//!
//! Monitoring and notification collaborators consume these; the scheduler and
//! the ledger only ever emit them.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::{FailureReason, Priority, TaskType};
use crate::util::{new_event_id, now_ms, AllocationId, NodeId, TaskId};

/// Something observable happened to a task or an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// Task accepted and stored.
    TaskCreated {
        /// Task.
        task_id: TaskId,
        /// Kind.
        task_type: TaskType,
        /// Priority at submission.
        priority: Priority,
    },
    /// Task entered the priority queue.
    TaskQueued {
        /// Task.
        task_id: TaskId,
        /// Queue priority.
        priority: Priority,
    },
    /// Task matched to a node.
    TaskAssigned {
        /// Task.
        task_id: TaskId,
        /// Chosen node.
        node_id: NodeId,
        /// Compatibility score of the chosen node.
        score: f64,
    },
    /// Executor invoked.
    TaskStarted {
        /// Task.
        task_id: TaskId,
        /// Node.
        node_id: NodeId,
    },
    /// Task finished successfully.
    TaskCompleted {
        /// Task.
        task_id: TaskId,
        /// Node.
        node_id: NodeId,
        /// Executor-reported wall time.
        execution_time_ms: u64,
        /// Executor-reported cost.
        cost: f64,
    },
    /// Task failed terminally.
    TaskFailed {
        /// Task.
        task_id: TaskId,
        /// Failure class.
        reason: FailureReason,
        /// Detail.
        message: String,
    },
    /// Failed attempt re-queued.
    TaskRetried {
        /// Task.
        task_id: TaskId,
        /// Retries consumed so far.
        retry_count: u32,
        /// Raised priority.
        priority: Priority,
        /// Failure class of the attempt.
        reason: FailureReason,
    },
    /// Task cancelled.
    TaskCancelled {
        /// Task.
        task_id: TaskId,
    },
    /// Ledger reserved resources.
    ResourcesAllocated {
        /// Allocation record.
        allocation_id: AllocationId,
        /// Task.
        task_id: TaskId,
        /// Node.
        node_id: NodeId,
    },
    /// Ledger released resources.
    ResourcesDeallocated {
        /// Allocation record.
        allocation_id: AllocationId,
        /// Task.
        task_id: TaskId,
        /// Node.
        node_id: NodeId,
    },
}

impl CoordinatorEvent {
    /// Snake-case event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskQueued { .. } => "task_queued",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskRetried { .. } => "task_retried",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::ResourcesAllocated { .. } => "resources_allocated",
            Self::ResourcesDeallocated { .. } => "resources_deallocated",
        }
    }

    /// Task the event refers to.
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskQueued { task_id, .. }
            | Self::TaskAssigned { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskRetried { task_id, .. }
            | Self::TaskCancelled { task_id }
            | Self::ResourcesAllocated { task_id, .. }
            | Self::ResourcesDeallocated { task_id, .. } => task_id,
        }
    }
}

/// Event with envelope metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event id.
    pub event_id: String,
    /// Emission time (ms since epoch).
    pub emitted_at_ms: u64,
    /// Payload.
    #[serde(flatten)]
    pub event: CoordinatorEvent,
}

impl EventRecord {
    /// Wrap an event with a fresh id and the current time.
    #[must_use]
    pub fn new(event: CoordinatorEvent) -> Self {
        Self {
            event_id: new_event_id(),
            emitted_at_ms: now_ms(),
            event,
        }
    }
}

/// Event sink abstraction. Implementations must not call back into the
/// scheduler or the ledger.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn emit(&self, record: EventRecord);
}

/// Bounded in-memory sink for tests and development.
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<EventRecord>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Sink keeping the most recent `max_events` records.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of stored records, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().iter().cloned().collect()
    }

    /// Names of stored events for one task, oldest first.
    #[must_use]
    pub fn names_for(&self, task_id: &str) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter(|r| r.event.task_id() == task_id)
            .map(|r| r.event.name())
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, record: EventRecord) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(record);
    }
}

/// Fan-out sink backed by a tokio broadcast channel.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<EventRecord>,
}

impl BroadcastEventSink {
    /// Channel buffering up to `capacity` records per lagging subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New subscriber receiving every later event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, record: EventRecord) {
        // No subscribers is not an error.
        let _ = self.sender.send(record);
    }
}

/// Sink that logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, record: EventRecord) {
        tracing::debug!(
            event = record.event.name(),
            task_id = record.event.task_id(),
            event_id = %record.event_id,
            "coordinator event"
        );
    }
}
