//! Pending-task queue abstraction.

use crate::core::{Priority, SchedulerError};
use crate::util::TaskId;

/// Queue position of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Task.
    pub task_id: TaskId,
    /// Priority at enqueue time.
    pub priority: Priority,
    /// Task creation time; orders tasks inside a priority band.
    pub created_at_ms: u64,
    /// Monotonic insertion number; breaks ties between equal timestamps.
    pub seq: u64,
}

/// Abstraction for pending-queue backends.
///
/// Iteration order is strictly descending priority, then ascending creation
/// time, then ascending insertion sequence.
pub trait TaskQueue: Send {
    /// Insert a task at its ordered position.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::QueueFull`] when the queue is at capacity.
    fn enqueue(&mut self, entry: QueueEntry) -> Result<(), SchedulerError>;
    /// Remove a task wherever it sits.
    fn remove(&mut self, task_id: &str) -> Option<QueueEntry>;
    /// Whether the task is queued.
    fn contains(&self, task_id: &str) -> bool;
    /// Queued task ids in dispatch order.
    fn ordered_ids(&self) -> Vec<TaskId>;
    /// Maximum depth allowed for this queue.
    fn max_depth(&self) -> usize;
    /// Current depth.
    fn len(&self) -> usize;
    /// Whether nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
