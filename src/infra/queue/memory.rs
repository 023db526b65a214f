//! In-memory pending queue kept sorted by ordered insertion.

use std::cmp::{Ordering, Reverse};

use crate::core::{QueueEntry, SchedulerError, TaskQueue};
use crate::util::TaskId;

/// Sort key: priority descending, then creation time and sequence ascending.
fn dispatch_key(entry: &QueueEntry) -> (Reverse<u8>, u64, u64) {
    (Reverse(entry.priority.value()), entry.created_at_ms, entry.seq)
}

/// In-memory queue backed by a sorted vector.
///
/// Enqueue is a binary search plus an insert; the scheduler walks the queue
/// front to back every tick, so a flat vector beats a heap here.
pub struct InMemoryQueue {
    max_depth: usize,
    entries: Vec<QueueEntry>,
}

impl InMemoryQueue {
    /// Create a new in-memory queue with a maximum depth.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            entries: Vec::with_capacity(max_depth.min(1024)),
        }
    }

    /// Entries in dispatch order.
    #[must_use]
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }
}

impl TaskQueue for InMemoryQueue {
    fn enqueue(&mut self, entry: QueueEntry) -> Result<(), SchedulerError> {
        if self.entries.len() >= self.max_depth {
            return Err(SchedulerError::QueueFull("max queue depth reached".into()));
        }
        if self.contains(&entry.task_id) {
            return Ok(());
        }
        let key = dispatch_key(&entry);
        let pos = self
            .entries
            .partition_point(|e| dispatch_key(e).cmp(&key) != Ordering::Greater);
        self.entries.insert(pos, entry);
        Ok(())
    }

    fn remove(&mut self, task_id: &str) -> Option<QueueEntry> {
        let pos = self.entries.iter().position(|e| e.task_id == task_id)?;
        Some(self.entries.remove(pos))
    }

    fn contains(&self, task_id: &str) -> bool {
        self.entries.iter().any(|e| e.task_id == task_id)
    }

    fn ordered_ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|e| e.task_id.clone()).collect()
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
