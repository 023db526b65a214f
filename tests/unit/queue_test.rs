//! Tests for the in-memory pending queue

use prometheus_compute_coordinator::core::{Priority, QueueEntry, SchedulerError, TaskQueue};
use prometheus_compute_coordinator::infra::InMemoryQueue;

fn entry(id: &str, priority: u8, created_at_ms: u64, seq: u64) -> QueueEntry {
    QueueEntry {
        task_id: id.to_string(),
        priority: Priority::new(priority).unwrap(),
        created_at_ms,
        seq,
    }
}

#[test]
fn test_priority_then_age_ordering() {
    let mut queue = InMemoryQueue::new(10);
    queue.enqueue(entry("old-low", 2, 1, 1)).unwrap();
    queue.enqueue(entry("new-high", 9, 5, 2)).unwrap();
    queue.enqueue(entry("old-high", 9, 3, 3)).unwrap();
    queue.enqueue(entry("same-time", 9, 3, 4)).unwrap();
    assert_eq!(
        queue.ordered_ids(),
        vec!["old-high", "same-time", "new-high", "old-low"]
    );
}

#[test]
fn test_queue_full() {
    let mut queue = InMemoryQueue::new(1);
    queue.enqueue(entry("a", 5, 1, 1)).unwrap();
    let err = queue.enqueue(entry("b", 5, 2, 2)).unwrap_err();
    assert!(matches!(err, SchedulerError::QueueFull(_)));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.max_depth(), 1);
}

#[test]
fn test_remove_and_reenqueue() {
    let mut queue = InMemoryQueue::new(10);
    queue.enqueue(entry("a", 5, 1, 1)).unwrap();
    queue.enqueue(entry("b", 5, 2, 2)).unwrap();
    assert!(queue.remove("a").is_some());
    assert!(queue.remove("a").is_none());
    assert!(!queue.contains("a"));

    // Retried task comes back with a bumped priority
    queue.enqueue(entry("a", 6, 1, 3)).unwrap();
    assert_eq!(queue.ordered_ids(), vec!["a", "b"]);
    assert!(!queue.is_empty());
}

#[test]
fn test_enqueue_is_idempotent_per_task() {
    let mut queue = InMemoryQueue::new(10);
    queue.enqueue(entry("a", 5, 1, 1)).unwrap();
    queue.enqueue(entry("a", 5, 1, 2)).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.entries()[0].seq, 1);
}
