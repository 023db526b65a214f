//! Tests for event records and sinks

use prometheus_compute_coordinator::core::{
    BroadcastEventSink, CoordinatorEvent, EventRecord, EventSink, InMemoryEventSink, Priority,
};

fn queued(id: &str) -> EventRecord {
    EventRecord::new(CoordinatorEvent::TaskQueued {
        task_id: id.to_string(),
        priority: Priority::DEFAULT,
    })
}

#[test]
fn test_event_names_are_snake_case() {
    let record = queued("t1");
    assert_eq!(record.event.name(), "task_queued");
    assert_eq!(record.event.task_id(), "t1");
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["event"], "task_queued");
    assert_eq!(json["priority"], 5);
}

#[test]
fn test_in_memory_sink_filters_by_task() {
    let sink = InMemoryEventSink::new(16);
    sink.emit(queued("a"));
    sink.emit(queued("b"));
    sink.emit(EventRecord::new(CoordinatorEvent::TaskCancelled {
        task_id: "a".to_string(),
    }));
    assert_eq!(sink.names_for("a"), vec!["task_queued", "task_cancelled"]);
    assert_eq!(sink.events().len(), 3);
}

#[test]
fn test_event_ids_are_unique() {
    assert_ne!(queued("a").event_id, queued("a").event_id);
}

#[tokio::test]
async fn test_broadcast_sink_fans_out() {
    let sink = BroadcastEventSink::new(8);
    // Emitting with no subscribers is fine
    sink.emit(queued("early"));

    let mut first = sink.subscribe();
    let mut second = sink.subscribe();
    sink.emit(queued("t1"));

    assert_eq!(first.recv().await.unwrap().event.task_id(), "t1");
    assert_eq!(second.recv().await.unwrap().event.task_id(), "t1");
}
