//! Tests for error types

use prometheus_compute_coordinator::core::{ExecutionError, SchedulerError, ValidationError};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("10000 tasks queued".to_string());
    assert_eq!(format!("{}", err), "queue full: 10000 tasks queued");
}

#[test]
fn test_task_not_found_error() {
    let err = SchedulerError::TaskNotFound("t1".to_string());
    assert_eq!(format!("{}", err), "task not found: t1");
}

#[test]
fn test_invalid_state_error() {
    let err = SchedulerError::InvalidState {
        task: "t1".to_string(),
        action: "cancelled",
        status: "running".to_string(),
    };
    assert_eq!(format!("{}", err), "task t1 cannot be cancelled while running");
}

#[test]
fn test_allocation_error() {
    let err = SchedulerError::Allocation {
        node: "gpu-1".to_string(),
        reason: "gpu: requested 8.00, usable 3.60 of 4.00 available".to_string(),
    };
    assert!(format!("{}", err).starts_with("insufficient capacity on node gpu-1: gpu"));
}

#[test]
fn test_already_released_error() {
    let err = SchedulerError::AllocationAlreadyReleased("alloc_1".to_string());
    assert_eq!(format!("{}", err), "allocation already released: alloc_1");
}

#[test]
fn test_validation_error_wraps() {
    let err: SchedulerError = ValidationError::MissingPayload.into();
    assert_eq!(format!("{}", err), "validation failed: payload is required");
    let err: SchedulerError = ValidationError::NoExecutor("training".into()).into();
    assert!(format!("{}", err).contains("no executor registered for task type `training`"));
}

#[test]
fn test_execution_error() {
    assert_eq!(format!("{}", ExecutionError::Cancelled), "execution cancelled");
    let err = ExecutionError::Failed("oom".to_string());
    assert_eq!(format!("{}", err), "execution failed: oom");
}
