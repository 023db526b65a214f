//! Tests for configuration validation

use prometheus_compute_coordinator::config::{
    AllocationStrategy, CoordinatorConfig, LedgerConfig, SchedulerConfig,
};

#[test]
fn test_scheduler_config_defaults() {
    let config = SchedulerConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.scheduling_interval_ms, 1_000);
    assert_eq!(config.task_timeout_ms, 300_000);
    assert_eq!(config.timeout_check_interval_ms, 30_000);
    assert_eq!(config.default_max_retries, 3);
    assert!(config.enable_retries);
    assert!(config.max_concurrent_tasks > 0);
}

#[test]
fn test_scheduler_config_invalid_concurrency() {
    let invalid = SchedulerConfig {
        max_concurrent_tasks: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_queue_depth() {
    let invalid = SchedulerConfig {
        max_queue_depth: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_ledger_config_defaults() {
    let config = LedgerConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.allocation_strategy, AllocationStrategy::Balanced);
    assert_eq!(config.allocation_interval_ms, 5_000);
    assert_eq!(config.metrics_interval_ms, 10_000);
    assert!(config.enable_dynamic_allocation);
}

#[test]
fn test_ledger_config_invalid_buffer_ratio() {
    for ratio in [-0.1, 1.0, 1.5] {
        let invalid = LedgerConfig {
            resource_buffer_ratio: ratio,
            ..LedgerConfig::default()
        };
        assert!(invalid.validate().is_err(), "ratio {ratio} accepted");
    }
}

#[test]
fn test_allocation_strategy_parsing() {
    assert_eq!("Greedy".parse::<AllocationStrategy>(), Ok(AllocationStrategy::Greedy));
    assert_eq!(" energy ".parse::<AllocationStrategy>(), Ok(AllocationStrategy::Energy));
    assert!("cheapest".parse::<AllocationStrategy>().is_err());
}

#[test]
fn test_coordinator_config_from_json() {
    let config = CoordinatorConfig::from_json_str(
        r#"{"scheduler": {"max_queue_depth": 5}, "ledger": {"allocation_strategy": "performance"}}"#,
    )
    .unwrap();
    assert_eq!(config.scheduler.max_queue_depth, 5);
    assert_eq!(config.scheduler.default_max_retries, 3);
    assert_eq!(config.ledger.allocation_strategy, AllocationStrategy::Performance);
}

#[test]
fn test_coordinator_config_rejects_invalid_section() {
    let err = CoordinatorConfig::from_json_str(r#"{"ledger": {"history_capacity": 0}}"#).unwrap_err();
    assert!(err.starts_with("ledger invalid"));
    let err = CoordinatorConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}
