//! # Prometheus Compute Coordinator
//!
//! Coordination core for a distributed AI-compute network. Callers submit
//! compute tasks; the coordinator matches each one to a worker node that
//! satisfies its requirements, reserves the node's resources, runs the task
//! through an external executor and drives it to completion, retrying,
//! timing out or cascading failure to dependents along the way.
//!
//! ## Components
//!
//! - **[`core::Scheduler`]**: priority queue (descending priority, FIFO inside
//!   a band), compatibility-scored node matching, task state machine,
//!   retries with priority bumps, poll-based timeouts and dependency cascades.
//! - **[`core::ResourceLedger`]**: per-node cpu/memory/gpu/network/storage
//!   accounting with buffer-aware admission, four node-selection strategies,
//!   fragmentation and utilization metrics, and an advisory rebalance pass.
//! - **[`runtime::Coordinator`]**: owns one scheduler and one ledger and runs
//!   their four periodic loops until shutdown.
//!
//! Node discovery and workload execution stay outside the crate behind the
//! [`core::NodeRegistry`] and [`core::TaskExecutor`] traits.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_compute_coordinator::builders::CoordinatorBuilder;
//! use prometheus_compute_coordinator::config::CoordinatorConfig;
//! use prometheus_compute_coordinator::core::{TaskSpec, TaskType};
//! use prometheus_compute_coordinator::infra::InMemoryNodeRegistry;
//! use serde_json::json;
//!
//! let registry = Arc::new(InMemoryNodeRegistry::new());
//! let coordinator = CoordinatorBuilder::new(CoordinatorConfig::from_env()?)
//!     .registry(registry.clone())
//!     .executor(TaskType::Inference, Arc::new(my_inference_executor))
//!     .build()?;
//! coordinator.spawn_loops();
//!
//! let id = coordinator
//!     .scheduler()
//!     .submit_task(TaskSpec::new(TaskType::Inference, json!({"prompt": "hi"})))?;
//! ```
//!
//! For complete flows, see `tests/scheduler_lifecycle_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core coordination model: tasks, nodes, scheduler and resource ledger.
pub mod core;
/// Configuration models for the scheduler and the ledger.
pub mod config;
/// Builders wiring a coordinator from configuration.
pub mod builders;
/// Infrastructure adapters: queue backends and node registries.
pub mod infra;
/// Coordinator runtime and API models.
pub mod runtime;
/// Shared utilities.
pub mod util;
