//! Configuration models for the scheduler and the resource ledger.

pub mod coordinator;

pub use coordinator::{AllocationStrategy, CoordinatorConfig, LedgerConfig, SchedulerConfig};
