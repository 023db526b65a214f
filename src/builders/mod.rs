//! Builders wiring a coordinator from configuration.

pub mod coordinator_builder;

pub use coordinator_builder::CoordinatorBuilder;
