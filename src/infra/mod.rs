//! Infrastructure adapters: queue and node registry backends.

pub mod queue;
pub mod registry;

pub use queue::InMemoryQueue;
pub use registry::InMemoryNodeRegistry;
