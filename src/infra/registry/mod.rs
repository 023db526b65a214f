//! Node registry backends.

pub mod memory;

pub use memory::InMemoryNodeRegistry;
