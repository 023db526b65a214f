//! In-memory node registry for embedding and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{NodeRegistry, NodeSnapshot, NodeStatus, SchedulerError};

/// Node registry holding snapshots in a map, preserving registration order.
#[derive(Default)]
pub struct InMemoryNodeRegistry {
    nodes: RwLock<HashMap<String, NodeSnapshot>>,
    order: RwLock<Vec<String>>,
}

impl InMemoryNodeRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node.
    pub fn register(&self, node: NodeSnapshot) {
        let id = node.id.clone();
        if self.nodes.write().insert(id.clone(), node).is_none() {
            self.order.write().push(id);
        }
    }

    /// Drop a node.
    pub fn deregister(&self, node_id: &str) -> Option<NodeSnapshot> {
        self.order.write().retain(|id| id != node_id);
        self.nodes.write().remove(node_id)
    }

    /// Change a node's status.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NodeNotFound`] for unknown ids.
    pub fn set_status(&self, node_id: &str, status: NodeStatus) -> Result<(), SchedulerError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        node.status = status;
        Ok(())
    }

    /// Current snapshot of one node.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<NodeSnapshot> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Current load of one node.
    #[must_use]
    pub fn load(&self, node_id: &str) -> Option<u32> {
        self.nodes.read().get(node_id).map(|n| n.current_load)
    }
}

#[async_trait]
impl NodeRegistry for InMemoryNodeRegistry {
    async fn active_nodes(&self) -> Result<Vec<NodeSnapshot>, SchedulerError> {
        let nodes = self.nodes.read();
        Ok(self
            .order
            .read()
            .iter()
            .filter_map(|id| nodes.get(id))
            .filter(|n| n.status == NodeStatus::Active)
            .cloned()
            .collect())
    }

    async fn increment_load(&self, node_id: &str) -> Result<(), SchedulerError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        node.current_load = node.current_load.saturating_add(1);
        Ok(())
    }

    async fn decrement_load(&self, node_id: &str) -> Result<(), SchedulerError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        node.current_load = node.current_load.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeSpecs;

    #[tokio::test]
    async fn load_counters_and_status_filter() {
        let registry = InMemoryNodeRegistry::new();
        registry.register(NodeSnapshot::new("a", 2, NodeSpecs::default()));
        registry.register(NodeSnapshot::new("b", 2, NodeSpecs::default()));
        registry.set_status("b", NodeStatus::Maintenance).unwrap();

        let active = registry.active_nodes().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");

        registry.increment_load("a").await.unwrap();
        registry.increment_load("a").await.unwrap();
        registry.decrement_load("a").await.unwrap();
        assert_eq!(registry.load("a"), Some(1));

        registry.decrement_load("a").await.unwrap();
        registry.decrement_load("a").await.unwrap();
        assert_eq!(registry.load("a"), Some(0));

        assert!(registry.increment_load("missing").await.is_err());
    }
}
