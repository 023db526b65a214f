//! Worker node snapshots and the node registry seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{ResourceVector, SchedulerError};
use crate::util::NodeId;

/// Registry-reported node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Accepting work.
    #[default]
    Active,
    /// Online but refusing new work.
    Busy,
    /// Under maintenance.
    Maintenance,
    /// Not reachable.
    Offline,
}

/// Hardware specification of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpecs {
    /// CPU cores.
    #[serde(default)]
    pub cpu_cores: f64,
    /// System memory in GB.
    #[serde(default)]
    pub memory_gb: f64,
    /// Whether a GPU is present.
    #[serde(default)]
    pub has_gpu: bool,
    /// GPU memory in GB.
    #[serde(default)]
    pub gpu_memory_gb: f64,
    /// Network bandwidth in Mbps.
    #[serde(default)]
    pub network_mbps: f64,
    /// Storage in GB.
    #[serde(default)]
    pub storage_gb: f64,
}

impl NodeSpecs {
    /// True if the node exposes a GPU.
    #[must_use]
    pub fn gpu_present(&self) -> bool {
        self.has_gpu || self.gpu_memory_gb > 0.0
    }

    /// Total capacity as a ledger resource vector.
    #[must_use]
    pub const fn total_resources(&self) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu_cores,
            memory: self.memory_gb,
            gpu: self.gpu_memory_gb,
            network: self.network_mbps,
            storage: self.storage_gb,
        }
    }
}

/// Point-in-time view of a worker node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Node identifier.
    pub id: NodeId,
    /// Reported status.
    #[serde(default)]
    pub status: NodeStatus,
    /// Tasks currently assigned.
    #[serde(default)]
    pub current_load: u32,
    /// Maximum concurrent tasks.
    pub max_load: u32,
    /// Hardware specification.
    #[serde(default)]
    pub specs: NodeSpecs,
    /// Declared capabilities (e.g. `text-generation`).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Region label.
    #[serde(default)]
    pub region: Option<String>,
    /// Node class label (e.g. `gpu-a100`).
    #[serde(default)]
    pub node_type: Option<String>,
}

impl NodeSnapshot {
    /// Create an active node with the given id, capacity and specs.
    pub fn new(id: impl Into<NodeId>, max_load: u32, specs: NodeSpecs) -> Self {
        Self {
            id: id.into(),
            status: NodeStatus::Active,
            current_load: 0,
            max_load,
            specs,
            capabilities: Vec::new(),
            region: None,
            node_type: None,
        }
    }

    /// Add capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(caps.into_iter().map(Into::into));
        self
    }

    /// Set region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set node type.
    #[must_use]
    pub fn with_node_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    /// Active and below its load limit.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == NodeStatus::Active && self.current_load < self.max_load
    }

    /// `current_load / max_load`, `1.0` for a zero-capacity node.
    #[must_use]
    pub fn load_ratio(&self) -> f64 {
        if self.max_load == 0 {
            1.0
        } else {
            f64::from(self.current_load) / f64::from(self.max_load)
        }
    }
}

/// Source of node snapshots and owner of per-node load counters.
///
/// Heartbeats and registration live outside this crate; the scheduler only
/// reads snapshots and bumps load counters around assignments.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Nodes whose status is active.
    async fn active_nodes(&self) -> Result<Vec<NodeSnapshot>, SchedulerError>;
    /// Record one more task running on the node.
    async fn increment_load(&self, node_id: &str) -> Result<(), SchedulerError>;
    /// Record one fewer task running on the node.
    async fn decrement_load(&self, node_id: &str) -> Result<(), SchedulerError>;
}
