//! Multi-dimensional resource vectors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource dimensions tracked per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU cores.
    Cpu,
    /// System memory in GB.
    Memory,
    /// GPU memory in GB.
    Gpu,
    /// Network bandwidth in Mbps.
    Network,
    /// Disk storage in GB.
    Storage,
}

impl ResourceKind {
    /// Every resource dimension, in a stable order.
    pub const ALL: [Self; 5] = [
        Self::Cpu,
        Self::Memory,
        Self::Gpu,
        Self::Network,
        Self::Storage,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Gpu => "gpu",
            Self::Network => "network",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One amount per resource dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    /// CPU cores.
    #[serde(default)]
    pub cpu: f64,
    /// Memory in GB.
    #[serde(default)]
    pub memory: f64,
    /// GPU memory in GB.
    #[serde(default)]
    pub gpu: f64,
    /// Network bandwidth in Mbps.
    #[serde(default)]
    pub network: f64,
    /// Storage in GB.
    #[serde(default)]
    pub storage: f64,
}

impl ResourceVector {
    /// Amount for one dimension.
    #[must_use]
    pub const fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
            ResourceKind::Gpu => self.gpu,
            ResourceKind::Network => self.network,
            ResourceKind::Storage => self.storage,
        }
    }

    /// Mutable amount for one dimension.
    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut f64 {
        match kind {
            ResourceKind::Cpu => &mut self.cpu,
            ResourceKind::Memory => &mut self.memory,
            ResourceKind::Gpu => &mut self.gpu,
            ResourceKind::Network => &mut self.network,
            ResourceKind::Storage => &mut self.storage,
        }
    }

    /// Iterate `(kind, amount)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, f64)> + '_ {
        ResourceKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }

    /// Dimensions with a strictly positive amount.
    pub fn requested(&self) -> impl Iterator<Item = (ResourceKind, f64)> + '_ {
        self.iter().filter(|(_, v)| *v > 0.0)
    }

    /// Build a vector by evaluating `f` for every dimension.
    pub fn from_fn(mut f: impl FnMut(ResourceKind) -> f64) -> Self {
        let mut out = Self::default();
        for kind in ResourceKind::ALL {
            *out.get_mut(kind) = f(kind);
        }
        out
    }

    /// Component-wise `self + other`.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self::from_fn(|k| self.get(k) + other.get(k))
    }

    /// Component-wise `self - other`, clamped at zero.
    #[must_use]
    pub fn saturating_sub(&self, other: &Self) -> Self {
        Self::from_fn(|k| (self.get(k) - other.get(k)).max(0.0))
    }

    /// Component-wise scaling.
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        Self::from_fn(|k| self.get(k) * factor)
    }

    /// True when every dimension is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.iter().all(|(_, v)| v == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_skips_zero_dimensions() {
        let v = ResourceVector {
            cpu: 2.0,
            gpu: 8.0,
            ..ResourceVector::default()
        };
        let kinds: Vec<_> = v.requested().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![ResourceKind::Cpu, ResourceKind::Gpu]);
    }

    #[test]
    fn saturating_sub_clamps() {
        let a = ResourceVector {
            cpu: 1.0,
            memory: 4.0,
            ..ResourceVector::default()
        };
        let b = ResourceVector {
            cpu: 2.0,
            memory: 1.0,
            ..ResourceVector::default()
        };
        let d = a.saturating_sub(&b);
        assert_eq!(d.cpu, 0.0);
        assert_eq!(d.memory, 3.0);
    }
}
