//! Scheduler and ledger configuration structures.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Node-selection strategy used by the resource ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Most free cpu + memory + gpu.
    Greedy,
    /// Most even utilization across resource types.
    #[default]
    Balanced,
    /// Best historical performance.
    Performance,
    /// Mean cpu/memory utilization closest to 75%.
    Energy,
}

impl FromStr for AllocationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greedy" => Ok(Self::Greedy),
            "balanced" => Ok(Self::Balanced),
            "performance" => Ok(Self::Performance),
            "energy" => Ok(Self::Energy),
            other => Err(format!("unknown allocation strategy `{other}`")),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on tasks assigned or running at once.
    pub max_concurrent_tasks: usize,
    /// Scheduling tick interval.
    pub scheduling_interval_ms: u64,
    /// Running time after which an attempt is failed.
    pub task_timeout_ms: u64,
    /// Timeout check interval.
    pub timeout_check_interval_ms: u64,
    /// Retry failed attempts.
    pub enable_retries: bool,
    /// Retry budget for tasks that do not set one.
    pub default_max_retries: u32,
    /// Maximum queued tasks before rejection.
    pub max_queue_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: num_cpus::get() * 4,
            scheduling_interval_ms: 1_000,
            task_timeout_ms: 300_000,
            timeout_check_interval_ms: 30_000,
            enable_retries: true,
            default_max_retries: 3,
            max_queue_depth: 10_000,
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_tasks == 0 {
            return Err("max_concurrent_tasks must be greater than 0".into());
        }
        if self.scheduling_interval_ms == 0 {
            return Err("scheduling_interval_ms must be greater than 0".into());
        }
        if self.task_timeout_ms == 0 {
            return Err("task_timeout_ms must be greater than 0".into());
        }
        if self.timeout_check_interval_ms == 0 {
            return Err("timeout_check_interval_ms must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        Ok(())
    }

    /// Scheduling tick interval.
    #[must_use]
    pub const fn scheduling_interval(&self) -> Duration {
        Duration::from_millis(self.scheduling_interval_ms)
    }

    /// Timeout check interval.
    #[must_use]
    pub const fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms)
    }
}

/// Resource ledger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Node-selection strategy for queued allocation requests.
    pub allocation_strategy: AllocationStrategy,
    /// Share of available capacity that must stay free.
    pub resource_buffer_ratio: f64,
    /// Allocation tick interval.
    pub allocation_interval_ms: u64,
    /// Metrics tick interval.
    pub metrics_interval_ms: u64,
    /// Run the defragmentation/consolidation passes.
    pub enable_dynamic_allocation: bool,
    /// Capacity of each per-node history ring buffer.
    pub history_capacity: usize,
    /// Queued allocation requests drained per tick.
    pub max_requests_per_tick: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            allocation_strategy: AllocationStrategy::Balanced,
            resource_buffer_ratio: 0.10,
            allocation_interval_ms: 5_000,
            metrics_interval_ms: 10_000,
            enable_dynamic_allocation: true,
            history_capacity: 100,
            max_requests_per_tick: 10,
        }
    }
}

impl LedgerConfig {
    /// Validate ledger configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..1.0).contains(&self.resource_buffer_ratio) {
            return Err("resource_buffer_ratio must be in [0, 1)".into());
        }
        if self.allocation_interval_ms == 0 {
            return Err("allocation_interval_ms must be greater than 0".into());
        }
        if self.metrics_interval_ms == 0 {
            return Err("metrics_interval_ms must be greater than 0".into());
        }
        if self.history_capacity == 0 {
            return Err("history_capacity must be greater than 0".into());
        }
        if self.max_requests_per_tick == 0 {
            return Err("max_requests_per_tick must be greater than 0".into());
        }
        Ok(())
    }

    /// Allocation tick interval.
    #[must_use]
    pub const fn allocation_interval(&self) -> Duration {
        Duration::from_millis(self.allocation_interval_ms)
    }

    /// Metrics tick interval.
    #[must_use]
    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Resource ledger settings.
    pub ledger: LedgerConfig,
}

impl CoordinatorConfig {
    /// Validate both sections.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field, prefixed with its section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.ledger
            .validate()
            .map_err(|e| format!("ledger invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` (if present) and build configuration from `COORDINATOR_*`
    /// environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Fails when a variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup over the defaults.
    ///
    /// Recognized keys: `COORDINATOR_MAX_CONCURRENT_TASKS`,
    /// `COORDINATOR_SCHEDULING_INTERVAL_MS`, `COORDINATOR_TASK_TIMEOUT_MS`,
    /// `COORDINATOR_TIMEOUT_CHECK_INTERVAL_MS`, `COORDINATOR_ENABLE_RETRIES`,
    /// `COORDINATOR_DEFAULT_MAX_RETRIES`, `COORDINATOR_MAX_QUEUE_DEPTH`,
    /// `COORDINATOR_ALLOCATION_STRATEGY`, `COORDINATOR_RESOURCE_BUFFER_RATIO`,
    /// `COORDINATOR_ALLOCATION_INTERVAL_MS`, `COORDINATOR_METRICS_INTERVAL_MS`,
    /// `COORDINATOR_ENABLE_DYNAMIC_ALLOCATION`.
    ///
    /// # Errors
    ///
    /// Fails when a value does not parse or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let s = &mut cfg.scheduler;
        override_from(&lookup, "COORDINATOR_MAX_CONCURRENT_TASKS", &mut s.max_concurrent_tasks)?;
        override_from(&lookup, "COORDINATOR_SCHEDULING_INTERVAL_MS", &mut s.scheduling_interval_ms)?;
        override_from(&lookup, "COORDINATOR_TASK_TIMEOUT_MS", &mut s.task_timeout_ms)?;
        override_from(&lookup, "COORDINATOR_TIMEOUT_CHECK_INTERVAL_MS", &mut s.timeout_check_interval_ms)?;
        override_from(&lookup, "COORDINATOR_ENABLE_RETRIES", &mut s.enable_retries)?;
        override_from(&lookup, "COORDINATOR_DEFAULT_MAX_RETRIES", &mut s.default_max_retries)?;
        override_from(&lookup, "COORDINATOR_MAX_QUEUE_DEPTH", &mut s.max_queue_depth)?;

        let l = &mut cfg.ledger;
        override_from(&lookup, "COORDINATOR_ALLOCATION_STRATEGY", &mut l.allocation_strategy)?;
        override_from(&lookup, "COORDINATOR_RESOURCE_BUFFER_RATIO", &mut l.resource_buffer_ratio)?;
        override_from(&lookup, "COORDINATOR_ALLOCATION_INTERVAL_MS", &mut l.allocation_interval_ms)?;
        override_from(&lookup, "COORDINATOR_METRICS_INTERVAL_MS", &mut l.metrics_interval_ms)?;
        override_from(&lookup, "COORDINATOR_ENABLE_DYNAMIC_ALLOCATION", &mut l.enable_dynamic_allocation)?;

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn override_from<F, T>(lookup: &F, key: &str, target: &mut T) -> AppResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value `{raw}` for {key}"))?;
    }
    Ok(())
}
