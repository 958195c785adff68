//! Kernel configuration
//!
//! One YAML file configures the whole substrate: rate limits per resource,
//! contract policy defaults, autonomous-loop tuning and the cost tables.
//! Every section has a usable default so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KernelConfig {
    /// Rolling-window limits, keyed by resource name
    #[serde(default)]
    pub rate_limiting: HashMap<String, RateLimitSettings>,

    /// Contract resolution and sandbox settings
    #[serde(default)]
    pub contracts: ContractSettings,

    /// Autonomous loop scheduling
    #[serde(default)]
    pub execution: ExecutionSettings,

    /// Scrip and budget cost tables
    #[serde(default)]
    pub costs: CostSettings,

    /// Event log sink
    #[serde(default)]
    pub event_log: EventLogSettings,
}

impl KernelConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: KernelConfig = serde_yml::from_str(&content)?;
        Ok(config)
    }

    /// Look up a configured rate limit, skipping disabled entries
    pub fn rate_limit(&self, resource: &str) -> Option<&RateLimitSettings> {
        self.rate_limiting.get(resource).filter(|l| l.enabled)
    }
}

/// Rolling-window limit for one renewable resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Window length in seconds
    pub window_seconds: f64,
    /// Maximum amount consumable per window
    pub capacity: f64,
    /// Disabled limits are kept in config but never enforced
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_seconds)
    }
}

/// Built-in policy applied when an artifact has no access contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    #[default]
    CreatorOnly,
    Freeware,
    Private,
}

/// Contract resolution and sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSettings {
    /// Policy applied when `access_contract_id` is null
    #[serde(default)]
    pub default_when_null: DefaultPolicy,

    /// Contract artifact substituted when `access_contract_id` dangles
    #[serde(default = "default_on_missing")]
    pub default_on_missing: String,

    /// Bound on nested permission checks
    #[serde(default = "default_permission_depth")]
    pub max_permission_depth: u32,

    /// Wall-clock budget for one contract evaluation
    #[serde(default = "default_sandbox_timeout")]
    pub sandbox_timeout_seconds: f64,
}

impl Default for ContractSettings {
    fn default() -> Self {
        Self {
            default_when_null: DefaultPolicy::default(),
            default_on_missing: default_on_missing(),
            max_permission_depth: default_permission_depth(),
            sandbox_timeout_seconds: default_sandbox_timeout(),
        }
    }
}

impl ContractSettings {
    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.sandbox_timeout_seconds)
    }
}

/// Autonomous loop scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Whether principals with `can_execute` get a worker at startup
    #[serde(default = "default_true")]
    pub use_autonomous_loops: bool,

    #[serde(default)]
    pub agent_loop: LoopSettings,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            use_autonomous_loops: true,
            agent_loop: LoopSettings::default(),
        }
    }
}

/// Per-worker loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Pause between iterations when everything is healthy
    #[serde(default = "default_min_loop_delay")]
    pub min_loop_delay_ms: u64,

    /// Cap for the error backoff delay
    #[serde(default = "default_max_loop_delay")]
    pub max_loop_delay_ms: u64,

    /// Recheck interval while paused on resource exhaustion
    #[serde(default = "default_resource_check")]
    pub resource_check_interval_ms: u64,

    /// Consecutive failures before the worker parks itself
    #[serde(default = "default_max_errors")]
    pub max_consecutive_errors: u32,

    /// Renewable resources gated before each iteration
    #[serde(default)]
    pub resources_to_check: Vec<String>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            min_loop_delay_ms: default_min_loop_delay(),
            max_loop_delay_ms: default_max_loop_delay(),
            resource_check_interval_ms: default_resource_check(),
            max_consecutive_errors: default_max_errors(),
            resources_to_check: Vec::new(),
        }
    }
}

impl LoopSettings {
    pub fn min_loop_delay(&self) -> Duration {
        Duration::from_millis(self.min_loop_delay_ms)
    }

    pub fn max_loop_delay(&self) -> Duration {
        Duration::from_millis(self.max_loop_delay_ms)
    }

    pub fn resource_check_interval(&self) -> Duration {
        Duration::from_millis(self.resource_check_interval_ms)
    }
}

/// Scrip and budget cost tables
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CostSettings {
    /// Budget debited per kernel operation, keyed by operation name
    #[serde(default)]
    pub operations: HashMap<String, f64>,

    /// Per-model token prices for decision-engine collaborators
    #[serde(default)]
    pub llm: HashMap<String, ModelCost>,
}

impl CostSettings {
    /// Budget cost for one operation; unconfigured operations are free
    pub fn operation(&self, op: &str) -> f64 {
        self.operations.get(op).copied().unwrap_or(0.0)
    }
}

/// Token prices for one model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelCost {
    #[serde(default)]
    pub input_per_token: f64,
    #[serde(default)]
    pub output_per_token: f64,
}

/// Event log sink
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventLogSettings {
    /// Newline-delimited JSON file, one event per line, append-only
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_on_missing() -> String {
    crate::contract::FREEWARE_CONTRACT_ID.to_string()
}

fn default_permission_depth() -> u32 {
    10
}

fn default_sandbox_timeout() -> f64 {
    30.0
}

fn default_min_loop_delay() -> u64 {
    100
}

fn default_max_loop_delay() -> u64 {
    30_000
}

fn default_resource_check() -> u64 {
    1_000
}

fn default_max_errors() -> u32 {
    5
}
