use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Selection strategy `WorkDistributor` uses to pick a delegatee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    ParetoWeighted,
    ParetoCrowding,
    SingleSolution,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::RoundRobin
    }
}

/// Mesh lifecycle timing: heartbeats, failure-detector sweep thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub heartbeat_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub suspected_after_ms: u64,
    pub unreachable_after_ms: u64,
    pub evict_after_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2_000,
            sweep_interval_ms: 5_000,
            suspected_after_ms: 10_000,
            unreachable_after_ms: 20_000,
            evict_after_ms: 60_000,
        }
    }
}

/// Delegation lifecycle: timeout, retries, selection strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub delegation_timeout_ms: u64,
    pub max_retries: u32,
    pub strategy: Strategy,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            delegation_timeout_ms: 15_000,
            max_retries: 2,
            strategy: Strategy::default(),
        }
    }
}

/// `OptimizationLoop` tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub drift_threshold: f64,
    pub overhead_factor: f64,
    pub min_time_before_redelegate_ms: u64,
    pub evaluation_interval_ms: u64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.3,
            overhead_factor: 0.2,
            min_time_before_redelegate_ms: 60_000,
            evaluation_interval_ms: 5_000,
        }
    }
}

/// `TaskMonitor` checkpoint polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub poll_interval_ms: u64,
    pub max_missed_checkpoints: u32,
    pub checkpoint_timeout_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_missed_checkpoints: 3,
            checkpoint_timeout_ms: 5_000,
        }
    }
}

/// Delegation Capability Token defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DctConfig {
    pub default_expiry_ms: u64,
    pub max_caveat_depth: u32,
}

impl Default for DctConfig {
    fn default() -> Self {
        Self {
            default_expiry_ms: 3_600_000,
            max_caveat_depth: 10,
        }
    }
}

/// External budget-alert trigger threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub alert_threshold_fraction: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { alert_threshold_fraction: 0.8 }
    }
}

/// `ExternalTriggerHandler` tuning: preemption floor and listener registry
/// size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// An active delegation is only a preemption candidate if its priority
    /// is below this value.
    pub min_priority_to_preempt: i32,
    /// Per-trigger-type listener registry cap, FIFO eviction beyond it.
    pub listener_cap: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self { min_priority_to_preempt: 5, listener_cap: 100 }
    }
}

/// Top-level swarm node configuration, deep-merged from YAML layers by
/// [`crate::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whether to accept peer-facing endpoints at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// This node's reachable base URL, advertised to peers.
    pub api_url: String,
    /// Human-readable node name.
    pub node_name: String,
    /// Declared capabilities offered to delegators.
    pub capabilities: Vec<String>,
    /// Seed peer API URLs fetched on startup.
    pub seeds: Vec<String>,
    /// Enable multicast mDNS-style announce/query.
    pub mdns: bool,
    /// Enable gossip ingestion from peers.
    pub gossip: bool,
    /// Symmetric key shared across the mesh for HMAC attestations, hex-encoded.
    /// Empty string means "generate a random key for this process only" (tests
    /// and single-node demos); production deployments must set this.
    pub swarm_secret: String,
    /// Address the HTTP transport listens on, e.g. "0.0.0.0:3200".
    pub bind_addr: String,
    /// Path to the reputation JSONL store. Empty means in-memory only.
    pub reputation_path: String,

    pub mesh: MeshConfig,
    pub distributor: DistributorConfig,
    pub optimization: OptimizationConfig,
    pub monitoring: MonitoringConfig,
    pub dct: DctConfig,
    pub budget: BudgetConfig,
    pub trigger: TriggerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: String::new(),
            node_name: String::new(),
            capabilities: Vec::new(),
            seeds: Vec::new(),
            mdns: false,
            gossip: true,
            swarm_secret: String::new(),
            bind_addr: "127.0.0.1:3200".to_string(),
            reputation_path: String::new(),
            mesh: MeshConfig::default(),
            distributor: DistributorConfig::default(),
            optimization: OptimizationConfig::default(),
            monitoring: MonitoringConfig::default(),
            dct: DctConfig::default(),
            budget: BudgetConfig::default(),
            trigger: TriggerConfig::default(),
        }
    }
}
