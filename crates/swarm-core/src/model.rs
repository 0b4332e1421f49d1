//! Shared task/result vocabulary used across Transport, WorkDistributor,
//! TaskMonitor, ResultAggregator, and OutcomeVerifier.

use serde::{Deserialize, Serialize};

use crate::attestation::TaskAttestation;

/// Terminal outcome of a delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcomeStatus {
    Completed,
    Failed,
    Aborted,
}

/// Status reported by a `task/:id/status` checkpoint poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// One unit of evidence produced while executing a task. `step_title` is
/// prefixed by `[peer_node_id]` when merged by `ResultAggregator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub step_title: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub tool: Option<String>,
    #[serde(default = "default_true")]
    pub succeeded: bool,
}

fn default_true() -> bool {
    true
}

/// Result of a delegated task, produced by the kernel the swarm treats as an
/// opaque executor and carried back over the `result` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub peer_node_id: String,
    pub status: TaskOutcomeStatus,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub error: Option<String>,
    pub attestation: Option<TaskAttestation>,
}

impl TaskResult {
    pub fn failure(task_id: impl Into<String>, peer_node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            peer_node_id: peer_node_id.into(),
            status: TaskOutcomeStatus::Failed,
            tokens_used: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            findings: Vec::new(),
            error: Some(error.into()),
            attestation: None,
        }
    }

    pub fn aborted(task_id: impl Into<String>, peer_node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            peer_node_id: peer_node_id.into(),
            status: TaskOutcomeStatus::Aborted,
            tokens_used: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            findings: Vec::new(),
            error: Some(reason.into()),
            attestation: None,
        }
    }
}

/// Optional narrowing applied when selecting a delegatee.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    pub tool_allowlist: Option<Vec<String>>,
    pub required_capabilities: Option<Vec<String>>,
    pub max_cost_usd: Option<f64>,
}

/// Delegation priority; higher values preempt lower ones.
pub type Priority = i32;

pub const DEFAULT_PRIORITY: Priority = 0;
