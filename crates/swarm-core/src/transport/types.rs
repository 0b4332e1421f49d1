//! JSON wire types for the `/api/*` endpoints. Field names are stable and
//! match the distilled spec's §4.1 table exactly.

use serde::{Deserialize, Serialize};

use crate::identity::NodeIdentity;
use crate::mesh::peer::PeerStatus;
use crate::model::{CheckpointStatus, TaskResult};

#[derive(Debug, Clone, Deserialize)]
pub struct PeersQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    pub node_id: String,
    pub display_name: String,
    pub api_url: String,
    pub capabilities: Vec<String>,
    pub version: String,
    pub status: PeerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub identity: NodeIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub active_sessions: u32,
    #[serde(default)]
    pub load: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipRequest {
    pub peers: Vec<PeerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipResponse {
    pub peers: Vec<PeerSummary>,
}

/// Body of `POST task`: a delegation offer a peer synchronously accepts or
/// declines. `delegator_node_id`/`delegator_api_url` tell the delegatee
/// where to later `POST result` once it finishes executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDelegationRequest {
    pub task_id: String,
    pub session_id: String,
    pub task_text: String,
    pub correlation_id: Option<String>,
    pub constraints: Option<crate::model::Constraints>,
    pub priority: Option<crate::model::Priority>,
    pub delegator_node_id: String,
    pub delegator_api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAcceptResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: CheckpointStatus,
    pub progress_pct: Option<f64>,
    pub last_activity_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub ok: bool,
}

/// External trigger kinds routed by `ExternalTriggerHandler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalTrigger {
    TaskCancel { task_id: String, reason: Option<String> },
    BudgetAlert { task_id: String, cost_usd: f64, tokens: u64, duration_ms: u64 },
    PriorityPreempt { task_id: String, task_text: String, session_id: String, priority: crate::model::Priority },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub node_id: String,
    pub peer_count: usize,
    pub active_delegations: usize,
    pub uptime_secs: u64,
}

/// Result of a client RPC: whether the call succeeded transport-wise, the
/// remote HTTP status, the decoded body (if any), and round-trip latency.
#[derive(Debug, Clone)]
pub struct ClientResponse<T> {
    pub ok: bool,
    pub status: u16,
    pub data: Option<T>,
    pub latency_ms: u64,
}
