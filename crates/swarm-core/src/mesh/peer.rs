use serde::{Deserialize, Serialize};

use crate::identity::NodeIdentity;

/// Lifecycle status of a peer table entry. Transitions only move forward
/// along `active → suspected → unreachable → evicted`, except a fresh
/// heartbeat may move `suspected`/`unreachable` back to `active`; `left` is a
/// one-way terminal reachable from any state on an explicit leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Active,
    Suspected,
    Unreachable,
    Left,
    Evicted,
}

/// A row in the mesh peer table. Mutated only by `MeshManager`; a
/// `PeerEntry` is retained in the table while `status != Evicted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub identity: NodeIdentity,
    pub status: PeerStatus,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    pub last_heartbeat_at: chrono::DateTime<chrono::Utc>,
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub public_key: Option<String>,
}

impl PeerEntry {
    pub fn new(identity: NodeIdentity) -> Self {
        let now = chrono::Utc::now();
        Self {
            identity,
            status: PeerStatus::Active,
            joined_at: now,
            last_heartbeat_at: now,
            last_latency_ms: None,
            consecutive_failures: 0,
            public_key: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.identity.node_id
    }

    /// Whether a heartbeat or sweep transition from the current status to
    /// `next` is allowed by the lattice.
    pub fn can_transition_to(&self, next: PeerStatus) -> bool {
        use PeerStatus::*;
        match (self.status, next) {
            (s, n) if s == n => true,
            (_, Left) => true,
            (Active, Suspected) => true,
            (Suspected, Unreachable) => true,
            (Suspected, Active) => true,
            (Unreachable, Active) => true,
            (Active, Evicted) | (Suspected, Evicted) | (Unreachable, Evicted) => true,
            _ => false,
        }
    }
}
