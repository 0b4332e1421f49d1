//! The peer table and failure detector: a single-owner actor reached through
//! a cheap-to-clone [`MeshHandle`]. Routing every mutation through one
//! command channel serializes join/heartbeat/leave per peer without an
//! explicit per-peer lock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::peer::{PeerEntry, PeerStatus};
use crate::identity::NodeIdentity;
use crate::journal::{Journal, JournalEvent};
use crate::transport::client::TransportClient;
use crate::transport::types::HeartbeatRequest;

/// Outbound heartbeat failures before a peer is locally marked suspected,
/// ahead of the sweep timer noticing a stale `last_heartbeat_at`.
const OUTBOUND_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub enum MeshEvent {
    Joined(NodeIdentity),
    Rebound { node_id: String, old_url: String, new_url: String },
    Left(String),
    StatusChanged { node_id: String, from: PeerStatus, to: PeerStatus },
    Evicted(String),
}

enum MeshCommand {
    Join { identity: NodeIdentity, reply: oneshot::Sender<()> },
    Leave { node_id: String, reply: oneshot::Sender<()> },
    Heartbeat { node_id: String, reply: oneshot::Sender<Result<(), ()>> },
    DegradePeer { node_id: String, reply: oneshot::Sender<()> },
    GetActivePeers { reply: oneshot::Sender<Vec<PeerEntry>> },
    GetAllPeers { status: Option<PeerStatus>, reply: oneshot::Sender<Vec<PeerEntry>> },
    GetPeer { node_id: String, reply: oneshot::Sender<Option<PeerEntry>> },
    PeerCount { reply: oneshot::Sender<usize> },
    Stop,
}

/// Cheap-to-clone handle to a running [`MeshManager`].
#[derive(Clone)]
pub struct MeshHandle {
    cmd_tx: mpsc::Sender<MeshCommand>,
    events_tx: broadcast::Sender<MeshEvent>,
}

impl MeshHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events_tx.subscribe()
    }

    pub async fn handle_join(&self, identity: NodeIdentity) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(MeshCommand::Join { identity, reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn handle_leave(&self, node_id: String) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(MeshCommand::Leave { node_id, reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// `Err` when the `node_id` is not in the table (404 at the transport
    /// layer).
    pub async fn handle_heartbeat(&self, node_id: String) -> Result<(), ()> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(MeshCommand::Heartbeat { node_id, reply: tx }).await.is_err() {
            return Err(());
        }
        rx.await.unwrap_or(Err(()))
    }

    pub async fn degrade_peer(&self, node_id: String) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(MeshCommand::DegradePeer { node_id, reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn get_active_peers(&self) -> Vec<PeerEntry> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(MeshCommand::GetActivePeers { reply: tx }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn get_all_peers(&self, status: Option<PeerStatus>) -> Vec<PeerEntry> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(MeshCommand::GetAllPeers { status, reply: tx }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn get_peer(&self, node_id: &str) -> Option<PeerEntry> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(MeshCommand::GetPeer { node_id: node_id.to_string(), reply: tx }).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn peer_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(MeshCommand::PeerCount { reply: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(MeshCommand::Stop).await;
    }
}

/// Owns the peer table. Run via [`MeshManager::spawn`], which returns a
/// [`MeshHandle`] and drives the actor loop in a background task.
pub struct MeshManager {
    peers: HashMap<String, PeerEntry>,
    cmd_rx: mpsc::Receiver<MeshCommand>,
    events_tx: broadcast::Sender<MeshEvent>,
    journal: Journal,
    transport: TransportClient,
    config: swarm_config::MeshConfig,
}

impl MeshManager {
    pub fn spawn(config: swarm_config::MeshConfig, journal: Journal, transport: TransportClient) -> MeshHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let handle = MeshHandle { cmd_tx, events_tx: events_tx.clone() };

        let manager = MeshManager { peers: HashMap::new(), cmd_rx, events_tx, journal, transport, config };
        tokio::spawn(manager.run());
        handle
    }

    async fn run(mut self) {
        let mut heartbeat_ticker = tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        let mut sweep_ticker = tokio::time::interval(Duration::from_millis(self.config.sweep_interval_ms));

        loop {
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    if matches!(cmd, MeshCommand::Stop) {
                        break;
                    }
                    self.handle_command(cmd).await;
                }
                _ = heartbeat_ticker.tick() => {
                    self.send_outbound_heartbeats().await;
                }
                _ = sweep_ticker.tick() => {
                    self.sweep();
                }
                else => break,
            }
        }
    }

    async fn handle_command(&mut self, cmd: MeshCommand) {
        match cmd {
            MeshCommand::Join { identity, reply } => {
                self.handle_join(identity);
                let _ = reply.send(());
            }
            MeshCommand::Leave { node_id, reply } => {
                self.handle_leave(&node_id);
                let _ = reply.send(());
            }
            MeshCommand::Heartbeat { node_id, reply } => {
                let result = self.handle_heartbeat(&node_id);
                let _ = reply.send(result);
            }
            MeshCommand::DegradePeer { node_id, reply } => {
                self.degrade_peer(&node_id);
                let _ = reply.send(());
            }
            MeshCommand::GetActivePeers { reply } => {
                let active: Vec<PeerEntry> =
                    self.peers.values().filter(|p| p.status == PeerStatus::Active).cloned().collect();
                let _ = reply.send(active);
            }
            MeshCommand::GetAllPeers { status, reply } => {
                let filtered: Vec<PeerEntry> = self
                    .peers
                    .values()
                    .filter(|p| status.map(|s| p.status == s).unwrap_or(true))
                    .cloned()
                    .collect();
                let _ = reply.send(filtered);
            }
            MeshCommand::GetPeer { node_id, reply } => {
                let _ = reply.send(self.peers.get(&node_id).cloned());
            }
            MeshCommand::PeerCount { reply } => {
                let _ = reply.send(self.peers.len());
            }
            MeshCommand::Stop => {}
        }
    }

    /// Insert or refresh a peer; idempotent on `node_id`. A re-seen peer
    /// with a different `api_url` updates the URL and emits a rebind event.
    fn handle_join(&mut self, identity: NodeIdentity) {
        let node_id = identity.node_id.clone();
        match self.peers.get_mut(&node_id) {
            Some(existing) => {
                if existing.identity.api_url != identity.api_url {
                    let old_url = existing.identity.api_url.clone();
                    info!(node_id = %node_id, old_url = %old_url, new_url = %identity.api_url, "peer rebind");
                    self.emit_event(MeshEvent::Rebound { node_id: node_id.clone(), old_url, new_url: identity.api_url.clone() });
                }
                existing.identity = identity;
                existing.status = PeerStatus::Active;
                existing.consecutive_failures = 0;
                existing.last_heartbeat_at = chrono::Utc::now();
            }
            None => {
                let entry = PeerEntry::new(identity.clone());
                self.peers.insert(node_id.clone(), entry);
                info!(node_id = %node_id, "peer joined");
                self.emit_event(MeshEvent::Joined(identity));
            }
        }
    }

    fn handle_leave(&mut self, node_id: &str) {
        if let Some(entry) = self.peers.get_mut(node_id) {
            let from = entry.status;
            entry.status = PeerStatus::Left;
            info!(node_id, "peer left");
            self.emit_event(MeshEvent::StatusChanged { node_id: node_id.to_string(), from, to: PeerStatus::Left });
            self.emit_event(MeshEvent::Left(node_id.to_string()));
        }
    }

    /// `Err` when `node_id` is unknown.
    fn handle_heartbeat(&mut self, node_id: &str) -> Result<(), ()> {
        let Some(entry) = self.peers.get_mut(node_id) else { return Err(()) };
        let from = entry.status;
        entry.last_heartbeat_at = chrono::Utc::now();
        entry.consecutive_failures = 0;
        if matches!(entry.status, PeerStatus::Suspected | PeerStatus::Unreachable) {
            entry.status = PeerStatus::Active;
            self.emit_event(MeshEvent::StatusChanged { node_id: node_id.to_string(), from, to: PeerStatus::Active });
        }
        Ok(())
    }

    fn degrade_peer(&mut self, node_id: &str) {
        if let Some(entry) = self.peers.get_mut(node_id) {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= OUTBOUND_FAILURE_THRESHOLD && entry.status == PeerStatus::Active {
                let from = entry.status;
                entry.status = PeerStatus::Suspected;
                warn!(node_id, failures = entry.consecutive_failures, "peer degraded to suspected");
                self.emit_event(MeshEvent::StatusChanged { node_id: node_id.to_string(), from, to: PeerStatus::Suspected });
            }
        }
    }

    /// Sweep: active → suspected at `suspected_after_ms`, suspected →
    /// unreachable at `unreachable_after_ms`, any non-left → evicted at
    /// `evict_after_ms`.
    fn sweep(&mut self) {
        let now = chrono::Utc::now();
        let mut evicted = Vec::new();

        for (node_id, entry) in self.peers.iter_mut() {
            if entry.status == PeerStatus::Left || entry.status == PeerStatus::Evicted {
                continue;
            }
            let age_ms = (now - entry.last_heartbeat_at).num_milliseconds().max(0) as u64;
            let from = entry.status;

            if age_ms >= self.config.evict_after_ms {
                entry.status = PeerStatus::Evicted;
                evicted.push(node_id.clone());
            } else if age_ms >= self.config.unreachable_after_ms && entry.status == PeerStatus::Suspected {
                entry.status = PeerStatus::Unreachable;
            } else if age_ms >= self.config.suspected_after_ms && entry.status == PeerStatus::Active {
                entry.status = PeerStatus::Suspected;
            }

            if entry.status != from {
                debug!(node_id, ?from, to = ?entry.status, age_ms, "peer status swept");
                let _ = self.events_tx.send(MeshEvent::StatusChanged { node_id: node_id.clone(), from, to: entry.status });
            }
        }

        for node_id in evicted {
            self.peers.remove(&node_id);
            info!(node_id, "peer evicted");
            self.emit_event(MeshEvent::Evicted(node_id));
        }
    }

    async fn send_outbound_heartbeats(&mut self) {
        let active: Vec<(String, String)> = self
            .peers
            .values()
            .filter(|p| p.status == PeerStatus::Active)
            .map(|p| (p.node_id().to_string(), p.identity.api_url.clone()))
            .collect();

        for (node_id, api_url) in active {
            let req = HeartbeatRequest {
                node_id: node_id.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                active_sessions: 0,
                load: 0.0,
            };
            let resp = self.transport.heartbeat(&api_url, &req).await;
            if resp.ok {
                if let Some(entry) = self.peers.get_mut(&node_id) {
                    entry.last_latency_ms = Some(resp.latency_ms);
                    entry.consecutive_failures = 0;
                }
            } else {
                self.degrade_peer(&node_id);
            }
        }
    }

    fn emit_event(&self, event: MeshEvent) {
        let _ = self.events_tx.send(event.clone());
        let journal = self.journal.clone();
        tokio::spawn(async move {
            let (name, data): (&'static str, serde_json::Value) = match &event {
                MeshEvent::Joined(identity) => ("swarm.peer_joined", serde_json::json!({"node_id": identity.node_id})),
                MeshEvent::Left(node_id) => ("swarm.peer_left", serde_json::json!({"node_id": node_id})),
                MeshEvent::Evicted(node_id) => ("swarm.peer_evicted", serde_json::json!({"node_id": node_id})),
                MeshEvent::Rebound { node_id, old_url, new_url } => (
                    "swarm.peer_rebound",
                    serde_json::json!({"node_id": node_id, "old_url": old_url, "new_url": new_url}),
                ),
                MeshEvent::StatusChanged { node_id, from, to } => (
                    "swarm.peer_status_changed",
                    serde_json::json!({"node_id": node_id, "from": from, "to": to}),
                ),
            };
            journal.record(JournalEvent::new(name, data)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::null_journal;
    use std::time::Duration as StdDuration;

    fn test_identity(node_id: &str) -> NodeIdentity {
        NodeIdentity::new(node_id, node_id, format!("http://{node_id}"), vec![])
    }

    async fn spawn_manager() -> MeshHandle {
        let config = swarm_config::MeshConfig {
            heartbeat_interval_ms: 60_000,
            sweep_interval_ms: 60_000,
            suspected_after_ms: 10_000,
            unreachable_after_ms: 20_000,
            evict_after_ms: 60_000,
        };
        MeshManager::spawn(config, null_journal(), TransportClient::new(StdDuration::from_secs(1)))
    }

    #[tokio::test]
    async fn join_twice_leaves_one_active_entry() {
        let handle = spawn_manager().await;
        handle.handle_join(test_identity("peer-a")).await;
        handle.handle_join(test_identity("peer-a")).await;
        assert_eq!(handle.peer_count().await, 1);
        let peer = handle.get_peer("peer-a").await.unwrap();
        assert_eq!(peer.status, PeerStatus::Active);
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_peer_errs() {
        let handle = spawn_manager().await;
        let result = handle.handle_heartbeat("nobody".to_string()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn heartbeat_resets_suspected_to_active() {
        let handle = spawn_manager().await;
        handle.handle_join(test_identity("peer-a")).await;
        handle.degrade_peer("peer-a".to_string()).await;
        handle.degrade_peer("peer-a".to_string()).await;
        handle.degrade_peer("peer-a".to_string()).await;
        let peer = handle.get_peer("peer-a").await.unwrap();
        assert_eq!(peer.status, PeerStatus::Suspected);

        handle.handle_heartbeat("peer-a".to_string()).await.unwrap();
        let peer = handle.get_peer("peer-a").await.unwrap();
        assert_eq!(peer.status, PeerStatus::Active);
    }

    #[tokio::test]
    async fn rejoin_with_different_url_rebinds() {
        let handle = spawn_manager().await;
        handle.handle_join(test_identity("peer-a")).await;
        let mut rebound = test_identity("peer-a");
        rebound.api_url = "http://new-address".to_string();
        handle.handle_join(rebound).await;
        let peer = handle.get_peer("peer-a").await.unwrap();
        assert_eq!(peer.identity.api_url, "http://new-address");
    }
}
