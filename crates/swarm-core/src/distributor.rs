//! Peer selection and delegation lifecycle. `distribute()` never returns an
//! `Err` to its caller — every outcome, including exhausted retries, is a
//! `TaskResult` with a status and optional error message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::detectors::SabotageDetector;
use crate::identity::NodeIdentity;
use crate::journal::{events, Journal, JournalEvent};
use crate::mesh::manager::MeshHandle;
use crate::mesh::peer::PeerEntry;
use crate::model::{Constraints, Priority, TaskResult, DEFAULT_PRIORITY};
use crate::monitor::TaskMonitor;
use crate::pareto::{self, Objectives, DEFAULT_WEIGHTS};
use crate::reputation::ReputationStore;
use crate::transport::client::TransportClient;
use crate::transport::types::TaskDelegationRequest;

/// Synchronous accept/reject timeout for a delegation offer. Short relative
/// to `delegation_timeout_ms`, which bounds the full task lifetime.
const TASK_OFFER_TIMEOUT: Duration = Duration::from_secs(5);

/// A task currently out for execution on a peer. Destroyed on terminal
/// outcome or explicit cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDelegation {
    pub task_id: String,
    pub peer_node_id: String,
    pub peer_api_url: String,
    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub priority: Priority,
    pub retry_count: u32,
    pub constraints: Option<Constraints>,
    pub correlation_id: Option<String>,
    /// Carried so a degraded peer's task can actually be re-delegated —
    /// `handle_peer_degradation` has nothing else to rebuild a `distribute`
    /// call from.
    pub task_text: String,
    pub session_id: String,
}

struct DelegationSlot {
    delegation: ActiveDelegation,
    result_tx: Option<oneshot::Sender<TaskResult>>,
}

/// Selects peers and drives delegation lifecycle. Cheap to clone: every
/// field is an `Arc`/handle.
#[derive(Clone)]
pub struct WorkDistributor {
    identity: NodeIdentity,
    mesh: MeshHandle,
    transport: TransportClient,
    reputation: Arc<Mutex<ReputationStore>>,
    journal: Journal,
    config: swarm_config::DistributorConfig,
    active: Arc<Mutex<HashMap<String, DelegationSlot>>>,
    round_robin_cursor: Arc<AtomicUsize>,
    sabotage: Option<SabotageDetector>,
    monitor: Option<TaskMonitor>,
}

impl WorkDistributor {
    pub fn new(
        identity: NodeIdentity,
        mesh: MeshHandle,
        transport: TransportClient,
        reputation: Arc<Mutex<ReputationStore>>,
        journal: Journal,
        config: swarm_config::DistributorConfig,
    ) -> Self {
        Self {
            identity,
            mesh,
            transport,
            reputation,
            journal,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
            round_robin_cursor: Arc::new(AtomicUsize::new(0)),
            sabotage: None,
            monitor: None,
        }
    }

    /// Fold the collusion/sabotage detectors' behavioral multiplier into
    /// peer scoring via `ReputationStore::get_trust_score_blended`.
    pub fn set_sabotage_detector(&mut self, sabotage: SabotageDetector) {
        self.sabotage = Some(sabotage);
    }

    /// Engage checkpoint polling for every delegation this distributor
    /// hands out. Without a monitor set, delegations run unmonitored.
    pub fn set_monitor(&mut self, monitor: TaskMonitor) {
        self.monitor = Some(monitor);
    }

    /// Select a peer, attempt delivery with retries, and await the result —
    /// or synthesize a failure/abort `TaskResult` if nothing worked.
    pub async fn distribute(
        &self,
        task_text: &str,
        session_id: &str,
        constraints: Option<Constraints>,
        priority: Option<Priority>,
    ) -> TaskResult {
        self.distribute_correlated(task_text, session_id, constraints, priority, None).await
    }

    pub async fn distribute_correlated(
        &self,
        task_text: &str,
        session_id: &str,
        constraints: Option<Constraints>,
        priority: Option<Priority>,
        correlation_id: Option<String>,
    ) -> TaskResult {
        let task_id = Uuid::new_v4().to_string();
        let mut tried: Vec<String> = Vec::new();
        let mut retry_count = 0u32;

        loop {
            let candidates = self.eligible_candidates(&constraints, &tried).await;
            let Some(peer) = self.select(&candidates, &constraints).await else {
                return self.finalize_unassignable(&task_id, retry_count).await;
            };
            tried.push(peer.node_id().to_string());

            let (result_tx, result_rx) = oneshot::channel();
            let delegation = ActiveDelegation {
                task_id: task_id.clone(),
                peer_node_id: peer.node_id().to_string(),
                peer_api_url: peer.identity.api_url.clone(),
                sent_at: chrono::Utc::now(),
                priority: priority.unwrap_or(DEFAULT_PRIORITY),
                retry_count,
                constraints: constraints.clone(),
                correlation_id: correlation_id.clone(),
                task_text: task_text.to_string(),
                session_id: session_id.to_string(),
            };
            self.active.lock().await.insert(
                task_id.clone(),
                DelegationSlot { delegation: delegation.clone(), result_tx: Some(result_tx) },
            );

            let req = TaskDelegationRequest {
                task_id: task_id.clone(),
                session_id: session_id.to_string(),
                task_text: task_text.to_string(),
                correlation_id: correlation_id.clone(),
                constraints: constraints.clone(),
                priority,
                delegator_node_id: self.identity.node_id.clone(),
                delegator_api_url: self.identity.api_url.clone(),
            };
            let offer = self.transport.task(&peer.identity.api_url, &req, TASK_OFFER_TIMEOUT).await;

            if !offer.ok || !offer.data.map(|d| d.accepted).unwrap_or(false) {
                self.active.lock().await.remove(&task_id);
                self.mesh.degrade_peer(peer.node_id().to_string()).await;
                retry_count += 1;
                if retry_count > self.config.max_retries {
                    return self.finalize_unassignable(&task_id, retry_count).await;
                }
                continue;
            }

            info!(task_id = %task_id, peer = %peer.node_id(), "task delegated");
            if let Some(monitor) = &self.monitor {
                monitor.start(task_id.clone(), peer.node_id().to_string(), peer.identity.api_url.clone()).await;
            }
            return self.await_outcome(task_id, peer.node_id().to_string(), result_rx).await;
        }
    }

    async fn await_outcome(
        &self,
        task_id: String,
        peer_node_id: String,
        result_rx: oneshot::Receiver<TaskResult>,
    ) -> TaskResult {
        let timeout = Duration::from_millis(self.config.delegation_timeout_ms);
        let result = match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(result)) => {
                self.reputation.lock().await.record_outcome(&peer_node_id, &result);
                result
            }
            Ok(Err(_)) => {
                // sender dropped without a result — treat as abort.
                self.active.lock().await.remove(&task_id);
                let result = TaskResult::aborted(&task_id, &peer_node_id, "delegation cancelled");
                self.reputation.lock().await.record_outcome(&peer_node_id, &result);
                result
            }
            Err(_) => {
                self.active.lock().await.remove(&task_id);
                warn!(task_id = %task_id, peer = %peer_node_id, "delegation timed out");
                self.journal
                    .record(JournalEvent::new(events::TASK_CANCELLED, serde_json::json!({"task_id": task_id, "reason": "delegation_timeout"})))
                    .await;
                let result = TaskResult::aborted(&task_id, &peer_node_id, "delegation timed out");
                self.reputation.lock().await.record_outcome(&peer_node_id, &result);
                result
            }
        };
        if let Some(monitor) = &self.monitor {
            monitor.stop(&task_id).await;
        }
        result
    }

    async fn finalize_unassignable(&self, task_id: &str, retry_count: u32) -> TaskResult {
        warn!(task_id, retry_count, "no peer accepted delegation");
        TaskResult::failure(task_id, "", "no peer available or all retries exhausted")
    }

    async fn eligible_candidates(&self, constraints: &Option<Constraints>, exclude: &[String]) -> Vec<PeerEntry> {
        let active = self.mesh.get_active_peers().await;
        active
            .into_iter()
            .filter(|p| !exclude.contains(&p.node_id().to_string()))
            .filter(|p| match constraints.as_ref().and_then(|c| c.tool_allowlist.as_ref()) {
                Some(allow) if !allow.is_empty() => allow.iter().any(|t| p.identity.has_capability(t)),
                _ => true,
            })
            .collect()
    }

    async fn select(&self, candidates: &[PeerEntry], constraints: &Option<Constraints>) -> Option<PeerEntry> {
        if candidates.is_empty() {
            return None;
        }
        if self.config.strategy == swarm_config::Strategy::RoundRobin {
            let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
            return Some(candidates[idx].clone());
        }

        let mut objectives = Vec::with_capacity(candidates.len());
        {
            let reputation = self.reputation.lock().await;
            for p in candidates {
                objectives.push(self.score(p, constraints, &reputation).await);
            }
        }

        let chosen = match self.config.strategy {
            swarm_config::Strategy::ParetoWeighted => pareto::select_weighted(&objectives, &DEFAULT_WEIGHTS),
            swarm_config::Strategy::ParetoCrowding => pareto::select_crowding(&objectives, &DEFAULT_WEIGHTS),
            swarm_config::Strategy::SingleSolution => pareto::select_weighted(&objectives, &DEFAULT_WEIGHTS),
            swarm_config::Strategy::RoundRobin => unreachable!(),
        };
        chosen.map(|i| candidates[i].clone())
    }

    async fn score(&self, peer: &PeerEntry, constraints: &Option<Constraints>, reputation: &ReputationStore) -> Objectives {
        let trust = match &self.sabotage {
            Some(sabotage) => {
                let behavioral = sabotage.target_discount_factor(peer.node_id()).await;
                reputation.get_trust_score_blended(peer.node_id(), behavioral)
            }
            None => reputation.get_trust_score(peer.node_id()),
        };
        let latency = peer
            .last_latency_ms
            .map(|ms| 1.0 - (ms as f64 / 10_000.0).clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let cost = match reputation.get(peer.node_id()) {
            Some(rep) if rep.tasks_completed + rep.tasks_failed + rep.tasks_aborted > 0 => {
                let total = rep.tasks_completed + rep.tasks_failed + rep.tasks_aborted;
                let avg_cost = rep.total_cost_usd / total as f64;
                let max_cost = constraints.as_ref().and_then(|c| c.max_cost_usd).unwrap_or(f64::INFINITY);
                1.0 - (avg_cost / max_cost).clamp(0.0, 1.0)
            }
            _ => 1.0,
        };
        let capability = match constraints.as_ref().and_then(|c| c.required_capabilities.as_ref()) {
            Some(required) if !required.is_empty() => {
                let matched = required.iter().filter(|c| peer.identity.has_capability(c)).count();
                matched as f64 / required.len() as f64
            }
            _ => 1.0,
        };
        Objectives { trust, latency, cost, capability }
    }

    /// Deliver an asynchronous result, keyed by `task_id`. Idempotent:
    /// duplicate or unknown deliveries are dropped silently.
    pub async fn add_result(&self, result: TaskResult) {
        let mut active = self.active.lock().await;
        if let Some(slot) = active.get_mut(&result.task_id) {
            if let Some(tx) = slot.result_tx.take() {
                let _ = tx.send(result);
            }
            active.remove(&result.task_id);
        }
    }

    /// Cancel a known delegation. Returns whether it was known.
    pub async fn cancel_task(&self, task_id: &str, reason: Option<String>) -> bool {
        let slot = self.active.lock().await.remove(task_id);
        let Some(slot) = slot else { return false };
        let _ = self.transport.cancel_task(&slot.delegation.peer_api_url, task_id, reason.clone()).await;
        if let Some(tx) = slot.result_tx {
            let _ = tx.send(TaskResult::aborted(task_id, &slot.delegation.peer_node_id, reason.unwrap_or_else(|| "cancelled".to_string())));
        }
        self.journal
            .record(JournalEvent::new(events::TASK_CANCELLED, serde_json::json!({"task_id": task_id})))
            .await;
        true
    }

    /// Re-enqueue every task currently delegated to `node_id` after a
    /// transport-level degrade signal: cancel the stale delegation on the
    /// old peer, then re-invoke `distribute_correlated` from the task's own
    /// stored text/session/constraints and forward its eventual result to
    /// whoever is still awaiting the original `distribute()` call.
    pub async fn handle_peer_degradation(&self, node_id: &str) {
        let stale: Vec<(String, DelegationSlot)> = {
            let mut active = self.active.lock().await;
            let keys: Vec<String> =
                active.iter().filter(|(_, s)| s.delegation.peer_node_id == node_id).map(|(k, _)| k.clone()).collect();
            keys.into_iter().filter_map(|k| active.remove(&k).map(|s| (k, s))).collect()
        };

        for (task_id, slot) in stale {
            let _ = self.transport.cancel_task(&slot.delegation.peer_api_url, &task_id, Some("peer degraded".to_string())).await;
            self.journal
                .record(JournalEvent::new(events::TASK_CANCELLED, serde_json::json!({"task_id": task_id, "reason": "peer_degraded"})))
                .await;
            warn!(task_id = %task_id, peer = node_id, "re-enqueueing task after peer degradation");

            let distributor = self.clone();
            let delegation = slot.delegation;
            let result_tx = slot.result_tx;
            tokio::spawn(async move {
                let result = distributor
                    .distribute_correlated(
                        &delegation.task_text,
                        &delegation.session_id,
                        delegation.constraints.clone(),
                        Some(delegation.priority),
                        delegation.correlation_id.clone(),
                    )
                    .await;
                if let Some(tx) = result_tx {
                    let _ = tx.send(result);
                }
            });
        }
    }

    pub async fn active_delegations(&self) -> Vec<ActiveDelegation> {
        self.active.lock().await.values().map(|s| s.delegation.clone()).collect()
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeIdentity;
    use crate::journal::null_journal;
    use crate::mesh::manager::MeshManager;

    async fn spawn_distributor() -> WorkDistributor {
        let mesh = MeshManager::spawn(swarm_config::MeshConfig::default(), null_journal(), TransportClient::new(Duration::from_secs(1)));
        WorkDistributor::new(
            NodeIdentity::new("self", "Self", "http://self", vec![]),
            mesh,
            TransportClient::new(Duration::from_millis(200)),
            Arc::new(Mutex::new(ReputationStore::new(None))),
            null_journal(),
            swarm_config::DistributorConfig::default(),
        )
    }

    #[tokio::test]
    async fn distribute_with_no_peers_synthesizes_failure() {
        let distributor = spawn_distributor().await;
        let result = distributor.distribute("do something", "sess-1", None, None).await;
        assert_eq!(result.status, crate::model::TaskOutcomeStatus::Failed);
    }

    #[tokio::test]
    async fn add_result_for_unknown_task_is_a_no_op() {
        let distributor = spawn_distributor().await;
        let result = TaskResult::failure("nonexistent", "peer-x", "n/a");
        distributor.add_result(result).await;
        assert_eq!(distributor.active_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_unknown_task_returns_false() {
        let distributor = spawn_distributor().await;
        assert!(!distributor.cancel_task("nonexistent", None).await);
    }

    #[tokio::test]
    async fn score_defaults_unknown_peer_to_half_trust_and_full_cost_latency() {
        let distributor = spawn_distributor().await;
        let peer = PeerEntry::new(NodeIdentity::new("peer-a", "Peer A", "http://peer-a", vec![]));
        let reputation = ReputationStore::new(None);
        let objectives = distributor.score(&peer, &None, &reputation).await;
        assert_eq!(objectives.trust, 0.5);
        assert_eq!(objectives.cost, 1.0);
        assert_eq!(objectives.latency, 1.0);
        assert_eq!(objectives.capability, 1.0);
    }

    #[tokio::test]
    async fn discounted_peer_scores_lower_trust_once_sabotage_detector_wired() {
        let mut distributor = spawn_distributor().await;
        let detector = crate::detectors::SabotageDetector::new(null_journal());
        for i in 0..5 {
            detector
                .record_feedback(crate::detectors::FeedbackRecord {
                    source_node_id: "peer-bad".into(),
                    target_node_id: "peer-a".into(),
                    positive: false,
                    at: chrono::Utc::now() + chrono::Duration::seconds(i),
                })
                .await;
        }
        assert!(detector.is_discounted("peer-bad", "peer-a").await);
        distributor.set_sabotage_detector(detector);

        let peer = PeerEntry::new(NodeIdentity::new("peer-a", "Peer A", "http://peer-a", vec![]));
        let reputation = ReputationStore::new(None);
        let objectives = distributor.score(&peer, &None, &reputation).await;
        assert_eq!(objectives.trust, ReputationStore::new(None).get_trust_score_blended("peer-a", 0.0));
    }

    /// `handle_peer_degradation` must actually re-drive the task through
    /// `distribute_correlated` rather than just handing the original caller
    /// an `aborted` result — there is no live peer in this test, so the
    /// forwarded outcome is a synthesized failure, but the point is that it
    /// comes from a *fresh* delegation attempt (new `task_id`, distinct
    /// error) and not the stale "peer degraded" abort the old code sent.
    #[tokio::test]
    async fn handle_peer_degradation_redelegates_instead_of_just_aborting() {
        let distributor = spawn_distributor().await;
        distributor.mesh.handle_join(NodeIdentity::new("peer-bad", "Peer Bad", "http://127.0.0.1:1", vec![])).await;

        let (result_tx, result_rx) = oneshot::channel();
        let stale_delegation = ActiveDelegation {
            task_id: "stale-task".to_string(),
            peer_node_id: "peer-bad".to_string(),
            peer_api_url: "http://127.0.0.1:1".to_string(),
            sent_at: chrono::Utc::now(),
            priority: DEFAULT_PRIORITY,
            retry_count: 0,
            constraints: None,
            correlation_id: None,
            task_text: "do the thing".to_string(),
            session_id: "sess-stale".to_string(),
        };
        distributor.active.lock().await.insert(
            "stale-task".to_string(),
            DelegationSlot { delegation: stale_delegation, result_tx: Some(result_tx) },
        );

        distributor.handle_peer_degradation("peer-bad").await;

        // The stale slot is gone immediately; re-delegation runs in the
        // background and forwards its own outcome to the original sender.
        assert_eq!(distributor.active_count().await, 0);

        let forwarded = tokio::time::timeout(Duration::from_secs(2), result_rx).await.unwrap().unwrap();
        assert_ne!(forwarded.task_id, "stale-task", "forwarded result must come from a fresh distribute() call, not the stale abort");
        assert_ne!(forwarded.error.as_deref(), Some("peer degraded"), "must not be the old disguised-no-op abort");
    }
}
