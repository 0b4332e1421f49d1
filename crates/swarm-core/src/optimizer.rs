//! Periodic re-evaluation of each active delegation: keep the current peer,
//! redelegate to a better alternative, or escalate on repeated missed
//! checkpoints. The decision function is pure; the ticker wraps it.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::distributor::WorkDistributor;
use crate::journal::{events, Journal, JournalEvent};
use crate::mesh::manager::MeshHandle;
use crate::monitor::TaskMonitor;
use crate::reputation::ReputationStore;
use tokio::sync::Mutex;

const ESCALATE_AFTER_MISSED: u32 = 3;
const LATENCY_SCALE_MS: f64 = 10_000.0;
const TASK_STATE_CAP: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Keep { reason: String },
    Redelegate { best_alternative_node_id: String },
    Escalate,
}

/// A peer's live standing used for the composite score: trust from
/// `ReputationStore`, latency from the mesh's last observed round trip.
#[derive(Debug, Clone)]
pub struct PeerScore {
    pub node_id: String,
    pub trust: f64,
    pub latency_ms: u64,
}

fn composite(score: &PeerScore) -> f64 {
    let latency_score = 1.0 - (score.latency_ms as f64 / LATENCY_SCALE_MS).clamp(0.0, 1.0);
    0.5 * score.trust + 0.5 * latency_score
}

/// Pure decision function matching S6: drift takes priority over escalation;
/// a task younger than `min_time_before_redelegate_ms` is never evaluated
/// (anti-thrashing).
pub fn decide(
    current: &PeerScore,
    alternatives: &[PeerScore],
    age_ms: u64,
    missed_checkpoints: u32,
    config: &swarm_config::OptimizationConfig,
) -> Decision {
    if age_ms < config.min_time_before_redelegate_ms {
        return Decision::Keep { reason: "anti-thrashing".to_string() };
    }

    let s_cur = composite(current);
    let best = alternatives
        .iter()
        .filter(|a| a.node_id != current.node_id)
        .max_by(|a, b| composite(a).partial_cmp(&composite(b)).unwrap_or(std::cmp::Ordering::Equal));

    if let Some(best) = best {
        let s_best = composite(best);
        let drift = (s_best - s_cur) * (1.0 - config.overhead_factor);
        if drift > config.drift_threshold {
            return Decision::Redelegate { best_alternative_node_id: best.node_id.clone() };
        }
    }

    if missed_checkpoints >= ESCALATE_AFTER_MISSED {
        return Decision::Escalate;
    }

    Decision::Keep { reason: "adequate".to_string() }
}

/// Drives periodic evaluation of every active delegation. Runs as a single
/// background ticker task; `stop()` aborts it.
pub struct OptimizationLoop {
    distributor: WorkDistributor,
    mesh: MeshHandle,
    reputation: Arc<Mutex<ReputationStore>>,
    monitor: TaskMonitor,
    journal: Journal,
    config: swarm_config::OptimizationConfig,
    /// Last decision per task, for inspection/debugging; bounded with LRU
    /// eviction like every other rolling collection in this crate.
    last_decision: Mutex<lru::LruCache<String, Decision>>,
}

impl OptimizationLoop {
    pub fn new(
        distributor: WorkDistributor,
        mesh: MeshHandle,
        reputation: Arc<Mutex<ReputationStore>>,
        monitor: TaskMonitor,
        journal: Journal,
        config: swarm_config::OptimizationConfig,
    ) -> Self {
        Self {
            distributor,
            mesh,
            reputation,
            monitor,
            journal,
            config,
            last_decision: Mutex::new(lru::LruCache::new(std::num::NonZeroUsize::new(TASK_STATE_CAP).unwrap())),
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_millis(self.config.evaluation_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.evaluate_tick().await;
            }
        })
    }

    async fn evaluate_tick(&self) {
        self.journal.record(JournalEvent::new(events::REOPTIMIZATION_TRIGGERED, serde_json::json!({}))).await;

        let delegations = self.distributor.active_delegations().await;
        if delegations.is_empty() {
            return;
        }

        let active_peers = self.mesh.get_active_peers().await;
        let reputation = self.reputation.lock().await;
        let scores: Vec<PeerScore> = active_peers
            .iter()
            .map(|p| PeerScore {
                node_id: p.node_id().to_string(),
                trust: reputation.get_trust_score(p.node_id()),
                latency_ms: p.last_latency_ms.unwrap_or(0),
            })
            .collect();
        drop(reputation);

        for delegation in delegations {
            let Some(current) = scores.iter().find(|s| s.node_id == delegation.peer_node_id).cloned() else {
                continue;
            };
            let age_ms = (chrono::Utc::now() - delegation.sent_at).num_milliseconds().max(0) as u64;
            let missed = self.monitor.missed_checkpoints(&delegation.task_id).await;

            let decision = decide(&current, &scores, age_ms, missed, &self.config);
            self.last_decision.lock().await.put(delegation.task_id.clone(), decision.clone());
            match decision {
                Decision::Redelegate { best_alternative_node_id } => {
                    info!(task_id = %delegation.task_id, to = %best_alternative_node_id, "redelegating on drift");
                    self.journal
                        .record(JournalEvent::new(
                            events::PEER_REDELEGATE_ON_DRIFT,
                            serde_json::json!({"task_id": delegation.task_id, "from": delegation.peer_node_id, "to": best_alternative_node_id}),
                        ))
                        .await;
                    self.distributor.handle_peer_degradation(&delegation.peer_node_id).await;
                }
                Decision::Escalate => {
                    info!(task_id = %delegation.task_id, "escalating after repeated missed checkpoints");
                    self.journal
                        .record(JournalEvent::new(events::TASK_PREEMPTED, serde_json::json!({"task_id": delegation.task_id, "reason": "checkpoints_missed"})))
                        .await;
                }
                Decision::Keep { .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> swarm_config::OptimizationConfig {
        swarm_config::OptimizationConfig { drift_threshold: 0.3, overhead_factor: 0.2, min_time_before_redelegate_ms: 60_000, evaluation_interval_ms: 5_000 }
    }

    // S6 — current peer-bad: latency 9000, trust 0.1; alternative peer-good:
    // latency 50, trust 0.9. sent_at = now - 120_000ms.
    #[test]
    fn s6_drift_beyond_threshold_redelegates() {
        let current = PeerScore { node_id: "peer-bad".into(), trust: 0.1, latency_ms: 9_000 };
        let alternatives = vec![
            current.clone(),
            PeerScore { node_id: "peer-good".into(), trust: 0.9, latency_ms: 50 },
        ];
        let decision = decide(&current, &alternatives, 120_000, 0, &config());
        assert_eq!(decision, Decision::Redelegate { best_alternative_node_id: "peer-good".to_string() });
    }

    #[test]
    fn s6_young_delegation_keeps_for_anti_thrashing() {
        let current = PeerScore { node_id: "peer-bad".into(), trust: 0.1, latency_ms: 9_000 };
        let alternatives = vec![PeerScore { node_id: "peer-good".into(), trust: 0.9, latency_ms: 50 }];
        let decision = decide(&current, &alternatives, 30_000, 0, &config());
        assert_eq!(decision, Decision::Keep { reason: "anti-thrashing".to_string() });
    }

    #[test]
    fn no_better_alternative_but_missed_checkpoints_escalates() {
        let current = PeerScore { node_id: "peer-a".into(), trust: 0.8, latency_ms: 100 };
        let decision = decide(&current, &[current.clone()], 120_000, 3, &config());
        assert_eq!(decision, Decision::Escalate);
    }

    #[test]
    fn adequate_peer_is_kept() {
        let current = PeerScore { node_id: "peer-a".into(), trust: 0.8, latency_ms: 100 };
        let decision = decide(&current, &[current.clone()], 120_000, 0, &config());
        assert_eq!(decision, Decision::Keep { reason: "adequate".to_string() });
    }
}
