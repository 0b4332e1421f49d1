//! Per-peer outcome history and the derived trust score `WorkDistributor`
//! scores candidates on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{TaskOutcomeStatus, TaskResult};

const STREAK_BONUS_CAP: f64 = 0.10;
const STREAK_PENALTY_CAP: f64 = 0.30;
const STREAK_BONUS_PER_SUCCESS: f64 = 0.02;
const STREAK_PENALTY_PER_FAILURE: f64 = 0.05;
const DEFAULT_TRUST_SCORE: f64 = 0.5;
const LATENCY_SCALE_MS: f64 = 10_000.0;

/// Outcome counters and derived trust score for one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerReputation {
    pub node_id: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_aborted: u64,
    pub total_duration_ms: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub trust_score: f64,
    pub last_outcome_at: chrono::DateTime<chrono::Utc>,
}

impl PeerReputation {
    fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            tasks_completed: 0,
            tasks_failed: 0,
            tasks_aborted: 0,
            total_duration_ms: 0,
            total_tokens: 0,
            total_cost_usd: 0.0,
            consecutive_successes: 0,
            consecutive_failures: 0,
            trust_score: DEFAULT_TRUST_SCORE,
            last_outcome_at: chrono::Utc::now(),
        }
    }

    fn total_outcomes(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_aborted
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.total_outcomes() == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_outcomes() as f64
        }
    }

    /// `trust_score = clamp(0.7*success_ratio + 0.2*latency_score +
    /// streak_bonus - streak_penalty + 0.1, 0, 1)`.
    fn recompute_trust_score(&mut self) {
        let total = self.total_outcomes();
        let success_ratio = if total == 0 { 0.0 } else { self.tasks_completed as f64 / total as f64 };
        let latency_score = 1.0 - (self.avg_latency_ms() / LATENCY_SCALE_MS).clamp(0.0, 1.0);
        let streak_bonus = (self.consecutive_successes as f64 * STREAK_BONUS_PER_SUCCESS).min(STREAK_BONUS_CAP);
        let streak_penalty = (self.consecutive_failures as f64 * STREAK_PENALTY_PER_FAILURE).min(STREAK_PENALTY_CAP);

        let raw = 0.7 * success_ratio + 0.2 * latency_score + streak_bonus - streak_penalty + 0.1;
        self.trust_score = raw.clamp(0.0, 1.0);
    }
}

/// Persisted, per-node outcome history store. JSONL on disk, in-memory map
/// for reads; a single writer serializes saves (`recordOutcome` takes
/// `&mut self`, matching the "single writer" concurrency note — callers
/// behind a mutex/actor enforce that in practice).
#[derive(Debug)]
pub struct ReputationStore {
    path: Option<PathBuf>,
    peers: HashMap<String, PeerReputation>,
}

impl ReputationStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, peers: HashMap::new() }
    }

    /// Update counters for `node_id` per `result.status`, recompute average
    /// latency and trust score.
    pub fn record_outcome(&mut self, node_id: &str, result: &TaskResult) {
        let rep = self.peers.entry(node_id.to_string()).or_insert_with(|| PeerReputation::new(node_id));
        match result.status {
            TaskOutcomeStatus::Completed => {
                rep.tasks_completed += 1;
                rep.consecutive_successes += 1;
                rep.consecutive_failures = 0;
            }
            TaskOutcomeStatus::Failed => {
                rep.tasks_failed += 1;
                rep.consecutive_failures += 1;
                rep.consecutive_successes = 0;
            }
            TaskOutcomeStatus::Aborted => {
                rep.tasks_aborted += 1;
                rep.consecutive_failures += 1;
                rep.consecutive_successes = 0;
            }
        }
        rep.total_duration_ms += result.duration_ms;
        rep.total_tokens += result.tokens_used;
        rep.total_cost_usd += result.cost_usd;
        rep.last_outcome_at = chrono::Utc::now();
        rep.recompute_trust_score();
    }

    /// Trust score for `node_id`, defaulting to 0.5 for unknown peers.
    pub fn get_trust_score(&self, node_id: &str) -> f64 {
        self.peers.get(node_id).map(|r| r.trust_score).unwrap_or(DEFAULT_TRUST_SCORE)
    }

    /// Trust score blended 70% base / 30% behavioral, where `behavioral` is
    /// a [0,1] multiplier supplied by the collusion/sabotage detectors
    /// (lower when a peer's positive feedback looks discounted).
    pub fn get_trust_score_blended(&self, node_id: &str, behavioral: f64) -> f64 {
        let base = self.get_trust_score(node_id);
        (0.7 * base + 0.3 * behavioral).clamp(0.0, 1.0)
    }

    pub fn get(&self, node_id: &str) -> Option<&PeerReputation> {
        self.peers.get(node_id)
    }

    /// Move every score toward the neutral midpoint (0.5) by `factor`.
    pub fn decay(&mut self, factor: f64) {
        for rep in self.peers.values_mut() {
            rep.trust_score += (0.5 - rep.trust_score) * factor.clamp(0.0, 1.0);
        }
    }

    /// Load the JSONL store from disk, skipping corrupt lines. Last write
    /// for a given `node_id` wins.
    pub fn load(&mut self) -> std::io::Result<()> {
        let Some(path) = self.path.clone() else { return Ok(()) };
        if !path.is_file() {
            return Ok(());
        }
        let text = std::fs::read_to_string(&path)?;
        let mut peers = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PeerReputation>(line) {
                Ok(rep) => {
                    peers.insert(rep.node_id.clone(), rep);
                }
                Err(e) => warn!(line = lineno, error = %e, "skipping corrupt reputation record"),
            }
        }
        self.peers = peers;
        debug!(count = self.peers.len(), "loaded reputation store");
        Ok(())
    }

    /// Persist the current in-memory map, write-to-temp-then-rename.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = self.path.clone() else { return Ok(()) };
        write_jsonl_atomic(&path, self.peers.values())
    }
}

fn write_jsonl_atomic<'a>(path: &Path, records: impl Iterator<Item = &'a PeerReputation>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    let mut body = String::new();
    for rec in records {
        body.push_str(&serde_json::to_string(rec).unwrap_or_default());
        body.push('\n');
    }
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Finding;

    fn completed(node_id: &str, duration_ms: u64) -> TaskResult {
        TaskResult {
            task_id: "t1".into(),
            peer_node_id: node_id.into(),
            status: TaskOutcomeStatus::Completed,
            tokens_used: 100,
            cost_usd: 0.01,
            duration_ms,
            findings: vec![Finding { step_title: "ok".into(), detail: serde_json::json!({}), tool: None, succeeded: true }],
            error: None,
            attestation: None,
        }
    }

    #[test]
    fn unknown_peer_defaults_to_half() {
        let store = ReputationStore::new(None);
        assert_eq!(store.get_trust_score("nobody"), 0.5);
    }

    #[test]
    fn successful_outcomes_raise_trust_score() {
        let mut store = ReputationStore::new(None);
        for _ in 0..5 {
            store.record_outcome("peer-b", &completed("peer-b", 50));
        }
        assert!(store.get_trust_score("peer-b") > 0.5);
    }

    #[test]
    fn decay_moves_toward_midpoint() {
        let mut store = ReputationStore::new(None);
        store.record_outcome("peer-b", &completed("peer-b", 50));
        let before = store.get_trust_score("peer-b");
        store.decay(0.5);
        let after = store.get_trust_score("peer-b");
        assert!((after - 0.5).abs() < (before - 0.5).abs());
    }

    #[test]
    fn save_then_load_reproduces_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reputation.jsonl");
        let mut store = ReputationStore::new(Some(path.clone()));
        store.record_outcome("peer-b", &completed("peer-b", 120));
        store.save().unwrap();

        let mut reloaded = ReputationStore::new(Some(path));
        reloaded.load().unwrap();
        assert_eq!(reloaded.get("peer-b").unwrap().tasks_completed, 1);
    }

    #[test]
    fn corrupt_lines_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reputation.jsonl");
        std::fs::write(&path, "not json\n{\"node_id\":\"peer-c\",\"tasks_completed\":1,\"tasks_failed\":0,\"tasks_aborted\":0,\"total_duration_ms\":0,\"total_tokens\":0,\"total_cost_usd\":0.0,\"consecutive_successes\":1,\"consecutive_failures\":0,\"trust_score\":0.8,\"last_outcome_at\":\"2024-01-01T00:00:00Z\"}\n").unwrap();
        let mut store = ReputationStore::new(Some(path));
        store.load().unwrap();
        assert_eq!(store.get("peer-c").unwrap().tasks_completed, 1);
    }
}
