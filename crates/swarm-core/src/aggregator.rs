//! Fan-in of N expected results sharing a `correlation_id` into one merged
//! findings list. Completion order follows arrival order, not peer id order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{SwarmError, SwarmResult};
use crate::model::{Finding, TaskResult};

const MAX_PENDING_AGGREGATIONS: usize = 1_000;
/// Window a result is buffered for if it arrives before its aggregation is
/// registered (observed when a very fast delegatee replies before the
/// correlating call returns from `create_aggregation`).
const EARLY_RESULT_BUFFER: Duration = Duration::from_millis(500);
const EARLY_RESULT_POLL: Duration = Duration::from_millis(20);

/// Outcome of a completed (or timed-out-with-partial-data) aggregation.
#[derive(Debug, Clone)]
pub struct AggregatedFindings {
    pub findings: Vec<Finding>,
    pub partial: bool,
}

struct Pending {
    expected_count: usize,
    received: Vec<Finding>,
    tx: Option<oneshot::Sender<AggregatedFindings>>,
}

/// Cheap to clone; the pending map and early-arrival buffer are shared behind
/// `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct ResultAggregator {
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    early: Arc<Mutex<HashMap<String, Vec<TaskResult>>>>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self { pending: Arc::new(Mutex::new(HashMap::new())), early: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register an aggregation awaiting `expected_count` results, and await
    /// its completion (or partial-timeout resolution).
    pub async fn create_aggregation(
        &self,
        correlation_id: String,
        expected_count: usize,
        timeout_ms: u64,
    ) -> SwarmResult<AggregatedFindings> {
        {
            let pending = self.pending.lock().await;
            if pending.len() >= MAX_PENDING_AGGREGATIONS {
                return Err(SwarmError::Validation("too many pending aggregations".to_string()));
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(correlation_id.clone(), Pending { expected_count, received: Vec::new(), tx: Some(tx) });
        }

        // Drain any results that arrived before this aggregation was
        // registered.
        let buffered: Vec<TaskResult> = self.early.lock().await.remove(&correlation_id).unwrap_or_default();
        for result in buffered {
            self.add_result(&correlation_id, result).await;
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(findings)) => Ok(findings),
            Ok(Err(_)) => Err(SwarmError::Timeout(format!("aggregation {correlation_id} cancelled"))),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                match pending.remove(&correlation_id) {
                    Some(p) if !p.received.is_empty() => {
                        warn!(correlation_id, received = p.received.len(), expected = p.expected_count, "aggregation timed out with partial results");
                        Ok(AggregatedFindings { findings: p.received, partial: true })
                    }
                    _ => Err(SwarmError::Timeout(format!("aggregation {correlation_id} timed out with no results"))),
                }
            }
        }
    }

    /// Add one subtask's result to its aggregation. Unknown `correlation_id`
    /// is buffered briefly in case `create_aggregation` has not yet
    /// registered it, then dropped.
    pub async fn add_result(&self, correlation_id: &str, result: TaskResult) {
        let peer_node_id = result.peer_node_id.clone();
        let fulfilled = {
            let mut pending = self.pending.lock().await;
            match pending.get_mut(correlation_id) {
                Some(p) => {
                    for mut finding in result.findings {
                        finding.step_title = format!("[{peer_node_id}] {}", finding.step_title);
                        p.received.push(finding);
                    }
                    if p.received.len() >= p.expected_count {
                        pending.remove(correlation_id)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(mut p) = fulfilled {
            if let Some(tx) = p.tx.take() {
                let _ = tx.send(AggregatedFindings { findings: p.received, partial: false });
            }
            return;
        }

        if !self.pending.lock().await.contains_key(correlation_id) {
            self.buffer_early(correlation_id, result).await;
        }
    }

    async fn buffer_early(&self, correlation_id: &str, result: TaskResult) {
        {
            let mut early = self.early.lock().await;
            early.entry(correlation_id.to_string()).or_default().push(result);
        }
        let correlation_id = correlation_id.to_string();
        let early = self.early.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::time::sleep(EARLY_RESULT_BUFFER).await;
            // Give `create_aggregation` a final chance to have registered in
            // the meantime before dropping the buffered entry.
            tokio::time::sleep(EARLY_RESULT_POLL).await;
            if !pending.lock().await.contains_key(&correlation_id) {
                if early.lock().await.remove(&correlation_id).is_some() {
                    debug!(correlation_id, "dropped early-arrived result, no aggregation ever registered");
                }
            }
        });
    }

    /// Reject every pending aggregation immediately. Idempotent.
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, mut p) in pending.drain() {
            if let Some(tx) = p.tx.take() {
                drop(tx);
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskOutcomeStatus;

    fn result_with(peer: &str, title: &str) -> TaskResult {
        TaskResult {
            task_id: "sub".into(),
            peer_node_id: peer.into(),
            status: TaskOutcomeStatus::Completed,
            tokens_used: 1,
            cost_usd: 0.0,
            duration_ms: 1,
            findings: vec![Finding { step_title: title.into(), detail: serde_json::json!({}), tool: None, succeeded: true }],
            error: None,
            attestation: None,
        }
    }

    #[tokio::test]
    async fn fulfills_when_expected_count_reached_with_prefixed_findings() {
        let aggregator = ResultAggregator::new();
        let corr = "corr-1".to_string();
        let aggregator_clone = aggregator.clone();
        let corr_clone = corr.clone();
        let handle = tokio::spawn(async move { aggregator_clone.create_aggregation(corr_clone, 2, 2_000).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        aggregator.add_result(&corr, result_with("peer-a", "first")).await;
        aggregator.add_result(&corr, result_with("peer-b", "second")).await;

        let outcome = handle.await.unwrap().unwrap();
        assert!(!outcome.partial);
        assert_eq!(outcome.findings.len(), 2);
        assert_eq!(outcome.findings[0].step_title, "[peer-a] first");
        assert_eq!(outcome.findings[1].step_title, "[peer-b] second");
    }

    #[tokio::test]
    async fn timeout_with_partial_results_resolves_ok() {
        let aggregator = ResultAggregator::new();
        let corr = "corr-2".to_string();
        let aggregator_clone = aggregator.clone();
        let corr_clone = corr.clone();
        let handle = tokio::spawn(async move { aggregator_clone.create_aggregation(corr_clone, 3, 100).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        aggregator.add_result(&corr, result_with("peer-a", "only one")).await;

        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.partial);
        assert_eq!(outcome.findings.len(), 1);
    }

    #[tokio::test]
    async fn timeout_with_no_results_errs() {
        let aggregator = ResultAggregator::new();
        let result = aggregator.create_aggregation("corr-3".into(), 2, 50).await;
        assert!(result.is_err());
    }
}
