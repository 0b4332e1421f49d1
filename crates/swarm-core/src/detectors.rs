//! Behavioral anomaly detection over peer-feedback history: sabotage
//! (review-bombing, lopsided negative feedback) and collusion (a source
//! whose own standing is itself suspect). Feeds a `[0,1]` multiplier into
//! `ReputationStore::get_trust_score_blended`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::bounded::{BoundedDeque, BoundedSet};
use crate::journal::{events, Journal, JournalEvent};

const FEEDBACK_CAP: usize = 10_000;
const REPORT_CAP: usize = 1_000;
const DISCOUNT_SET_CAP: usize = 5_000;
/// Fraction of a target's negative feedback attributable to one source
/// before that source is flagged, when the target also received positive
/// feedback from other sources.
const SABOTAGE_SHARE_THRESHOLD: f64 = 0.8;
/// Negatives from one source within this window before it is flagged as
/// review-bombing, independent of the share check above.
const REVIEW_BOMB_WINDOW: Duration = Duration::from_secs(60);
const REVIEW_BOMB_COUNT: usize = 5;

#[derive(Debug, Clone)]
pub struct FeedbackRecord {
    pub source_node_id: String,
    pub target_node_id: String,
    pub positive: bool,
    pub at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SabotageReport {
    pub source_node_id: String,
    pub target_node_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CollusionReport {
    pub source_node_id: String,
    pub reason: String,
}

/// Tracks per-source collusion findings. Consulted by `SabotageDetector` to
/// cross-reference a flagged source, but never holds a reference back to
/// it — the dependency is one-directional, so there is no ownership cycle
/// to break.
#[derive(Clone)]
pub struct CollusionDetector {
    reports: Arc<Mutex<BoundedDeque<CollusionReport>>>,
    flagged: Arc<Mutex<BoundedSet>>,
    journal: Journal,
}

impl CollusionDetector {
    pub fn new(journal: Journal) -> Self {
        Self {
            reports: Arc::new(Mutex::new(BoundedDeque::new(REPORT_CAP))),
            flagged: Arc::new(Mutex::new(BoundedSet::new(DISCOUNT_SET_CAP))),
            journal,
        }
    }

    pub async fn flag(&self, source_node_id: &str, reason: &str) {
        self.flagged.lock().await.insert(source_node_id.to_string());
        self.reports.lock().await.push(CollusionReport { source_node_id: source_node_id.to_string(), reason: reason.to_string() });
        self.journal
            .record(JournalEvent::new(events::COLLUSION_DETECTED, serde_json::json!({"source_node_id": source_node_id, "reason": reason})))
            .await;
    }

    pub async fn is_flagged(&self, source_node_id: &str) -> bool {
        self.flagged.lock().await.contains(source_node_id)
    }

    pub async fn reports(&self) -> Vec<CollusionReport> {
        self.reports.lock().await.iter().cloned().collect()
    }
}

/// Detects sabotage against a target's reputation: lopsided negative
/// feedback from one source, or a burst of negatives in a short window.
/// Discounted `(source, target)` pairs are recorded so callers can compute
/// the behavioral multiplier `ReputationStore::get_trust_score_blended`
/// expects.
#[derive(Clone)]
pub struct SabotageDetector {
    feedback: Arc<Mutex<BoundedDeque<FeedbackRecord>>>,
    reports: Arc<Mutex<BoundedDeque<SabotageReport>>>,
    discounted: Arc<Mutex<BoundedSet>>,
    collusion: Option<CollusionDetector>,
    journal: Journal,
}

impl SabotageDetector {
    pub fn new(journal: Journal) -> Self {
        Self {
            feedback: Arc::new(Mutex::new(BoundedDeque::new(FEEDBACK_CAP))),
            reports: Arc::new(Mutex::new(BoundedDeque::new(REPORT_CAP))),
            discounted: Arc::new(Mutex::new(BoundedSet::new(DISCOUNT_SET_CAP))),
            collusion: None,
            journal,
        }
    }

    pub fn set_collusion_detector(&mut self, collusion: CollusionDetector) {
        self.collusion = Some(collusion);
    }

    /// Record one feedback event and evaluate the heuristics against the
    /// target's accumulated history.
    pub async fn record_feedback(&self, record: FeedbackRecord) {
        let target = record.target_node_id.clone();
        let source = record.source_node_id.clone();
        self.feedback.lock().await.push(record);

        let history: Vec<FeedbackRecord> = self.feedback.lock().await.iter().filter(|f| f.target_node_id == target).cloned().collect();

        if let Some(reason) = lopsided_negative_share(&history, &source) {
            self.flag(&source, &target, &reason).await;
        } else if let Some(reason) = review_bombing(&history, &source) {
            self.flag(&source, &target, &reason).await;
        }
    }

    async fn flag(&self, source: &str, target: &str, reason: &str) {
        self.discounted.lock().await.insert(format!("{source}|{target}"));
        self.reports.lock().await.push(SabotageReport { source_node_id: source.to_string(), target_node_id: target.to_string(), reason: reason.to_string() });
        info!(source, target, reason, "sabotage pattern detected");
        self.journal
            .record(JournalEvent::new(events::SABOTAGE_DETECTED, serde_json::json!({"source_node_id": source, "target_node_id": target, "reason": reason})))
            .await;
        if let Some(collusion) = &self.collusion {
            if collusion.is_flagged(source).await {
                self.journal
                    .record(JournalEvent::new(
                        events::SABOTAGE_DETECTED,
                        serde_json::json!({"source_node_id": source, "target_node_id": target, "reason": "source independently flagged for collusion"}),
                    ))
                    .await;
            }
        }
    }

    /// Whether `(source, target)`'s feedback has been discounted by a prior
    /// detection. Callers fold this into the behavioral multiplier passed
    /// to `ReputationStore::get_trust_score_blended`.
    pub async fn is_discounted(&self, source_node_id: &str, target_node_id: &str) -> bool {
        self.discounted.lock().await.contains(&format!("{source_node_id}|{target_node_id}"))
    }

    /// `0.0` if `source` is discounted against `target`, else `1.0` — the
    /// behavioral multiplier `get_trust_score_blended` expects.
    pub async fn behavioral_multiplier(&self, source_node_id: &str, target_node_id: &str) -> f64 {
        if self.is_discounted(source_node_id, target_node_id).await { 0.0 } else { 1.0 }
    }

    /// `0.0` if any source's feedback about `target` has been discounted,
    /// else `1.0`. Used where the caller scores a candidate peer rather than
    /// a specific feedback relationship (e.g. `WorkDistributor` selection).
    pub async fn target_discount_factor(&self, target_node_id: &str) -> f64 {
        let suffix = format!("|{target_node_id}");
        let discounted = self.discounted.lock().await;
        if discounted.iter().any(|pair| pair.ends_with(&suffix)) {
            0.0
        } else {
            1.0
        }
    }

    pub async fn reports(&self) -> Vec<SabotageReport> {
        self.reports.lock().await.iter().cloned().collect()
    }
}

fn lopsided_negative_share(history: &[FeedbackRecord], source: &str) -> Option<String> {
    let negatives: Vec<&FeedbackRecord> = history.iter().filter(|f| !f.positive).collect();
    if negatives.is_empty() {
        return None;
    }
    let from_source = negatives.iter().filter(|f| f.source_node_id == source).count();
    let share = from_source as f64 / negatives.len() as f64;
    let has_other_positive = history.iter().any(|f| f.positive && f.source_node_id != source);
    if share > SABOTAGE_SHARE_THRESHOLD && has_other_positive {
        Some(format!("{:.0}% of negative feedback from one source while others are positive", share * 100.0))
    } else {
        None
    }
}

fn review_bombing(history: &[FeedbackRecord], source: &str) -> Option<String> {
    let mut from_source: Vec<&FeedbackRecord> = history.iter().filter(|f| !f.positive && f.source_node_id == source).collect();
    from_source.sort_by_key(|f| f.at);
    if from_source.len() < REVIEW_BOMB_COUNT {
        return None;
    }
    let newest = from_source.last()?.at;
    let in_window = from_source.iter().filter(|f| newest - f.at <= chrono::Duration::from_std(REVIEW_BOMB_WINDOW).unwrap()).count();
    if in_window >= REVIEW_BOMB_COUNT {
        Some(format!("{in_window} negative ratings within {}s", REVIEW_BOMB_WINDOW.as_secs()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::null_journal;

    fn rec(source: &str, target: &str, positive: bool, offset_secs: i64) -> FeedbackRecord {
        FeedbackRecord {
            source_node_id: source.to_string(),
            target_node_id: target.to_string(),
            positive,
            at: chrono::Utc::now() + chrono::Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn lopsided_negative_feedback_is_flagged() {
        let detector = SabotageDetector::new(null_journal());
        detector.record_feedback(rec("peer-x", "peer-y", true, 0)).await;
        detector.record_feedback(rec("peer-z", "peer-y", true, 1)).await;
        for i in 0..5 {
            detector.record_feedback(rec("peer-bad", "peer-y", false, 2 + i)).await;
        }
        assert!(detector.is_discounted("peer-bad", "peer-y").await);
        assert_eq!(detector.behavioral_multiplier("peer-bad", "peer-y").await, 0.0);
        assert_eq!(detector.behavioral_multiplier("peer-x", "peer-y").await, 1.0);
    }

    #[tokio::test]
    async fn review_bombing_burst_is_flagged_even_without_other_positives() {
        let detector = SabotageDetector::new(null_journal());
        for i in 0..5 {
            detector.record_feedback(rec("peer-bad", "peer-y", false, i)).await;
        }
        assert!(detector.is_discounted("peer-bad", "peer-y").await);
    }

    #[tokio::test]
    async fn sparse_mixed_feedback_is_not_flagged() {
        let detector = SabotageDetector::new(null_journal());
        detector.record_feedback(rec("peer-a", "peer-y", true, 0)).await;
        detector.record_feedback(rec("peer-b", "peer-y", false, 1)).await;
        assert!(!detector.is_discounted("peer-b", "peer-y").await);
    }

    #[tokio::test]
    async fn collusion_flagged_source_is_queryable() {
        let collusion = CollusionDetector::new(null_journal());
        collusion.flag("peer-bad", "colludes with peer-bad2").await;
        assert!(collusion.is_flagged("peer-bad").await);
        assert!(!collusion.is_flagged("peer-good").await);
        assert_eq!(collusion.reports().await.len(), 1);
    }

    #[tokio::test]
    async fn sabotage_detector_cross_references_collusion_detector() {
        let journal = null_journal();
        let collusion = CollusionDetector::new(journal.clone());
        collusion.flag("peer-bad", "ring member").await;
        let mut sabotage = SabotageDetector::new(journal);
        sabotage.set_collusion_detector(collusion);
        sabotage.record_feedback(rec("peer-x", "peer-y", true, 0)).await;
        for i in 0..5 {
            sabotage.record_feedback(rec("peer-bad", "peer-y", false, 1 + i)).await;
        }
        assert!(sabotage.is_discounted("peer-bad", "peer-y").await);
    }
}
