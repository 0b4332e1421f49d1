//! Structured event sink consumed by whatever dashboard/journal the host
//! process wires up. The swarm never assumes a particular sink — it only
//! needs something implementing [`JournalSink`]; a JSONL file sink is
//! provided for standalone use and tests.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A structured event emitted for a significant state change, regardless of
/// whether that change was a success or failure — dashboards need to see
/// both.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JournalEvent {
    pub name: &'static str,
    pub data: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl JournalEvent {
    pub fn new(name: &'static str, data: Value) -> Self {
        Self { name, data, timestamp: chrono::Utc::now() }
    }
}

/// Event names emitted by the swarm. Kept as constants so every call site
/// agrees on spelling.
pub mod events {
    pub const REOPTIMIZATION_TRIGGERED: &str = "swarm.reoptimization_triggered";
    pub const PEER_REDELEGATE_ON_DRIFT: &str = "swarm.peer_redelegate_on_drift";
    pub const TASK_CANCELLED: &str = "swarm.task_cancelled";
    pub const BUDGET_ALERT: &str = "swarm.budget_alert";
    pub const TASK_PREEMPTED: &str = "swarm.task_preempted";
    pub const SABOTAGE_DETECTED: &str = "swarm.sabotage_detected";
    pub const COLLUSION_DETECTED: &str = "swarm.collusion_detected";
    pub const TRIGGER_DISPATCHED: &str = "swarm.trigger_dispatched";
    pub const DELEGATEE_ROUTED: &str = "swarm.delegatee_routed";
    pub const HUMAN_DELEGATION_REQUESTED: &str = "swarm.human_delegation_requested";
    pub const TASK_MONITORING_STARTED: &str = "swarm.task_monitoring_started";
    pub const TASK_MONITORING_STOPPED: &str = "swarm.task_monitoring_stopped";
    pub const TASK_CHECKPOINT_RECEIVED: &str = "swarm.task_checkpoint_received";
    pub const TASK_CHECKPOINT_MISSED: &str = "swarm.task_checkpoint_missed";
}

/// Narrow capability interface for an append-only structured event sink.
/// Implementations must never panic and should treat write failures as
/// non-fatal (a slow/broken journal must not stall swarm operation).
#[async_trait::async_trait]
pub trait JournalSink: Send + Sync {
    async fn record(&self, event: JournalEvent);
}

/// A sink that drops every event. Used when no journal was configured.
#[derive(Debug, Default, Clone)]
pub struct NullJournal;

#[async_trait::async_trait]
impl JournalSink for NullJournal {
    async fn record(&self, event: JournalEvent) {
        debug!(event = event.name, "journal event dropped (no sink configured)");
    }
}

/// Append-only JSONL journal sink, one line per event.
pub struct JsonlJournal {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Arc::new(Mutex::new(())) }
    }
}

#[async_trait::async_trait]
impl JournalSink for JsonlJournal {
    async fn record(&self, event: JournalEvent) {
        let _guard = self.lock.lock().await;
        let line = match serde_json::to_string(&event) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize journal event");
                return;
            }
        };
        use tokio::io::AsyncWriteExt;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await;
        match file {
            Ok(mut f) => {
                if let Err(e) = f.write_all(format!("{line}\n").as_bytes()).await {
                    warn!(error = %e, path = %self.path.display(), "failed to append journal event");
                }
            }
            Err(e) => warn!(error = %e, path = %self.path.display(), "failed to open journal file"),
        }
    }
}

/// Cheaply cloneable handle to whatever journal sink was configured.
pub type Journal = Arc<dyn JournalSink>;

pub fn null_journal() -> Journal {
    Arc::new(NullJournal)
}
