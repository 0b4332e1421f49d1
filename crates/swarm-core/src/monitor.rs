//! Per-task checkpoint polling. Each watched task gets its own ticker task;
//! `TaskMonitor` itself is a thin registry so `start`/`stop` stay idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::journal::{events, Journal, JournalEvent};
use crate::model::CheckpointStatus;
use crate::transport::client::TransportClient;

/// Invoked when a watched task crosses `max_missed_checkpoints` consecutive
/// misses. Implementors typically redelegate or surface the task as failed.
#[async_trait]
pub trait CheckpointEscalation: Send + Sync {
    async fn on_checkpoints_missed(&self, task_id: &str, peer_node_id: &str);
}

struct NoopEscalation;

#[async_trait]
impl CheckpointEscalation for NoopEscalation {
    async fn on_checkpoints_missed(&self, task_id: &str, peer_node_id: &str) {
        warn!(task_id, peer_node_id, "checkpoints missed, no escalation handler installed");
    }
}

struct Watch {
    handle: JoinHandle<()>,
}

/// Poll registry. Cheap to clone — the watch map is shared behind an `Arc`.
#[derive(Clone)]
pub struct TaskMonitor {
    transport: TransportClient,
    journal: Journal,
    config: swarm_config::MonitoringConfig,
    escalation: Arc<dyn CheckpointEscalation>,
    watches: Arc<Mutex<HashMap<String, Watch>>>,
    missed_counts: Arc<Mutex<HashMap<String, u32>>>,
}

impl TaskMonitor {
    pub fn new(transport: TransportClient, journal: Journal, config: swarm_config::MonitoringConfig) -> Self {
        Self::with_escalation(transport, journal, config, Arc::new(NoopEscalation))
    }

    pub fn with_escalation(
        transport: TransportClient,
        journal: Journal,
        config: swarm_config::MonitoringConfig,
        escalation: Arc<dyn CheckpointEscalation>,
    ) -> Self {
        Self {
            transport,
            journal,
            config,
            escalation,
            watches: Arc::new(Mutex::new(HashMap::new())),
            missed_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current consecutive-miss count for `task_id`, or 0 if unwatched.
    pub async fn missed_checkpoints(&self, task_id: &str) -> u32 {
        self.missed_counts.lock().await.get(task_id).copied().unwrap_or(0)
    }

    /// Begin polling `task_id` at `peer_api_url`. A double-start for the same
    /// `task_id` is a no-op.
    pub async fn start(&self, task_id: String, peer_node_id: String, peer_api_url: String) {
        let mut watches = self.watches.lock().await;
        if watches.contains_key(&task_id) {
            return;
        }
        self.journal
            .record(JournalEvent::new(events::TASK_MONITORING_STARTED, serde_json::json!({"task_id": task_id})))
            .await;

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let checkpoint_timeout = Duration::from_millis(self.config.checkpoint_timeout_ms);
        let max_missed = self.config.max_missed_checkpoints;

        let transport = self.transport.clone();
        let journal = self.journal.clone();
        let escalation = self.escalation.clone();
        let watches_ref = self.watches.clone();
        let missed_counts = self.missed_counts.clone();
        let poll_task_id = task_id.clone();
        let poll_peer_node_id = peer_node_id.clone();

        missed_counts.lock().await.insert(task_id.clone(), 0);

        let handle = tokio::spawn(async move {
            let mut missed = 0u32;
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                let resp = transport.task_status(&peer_api_url, &poll_task_id, checkpoint_timeout).await;
                match resp.data.filter(|_| resp.ok) {
                    Some(status) => match status.status {
                        CheckpointStatus::Completed | CheckpointStatus::Failed | CheckpointStatus::Cancelled => {
                            journal
                                .record(JournalEvent::new(
                                    events::TASK_CHECKPOINT_RECEIVED,
                                    serde_json::json!({"task_id": poll_task_id, "status": status.status}),
                                ))
                                .await;
                            break;
                        }
                        CheckpointStatus::Running | CheckpointStatus::Paused => {
                            missed = 0;
                            missed_counts.lock().await.insert(poll_task_id.clone(), 0);
                            debug!(task_id = %poll_task_id, "checkpoint ok");
                        }
                    },
                    None => {
                        missed += 1;
                        missed_counts.lock().await.insert(poll_task_id.clone(), missed);
                        journal
                            .record(JournalEvent::new(events::TASK_CHECKPOINT_MISSED, serde_json::json!({"task_id": poll_task_id, "missed": missed})))
                            .await;
                        if missed >= max_missed {
                            escalation.on_checkpoints_missed(&poll_task_id, &poll_peer_node_id).await;
                            break;
                        }
                    }
                }
            }
            watches_ref.lock().await.remove(&poll_task_id);
            missed_counts.lock().await.remove(&poll_task_id);
            journal
                .record(JournalEvent::new(events::TASK_MONITORING_STOPPED, serde_json::json!({"task_id": poll_task_id})))
                .await;
        });

        watches.insert(task_id, Watch { handle });
    }

    pub async fn stop(&self, task_id: &str) {
        if let Some(watch) = self.watches.lock().await.remove(task_id) {
            watch.handle.abort();
        }
        self.missed_counts.lock().await.remove(task_id);
    }

    pub async fn stop_all(&self) {
        let mut watches = self.watches.lock().await;
        for (_, watch) in watches.drain() {
            watch.handle.abort();
        }
        self.missed_counts.lock().await.clear();
    }

    pub async fn watched_count(&self) -> usize {
        self.watches.lock().await.len()
    }
}
