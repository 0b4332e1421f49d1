//! Dispatch for externally-originated triggers: cancel a task, react to a
//! budget alert, or preempt a lower-priority delegation. Each trigger kind
//! has its own bounded listener registry so hosts (dashboards, CLIs) can
//! subscribe without the handler knowing who's listening.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::bounded::BoundedDeque;
use crate::distributor::WorkDistributor;
use crate::journal::{events, Journal, JournalEvent};
use crate::model::Constraints;
use crate::monitor::TaskMonitor;
use crate::transport::types::ExternalTrigger;

fn trigger_kind(trigger: &ExternalTrigger) -> &'static str {
    match trigger {
        ExternalTrigger::TaskCancel { .. } => "task_cancel",
        ExternalTrigger::BudgetAlert { .. } => "budget_alert",
        ExternalTrigger::PriorityPreempt { .. } => "priority_preempt",
    }
}

/// Routes external triggers to the appropriate swarm component and fans
/// them out to any subscribed listeners. Cheap to clone.
#[derive(Clone)]
pub struct ExternalTriggerHandler {
    distributor: WorkDistributor,
    monitor: TaskMonitor,
    journal: Journal,
    config: swarm_config::TriggerConfig,
    budget: swarm_config::BudgetConfig,
    listeners: Arc<Mutex<HashMap<&'static str, BoundedDeque<mpsc::UnboundedSender<ExternalTrigger>>>>>,
}

impl ExternalTriggerHandler {
    pub fn new(
        distributor: WorkDistributor,
        monitor: TaskMonitor,
        journal: Journal,
        config: swarm_config::TriggerConfig,
        budget: swarm_config::BudgetConfig,
    ) -> Self {
        Self { distributor, monitor, journal, config, budget, listeners: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register interest in one trigger kind. The registry for that kind is
    /// capped at `config.listener_cap`; registering past capacity evicts
    /// the oldest listener (its channel is simply dropped, which the
    /// listener observes as channel closure).
    pub async fn subscribe(&self, kind: &'static str) -> mpsc::UnboundedReceiver<ExternalTrigger> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.listeners.lock().await;
        let deque = listeners.entry(kind).or_insert_with(|| BoundedDeque::new(self.config.listener_cap));
        deque.push(tx);
        rx
    }

    async fn notify(&self, trigger: &ExternalTrigger) {
        let kind = trigger_kind(trigger);
        let listeners = self.listeners.lock().await;
        if let Some(deque) = listeners.get(kind) {
            for tx in deque.iter() {
                let _ = tx.send(trigger.clone());
            }
        }
    }

    /// Dispatch one trigger. Never errors: an unactionable trigger (unknown
    /// task id, no budget ceiling on record) is logged and dropped.
    pub async fn dispatch(&self, trigger: ExternalTrigger) {
        self.journal
            .record(JournalEvent::new(events::TRIGGER_DISPATCHED, serde_json::json!({"kind": trigger_kind(&trigger)})))
            .await;
        self.notify(&trigger).await;

        match &trigger {
            ExternalTrigger::TaskCancel { task_id, reason } => {
                self.monitor.stop(task_id).await;
                let cancelled = self.distributor.cancel_task(task_id, reason.clone()).await;
                info!(task_id, cancelled, "task_cancel trigger handled");
            }
            ExternalTrigger::BudgetAlert { task_id, cost_usd, tokens, duration_ms } => {
                self.handle_budget_alert(task_id, *cost_usd, *tokens, *duration_ms).await;
            }
            ExternalTrigger::PriorityPreempt { task_id, task_text, session_id, priority } => {
                self.handle_priority_preempt(task_id, task_text, session_id, *priority).await;
            }
        }
    }

    async fn handle_budget_alert(&self, task_id: &str, cost_usd: f64, tokens: u64, duration_ms: u64) {
        let Some(delegation) = self.distributor.active_delegations().await.into_iter().find(|d| d.task_id == task_id) else {
            warn!(task_id, "budget_alert for unknown task, dropping");
            return;
        };
        let Some(ceiling) = delegation.constraints.as_ref().and_then(|c| c.max_cost_usd) else {
            // No budget ceiling recorded for this delegation — nothing to
            // alert against.
            return;
        };
        if ceiling <= 0.0 {
            return;
        }
        let fraction = cost_usd / ceiling;

        if fraction >= 1.0 {
            self.distributor.cancel_task(task_id, Some("budget exceeded".to_string())).await;
            self.monitor.stop(task_id).await;
            warn!(task_id, cost_usd, ceiling, "budget exceeded, task cancelled");
            self.journal
                .record(JournalEvent::new(events::TASK_CANCELLED, serde_json::json!({"task_id": task_id, "reason": "budget_exceeded"})))
                .await;
            return;
        }

        if fraction >= self.budget.alert_threshold_fraction {
            self.journal
                .record(JournalEvent::new(
                    events::BUDGET_ALERT,
                    serde_json::json!({"task_id": task_id, "cost_usd": cost_usd, "tokens": tokens, "duration_ms": duration_ms, "fraction": fraction}),
                ))
                .await;
        }
    }

    async fn handle_priority_preempt(&self, task_id: &str, task_text: &str, session_id: &str, priority: i32) {
        let delegations = self.distributor.active_delegations().await;
        let candidate = delegations
            .into_iter()
            .filter(|d| d.priority < self.config.min_priority_to_preempt && d.priority < priority)
            .min_by_key(|d| d.priority);

        let Some(victim) = candidate else {
            info!(task_id, priority, "priority_preempt found no preemptable delegation");
            return;
        };

        self.distributor.cancel_task(&victim.task_id, Some("preempted by higher priority task".to_string())).await;
        self.monitor.stop(&victim.task_id).await;
        self.journal
            .record(JournalEvent::new(
                events::TASK_PREEMPTED,
                serde_json::json!({"task_id": victim.task_id, "preempted_by": task_id, "victim_priority": victim.priority, "new_priority": priority}),
            ))
            .await;

        let constraints = Constraints::default();
        self.distributor.distribute(task_text, session_id, Some(constraints), Some(priority)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::null_journal;
    use crate::mesh::manager::MeshManager;
    use crate::reputation::ReputationStore;
    use crate::transport::client::TransportClient;
    use std::time::Duration;
    use tokio::sync::Mutex as TokioMutex;

    async fn handler() -> ExternalTriggerHandler {
        let mesh = MeshManager::spawn(swarm_config::MeshConfig::default(), null_journal(), TransportClient::new(Duration::from_secs(1)));
        let distributor = WorkDistributor::new(
            crate::identity::NodeIdentity::new("self", "Self", "http://self", vec![]),
            mesh,
            TransportClient::new(Duration::from_millis(200)),
            Arc::new(TokioMutex::new(ReputationStore::new(None))),
            null_journal(),
            swarm_config::DistributorConfig::default(),
        );
        let monitor = TaskMonitor::new(TransportClient::new(Duration::from_millis(200)), null_journal(), swarm_config::MonitoringConfig::default());
        ExternalTriggerHandler::new(
            distributor,
            monitor,
            null_journal(),
            swarm_config::TriggerConfig::default(),
            swarm_config::BudgetConfig::default(),
        )
    }

    #[tokio::test]
    async fn cancel_of_unknown_task_is_a_no_op() {
        let h = handler().await;
        h.dispatch(ExternalTrigger::TaskCancel { task_id: "nope".into(), reason: None }).await;
    }

    #[tokio::test]
    async fn budget_alert_with_no_active_delegation_is_dropped() {
        let h = handler().await;
        h.dispatch(ExternalTrigger::BudgetAlert { task_id: "nope".into(), cost_usd: 5.0, tokens: 10, duration_ms: 10 }).await;
    }

    #[tokio::test]
    async fn priority_preempt_with_no_candidates_is_a_no_op() {
        let h = handler().await;
        h.dispatch(ExternalTrigger::PriorityPreempt {
            task_id: "t1".into(),
            task_text: "urgent".into(),
            session_id: "s1".into(),
            priority: 10,
        })
        .await;
    }

    #[tokio::test]
    async fn subscribers_receive_dispatched_triggers() {
        let h = handler().await;
        let mut rx = h.subscribe("task_cancel").await;
        h.dispatch(ExternalTrigger::TaskCancel { task_id: "t1".into(), reason: None }).await;
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ExternalTrigger::TaskCancel { .. }));
    }
}
