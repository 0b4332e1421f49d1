// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end delegation over real HTTP, two independent `SwarmNode`s each
//! serving their own `axum::Router` on a loopback port.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use swarm_core::executor::TaskExecutor;
use swarm_core::identity::NodeIdentity;
use swarm_core::journal::JsonlJournal;
use swarm_core::model::{Constraints, Finding, TaskOutcomeStatus, TaskResult};
use swarm_core::SwarmNode;

/// Mirrors the fixture values used to check `distribute` end-to-end: a 200ms
/// delay before reporting completion with a fixed cost/token count.
struct FixtureExecutor;

#[async_trait]
impl TaskExecutor for FixtureExecutor {
    async fn execute(&self, task_id: &str, _session_id: &str, _task_text: &str, _constraints: Option<&Constraints>) -> TaskResult {
        tokio::time::sleep(Duration::from_millis(200)).await;
        TaskResult {
            task_id: task_id.to_string(),
            peer_node_id: String::new(),
            status: TaskOutcomeStatus::Completed,
            tokens_used: 200,
            cost_usd: 0.003,
            duration_ms: 200,
            findings: vec![Finding { step_title: "ok".to_string(), detail: serde_json::Value::Null, tool: None, succeeded: true }],
            error: None,
            attestation: None,
        }
    }
}

async fn spawn_node(node_id: &str, api_url: &str, journal_path: std::path::PathBuf) -> SwarmNode {
    let identity = NodeIdentity::new(node_id, node_id, api_url, vec!["rust".into()]);
    let journal: swarm_core::journal::Journal = Arc::new(JsonlJournal::new(journal_path));
    let node = SwarmNode::with_executor_and_journal(
        identity,
        swarm_config::Config::default(),
        format!("secret-{node_id}").into_bytes(),
        Arc::new(FixtureExecutor),
        journal,
    );

    let addr = api_url.trim_start_matches("http://").to_string();
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    let router = node.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    // give the listener a moment to start accepting before callers dial it
    tokio::time::sleep(Duration::from_millis(20)).await;
    node
}

/// S1 — two-peer delegation, happy path.
#[tokio::test]
async fn two_peer_delegation_happy_path() {
    let tmp = tempfile::tempdir().unwrap();
    let alpha = spawn_node("alpha", "http://127.0.0.1:32100", tmp.path().join("alpha.jsonl")).await;
    let beta = spawn_node("beta", "http://127.0.0.1:32101", tmp.path().join("beta.jsonl")).await;

    alpha.mesh.handle_join(beta.identity.clone()).await;
    beta.mesh.handle_join(alpha.identity.clone()).await;

    let result = alpha.distributor.distribute("analyze X", "sess-1", None, None).await;

    assert_eq!(result.status, TaskOutcomeStatus::Completed);
    assert_eq!(result.tokens_used, 200);
    assert_eq!(result.cost_usd, 0.003);
    assert_eq!(result.duration_ms, 200);
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].step_title, "ok");

    let reputation = alpha.reputation.lock().await;
    let beta_rep = reputation.get("beta").expect("alpha tracks beta's reputation");
    assert_eq!(beta_rep.tasks_completed, 1);
    drop(reputation);

    let alpha_journal = tokio::fs::read_to_string(tmp.path().join("alpha.jsonl")).await.unwrap();
    assert!(alpha_journal.lines().any(|l| l.contains("swarm.task_monitoring_stopped")));

    alpha.shutdown().await;
    beta.shutdown().await;
}

/// A delegator with no eligible peers at all gets back an aborted result
/// instead of hanging.
#[tokio::test]
async fn distribute_with_no_peers_aborts() {
    let tmp = tempfile::tempdir().unwrap();
    let alone = spawn_node("alone", "http://127.0.0.1:32102", tmp.path().join("alone.jsonl")).await;

    let result = alone.distributor.distribute("analyze X", "sess-1", None, None).await;
    assert_eq!(result.status, TaskOutcomeStatus::Failed);

    alone.shutdown().await;
}

/// A `tool_allowlist` constraint excludes peers that don't advertise a
/// matching capability, leaving `distribute` with nothing to pick from.
#[tokio::test]
async fn distribute_respects_tool_allowlist() {
    let tmp = tempfile::tempdir().unwrap();
    let alpha = spawn_node("alpha2", "http://127.0.0.1:32103", tmp.path().join("alpha.jsonl")).await;
    let beta = spawn_node("beta2", "http://127.0.0.1:32104", tmp.path().join("beta.jsonl")).await;

    alpha.mesh.handle_join(beta.identity.clone()).await;

    let constraints = Constraints { tool_allowlist: Some(vec!["go".to_string()]), required_capabilities: None, max_cost_usd: None };
    let result = alpha.distributor.distribute("analyze X", "sess-1", Some(constraints), None).await;

    // beta only advertises "rust", so no eligible candidate exists
    assert_eq!(result.status, TaskOutcomeStatus::Failed);

    alpha.shutdown().await;
    beta.shutdown().await;
}
