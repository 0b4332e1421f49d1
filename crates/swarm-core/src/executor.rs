//! The seam to the opaque task executor (the kernel, in the larger system
//! this crate is one subsystem of). The swarm only ever hands it a task
//! description and later receives a `TaskResult` back; it never inspects how
//! the work was planned or carried out.

use async_trait::async_trait;

use crate::model::{Constraints, TaskResult};

/// Executes one delegated task and produces its outcome. Implementations are
/// expected to run the work asynchronously and may take arbitrarily long —
/// callers drive the checkpoint/result protocol independently of this call.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task_id: &str, session_id: &str, task_text: &str, constraints: Option<&Constraints>) -> TaskResult;
}

/// Synthesizes a trivial successful result with no findings. Useful for
/// standalone demos and tests where no real kernel is wired in; a production
/// deployment installs its own `TaskExecutor`.
pub struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task_id: &str, _session_id: &str, task_text: &str, _constraints: Option<&Constraints>) -> TaskResult {
        TaskResult {
            task_id: task_id.to_string(),
            peer_node_id: String::new(),
            status: crate::model::TaskOutcomeStatus::Completed,
            tokens_used: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            findings: vec![crate::model::Finding {
                step_title: "echo".to_string(),
                detail: serde_json::json!({"task_text": task_text}),
                tool: None,
                succeeded: true,
            }],
            error: None,
            attestation: None,
        }
    }
}
