//! Outbound JSON-over-HTTP client: every method carries an explicit
//! deadline and reports round-trip latency, never panics on a remote
//! failure.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::types::*;
use crate::identity::NodeIdentity;
use crate::model::TaskResult;

#[derive(Debug, Clone)]
pub struct TransportClient {
    http: Client,
    default_timeout: Duration,
}

impl TransportClient {
    pub fn new(default_timeout: Duration) -> Self {
        Self { http: Client::new(), default_timeout }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, timeout: Duration) -> ClientResponse<T> {
        let start = Instant::now();
        let result = self.http.get(url).timeout(timeout).send().await;
        self.finish(result, start).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, url: &str, body: &B, timeout: Duration) -> ClientResponse<T> {
        let start = Instant::now();
        let result = self.http.post(url).json(body).timeout(timeout).send().await;
        self.finish(result, start).await
    }

    async fn finish<T: DeserializeOwned>(
        &self,
        result: Result<reqwest::Response, reqwest::Error>,
        start: Instant,
    ) -> ClientResponse<T> {
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let ok = resp.status().is_success();
                let data = resp.json::<T>().await.ok();
                ClientResponse { ok: ok && data.is_some(), status, data, latency_ms }
            }
            Err(e) => {
                debug!(error = %e, "transport call failed");
                ClientResponse { ok: false, status: 0, data: None, latency_ms }
            }
        }
    }

    pub async fn identity(&self, base_url: &str) -> ClientResponse<NodeIdentity> {
        self.get(&format!("{base_url}/api/identity"), self.default_timeout).await
    }

    pub async fn peers(&self, base_url: &str, status: Option<&str>) -> ClientResponse<PeersResponse> {
        let url = match status {
            Some(s) => format!("{base_url}/api/peers?status={s}"),
            None => format!("{base_url}/api/peers"),
        };
        self.get(&url, self.default_timeout).await
    }

    pub async fn join(&self, base_url: &str, identity: &NodeIdentity) -> ClientResponse<JoinResponse> {
        let req = JoinRequest { identity: identity.clone() };
        self.post(&format!("{base_url}/api/join"), &req, self.default_timeout).await
    }

    pub async fn leave(&self, base_url: &str, node_id: &str) -> ClientResponse<JoinResponse> {
        let req = LeaveRequest { node_id: node_id.to_string() };
        self.post(&format!("{base_url}/api/leave"), &req, self.default_timeout).await
    }

    pub async fn heartbeat(&self, base_url: &str, req: &HeartbeatRequest) -> ClientResponse<JoinResponse> {
        self.post(&format!("{base_url}/api/heartbeat"), req, self.default_timeout).await
    }

    pub async fn gossip(&self, base_url: &str, peers: Vec<PeerSummary>) -> ClientResponse<GossipResponse> {
        let req = GossipRequest { peers };
        self.post(&format!("{base_url}/api/gossip"), &req, self.default_timeout).await
    }

    /// Synchronous short-timeout delegation offer; callers should use a
    /// tighter timeout than the overall `delegation_timeout_ms`.
    pub async fn task(&self, base_url: &str, req: &TaskDelegationRequest, timeout: Duration) -> ClientResponse<TaskAcceptResponse> {
        self.post(&format!("{base_url}/api/task"), req, timeout).await
    }

    pub async fn result(&self, base_url: &str, result: &TaskResult) -> ClientResponse<ResultResponse> {
        self.post(&format!("{base_url}/api/result"), result, self.default_timeout).await
    }

    pub async fn task_status(&self, base_url: &str, task_id: &str, timeout: Duration) -> ClientResponse<TaskStatusResponse> {
        self.get(&format!("{base_url}/api/task/{task_id}/status"), timeout).await
    }

    pub async fn cancel_task(&self, base_url: &str, task_id: &str, reason: Option<String>) -> ClientResponse<CancelResponse> {
        let req = CancelRequest { reason };
        self.post(&format!("{base_url}/api/task/{task_id}/cancel"), &req, self.default_timeout).await
    }

    pub async fn trigger(&self, base_url: &str, trigger: &ExternalTrigger) -> ClientResponse<TriggerResponse> {
        self.post(&format!("{base_url}/api/trigger"), trigger, self.default_timeout).await
    }

    pub async fn status(&self, base_url: &str) -> ClientResponse<NodeStatusResponse> {
        self.get(&format!("{base_url}/api/status"), self.default_timeout).await
    }
}
