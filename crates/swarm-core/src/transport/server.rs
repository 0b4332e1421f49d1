//! HTTP side of the transport: one `axum::Router` exposing every `/api/*`
//! endpoint a peer or external caller can reach. Handlers are thin —
//! validation and dispatch only, all real state lives behind the
//! component handles in [`AppState`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Mutex;
use tracing::warn;

use crate::dct::DctManager;
use crate::detectors::{CollusionDetector, SabotageDetector};
use crate::discovery::Discovery;
use crate::distributor::WorkDistributor;
use crate::error::SwarmError;
use crate::executor::TaskExecutor;
use crate::identity::NodeIdentity;
use crate::mesh::manager::MeshHandle;
use crate::mesh::peer::PeerStatus;
use crate::monitor::TaskMonitor;
use crate::transport::client::TransportClient;
use crate::trigger::ExternalTriggerHandler;

use super::types::*;

/// Everything a handler needs to serve one request. Cheap to clone — every
/// field is itself a handle or an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub identity: NodeIdentity,
    pub mesh: MeshHandle,
    pub discovery: Arc<Discovery>,
    pub distributor: WorkDistributor,
    pub monitor: TaskMonitor,
    pub trigger: ExternalTriggerHandler,
    pub transport: TransportClient,
    pub dct: Arc<Mutex<DctManager>>,
    pub collusion: CollusionDetector,
    pub sabotage: SabotageDetector,
    pub executor: Arc<dyn TaskExecutor>,
    pub started_at: Instant,
}

/// Uniform error body: `{"error": "..."}`, status from `SwarmError::status_code`.
impl IntoResponse for SwarmError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/identity", get(identity))
        .route("/api/peers", get(peers))
        .route("/api/join", post(join))
        .route("/api/leave", post(leave))
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/gossip", post(gossip))
        .route("/api/task", post(task))
        .route("/api/result", post(result))
        .route("/api/task/{id}/status", get(task_status))
        .route("/api/task/{id}/cancel", post(cancel))
        .route("/api/trigger", post(trigger))
        .route("/api/status", get(status))
        .with_state(state)
}

async fn identity(State(state): State<AppState>) -> Json<NodeIdentity> {
    Json(state.identity)
}

async fn peers(State(state): State<AppState>, Query(query): Query<PeersQuery>) -> Json<PeersResponse> {
    let status = query.status.as_deref().and_then(parse_status);
    let peers = state
        .mesh
        .get_all_peers(status)
        .await
        .into_iter()
        .map(|p| PeerSummary {
            node_id: p.identity.node_id.clone(),
            display_name: p.identity.display_name.clone(),
            api_url: p.identity.api_url.clone(),
            capabilities: p.identity.capabilities.clone(),
            version: p.identity.version.clone(),
            status: p.status,
        })
        .collect();
    Json(PeersResponse { peers })
}

fn parse_status(s: &str) -> Option<PeerStatus> {
    match s {
        "active" => Some(PeerStatus::Active),
        "suspected" => Some(PeerStatus::Suspected),
        "unreachable" => Some(PeerStatus::Unreachable),
        "left" => Some(PeerStatus::Left),
        "evicted" => Some(PeerStatus::Evicted),
        _ => None,
    }
}

async fn join(State(state): State<AppState>, Json(req): Json<JoinRequest>) -> Json<JoinResponse> {
    state.mesh.handle_join(req.identity).await;
    Json(JoinResponse { ok: true })
}

async fn leave(State(state): State<AppState>, Json(req): Json<LeaveRequest>) -> Json<JoinResponse> {
    state.mesh.handle_leave(req.node_id).await;
    Json(JoinResponse { ok: true })
}

async fn heartbeat(State(state): State<AppState>, Json(req): Json<HeartbeatRequest>) -> Result<Json<JoinResponse>, SwarmError> {
    state
        .mesh
        .handle_heartbeat(req.node_id.clone())
        .await
        .map(|_| Json(JoinResponse { ok: true }))
        .map_err(|_| SwarmError::UnknownPeer(req.node_id))
}

async fn gossip(State(state): State<AppState>, Json(req): Json<GossipRequest>) -> Json<GossipResponse> {
    state.discovery.ingest_gossip(req.peers).await;
    let peers = state
        .mesh
        .get_active_peers()
        .await
        .into_iter()
        .map(|p| PeerSummary {
            node_id: p.identity.node_id.clone(),
            display_name: p.identity.display_name.clone(),
            api_url: p.identity.api_url.clone(),
            capabilities: p.identity.capabilities.clone(),
            version: p.identity.version.clone(),
            status: p.status,
        })
        .collect();
    Json(GossipResponse { peers })
}

/// Synchronously accept (or decline) a delegation offer, then run it via the
/// installed `TaskExecutor` in the background and `POST result` back to the
/// delegator once it completes.
async fn task(State(state): State<AppState>, Json(req): Json<TaskDelegationRequest>) -> Json<TaskAcceptResponse> {
    let executor = state.executor.clone();
    let transport = state.transport.clone();
    let self_node_id = state.identity.node_id.clone();
    let task_id = req.task_id.clone();
    let session_id = req.session_id.clone();
    let task_text = req.task_text.clone();
    let constraints = req.constraints.clone();
    let correlation_id = req.correlation_id.clone();
    let delegator_api_url = req.delegator_api_url.clone();

    tokio::spawn(async move {
        let mut result = executor.execute(&task_id, &session_id, &task_text, constraints.as_ref()).await;
        result.peer_node_id = self_node_id;
        if let Some(corr) = correlation_id {
            result.task_id = corr;
        }
        let resp = transport.result(&delegator_api_url, &result).await;
        if !resp.ok {
            warn!(task_id = %task_id, delegator_api_url = %delegator_api_url, "failed to post task result back to delegator");
        }
    });

    Json(TaskAcceptResponse { accepted: true })
}

async fn result(State(state): State<AppState>, Json(result): Json<crate::model::TaskResult>) -> Json<ResultResponse> {
    state.monitor.stop(&result.task_id).await;
    state.distributor.add_result(result).await;
    Json(ResultResponse { ok: true })
}

async fn task_status(State(_state): State<AppState>, Path(_id): Path<String>) -> impl IntoResponse {
    // Checkpoint polling answers from the executing peer's own task state,
    // which this crate does not own (the kernel does). Until a concrete
    // kernel is wired in, this endpoint is unimplemented on the receiving
    // side; `TaskMonitor` on the delegator side is what actually polls it.
    SwarmError::Unimplemented("task status polling has no local task-state source".to_string()).into_response()
}

async fn cancel(State(state): State<AppState>, Path(id): Path<String>, Json(req): Json<CancelRequest>) -> Json<CancelResponse> {
    let ok = state.distributor.cancel_task(&id, req.reason).await;
    state.monitor.stop(&id).await;
    Json(CancelResponse { ok })
}

async fn trigger(State(state): State<AppState>, Json(trigger): Json<ExternalTrigger>) -> Json<TriggerResponse> {
    state.trigger.dispatch(trigger).await;
    Json(TriggerResponse { ok: true })
}

async fn status(State(state): State<AppState>) -> Json<NodeStatusResponse> {
    Json(NodeStatusResponse {
        node_id: state.identity.node_id.clone(),
        peer_count: state.mesh.peer_count().await,
        active_delegations: state.distributor.active_count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::EchoExecutor;
    use crate::journal::null_journal;
    use crate::mesh::manager::MeshManager;
    use crate::reputation::ReputationStore;
    use crate::transport::client::TransportClient;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc as StdArc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let identity = NodeIdentity::new("alpha", "Alpha", "http://alpha", vec!["rust".into()]);
        let transport = TransportClient::new(std::time::Duration::from_millis(200));
        let mesh = MeshManager::spawn(swarm_config::MeshConfig::default(), null_journal(), transport.clone());
        let discovery = StdArc::new(Discovery::new(transport.clone(), mesh.clone()));
        let reputation = StdArc::new(Mutex::new(ReputationStore::new(None)));
        let distributor = WorkDistributor::new(
            identity.clone(),
            mesh.clone(),
            transport.clone(),
            reputation.clone(),
            null_journal(),
            swarm_config::DistributorConfig::default(),
        );
        let monitor = TaskMonitor::new(transport.clone(), null_journal(), swarm_config::MonitoringConfig::default());
        let trigger = ExternalTriggerHandler::new(
            distributor.clone(),
            monitor.clone(),
            null_journal(),
            swarm_config::TriggerConfig::default(),
            swarm_config::BudgetConfig::default(),
        );
        let dct = StdArc::new(Mutex::new(DctManager::new(b"test-secret".to_vec(), swarm_config::DctConfig::default())));
        let collusion = CollusionDetector::new(null_journal());
        let sabotage = SabotageDetector::new(null_journal());

        AppState {
            identity,
            mesh,
            discovery,
            distributor,
            monitor,
            trigger,
            transport,
            dct,
            collusion,
            sabotage,
            executor: StdArc::new(EchoExecutor),
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_peer_is_404() {
        let app = build_router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/api/heartbeat")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&HeartbeatRequest { node_id: "nobody".into(), timestamp: chrono::Utc::now().to_rfc3339(), active_sessions: 0, load: 0.0 }).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn identity_endpoint_returns_local_identity() {
        let app = build_router(test_state());
        let req = Request::builder().method("GET").uri("/api/identity").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn task_endpoint_synchronously_accepts() {
        let app = build_router(test_state());
        let body = TaskDelegationRequest {
            task_id: "t1".into(),
            session_id: "s1".into(),
            task_text: "analyze X".into(),
            correlation_id: None,
            constraints: None,
            priority: None,
            delegator_node_id: "beta".into(),
            delegator_api_url: "http://127.0.0.1:1".into(),
        };
        let req = Request::builder()
            .method("POST")
            .uri("/api/task")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_endpoint_reports_peer_count() {
        let app = build_router(test_state());
        let req = Request::builder().method("GET").uri("/api/status").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
