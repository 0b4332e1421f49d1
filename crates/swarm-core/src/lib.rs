// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

//! Peer-to-peer swarm mesh: discovery, delegation, attestation, reputation.
//!
//! This crate owns no global mutable state. Everything one mesh participant
//! needs is reachable from a single [`SwarmNode`] value; a process can build
//! several of these (as the test suite does) with completely independent
//! in-memory state.

pub mod aggregator;
pub mod attestation;
pub mod bounded;
pub mod contract;
pub mod dct;
pub mod detectors;
pub mod discovery;
pub mod distributor;
pub mod error;
pub mod executor;
pub mod guard;
pub mod identity;
pub mod journal;
pub mod mesh;
pub mod model;
pub mod monitor;
pub mod optimizer;
pub mod pareto;
pub mod reputation;
pub mod router;
pub mod transport;
pub mod trigger;
pub mod verifier;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::dct::DctManager;
use crate::detectors::{CollusionDetector, SabotageDetector};
use crate::discovery::Discovery;
use crate::distributor::WorkDistributor;
use crate::executor::{EchoExecutor, TaskExecutor};
use crate::identity::NodeIdentity;
use crate::journal::{null_journal, Journal, JsonlJournal};
use crate::mesh::manager::{MeshHandle, MeshManager};
use crate::monitor::TaskMonitor;
use crate::optimizer::OptimizationLoop;
use crate::reputation::ReputationStore;
use crate::transport::client::TransportClient;
use crate::transport::server::{build_router, AppState};
use crate::trigger::ExternalTriggerHandler;

pub use error::{SwarmError, SwarmResult};

/// Default HTTP client timeout used where a call site doesn't impose a
/// tighter one of its own (delegation offers, checkpoint polls).
const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// One mesh participant: every component a node runs, wired together.
/// Cheap to clone — every field is itself a handle or an `Arc`.
#[derive(Clone)]
pub struct SwarmNode {
    pub identity: NodeIdentity,
    pub mesh: MeshHandle,
    pub discovery: Arc<Discovery>,
    pub reputation: Arc<Mutex<ReputationStore>>,
    pub distributor: WorkDistributor,
    pub monitor: TaskMonitor,
    pub optimizer: Arc<OptimizationLoop>,
    pub trigger: ExternalTriggerHandler,
    pub transport: TransportClient,
    pub dct: Arc<Mutex<DctManager>>,
    pub collusion: CollusionDetector,
    pub sabotage: SabotageDetector,
    pub executor: Arc<dyn TaskExecutor>,
    pub journal: Journal,
    pub started_at: Instant,
}

impl SwarmNode {
    /// Build a node from its identity and effective configuration. Does not
    /// start background tickers (mesh heartbeat/sweep excepted — those start
    /// the moment [`MeshManager::spawn`] returns) or the HTTP listener; call
    /// [`SwarmNode::spawn_background_tasks`] and [`SwarmNode::router`]
    /// once the node is otherwise ready.
    pub fn new(identity: NodeIdentity, config: swarm_config::Config, secret: Vec<u8>) -> Self {
        Self::with_executor(identity, config, secret, Arc::new(EchoExecutor))
    }

    pub fn with_executor(
        identity: NodeIdentity,
        config: swarm_config::Config,
        secret: Vec<u8>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let journal: Journal = null_journal();
        Self::with_executor_and_journal(identity, config, secret, executor, journal)
    }

    /// Same as [`SwarmNode::with_executor`], but with an explicit journal
    /// sink instead of the default no-op one.
    pub fn with_executor_and_journal(
        identity: NodeIdentity,
        config: swarm_config::Config,
        secret: Vec<u8>,
        executor: Arc<dyn TaskExecutor>,
        journal: Journal,
    ) -> Self {
        let transport = TransportClient::new(DEFAULT_TRANSPORT_TIMEOUT);
        let mesh = MeshManager::spawn(config.mesh.clone(), journal.clone(), transport.clone());
        let discovery = Arc::new(Discovery::new(transport.clone(), mesh.clone()));

        let reputation_path = if config.reputation_path.is_empty() {
            None
        } else {
            Some(std::path::PathBuf::from(&config.reputation_path))
        };
        let mut reputation_store = ReputationStore::new(reputation_path);
        if let Err(e) = reputation_store.load() {
            tracing::warn!(error = %e, "failed to load reputation store, starting empty");
        }
        let reputation = Arc::new(Mutex::new(reputation_store));

        let collusion = CollusionDetector::new(journal.clone());
        let mut sabotage = SabotageDetector::new(journal.clone());
        sabotage.set_collusion_detector(collusion.clone());

        let monitor = TaskMonitor::new(transport.clone(), journal.clone(), config.monitoring.clone());

        let mut distributor = WorkDistributor::new(
            identity.clone(),
            mesh.clone(),
            transport.clone(),
            reputation.clone(),
            journal.clone(),
            config.distributor.clone(),
        );
        distributor.set_sabotage_detector(sabotage.clone());
        distributor.set_monitor(monitor.clone());

        let optimizer = Arc::new(OptimizationLoop::new(
            distributor.clone(),
            mesh.clone(),
            reputation.clone(),
            monitor.clone(),
            journal.clone(),
            config.optimization.clone(),
        ));

        let trigger = ExternalTriggerHandler::new(
            distributor.clone(),
            monitor.clone(),
            journal.clone(),
            config.trigger.clone(),
            config.budget.clone(),
        );

        let dct = Arc::new(Mutex::new(DctManager::new(secret, config.dct.clone())));

        Self {
            identity,
            mesh,
            discovery,
            reputation,
            distributor,
            monitor,
            optimizer,
            trigger,
            transport,
            dct,
            collusion,
            sabotage,
            executor,
            journal,
            started_at: Instant::now(),
        }
    }

    /// Build a node with a file-backed JSONL journal instead of the default
    /// no-op sink.
    pub fn with_journal_path(identity: NodeIdentity, config: swarm_config::Config, secret: Vec<u8>, journal_path: impl Into<std::path::PathBuf>) -> Self {
        let journal: Journal = Arc::new(JsonlJournal::new(journal_path.into()));
        Self::with_executor_and_journal(identity, config, secret, Arc::new(EchoExecutor), journal)
    }

    /// Start every background ticker this node owns that isn't already
    /// running (mesh heartbeat/sweep start inside `MeshManager::spawn`
    /// itself). Returns the optimization loop's join handle so a caller can
    /// await it for graceful shutdown if it chooses to.
    pub fn spawn_background_tasks(&self, seeds: &[String]) -> tokio::task::JoinHandle<()> {
        let discovery = self.discovery.clone();
        let seeds = seeds.to_vec();
        tokio::spawn(async move {
            discovery.bootstrap_from_seeds(&seeds).await;
        });
        self.optimizer.clone().spawn()
    }

    /// Build the HTTP router this node serves on its `bind_addr`.
    pub fn router(&self) -> axum::Router {
        build_router(AppState {
            identity: self.identity.clone(),
            mesh: self.mesh.clone(),
            discovery: self.discovery.clone(),
            distributor: self.distributor.clone(),
            monitor: self.monitor.clone(),
            trigger: self.trigger.clone(),
            transport: self.transport.clone(),
            dct: self.dct.clone(),
            collusion: self.collusion.clone(),
            sabotage: self.sabotage.clone(),
            executor: self.executor.clone(),
            started_at: self.started_at,
        })
    }

    /// Stop every background task this node owns. Used by tests and by
    /// graceful shutdown; a dropped `SwarmNode` leaves its actors running
    /// until this is called explicitly, since handles are cheap to clone and
    /// outlive any one owner.
    pub async fn shutdown(&self) {
        self.mesh.stop().await;
        self.monitor.stop_all().await;
    }
}
