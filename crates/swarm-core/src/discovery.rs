//! Peer-discovery: turns a seed list or a gossip payload into `NodeIdentity`
//! values forwarded to `MeshManager`, each at most once per `node_id` for the
//! lifetime of the `Discovery` instance.

use std::sync::Mutex;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::bounded::BoundedSet;
use crate::identity::NodeIdentity;
use crate::mesh::manager::MeshHandle;
use crate::transport::client::TransportClient;
use crate::transport::types::PeerSummary;

const SEEN_CAP: usize = 10_000;

/// Feeds newly discovered peers into a `MeshManager` via its handle.
/// Concurrency-safe: multiple bootstrap/gossip calls may run at once, the
/// `seen` set under a blocking `Mutex` only ever holds a short critical
/// section (string hashing and insertion, no I/O).
pub struct Discovery {
    transport: TransportClient,
    mesh: MeshHandle,
    seen: Mutex<BoundedSet>,
}

impl Discovery {
    pub fn new(transport: TransportClient, mesh: MeshHandle) -> Self {
        Self { transport, mesh, seen: Mutex::new(BoundedSet::new(SEEN_CAP)) }
    }

    /// Fetch `identity` from every seed URL in parallel and join each newly
    /// seen one.
    pub async fn bootstrap_from_seeds(&self, seeds: &[String]) {
        let fetches = seeds.iter().map(|seed| self.fetch_and_admit(seed.clone()));
        join_all(fetches).await;
    }

    /// Ingest a gossip payload: peers already seen are dropped, the rest have
    /// their identity fetched and are joined if discovery succeeds.
    pub async fn ingest_gossip(&self, peers: Vec<PeerSummary>) {
        let unseen: Vec<PeerSummary> = peers
            .into_iter()
            .filter(|p| !self.seen.lock().expect("discovery seen-set poisoned").contains(&p.node_id))
            .collect();
        let fetches = unseen.into_iter().map(|p| self.fetch_and_admit(p.api_url));
        join_all(fetches).await;
    }

    async fn fetch_and_admit(&self, api_url: String) {
        let resp = self.transport.identity(&api_url).await;
        let Some(identity) = resp.data else {
            debug!(api_url = %api_url, "discovery fetch failed, skipping");
            return;
        };
        self.admit(identity).await;
    }

    /// Forward `identity` to the mesh exactly once per `node_id`. Returns
    /// whether this call was the first to see it.
    async fn admit(&self, identity: NodeIdentity) -> bool {
        let first_seen = {
            let mut seen = self.seen.lock().expect("discovery seen-set poisoned");
            if seen.contains(&identity.node_id) {
                false
            } else {
                seen.insert(identity.node_id.clone());
                true
            }
        };
        if first_seen {
            self.mesh.handle_join(identity).await;
        }
        first_seen
    }

    /// Multicast announce/query is an optional extra the distilled source
    /// treats as non-fatal when unavailable; this pack carries no standalone
    /// multicast-discovery crate, so it is a logged no-op rather than a
    /// fabricated dependency.
    pub fn announce_multicast(&self, enabled: bool) {
        if enabled {
            warn!("mdns multicast announce requested but not available in this build; skipping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::null_journal;
    use crate::mesh::manager::MeshManager;
    use std::time::Duration;

    fn spawn_mesh() -> MeshHandle {
        MeshManager::spawn(swarm_config::MeshConfig::default(), null_journal(), TransportClient::new(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn admit_is_idempotent_per_node_id() {
        let mesh = spawn_mesh();
        let discovery = Discovery::new(TransportClient::new(Duration::from_millis(200)), mesh.clone());
        let identity = NodeIdentity::new("peer-a", "Peer A", "http://peer-a", vec![]);

        assert!(discovery.admit(identity.clone()).await);
        assert!(!discovery.admit(identity).await);
        assert_eq!(mesh.peer_count().await, 1);
    }

    #[tokio::test]
    async fn ingest_gossip_skips_already_seen_peers() {
        let mesh = spawn_mesh();
        let discovery = Discovery::new(TransportClient::new(Duration::from_millis(200)), mesh.clone());
        discovery.admit(NodeIdentity::new("peer-a", "Peer A", "http://peer-a", vec![])).await;

        discovery
            .ingest_gossip(vec![PeerSummary {
                node_id: "peer-a".to_string(),
                display_name: "Peer A".to_string(),
                api_url: "http://peer-a".to_string(),
                capabilities: vec![],
                version: "0.0.0".to_string(),
                status: crate::mesh::peer::PeerStatus::Active,
            }])
            .await;

        assert_eq!(mesh.peer_count().await, 1);
    }
}
