use serde::{Deserialize, Serialize};

/// Stable identity of a node in the mesh. Created once per process and never
/// mutated afterward; re-announcing the same `node_id` with a different
/// `api_url` is handled by `MeshManager` as a rebind, not by mutating an
/// existing `NodeIdentity` in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: String,
    pub display_name: String,
    pub api_url: String,
    pub capabilities: Vec<String>,
    pub version: String,
}

impl NodeIdentity {
    pub fn new(
        node_id: impl Into<String>,
        display_name: impl Into<String>,
        api_url: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            display_name: display_name.into(),
            api_url: api_url.into(),
            capabilities,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_capability_checks_declared_set() {
        let id = NodeIdentity::new("n1", "Alpha", "http://a", vec!["rust".into()]);
        assert!(id.has_capability("rust"));
        assert!(!id.has_capability("go"));
    }
}
