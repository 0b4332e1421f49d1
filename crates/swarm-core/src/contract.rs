use serde::{Deserialize, Serialize};

/// Service-level bounds a delegatee must stay within.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slo {
    pub max_duration_ms: u64,
    pub max_tokens: u64,
    pub max_cost_usd: f64,
}

/// What the delegatee is permitted to touch while executing the task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionBoundary {
    pub tool_allowlist: Option<Vec<String>>,
    pub readonly_paths: Option<Vec<String>>,
    pub max_permissions: Option<Vec<String>>,
}

/// Checkpoint reporting cadence negotiated for a delegation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitoring {
    pub require_checkpoints: bool,
    pub report_interval_ms: Option<u64>,
    pub monitoring_level: String,
}

/// Delegation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

/// An agreement governing one delegation: bounds the delegatee must respect
/// and how it is monitored. Attenuated (child) contracts may only narrow the
/// bounds of their parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationContract {
    pub contract_id: String,
    pub delegator_node_id: String,
    pub delegatee_node_id: String,
    pub task_id: String,
    pub slo: Slo,
    pub permission_boundary: PermissionBoundary,
    pub monitoring: Monitoring,
    pub status: ContractStatus,
}

/// Error describing why an attenuated contract was rejected.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum AttenuationError {
    #[error("new max_cost_usd {new} exceeds parent's limit {parent}")]
    CostExceedsParent { new: f64, parent: f64 },
    #[error("new max_tokens {new} exceeds parent's limit {parent}")]
    TokensExceedParent { new: u64, parent: u64 },
    #[error("new max_duration_ms {new} exceeds parent's limit {parent}")]
    DurationExceedsParent { new: u64, parent: u64 },
    #[error("tool {0:?} is not in the parent's tool_allowlist")]
    ToolNotInParentAllowlist(String),
}

impl DelegationContract {
    /// Validate that `child`'s bounds are a subset/narrowing of `self`'s.
    /// Per the attenuation invariant: new cost limit ≤ parent, new tools ⊆
    /// parent's allowlist, new duration/token limits ≤ parent.
    pub fn validate_attenuation(&self, child: &Slo, child_tools: Option<&[String]>) -> Result<(), AttenuationError> {
        if child.max_cost_usd > self.slo.max_cost_usd {
            return Err(AttenuationError::CostExceedsParent { new: child.max_cost_usd, parent: self.slo.max_cost_usd });
        }
        if child.max_tokens > self.slo.max_tokens {
            return Err(AttenuationError::TokensExceedParent { new: child.max_tokens, parent: self.slo.max_tokens });
        }
        if child.max_duration_ms > self.slo.max_duration_ms {
            return Err(AttenuationError::DurationExceedsParent {
                new: child.max_duration_ms,
                parent: self.slo.max_duration_ms,
            });
        }
        if let Some(parent_tools) = &self.permission_boundary.tool_allowlist {
            if let Some(tools) = child_tools {
                for tool in tools {
                    if !parent_tools.contains(tool) {
                        return Err(AttenuationError::ToolNotInParentAllowlist(tool.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}
