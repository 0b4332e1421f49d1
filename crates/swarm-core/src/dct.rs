//! Delegation Capability Tokens: macaroon-style capability tokens whose
//! caveats may only be narrowed as they are attenuated down a delegation
//! chain, with a per-link HMAC signature chain and transitive revocation.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{SwarmError, SwarmResult};

type HmacSha256 = Hmac<Sha256>;

fn hmac_hex_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// A single constraint attached to a [`Dct`]. Caveats only ever narrow what
/// a holder may do; attenuation can add caveats or tighten existing ones,
/// never relax them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Caveat {
    ToolRestriction { allowed: Vec<String> },
    PathRestriction { allowed_prefixes: Vec<String> },
    CostLimit { max_usd: f64 },
    TokenLimit { max_tokens: u64 },
    ReadOnly,
    TimeBound { expires_at: chrono::DateTime<chrono::Utc> },
    DomainRestriction { allowed_domains: Vec<String> },
}

/// Context describing the action being requested against a token, checked
/// by [`DctManager::validate_request`].
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub tool: Option<String>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub cost_usd: Option<f64>,
    pub tokens: Option<u64>,
    pub write: bool,
}

/// A delegation capability token: one link in a macaroon-style chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dct {
    pub dct_id: String,
    pub root_delegator: String,
    pub holder: String,
    pub parent_dct_id: Option<String>,
    pub depth: u32,
    /// Cumulative caveats: everything the parent carried, plus whatever was
    /// added at this link.
    pub caveats: Vec<Caveat>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub signature: String,
    pub revoked: bool,
}

fn caveats_json(caveats: &[Caveat]) -> Vec<u8> {
    serde_json::to_vec(caveats).unwrap_or_default()
}

fn sign(secret: &[u8], dct_id: &str, prev_signature: Option<&str>, caveats: &[Caveat]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(dct_id.as_bytes());
    if let Some(prev) = prev_signature {
        mac.update(prev.as_bytes());
    }
    mac.update(&caveats_json(caveats));
    hex::encode(mac.finalize().into_bytes())
}

/// Owns the swarm secret and the live token registry: issues root tokens,
/// attenuates them down a delegation chain, verifies and validates requests
/// against them, and propagates revocation transitively.
pub struct DctManager {
    secret: Vec<u8>,
    max_depth: u32,
    default_expiry_ms: u64,
    tokens: HashMap<String, Dct>,
    children: HashMap<String, Vec<String>>,
}

impl DctManager {
    pub fn new(secret: Vec<u8>, config: swarm_config::DctConfig) -> Self {
        Self {
            secret,
            max_depth: config.max_caveat_depth,
            default_expiry_ms: config.default_expiry_ms,
            tokens: HashMap::new(),
            children: HashMap::new(),
        }
    }

    /// Issue a fresh root token for `holder`. `expiry` of `None` falls back to
    /// `now + default_expiry_ms` from the node's [`swarm_config::DctConfig`].
    pub fn create_root_token(&mut self, holder: &str, caveats: Vec<Caveat>, expiry: Option<chrono::DateTime<chrono::Utc>>) -> Dct {
        let dct_id = Uuid::new_v4().to_string();
        let signature = sign(&self.secret, &dct_id, None, &caveats);
        let expires_at = expiry.or_else(|| chrono::Utc::now().checked_add_signed(chrono::Duration::milliseconds(self.default_expiry_ms as i64)));
        let dct = Dct {
            dct_id: dct_id.clone(),
            root_delegator: holder.to_string(),
            holder: holder.to_string(),
            parent_dct_id: None,
            depth: 0,
            caveats,
            created_at: chrono::Utc::now(),
            expires_at,
            signature,
            revoked: false,
        };
        self.tokens.insert(dct_id, dct.clone());
        dct
    }

    /// Derive a narrower token from `parent_id` for `new_holder`, appending
    /// `new_caveats`. Rejects if the parent is revoked, the chain would
    /// exceed `max_depth`, or any new caveat is less restrictive than the
    /// parent's caveat of the same kind.
    pub fn attenuate(&mut self, parent_id: &str, new_caveats: Vec<Caveat>, new_holder: &str) -> SwarmResult<Dct> {
        let parent = self
            .tokens
            .get(parent_id)
            .ok_or_else(|| SwarmError::Validation(format!("unknown parent DCT {parent_id}")))?
            .clone();

        if parent.revoked {
            return Err(SwarmError::CapabilityViolation(format!("parent DCT {parent_id} is revoked")));
        }
        if parent.depth + 1 >= self.max_depth {
            return Err(SwarmError::CapabilityViolation(format!(
                "attenuation would exceed max chain depth {}",
                self.max_depth
            )));
        }
        for caveat in &new_caveats {
            validate_narrows_parent(caveat, &parent.caveats)?;
        }

        let mut all_caveats = parent.caveats.clone();
        all_caveats.extend(new_caveats);

        let dct_id = Uuid::new_v4().to_string();
        let signature = sign(&self.secret, &dct_id, Some(&parent.signature), &all_caveats);

        let expires_at = match (parent.expires_at, parent.expires_at) {
            (Some(p), _) => Some(p),
            _ => None,
        };

        let dct = Dct {
            dct_id: dct_id.clone(),
            root_delegator: parent.root_delegator.clone(),
            holder: new_holder.to_string(),
            parent_dct_id: Some(parent_id.to_string()),
            depth: parent.depth + 1,
            caveats: all_caveats,
            created_at: chrono::Utc::now(),
            expires_at,
            signature,
            revoked: false,
        };

        self.tokens.insert(dct_id.clone(), dct.clone());
        self.children.entry(parent_id.to_string()).or_default().push(dct_id);
        Ok(dct)
    }

    /// Verify revocation (of self and every ancestor), expiry, depth bound,
    /// and recompute the signature chain from the root.
    pub fn verify(&self, dct_id: &str) -> bool {
        let Some(dct) = self.tokens.get(dct_id) else { return false };
        if dct.revoked {
            return false;
        }
        if let Some(expires_at) = dct.expires_at {
            if chrono::Utc::now() > expires_at {
                return false;
            }
        }
        if dct.depth >= self.max_depth {
            return false;
        }

        // Walk the chain from this token back to its root, verifying each
        // link's signature against the recomputed HMAC.
        let mut chain = vec![dct.clone()];
        let mut cursor = dct.parent_dct_id.clone();
        while let Some(parent_id) = cursor {
            let Some(parent) = self.tokens.get(&parent_id) else { return false };
            if parent.revoked {
                return false;
            }
            chain.push(parent.clone());
            cursor = parent.parent_dct_id.clone();
        }
        chain.reverse();

        let mut prev_signature: Option<String> = None;
        for link in &chain {
            let expected = sign(&self.secret, &link.dct_id, prev_signature.as_deref(), &link.caveats);
            if !hmac_hex_eq(&expected, &link.signature) {
                return false;
            }
            prev_signature = Some(link.signature.clone());
        }
        true
    }

    /// Check a request against every caveat, denying on the first violation.
    pub fn validate_request(&self, dct_id: &str, ctx: &RequestContext) -> SwarmResult<()> {
        let dct = self.tokens.get(dct_id).ok_or_else(|| SwarmError::Validation(format!("unknown DCT {dct_id}")))?;
        for caveat in &dct.caveats {
            check_caveat(caveat, ctx)?;
        }
        Ok(())
    }

    /// Revoke `dct_id` and every descendant transitively.
    pub fn revoke(&mut self, dct_id: &str) {
        let mut stack = vec![dct_id.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(dct) = self.tokens.get_mut(&id) {
                dct.revoked = true;
            }
            if let Some(kids) = self.children.get(&id) {
                stack.extend(kids.iter().cloned());
            }
        }
    }

    /// Purge expired or revoked tokens from the registry.
    pub fn cleanup(&mut self) {
        let now = chrono::Utc::now();
        let dead: Vec<String> = self
            .tokens
            .iter()
            .filter(|(_, d)| d.revoked || d.expires_at.map(|e| now > e).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead {
            self.tokens.remove(&id);
            self.children.remove(&id);
        }
    }

    pub fn get(&self, dct_id: &str) -> Option<&Dct> {
        self.tokens.get(dct_id)
    }
}

fn validate_narrows_parent(new: &Caveat, parent_caveats: &[Caveat]) -> SwarmResult<()> {
    for parent in parent_caveats {
        match (new, parent) {
            (Caveat::ToolRestriction { allowed: new_allowed }, Caveat::ToolRestriction { allowed: parent_allowed }) => {
                for tool in new_allowed {
                    if !parent_allowed.contains(tool) {
                        return Err(SwarmError::CapabilityViolation(format!(
                            "tool {tool:?} is not in the parent's tool allowlist"
                        )));
                    }
                }
            }
            (Caveat::CostLimit { max_usd: new_limit }, Caveat::CostLimit { max_usd: parent_limit }) => {
                if new_limit > parent_limit {
                    return Err(SwarmError::CapabilityViolation(format!(
                        "cost_limit {new_limit} exceeds parent's limit {parent_limit}"
                    )));
                }
            }
            (Caveat::TokenLimit { max_tokens: new_limit }, Caveat::TokenLimit { max_tokens: parent_limit }) => {
                if new_limit > parent_limit {
                    return Err(SwarmError::CapabilityViolation(format!(
                        "token_limit {new_limit} exceeds parent's limit {parent_limit}"
                    )));
                }
            }
            (
                Caveat::PathRestriction { allowed_prefixes: new_prefixes },
                Caveat::PathRestriction { allowed_prefixes: parent_prefixes },
            ) => {
                for p in new_prefixes {
                    if !parent_prefixes.iter().any(|pp| p.starts_with(pp.as_str())) {
                        return Err(SwarmError::CapabilityViolation(format!(
                            "path {p:?} is outside the parent's allowed prefixes"
                        )));
                    }
                }
            }
            (
                Caveat::DomainRestriction { allowed_domains: new_domains },
                Caveat::DomainRestriction { allowed_domains: parent_domains },
            ) => {
                for d in new_domains {
                    if !parent_domains.contains(d) {
                        return Err(SwarmError::CapabilityViolation(format!(
                            "domain {d:?} is not in the parent's allowed domains"
                        )));
                    }
                }
            }
            (Caveat::TimeBound { expires_at: new_exp }, Caveat::TimeBound { expires_at: parent_exp }) => {
                if new_exp > parent_exp {
                    return Err(SwarmError::CapabilityViolation(
                        "expiry extends beyond the parent's time bound".to_string(),
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_caveat(caveat: &Caveat, ctx: &RequestContext) -> SwarmResult<()> {
    match caveat {
        Caveat::ToolRestriction { allowed } => {
            if let Some(tool) = &ctx.tool {
                if !allowed.contains(tool) {
                    return Err(SwarmError::CapabilityViolation(format!("tool {tool:?} is not permitted")));
                }
            }
        }
        Caveat::PathRestriction { allowed_prefixes } => {
            if let Some(path) = &ctx.path {
                if !allowed_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
                    return Err(SwarmError::CapabilityViolation(format!("path {path:?} is not permitted")));
                }
            }
        }
        Caveat::CostLimit { max_usd } => {
            if let Some(cost) = ctx.cost_usd {
                if cost > *max_usd {
                    return Err(SwarmError::CapabilityViolation(format!("cost {cost} exceeds limit {max_usd}")));
                }
            }
        }
        Caveat::TokenLimit { max_tokens } => {
            if let Some(tokens) = ctx.tokens {
                if tokens > *max_tokens {
                    return Err(SwarmError::CapabilityViolation(format!("tokens {tokens} exceed limit {max_tokens}")));
                }
            }
        }
        Caveat::ReadOnly => {
            if ctx.write {
                return Err(SwarmError::CapabilityViolation("write denied by read_only caveat".to_string()));
            }
        }
        Caveat::TimeBound { expires_at } => {
            if chrono::Utc::now() > *expires_at {
                return Err(SwarmError::CapabilityViolation("time bound has expired".to_string()));
            }
        }
        Caveat::DomainRestriction { allowed_domains } => {
            if let Some(domain) = &ctx.domain {
                if !allowed_domains.contains(domain) {
                    return Err(SwarmError::CapabilityViolation(format!("domain {domain:?} is not permitted")));
                }
            }
        }
    }
    Ok(())
}
