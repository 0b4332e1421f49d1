//! HMAC + optional Ed25519 attestations over task outcomes, and the
//! delegation chain they form.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::model::Finding;

type HmacSha256 = Hmac<Sha256>;

/// Constant-time hex-string comparison for MACs — guards against timing
/// side channels a plain `!=` on the decoded tag would leak.
fn hmac_hex_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// `sha256(canonical_json(findings))`, hex-encoded.
pub fn findings_hash(findings: &[Finding]) -> String {
    let canonical = serde_json::to_vec(findings).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

fn canonical_string(task_id: &str, peer_node_id: &str, status: &str, findings_hash: &str, timestamp: &str) -> String {
    format!("{task_id}|{peer_node_id}|{status}|{findings_hash}|{timestamp}")
}

/// A signed claim that a peer produced a given outcome for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttestation {
    pub task_id: String,
    pub peer_node_id: String,
    pub status: String,
    pub findings_hash: String,
    pub timestamp: String,
    pub hmac: String,
    pub ed25519_signature: Option<String>,
}

impl TaskAttestation {
    /// Build the canonical MAC string this attestation was/should be signed
    /// over.
    pub fn canonical(&self) -> String {
        canonical_string(&self.task_id, &self.peer_node_id, &self.status, &self.findings_hash, &self.timestamp)
    }
}

/// Build an attestation for a task outcome, HMAC-signed with `secret`.
/// `signing_key`, if provided, additionally produces an Ed25519 signature
/// over the same canonical bytes — attestation Ed25519 is optional, gated on
/// whether the node has a configured keypair.
pub fn create_attestation(
    task_id: &str,
    peer_node_id: &str,
    status: &str,
    findings: &[Finding],
    secret: &[u8],
    signing_key: Option<&SigningKey>,
) -> TaskAttestation {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let fh = findings_hash(findings);
    let canonical = canonical_string(task_id, peer_node_id, status, &fh, &timestamp);

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    let hmac_hex = hex::encode(mac.finalize().into_bytes());

    let ed25519_signature = signing_key.map(|key| {
        let sig: Signature = key.sign(canonical.as_bytes());
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig.to_bytes())
    });

    TaskAttestation {
        task_id: task_id.to_string(),
        peer_node_id: peer_node_id.to_string(),
        status: status.to_string(),
        findings_hash: fh,
        timestamp,
        hmac: hmac_hex,
        ed25519_signature,
    }
}

/// Re-derive the HMAC (and, if a verifying key is supplied and the
/// attestation carries a signature, the Ed25519 signature) and compare.
pub fn verify_attestation(attestation: &TaskAttestation, secret: &[u8], verifying_key: Option<&VerifyingKey>) -> bool {
    let canonical = attestation.canonical();

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    let expected_hex = hex::encode(mac.finalize().into_bytes());
    if !hmac_hex_eq(&expected_hex, &attestation.hmac) {
        return false;
    }

    if let (Some(key), Some(sig_b64)) = (verifying_key, attestation.ed25519_signature.as_deref()) {
        let Ok(sig_bytes) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sig_b64) else {
            return false;
        };
        let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        let sig = Signature::from_bytes(&sig_arr);
        if key.verify(canonical.as_bytes(), &sig).is_err() {
            return false;
        }
    }

    true
}

/// One hop in a delegation chain: `delegatee` of link `i` must equal
/// `delegator` of link `i + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationLink {
    pub attestation: TaskAttestation,
    pub delegator_node_id: String,
    pub delegatee_node_id: String,
    pub depth: u32,
}

/// Append-only chain of attestation links sharing a root task id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttestationChain {
    pub root_task_id: String,
    pub links: Vec<AttestationLink>,
}

/// Result of verifying an [`AttestationChain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub invalid_at_depth: Option<u32>,
}

impl AttestationChain {
    pub fn push(&mut self, link: AttestationLink) {
        self.links.push(link);
    }

    /// Verify MAC validity, contiguous depths, consistent `root_task_id`,
    /// and delegator/delegatee continuity across links.
    pub fn verify(&self, secret: &[u8]) -> ChainVerification {
        for (i, link) in self.links.iter().enumerate() {
            let i = i as u32;
            if link.depth != i {
                return ChainVerification { valid: false, invalid_at_depth: Some(i) };
            }
            if link.attestation.task_id != self.root_task_id {
                return ChainVerification { valid: false, invalid_at_depth: Some(i) };
            }
            if !verify_attestation(&link.attestation, secret, None) {
                return ChainVerification { valid: false, invalid_at_depth: Some(i) };
            }
            if i > 0 {
                let prev = &self.links[(i - 1) as usize];
                if prev.delegatee_node_id != link.delegator_node_id {
                    return ChainVerification { valid: false, invalid_at_depth: Some(i) };
                }
            }
        }
        ChainVerification { valid: true, invalid_at_depth: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn sample_findings() -> Vec<Finding> {
        vec![Finding { step_title: "ok".into(), detail: serde_json::json!({}), tool: None, succeeded: true }]
    }

    #[test]
    fn verify_attestation_true_for_matching_secret() {
        let secret = b"swarm-secret";
        let findings = sample_findings();
        let att = create_attestation("t1", "peer-b", "completed", &findings, secret, None);
        assert!(verify_attestation(&att, secret, None));
    }

    #[test]
    fn verify_attestation_false_for_wrong_secret() {
        let findings = sample_findings();
        let att = create_attestation("t1", "peer-b", "completed", &findings, b"secret-a", None);
        assert!(!verify_attestation(&att, b"secret-b", None));
    }

    #[test]
    fn ed25519_round_trip_verifies() {
        let secret = b"swarm-secret";
        let findings = sample_findings();
        let mut csprng = rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();
        let att = create_attestation("t1", "peer-b", "completed", &findings, secret, Some(&signing_key));
        assert!(verify_attestation(&att, secret, Some(&verifying_key)));
    }

    #[test]
    fn chain_of_three_links_verifies() {
        let secret = b"swarm-secret";
        let findings = sample_findings();
        let mut chain = AttestationChain { root_task_id: "t1".into(), links: vec![] };
        let pairs = [("a", "b"), ("b", "c"), ("c", "d")];
        for (i, (from, to)) in pairs.iter().enumerate() {
            let att = create_attestation("t1", to, "completed", &findings, secret, None);
            chain.push(AttestationLink {
                attestation: att,
                delegator_node_id: from.to_string(),
                delegatee_node_id: to.to_string(),
                depth: i as u32,
            });
        }
        let result = chain.verify(secret);
        assert!(result.valid);
    }

    #[test]
    fn tampered_findings_hash_invalidates_chain_at_depth() {
        let secret = b"swarm-secret";
        let findings = sample_findings();
        let mut chain = AttestationChain { root_task_id: "t1".into(), links: vec![] };
        let pairs = [("a", "b"), ("b", "c"), ("c", "d")];
        for (i, (from, to)) in pairs.iter().enumerate() {
            let att = create_attestation("t1", to, "completed", &findings, secret, None);
            chain.push(AttestationLink {
                attestation: att,
                delegator_node_id: from.to_string(),
                delegatee_node_id: to.to_string(),
                depth: i as u32,
            });
        }
        chain.links[1].attestation.findings_hash = "deadbeef".to_string();
        let result = chain.verify(secret);
        assert_eq!(result, ChainVerification { valid: false, invalid_at_depth: Some(1) });
    }
}
