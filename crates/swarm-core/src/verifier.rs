//! Post-result validation: SLO compliance, attestation authenticity, finding
//! quality, and tool-capability match. A pure function of its inputs — no
//! I/O, no shared state — so it composes cleanly with whatever calls it
//! (the `result` HTTP handler, `OptimizationLoop`, tests).

use ed25519_dalek::VerifyingKey;

use crate::attestation::{verify_attestation, TaskAttestation};
use crate::contract::DelegationContract;
use crate::model::{TaskOutcomeStatus, TaskResult};

/// How a result's authenticity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// An attestation was present and its HMAC (and Ed25519, if a key was
    /// supplied) verified.
    Attested,
    /// No attestation was supplied; the result is trusted only as far as the
    /// transport layer that delivered it.
    Direct,
}

/// Context passed to [`verify_outcome`]. All fields but `result` and
/// `swarm_secret` are optional — a result can be verified with no contract
/// (SLO check skipped) and no attestation (method downgrades to `Direct`).
pub struct VerificationInput<'a> {
    pub result: &'a TaskResult,
    pub contract: Option<&'a DelegationContract>,
    pub attestation: Option<&'a TaskAttestation>,
    pub peer_public_key: Option<&'a VerifyingKey>,
    pub swarm_secret: &'a [u8],
    /// Strict mode: any SLO violation fails verification outright rather
    /// than merely being recorded as an issue.
    pub strict: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub slo_compliance: bool,
    pub findings_verified: bool,
    pub verification_method: VerificationMethod,
    pub outcome_score: f64,
    pub issues: Vec<String>,
}

/// Validate a [`TaskResult`] against its contract's SLO, its attestation (if
/// any), finding quality, and tool-capability scope.
pub fn verify_outcome(input: VerificationInput<'_>) -> VerificationResult {
    let mut issues = Vec::new();

    let slo_compliance = check_slo(input.result, input.contract, &mut issues);

    let verification_method = match input.attestation {
        Some(attestation) => {
            if verify_attestation(attestation, input.swarm_secret, input.peer_public_key) {
                VerificationMethod::Attested
            } else {
                issues.push("attestation failed HMAC/signature verification".to_string());
                VerificationMethod::Direct
            }
        }
        None => VerificationMethod::Direct,
    };

    if input.result.status == TaskOutcomeStatus::Completed && input.result.findings.is_empty() {
        issues.push("status completed but no findings reported".to_string());
    }

    let capability_ok = check_capability_match(input.result, input.contract, &mut issues);

    let total = input.result.findings.len();
    let succeeded = input.result.findings.iter().filter(|f| f.succeeded).count();
    let outcome_score = if total == 0 { 0.0 } else { succeeded as f64 / total as f64 };

    let findings_verified = capability_ok && (!input.result.findings.is_empty() || input.result.status != TaskOutcomeStatus::Completed);

    let verified = if input.strict {
        slo_compliance && findings_verified && issues.iter().all(|i| !i.contains("attestation failed"))
    } else {
        findings_verified
    };

    VerificationResult { verified, slo_compliance, findings_verified, verification_method, outcome_score, issues }
}

fn check_slo(result: &TaskResult, contract: Option<&DelegationContract>, issues: &mut Vec<String>) -> bool {
    let Some(contract) = contract else { return true };
    let slo = &contract.slo;
    let mut ok = true;
    if result.duration_ms > slo.max_duration_ms {
        issues.push(format!("duration {}ms exceeds SLO {}ms", result.duration_ms, slo.max_duration_ms));
        ok = false;
    }
    if result.tokens_used > slo.max_tokens {
        issues.push(format!("tokens {} exceed SLO {}", result.tokens_used, slo.max_tokens));
        ok = false;
    }
    if result.cost_usd > slo.max_cost_usd {
        issues.push(format!("cost ${} exceeds SLO ${}", result.cost_usd, slo.max_cost_usd));
        ok = false;
    }
    ok
}

fn check_capability_match(result: &TaskResult, contract: Option<&DelegationContract>, issues: &mut Vec<String>) -> bool {
    let Some(contract) = contract else { return true };
    let Some(allowlist) = &contract.permission_boundary.tool_allowlist else { return true };
    let mut ok = true;
    for finding in &result.findings {
        if let Some(tool) = &finding.tool {
            if !allowlist.contains(tool) {
                issues.push(format!("finding used tool {tool:?} outside the contract's allowlist"));
                ok = false;
            }
        }
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::create_attestation;
    use crate::contract::{ContractStatus, Monitoring, PermissionBoundary, Slo};
    use crate::model::Finding;

    fn contract(max_cost: f64, allowlist: Option<Vec<String>>) -> DelegationContract {
        DelegationContract {
            contract_id: "c1".into(),
            delegator_node_id: "a".into(),
            delegatee_node_id: "b".into(),
            task_id: "t1".into(),
            slo: Slo { max_duration_ms: 10_000, max_tokens: 1_000, max_cost_usd: max_cost },
            permission_boundary: PermissionBoundary { tool_allowlist: allowlist, readonly_paths: None, max_permissions: None },
            monitoring: Monitoring { require_checkpoints: false, report_interval_ms: None, monitoring_level: "basic".into() },
            status: ContractStatus::Active,
        }
    }

    fn result_with_findings(findings: Vec<Finding>) -> TaskResult {
        TaskResult {
            task_id: "t1".into(),
            peer_node_id: "b".into(),
            status: TaskOutcomeStatus::Completed,
            tokens_used: 10,
            cost_usd: 0.01,
            duration_ms: 100,
            findings,
            error: None,
            attestation: None,
        }
    }

    #[test]
    fn completed_with_no_findings_is_an_issue() {
        let result = result_with_findings(vec![]);
        let out = verify_outcome(VerificationInput {
            result: &result,
            contract: None,
            attestation: None,
            peer_public_key: None,
            swarm_secret: b"secret",
            strict: false,
        });
        assert!(out.issues.iter().any(|i| i.contains("no findings")));
    }

    #[test]
    fn slo_violation_flagged_and_fails_strict_mode() {
        let result = TaskResult { cost_usd: 5.0, ..result_with_findings(vec![Finding { step_title: "x".into(), detail: serde_json::json!({}), tool: None, succeeded: true }]) };
        let c = contract(1.0, None);
        let out = verify_outcome(VerificationInput {
            result: &result,
            contract: Some(&c),
            attestation: None,
            peer_public_key: None,
            swarm_secret: b"secret",
            strict: true,
        });
        assert!(!out.slo_compliance);
        assert!(!out.verified);
    }

    #[test]
    fn missing_attestation_downgrades_method_to_direct() {
        let result = result_with_findings(vec![Finding { step_title: "x".into(), detail: serde_json::json!({}), tool: None, succeeded: true }]);
        let out = verify_outcome(VerificationInput {
            result: &result,
            contract: None,
            attestation: None,
            peer_public_key: None,
            swarm_secret: b"secret",
            strict: false,
        });
        assert_eq!(out.verification_method, VerificationMethod::Direct);
    }

    #[test]
    fn valid_attestation_verifies_as_attested() {
        let result = result_with_findings(vec![Finding { step_title: "x".into(), detail: serde_json::json!({}), tool: None, succeeded: true }]);
        let att = create_attestation("t1", "b", "completed", &result.findings, b"secret", None);
        let out = verify_outcome(VerificationInput {
            result: &result,
            contract: None,
            attestation: Some(&att),
            peer_public_key: None,
            swarm_secret: b"secret",
            strict: false,
        });
        assert_eq!(out.verification_method, VerificationMethod::Attested);
    }

    #[test]
    fn tool_outside_allowlist_fails_capability_match() {
        let result = result_with_findings(vec![Finding {
            step_title: "x".into(),
            detail: serde_json::json!({}),
            tool: Some("curl".into()),
            succeeded: true,
        }]);
        let c = contract(1.0, Some(vec!["read_file".into()]));
        let out = verify_outcome(VerificationInput {
            result: &result,
            contract: Some(&c),
            attestation: None,
            peer_public_key: None,
            swarm_secret: b"secret",
            strict: false,
        });
        assert!(!out.findings_verified);
        assert!(!out.verified);
    }

    #[test]
    fn outcome_score_is_ratio_of_succeeded_findings() {
        let result = result_with_findings(vec![
            Finding { step_title: "a".into(), detail: serde_json::json!({}), tool: None, succeeded: true },
            Finding { step_title: "b".into(), detail: serde_json::json!({}), tool: None, succeeded: false },
        ]);
        let out = verify_outcome(VerificationInput {
            result: &result,
            contract: None,
            attestation: None,
            peer_public_key: None,
            swarm_secret: b"secret",
            strict: false,
        });
        assert_eq!(out.outcome_score, 0.5);
    }
}
