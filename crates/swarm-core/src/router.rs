//! AI-vs-human routing for a sub-task, by priority-ordered rule over its
//! declared attributes. A pure function: no I/O, no shared state.

use serde::{Deserialize, Serialize};

use crate::journal::{events, Journal, JournalEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationTarget {
    Ai,
    Human,
    Any,
}

/// Sub-task attributes the router scores against. `delegation_target`, if
/// set by the caller, always wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubTaskAttributes {
    pub delegation_target: Option<DelegationTarget>,
    pub complexity: Option<Level>,
    pub criticality: Option<Level>,
    pub verifiability: Option<Level>,
    pub reversibility: Option<Level>,
    pub estimated_cost: Option<Level>,
    pub estimated_duration: Option<Level>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub target: DelegationTarget,
    pub confidence: f64,
    pub reason: String,
}

/// Evaluates the priority-ordered rule table. First matching rule wins.
pub fn route(attrs: &SubTaskAttributes) -> RoutingDecision {
    if let Some(target) = attrs.delegation_target {
        return RoutingDecision { target, confidence: 1.0, reason: "explicit delegation_target".to_string() };
    }
    if attrs.criticality == Some(Level::High) && attrs.reversibility == Some(Level::Low) {
        return RoutingDecision {
            target: DelegationTarget::Human,
            confidence: 0.9,
            reason: "high criticality with low reversibility".to_string(),
        };
    }
    if attrs.verifiability == Some(Level::Low) {
        return RoutingDecision { target: DelegationTarget::Human, confidence: 0.8, reason: "low verifiability".to_string() };
    }
    if attrs.verifiability == Some(Level::High) && attrs.criticality == Some(Level::Low) {
        return RoutingDecision {
            target: DelegationTarget::Ai,
            confidence: 0.9,
            reason: "high verifiability with low criticality".to_string(),
        };
    }
    RoutingDecision { target: DelegationTarget::Any, confidence: 0.6, reason: "no rule matched".to_string() }
}

/// Route and emit the corresponding journal events (`delegatee_routed`
/// always, `human_delegation_requested` additionally when target is human).
pub async fn route_and_record(attrs: &SubTaskAttributes, journal: &Journal) -> RoutingDecision {
    let decision = route(attrs);
    journal
        .record(JournalEvent::new(
            events::DELEGATEE_ROUTED,
            serde_json::json!({"target": decision.target, "confidence": decision.confidence, "reason": decision.reason}),
        ))
        .await;
    if decision.target == DelegationTarget::Human {
        journal.record(JournalEvent::new(events::HUMAN_DELEGATION_REQUESTED, serde_json::json!({"reason": decision.reason}))).await;
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_target_wins_over_every_other_rule() {
        let attrs = SubTaskAttributes {
            delegation_target: Some(DelegationTarget::Ai),
            criticality: Some(Level::High),
            reversibility: Some(Level::Low),
            ..Default::default()
        };
        assert_eq!(route(&attrs).target, DelegationTarget::Ai);
    }

    #[test]
    fn high_criticality_low_reversibility_routes_to_human() {
        let attrs = SubTaskAttributes { criticality: Some(Level::High), reversibility: Some(Level::Low), ..Default::default() };
        let decision = route(&attrs);
        assert_eq!(decision.target, DelegationTarget::Human);
        assert_eq!(decision.confidence, 0.9);
    }

    #[test]
    fn low_verifiability_routes_to_human_even_without_criticality() {
        let attrs = SubTaskAttributes { verifiability: Some(Level::Low), ..Default::default() };
        assert_eq!(route(&attrs).target, DelegationTarget::Human);
    }

    #[test]
    fn high_verifiability_low_criticality_routes_to_ai() {
        let attrs = SubTaskAttributes { verifiability: Some(Level::High), criticality: Some(Level::Low), ..Default::default() };
        assert_eq!(route(&attrs).target, DelegationTarget::Ai);
    }

    #[test]
    fn no_matching_rule_routes_to_any() {
        let attrs = SubTaskAttributes::default();
        let decision = route(&attrs);
        assert_eq!(decision.target, DelegationTarget::Any);
        assert_eq!(decision.confidence, 0.6);
    }
}
