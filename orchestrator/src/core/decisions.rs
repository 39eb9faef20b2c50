//! Agent decisions consumed by the coordinator.

use serde::{Deserialize, Serialize};

/// One agent's output for an iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Decision {
    pub agent_name: String,
    pub rationale: String,
    pub requested_tools: Vec<String>,
    pub next_tasks: Vec<String>,
    pub confidence: f64,
    pub input_refs: Vec<String>,
    pub memory_refs: Vec<String>,
    pub rules_triggered: Vec<String>,
    pub confidence_impact: Vec<String>,
}

impl Decision {
    /// A decision is opaque when it carries no rationale, or when it cites no
    /// triggered rule and no confidence impact. Input and memory references
    /// alone do not explain a decision.
    pub fn is_opaque(&self) -> bool {
        if self.rationale.trim().is_empty() {
            return true;
        }
        self.rules_triggered.is_empty() && self.confidence_impact.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision() -> Decision {
        Decision {
            agent_name: "planner".to_string(),
            rationale: "fold the candidate".to_string(),
            rules_triggered: vec!["structure_required".to_string()],
            ..Decision::default()
        }
    }

    #[test]
    fn explained_decision_is_not_opaque() {
        assert!(!decision().is_opaque());
    }

    #[test]
    fn blank_rationale_is_opaque() {
        let mut d = decision();
        d.rationale = "  ".to_string();
        assert!(d.is_opaque());
    }

    #[test]
    fn memory_refs_without_rules_are_opaque() {
        let d = Decision {
            rules_triggered: Vec::new(),
            memory_refs: vec!["m1".to_string()],
            ..decision()
        };
        assert!(d.is_opaque());
    }

    #[test]
    fn confidence_impact_counts_as_evidence() {
        let d = Decision {
            rules_triggered: Vec::new(),
            confidence_impact: vec!["plddt_up".to_string()],
            ..decision()
        };
        assert!(!d.is_opaque());
    }
}
