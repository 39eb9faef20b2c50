//! Pure decision function deciding whether a run continues, replans, or stops.
//!
//! Evaluation order is fixed and first match wins:
//!
//! 1. Any opaque decision → terminate (`opaque_decision`).
//! 2. Replan, execution, and uncertainty ceilings → terminate.
//! 3. Blocking critic → replan.
//! 4. QC `reject` / `needs_human` → terminate.
//! 5. Otherwise → continue.
//!
//! Structural and limit violations always pre-empt the semantic critic/QC
//! signals.

use serde::{Deserialize, Serialize};

use crate::core::decisions::Decision;
use crate::core::execution::{LoopLimits, LoopState};

/// Critic verdict for the previous iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticOutput {
    pub blocking: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcStatus {
    Acceptable,
    Reject,
    NeedsHuman,
}

impl QcStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QcStatus::Acceptable => "acceptable",
            QcStatus::Reject => "reject",
            QcStatus::NeedsHuman => "needs_human",
        }
    }
}

/// Quality-control verdict for the previous iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcOutput {
    pub status: QcStatus,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl QcOutput {
    pub fn new(status: QcStatus) -> Self {
        Self {
            status,
            reasons: Vec::new(),
        }
    }
}

/// Everything the coordinator looks at for one decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorInput {
    pub decisions: Vec<Decision>,
    pub loop_limits: LoopLimits,
    pub loop_state: LoopState,
    pub critic_output: Option<CriticOutput>,
    pub qc_output: Option<QcOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Continue,
    Replan,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    OpaqueDecision,
    MaxReplansExceeded,
    MaxExecutionsExceeded,
    MaxUncertaintyExceeded,
    CriticBlocking,
    QcRejected,
    QcNeedsHuman,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::OpaqueDecision => "opaque_decision",
            StopReason::MaxReplansExceeded => "max_replans_exceeded",
            StopReason::MaxExecutionsExceeded => "max_executions_exceeded",
            StopReason::MaxUncertaintyExceeded => "max_uncertainty_exceeded",
            StopReason::CriticBlocking => "critic_blocking",
            StopReason::QcRejected => "qc_rejected",
            StopReason::QcNeedsHuman => "qc_needs_human",
        }
    }
}

/// Coordinator verdict. `stop_reason` is always set unless the verdict is continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorDecision {
    pub decision: DecisionType,
    pub stop_reason: Option<StopReason>,
}

impl CoordinatorDecision {
    fn proceed() -> Self {
        Self {
            decision: DecisionType::Continue,
            stop_reason: None,
        }
    }

    fn replan(reason: StopReason) -> Self {
        Self {
            decision: DecisionType::Replan,
            stop_reason: Some(reason),
        }
    }

    fn terminate(reason: StopReason) -> Self {
        Self {
            decision: DecisionType::Terminate,
            stop_reason: Some(reason),
        }
    }
}

pub fn decide(input: &CoordinatorInput) -> CoordinatorDecision {
    if input.decisions.iter().any(Decision::is_opaque) {
        return CoordinatorDecision::terminate(StopReason::OpaqueDecision);
    }

    let state = &input.loop_state;
    let limits = &input.loop_limits;
    if state.replans >= limits.max_replans {
        return CoordinatorDecision::terminate(StopReason::MaxReplansExceeded);
    }
    if state.executions >= limits.max_executions_per_plan {
        return CoordinatorDecision::terminate(StopReason::MaxExecutionsExceeded);
    }
    if state.uncertainty >= limits.max_uncertainty {
        return CoordinatorDecision::terminate(StopReason::MaxUncertaintyExceeded);
    }

    if input.critic_output.as_ref().is_some_and(|c| c.blocking) {
        return CoordinatorDecision::replan(StopReason::CriticBlocking);
    }

    match input.qc_output.as_ref().map(|qc| qc.status) {
        Some(QcStatus::Reject) => CoordinatorDecision::terminate(StopReason::QcRejected),
        Some(QcStatus::NeedsHuman) => CoordinatorDecision::terminate(StopReason::QcNeedsHuman),
        Some(QcStatus::Acceptable) | None => CoordinatorDecision::proceed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explained() -> Decision {
        Decision {
            agent_name: "planner".to_string(),
            rationale: "fold".to_string(),
            rules_triggered: vec!["structure_required".to_string()],
            ..Decision::default()
        }
    }

    fn opaque() -> Decision {
        Decision {
            agent_name: "x".to_string(),
            rationale: "test".to_string(),
            memory_refs: vec!["m1".to_string()],
            ..Decision::default()
        }
    }

    #[test]
    fn default_input_continues() {
        let result = decide(&CoordinatorInput::default());
        assert_eq!(result.decision, DecisionType::Continue);
        assert_eq!(result.stop_reason, None);
    }

    #[test]
    fn opaque_decision_terminates_regardless_of_other_signals() {
        let input = CoordinatorInput {
            decisions: vec![explained(), opaque()],
            loop_limits: LoopLimits {
                max_replans: 0,
                ..LoopLimits::default()
            },
            loop_state: LoopState {
                replans: 5,
                executions: 9,
                uncertainty: 1.0,
            },
            critic_output: Some(CriticOutput {
                blocking: true,
                issues: Vec::new(),
            }),
            qc_output: Some(QcOutput::new(QcStatus::Reject)),
        };
        let result = decide(&input);
        assert_eq!(result.decision, DecisionType::Terminate);
        assert_eq!(result.stop_reason, Some(StopReason::OpaqueDecision));
    }

    #[test]
    fn replan_ceiling_is_inclusive() {
        let limits = LoopLimits {
            max_replans: 2,
            ..LoopLimits::default()
        };
        let at_limit = CoordinatorInput {
            loop_limits: limits,
            loop_state: LoopState {
                replans: 2,
                ..LoopState::default()
            },
            ..CoordinatorInput::default()
        };
        assert_eq!(
            decide(&at_limit).stop_reason,
            Some(StopReason::MaxReplansExceeded)
        );

        let below = CoordinatorInput {
            loop_state: LoopState {
                replans: 1,
                ..LoopState::default()
            },
            ..at_limit
        };
        assert_eq!(decide(&below).decision, DecisionType::Continue);
    }

    #[test]
    fn execution_and_uncertainty_limits_terminate() {
        let input = CoordinatorInput {
            loop_limits: LoopLimits {
                max_executions_per_plan: 0,
                ..LoopLimits::default()
            },
            loop_state: LoopState {
                executions: 1,
                ..LoopState::default()
            },
            ..CoordinatorInput::default()
        };
        assert_eq!(
            decide(&input).stop_reason,
            Some(StopReason::MaxExecutionsExceeded)
        );

        let input = CoordinatorInput {
            loop_limits: LoopLimits {
                max_uncertainty: 0.5,
                ..LoopLimits::default()
            },
            loop_state: LoopState {
                uncertainty: 0.5,
                ..LoopState::default()
            },
            ..CoordinatorInput::default()
        };
        assert_eq!(
            decide(&input).stop_reason,
            Some(StopReason::MaxUncertaintyExceeded)
        );
    }

    #[test]
    fn limits_pre_empt_critic_and_qc() {
        let input = CoordinatorInput {
            loop_limits: LoopLimits {
                max_replans: 1,
                ..LoopLimits::default()
            },
            loop_state: LoopState {
                replans: 1,
                ..LoopState::default()
            },
            critic_output: Some(CriticOutput {
                blocking: true,
                issues: Vec::new(),
            }),
            ..CoordinatorInput::default()
        };
        assert_eq!(decide(&input).decision, DecisionType::Terminate);
    }

    #[test]
    fn blocking_critic_replans_before_qc() {
        let input = CoordinatorInput {
            decisions: vec![explained()],
            critic_output: Some(CriticOutput {
                blocking: true,
                issues: vec!["low_plddt".to_string()],
            }),
            qc_output: Some(QcOutput::new(QcStatus::Reject)),
            ..CoordinatorInput::default()
        };
        let result = decide(&input);
        assert_eq!(result.decision, DecisionType::Replan);
        assert_eq!(result.stop_reason, Some(StopReason::CriticBlocking));
    }

    #[test]
    fn qc_statuses_have_distinct_stop_reasons() {
        let reject = CoordinatorInput {
            qc_output: Some(QcOutput::new(QcStatus::Reject)),
            ..CoordinatorInput::default()
        };
        let human = CoordinatorInput {
            qc_output: Some(QcOutput::new(QcStatus::NeedsHuman)),
            ..CoordinatorInput::default()
        };
        let ok = CoordinatorInput {
            qc_output: Some(QcOutput::new(QcStatus::Acceptable)),
            ..CoordinatorInput::default()
        };
        assert_eq!(decide(&reject).stop_reason, Some(StopReason::QcRejected));
        assert_eq!(decide(&human).stop_reason, Some(StopReason::QcNeedsHuman));
        assert_eq!(decide(&ok).decision, DecisionType::Continue);
    }

    #[test]
    fn identical_inputs_yield_identical_decisions() {
        let input = CoordinatorInput {
            decisions: vec![explained()],
            critic_output: Some(CriticOutput::default()),
            qc_output: Some(QcOutput::new(QcStatus::NeedsHuman)),
            ..CoordinatorInput::default()
        };
        assert_eq!(decide(&input), decide(&input.clone()));
    }
}
