//! Mapping from raw run signals to the user-facing status fields.

use serde::{Deserialize, Serialize};

use crate::core::coordinator::QcStatus;

/// Warnings with this prefix mark a run that fell back from GPU to CPU.
pub const CPU_FALLBACK_PREFIX: &str = "cpu_fallback:";

/// Technical success/failure of the run's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// Coarse run status, distinct from the execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Running,
    AwaitingHumanReview,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolHealth {
    Success,
    Degraded,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Accepted,
    Rejected,
    NeedsReview,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Rejected => "rejected",
            Outcome::NeedsReview => "needs_review",
        }
    }
}

/// `degraded` if any warning reports a CPU fallback, else derived from the execution status.
pub fn derive_tool_health(status: ExecutionStatus, warnings: &[String]) -> ToolHealth {
    if warnings
        .iter()
        .any(|warning| warning.starts_with(CPU_FALLBACK_PREFIX))
    {
        return ToolHealth::Degraded;
    }
    match status {
        ExecutionStatus::Success => ToolHealth::Success,
        ExecutionStatus::Failure => ToolHealth::Failure,
    }
}

/// Final outcome: review gates win, then acceptance requires healthy tools and an acceptable QC verdict.
pub fn derive_outcome(
    workflow_state: WorkflowState,
    tool_health: ToolHealth,
    qc_status: Option<QcStatus>,
) -> Outcome {
    if workflow_state == WorkflowState::AwaitingHumanReview {
        return Outcome::NeedsReview;
    }
    if tool_health != ToolHealth::Failure && qc_status == Some(QcStatus::Acceptable) {
        return Outcome::Accepted;
    }
    Outcome::Rejected
}
