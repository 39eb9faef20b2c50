//! Failure taxonomy and continue/replan/terminate policy.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::tooling::{self, ToolError, ToolResult, ToolStatus};

/// Closed failure taxonomy recorded in audit artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    None,
    InputInvalid,
    ToolTimeout,
    ToolCrash,
    InvalidOutput,
    Oom,
    BioImplausible,
    HumanDecisionMissing,
    Unknown,
}

impl FailureType {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureType::None => "none",
            FailureType::InputInvalid => "input_invalid",
            FailureType::ToolTimeout => "tool_timeout",
            FailureType::ToolCrash => "tool_crash",
            FailureType::InvalidOutput => "invalid_output",
            FailureType::Oom => "oom",
            FailureType::BioImplausible => "bio_implausible",
            FailureType::HumanDecisionMissing => "human_decision_missing",
            FailureType::Unknown => "unknown",
        }
    }

    /// Classify an executor error type.
    pub fn from_error(error: &ToolError) -> Self {
        match error.error_type.as_str() {
            tooling::TIMEOUT => FailureType::ToolTimeout,
            tooling::OOM => FailureType::Oom,
            tooling::INVALID_OUTPUT => FailureType::InvalidOutput,
            _ => FailureType::ToolCrash,
        }
    }
}

/// Map an executor status/error pair to the failure label used in audit records.
///
/// Successful results map to the empty string.
pub fn map_failure_type(status: ToolStatus, error: Option<&ToolError>) -> &'static str {
    match (status, error) {
        (ToolStatus::Success, _) => "",
        (ToolStatus::Failure, Some(error)) => FailureType::from_error(error).as_str(),
        (ToolStatus::Failure, None) => FailureType::Unknown.as_str(),
    }
}

/// Recommended operator follow-up for a failure.
pub fn suggest_next_action(failure: FailureType) -> &'static str {
    match failure {
        FailureType::None => "none",
        FailureType::InputInvalid => "fix_input_sequence",
        FailureType::ToolTimeout => "retry_with_different_tool",
        FailureType::ToolCrash => "retry_or_switch_tool",
        FailureType::InvalidOutput => "inspect_tool_output",
        FailureType::Oom => "reduce_model_size_or_batch",
        FailureType::BioImplausible => "review_sequence_constraints",
        FailureType::HumanDecisionMissing => "provide_signed_human_decision",
        FailureType::Unknown => "inspect_logs",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    Continue,
    Replan,
    Terminate,
}

/// Decide how the caller proceeds after a tool result.
///
/// Fatal errors win over replan errors. Failures in neither set are treated
/// as recoverable noise.
pub fn evaluate_failure(
    result: &ToolResult,
    fatal_errors: &BTreeSet<String>,
    replan_errors: &BTreeSet<String>,
) -> FailureAction {
    if result.is_success() {
        return FailureAction::Continue;
    }
    let Some(error_type) = result.error_type() else {
        return FailureAction::Continue;
    };
    if fatal_errors.contains(error_type) {
        FailureAction::Terminate
    } else if replan_errors.contains(error_type) {
        FailureAction::Replan
    } else {
        FailureAction::Continue
    }
}
