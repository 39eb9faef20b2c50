//! Data contracts for invoking a tool and reporting its result.
//!
//! These types are the only shape the orchestration core sees from external
//! collaborators. Adapters for concrete providers normalize into them.

use serde::{Deserialize, Serialize};

/// Error type reported when no capability is registered for `(name, version)`.
pub const MISSING_TOOL: &str = "missing_tool";
/// Error type reported when the executor has no tool boundary configured.
pub const NO_BOUNDARY: &str = "no_boundary";
/// Error type reported when a task exceeds its timeout budget.
pub const TIMEOUT: &str = "timeout";
/// Error type reported when a tool ran out of memory.
pub const OOM: &str = "oom";
/// Error type reported when a tool produced output that failed validation.
pub const INVALID_OUTPUT: &str = "invalid_output";
/// Generic tool failure, including panics caught at the boundary.
pub const TOOL_ERROR: &str = "tool_error";

/// One named input passed to a tool, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationInput {
    pub name: String,
    pub value: String,
}

impl InvocationInput {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Immutable description of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationSpec {
    /// Unique per task.
    pub invocation_id: String,
    pub tool_name: String,
    pub tool_version: String,
    pub inputs: Vec<InvocationInput>,
    pub expected_outputs: Vec<String>,
    pub constraints: Vec<String>,
    pub origin_task_id: String,
}

impl ToolInvocationSpec {
    /// Look up an input value by name (first match wins).
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|input| input.name == name)
            .map(|input| input.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failure,
}

impl ToolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Failure => "failure",
        }
    }
}

/// Typed tool error. Present iff the result status is `failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    /// Open string, classified into `FailureType` by the failure classifier.
    pub error_type: String,
    pub message: String,
}

impl ToolError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub name: String,
    pub value: String,
}

impl ToolOutput {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetric {
    pub name: String,
    pub value: f64,
}

impl ToolMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Outcome of one invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    pub outputs: Vec<ToolOutput>,
    pub metrics: Vec<ToolMetric>,
    pub error: Option<ToolError>,
}

impl ToolResult {
    pub fn success(
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        outputs: Vec<ToolOutput>,
        metrics: Vec<ToolMetric>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            status: ToolStatus::Success,
            outputs,
            metrics,
            error: None,
        }
    }

    pub fn failure(
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: ToolError,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            status: ToolStatus::Failure,
            outputs: Vec::new(),
            metrics: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn error_type(&self) -> Option<&str> {
        self.error.as_ref().map(|err| err.error_type.as_str())
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|metric| metric.name == name)
            .map(|metric| metric.value)
    }

    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|output| output.name == name)
            .map(|output| output.value.as_str())
    }
}
