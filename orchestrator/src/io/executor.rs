//! Local executor: dispatches one task through the tool boundary under a
//! sampled timeout budget.
//!
//! The clock is sampled before and after dispatch, never during. A tool that
//! ignores its deadline runs to completion; the executor only reclassifies the
//! late result as `timeout` afterwards.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::budget::{elapsed_ms, exceeds_budget};
use crate::core::execution::ExecutionTask;
use crate::core::tooling::{self, ToolError, ToolOutput, ToolResult};
use crate::io::boundary::ToolBoundary;
use crate::io::registry::ToolRegistry;

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock measured from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Per-dispatch context.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub run_id: String,
    pub iteration: u32,
    /// Clock sample taken when the task was issued. Sampled at run start when absent.
    pub issued_at_ms: Option<u64>,
}

/// Uniform result for a task whether it ran, failed, or was never dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub result: ToolResult,
    pub elapsed_ms: u64,
    pub dispatched: bool,
    /// Outputs of a successful tool call that finished past its budget.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub late_outputs: Vec<ToolOutput>,
}

pub struct LocalExecutor {
    boundary: Option<ToolBoundary>,
    clock: Arc<dyn Clock>,
}

impl LocalExecutor {
    pub fn new(boundary: Option<ToolBoundary>, clock: Arc<dyn Clock>) -> Self {
        Self { boundary, clock }
    }

    /// Executor over the built-in tools and the system clock.
    pub fn with_builtin_tools() -> Result<Self> {
        let registry = ToolRegistry::with_builtin_tools()?;
        Ok(Self::new(
            Some(ToolBoundary::new(Arc::new(registry))),
            Arc::new(SystemClock::new()),
        ))
    }

    /// Sample the executor's clock, e.g. to stamp a task as issued.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    #[instrument(skip_all, fields(task = %task.task_id, timeout_ms = task.timeout_ms, iteration = context.iteration))]
    pub fn run(&self, task: &ExecutionTask, context: &ExecutionContext) -> ExecutionResult {
        let spec = &task.tool_invocation;
        let Some(boundary) = &self.boundary else {
            warn!("no tool boundary configured");
            return not_dispatched(
                task,
                tooling::NO_BOUNDARY,
                "no tool boundary configured".to_string(),
                0,
            );
        };

        let started = context
            .issued_at_ms
            .unwrap_or_else(|| self.clock.now_ms());
        let before = self.clock.now_ms();
        if exceeds_budget(started, before, task.timeout_ms) {
            let elapsed = elapsed_ms(started, before);
            warn!(elapsed_ms = elapsed, "budget exhausted before dispatch");
            return not_dispatched(
                task,
                tooling::TIMEOUT,
                format!(
                    "{elapsed}ms elapsed before dispatch (budget {}ms)",
                    task.timeout_ms
                ),
                elapsed,
            );
        }

        let result = boundary.execute(spec);
        let after = self.clock.now_ms();
        let elapsed = elapsed_ms(started, after);
        if exceeds_budget(started, after, task.timeout_ms) {
            warn!(elapsed_ms = elapsed, "tool finished past budget");
            let late_outputs = if result.is_success() {
                result.outputs
            } else {
                Vec::new()
            };
            return ExecutionResult {
                task_id: task.task_id.clone(),
                result: ToolResult::failure(
                    spec.invocation_id.as_str(),
                    spec.tool_name.as_str(),
                    ToolError::new(
                        tooling::TIMEOUT,
                        format!("{elapsed}ms elapsed (budget {}ms)", task.timeout_ms),
                    ),
                ),
                elapsed_ms: elapsed,
                dispatched: true,
                late_outputs,
            };
        }

        debug!(elapsed_ms = elapsed, status = result.status.as_str(), "task finished");
        ExecutionResult {
            task_id: task.task_id.clone(),
            result,
            elapsed_ms: elapsed,
            dispatched: true,
            late_outputs: Vec::new(),
        }
    }
}

fn not_dispatched(
    task: &ExecutionTask,
    error_type: &str,
    message: String,
    elapsed_ms: u64,
) -> ExecutionResult {
    let spec = &task.tool_invocation;
    ExecutionResult {
        task_id: task.task_id.clone(),
        result: ToolResult::failure(
            spec.invocation_id.as_str(),
            spec.tool_name.as_str(),
            ToolError::new(error_type, message),
        ),
        elapsed_ms,
        dispatched: false,
        late_outputs: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tooling::{ToolMetric, ToolStatus};
    use crate::test_support::{ManualClock, ScriptedTool, task};

    fn executor_with(tool: Arc<ScriptedTool>, clock: Arc<ManualClock>) -> LocalExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(tool).expect("register");
        LocalExecutor::new(Some(ToolBoundary::new(Arc::new(registry))), clock)
    }

    fn ok_result() -> ToolResult {
        ToolResult::success(
            "t1-inv",
            "scripted",
            vec![ToolOutput::new("structure", "ATOM")],
            vec![ToolMetric::new("mean_plddt", 80.0)],
        )
    }

    #[test]
    fn missing_boundary_is_reported_without_dispatch() {
        let executor = LocalExecutor::new(None, Arc::new(ManualClock::new()));
        let outcome = executor.run(&task("t1", 0), &ExecutionContext::default());
        assert_eq!(outcome.result.error_type(), Some("no_boundary"));
        assert!(!outcome.dispatched);
    }

    #[test]
    fn pre_dispatch_timeout_skips_the_tool() {
        let tool = Arc::new(ScriptedTool::new("scripted", "1.0"));
        tool.push(ok_result());
        let clock = Arc::new(ManualClock::with_samples(&[0, 2_000, 2_100]));
        let executor = executor_with(tool.clone(), clock);

        let outcome = executor.run(&task("t1", 1_000), &ExecutionContext::default());
        assert_eq!(outcome.result.error_type(), Some("timeout"));
        assert!(!outcome.dispatched);
        assert_eq!(tool.calls(), 0);
    }

    #[test]
    fn late_success_is_reclassified_as_timeout() {
        let tool = Arc::new(ScriptedTool::new("scripted", "1.0"));
        tool.push(ok_result());
        let clock = Arc::new(ManualClock::with_samples(&[0, 0, 2_000]));
        let executor = executor_with(tool.clone(), clock);

        let outcome = executor.run(&task("t1", 1_000), &ExecutionContext::default());
        assert_eq!(outcome.result.status, ToolStatus::Failure);
        assert_eq!(outcome.result.error_type(), Some("timeout"));
        assert!(outcome.dispatched);
        assert_eq!(tool.calls(), 1);
        assert_eq!(outcome.late_outputs, vec![ToolOutput::new("structure", "ATOM")]);
        assert!(outcome.result.outputs.is_empty());
    }

    #[test]
    fn issued_at_counts_toward_the_budget() {
        let tool = Arc::new(ScriptedTool::new("scripted", "1.0"));
        tool.push(ok_result());
        let clock = Arc::new(ManualClock::new());
        clock.advance(1_500);
        let executor = executor_with(tool.clone(), clock);
        let context = ExecutionContext {
            issued_at_ms: Some(0),
            ..ExecutionContext::default()
        };

        let outcome = executor.run(&task("t1", 1_000), &context);
        assert_eq!(outcome.result.error_type(), Some("timeout"));
        assert_eq!(tool.calls(), 0);
    }

    #[test]
    fn zero_timeout_never_times_out() {
        let tool = Arc::new(ScriptedTool::new("scripted", "1.0"));
        tool.push(ok_result());
        let clock = Arc::new(ManualClock::with_samples(&[0, 50_000, 90_000]));
        let executor = executor_with(tool, clock);

        let outcome = executor.run(&task("t1", 0), &ExecutionContext::default());
        assert!(outcome.result.is_success());
        assert_eq!(outcome.elapsed_ms, 90_000);
    }

    #[test]
    fn tool_delay_through_clock_triggers_post_check() {
        let clock = Arc::new(ManualClock::new());
        let tool = Arc::new(ScriptedTool::new("scripted", "1.0").with_clock(clock.clone()));
        tool.push_delayed(ok_result(), 5_000);
        let executor = executor_with(tool, clock);

        let outcome = executor.run(&task("t1", 1_000), &ExecutionContext::default());
        assert_eq!(outcome.result.error_type(), Some("timeout"));
        assert_eq!(outcome.elapsed_ms, 5_000);
    }
}
