//! Run context and run summary.
//!
//! [`RunContext`] owns everything mutable about one run: loop counters,
//! telemetry, warnings, analysis, and snapshots. [`RunContext::finalize`]
//! persists those artifacts and writes `run_summary.json` exactly once.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::core::coordinator::QcStatus;
use crate::core::execution::LoopState;
use crate::core::failures::FailureType;
use crate::core::status::{
    ExecutionStatus, Outcome, ToolHealth, WorkflowState, derive_outcome, derive_tool_health,
};
use crate::io::analysis::RunAnalysis;
use crate::io::config::RUN_CONFIG_VERSION;
use crate::io::manifest::{hash_artifacts, write_manifest};
use crate::io::snapshots::{ExecutionSnapshot, SnapshotLog, TelemetrySnapshot};
use crate::io::telemetry::{CostSummary, TelemetryClient};
use crate::io::workspace::{RunWorkspace, read_json, write_json_once};

/// Per-run mutable state. Not shared between runs.
#[derive(Debug)]
pub struct RunContext {
    pub workspace: RunWorkspace,
    pub telemetry: TelemetryClient,
    pub loop_state: LoopState,
    pub warnings: Vec<String>,
    pub analysis: RunAnalysis,
    pub execution_snapshots: SnapshotLog<ExecutionSnapshot>,
    pub telemetry_snapshots: SnapshotLog<TelemetrySnapshot>,
}

/// Create the run workspace and a fresh context for it.
pub fn create_run_context(runs_dir: &Path, run_id: &str) -> Result<RunContext> {
    let workspace = RunWorkspace::create(runs_dir, run_id)?;
    Ok(RunContext {
        telemetry: TelemetryClient::new(run_id),
        workspace,
        loop_state: LoopState::default(),
        warnings: Vec::new(),
        analysis: RunAnalysis::default(),
        execution_snapshots: SnapshotLog::default(),
        telemetry_snapshots: SnapshotLog::default(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub orchestrator: String,
    pub tool_name: String,
    pub tool_version: String,
    pub run_config_version: u32,
}

impl VersionInfo {
    pub fn current(tool_name: &str, tool_version: &str) -> Self {
        Self {
            orchestrator: env!("CARGO_PKG_VERSION").to_string(),
            tool_name: tool_name.to_string(),
            tool_version: tool_version.to_string(),
            run_config_version: RUN_CONFIG_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub failure_type: FailureType,
    pub message: String,
}

/// Final, immutable record of a run (`run_summary.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub candidate_id: Option<String>,
    pub command: String,
    pub execution_status: ExecutionStatus,
    pub workflow_state: WorkflowState,
    pub outcome: Outcome,
    pub provider: String,
    pub tool_status: ToolHealth,
    pub qc_status: Option<QcStatus>,
    /// Relative to the run workspace.
    pub artifacts_dir: String,
    pub warnings: Vec<String>,
    pub failure: Option<FailureSummary>,
    pub stop_reason: Option<String>,
    pub iterations: u32,
    pub loop_state: LoopState,
    pub costs: CostSummary,
    pub version: VersionInfo,
}

/// How a run ended, as decided by the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub candidate_id: Option<String>,
    pub command: String,
    pub execution_status: ExecutionStatus,
    pub workflow_state: WorkflowState,
    pub qc_status: Option<QcStatus>,
    pub failure: Option<FailureSummary>,
    pub stop_reason: Option<String>,
    pub iterations: u32,
    pub version: VersionInfo,
}

/// Assemble the summary from the context and the completion.
///
/// Cost keys missing from the context are reported as zero.
pub fn build_run_summary(context: &RunContext, completion: RunCompletion) -> RunSummary {
    let tool_status = derive_tool_health(completion.execution_status, &context.warnings);
    let outcome = derive_outcome(completion.workflow_state, tool_status, completion.qc_status);
    let mut costs = context.telemetry.costs.clone();
    costs.ensure_keys();
    RunSummary {
        run_id: context.workspace.run_id().to_string(),
        candidate_id: completion.candidate_id,
        command: completion.command,
        execution_status: completion.execution_status,
        workflow_state: completion.workflow_state,
        outcome,
        provider: format!(
            "{}@{}",
            completion.version.tool_name, completion.version.tool_version
        ),
        tool_status,
        qc_status: completion.qc_status,
        artifacts_dir: "artifacts".to_string(),
        warnings: context.warnings.clone(),
        failure: completion.failure,
        stop_reason: completion.stop_reason,
        iterations: completion.iterations,
        loop_state: context.loop_state,
        costs,
        version: completion.version,
    }
}

impl RunContext {
    /// Persist analysis, snapshots, telemetry, the artifact manifest, and
    /// finally the run summary.
    #[instrument(skip_all, fields(run_id = self.workspace.run_id()))]
    pub fn finalize(mut self, completion: RunCompletion) -> Result<RunSummary> {
        let ws = &self.workspace;
        if ws.summary_path().exists() {
            bail!("run {} is already finalized", ws.run_id());
        }
        self.telemetry.ensure_costs();
        self.analysis.write(&ws.analysis_path())?;
        self.execution_snapshots
            .write(&ws.execution_snapshots_path())?;
        self.telemetry_snapshots
            .write(&ws.telemetry_snapshots_path())?;
        self.telemetry.flush(&ws.telemetry_path())?;
        let manifest = hash_artifacts(&ws.artifacts_dir())?;
        write_manifest(&ws.manifest_path(), &manifest)?;

        let summary = build_run_summary(&self, completion);
        write_json_once(&ws.summary_path(), &summary)
            .with_context(|| format!("write run summary for {}", ws.run_id()))?;
        info!(
            outcome = summary.outcome.as_str(),
            artifacts = manifest.hashes.len(),
            "run finalized"
        );
        Ok(summary)
    }
}

pub fn load_run_summary(workspace: &RunWorkspace) -> Result<RunSummary> {
    read_json(&workspace.summary_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(workflow_state: WorkflowState, qc: Option<QcStatus>) -> RunCompletion {
        RunCompletion {
            candidate_id: Some("cand-1".to_string()),
            command: "run".to_string(),
            execution_status: ExecutionStatus::Success,
            workflow_state,
            qc_status: qc,
            failure: None,
            stop_reason: None,
            iterations: 1,
            version: VersionInfo::current("heuristic_proxy", "1.0"),
        }
    }

    #[test]
    fn summary_fills_missing_costs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = create_run_context(temp.path(), "run-1").expect("ctx");
        let summary = build_run_summary(
            &ctx,
            completion(WorkflowState::Completed, Some(QcStatus::Acceptable)),
        );
        assert_eq!(summary.outcome, Outcome::Accepted);
        assert!(summary.costs.missing_keys().is_empty());
        assert_eq!(summary.provider, "heuristic_proxy@1.0");
    }

    #[test]
    fn cpu_fallback_degrades_tool_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = create_run_context(temp.path(), "run-1").expect("ctx");
        ctx.warnings.push("cpu_fallback:no_gpu".to_string());
        let summary = build_run_summary(
            &ctx,
            completion(WorkflowState::Completed, Some(QcStatus::Acceptable)),
        );
        assert_eq!(summary.tool_status, ToolHealth::Degraded);
        assert_eq!(summary.outcome, Outcome::Accepted);
    }

    #[test]
    fn finalize_writes_artifacts_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = create_run_context(temp.path(), "run-1").expect("ctx");
        let ws = ctx.workspace.clone();
        let summary = ctx
            .finalize(completion(WorkflowState::AwaitingHumanReview, None))
            .expect("finalize");
        assert_eq!(summary.outcome, Outcome::NeedsReview);
        for path in [
            ws.summary_path(),
            ws.analysis_path(),
            ws.telemetry_path(),
            ws.execution_snapshots_path(),
            ws.telemetry_snapshots_path(),
            ws.manifest_path(),
        ] {
            assert!(path.exists(), "missing {}", path.display());
        }
        assert_eq!(load_run_summary(&ws).expect("load"), summary);

        let again = RunContext {
            workspace: ws.clone(),
            telemetry: TelemetryClient::new("run-1"),
            loop_state: LoopState::default(),
            warnings: Vec::new(),
            analysis: RunAnalysis::default(),
            execution_snapshots: SnapshotLog::default(),
            telemetry_snapshots: SnapshotLog::default(),
        };
        assert!(
            again
                .finalize(completion(WorkflowState::Completed, None))
                .is_err()
        );
    }
}
