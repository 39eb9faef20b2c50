//! Reproduction and manifest verification of past runs.
//!
//! `reproduce` re-executes a run from its persisted `config.json` and checks
//! that the new artifact tree hashes to the recorded manifest. `verify` only
//! rehashes the original artifacts.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use orchestrator::agents::HeuristicAgents;
use orchestrator::core::status::Outcome;
use orchestrator::design_loop::{DesignRequest, run_design};
use orchestrator::io::candidate_store::CandidateStore;
use orchestrator::io::config::load_run_config;
use orchestrator::io::executor::LocalExecutor;
use orchestrator::io::manifest::{ManifestDiff, hash_artifacts, load_manifest};
use orchestrator::io::workspace::{RunWorkspace, generate_run_id};
use orchestrator::lifecycle::load_run_summary;

/// Directory under the runs dir holding throwaway candidate stores.
pub const REPLAY_STORE_DIR: &str = ".replay-store";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproductionReport {
    pub run_id: String,
    pub replay_run_id: String,
    pub artifact_hashes_match: bool,
    /// Paths whose replayed hash differs from the recorded manifest.
    pub mismatched_paths: Vec<String>,
    /// Paths of the original run that no longer match its own manifest.
    pub tampered_paths: Vec<String>,
    pub candidate_matches: bool,
    pub original_outcome: Outcome,
    pub replay_outcome: Outcome,
    pub checked_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub run_id: String,
    pub matches: bool,
    pub diff: ManifestDiff,
}

/// Rehash the artifacts of `run_id` against its recorded manifest.
pub fn verify_run(runs_dir: &Path, run_id: &str) -> Result<VerificationReport> {
    let workspace = RunWorkspace::open(runs_dir, run_id)?;
    let diff = manifest_drift(&workspace)?;
    Ok(VerificationReport {
        run_id: run_id.to_string(),
        matches: diff.is_empty(),
        diff,
    })
}

/// Re-execute `run_id` under a fresh run id and compare artifact hashes.
///
/// The replay writes candidates to a scratch store so the shared store is
/// left untouched.
#[instrument(skip_all, fields(run_id = %run_id))]
pub fn reproduce_run(
    runs_dir: &Path,
    run_id: &str,
    replay_run_id: Option<String>,
) -> Result<ReproductionReport> {
    let workspace = RunWorkspace::open(runs_dir, run_id)?;
    let original = load_run_summary(&workspace)
        .with_context(|| format!("load run summary for {run_id}"))?;
    let config = load_run_config(&workspace.config_path())?;
    let recorded = load_manifest(&workspace.manifest_path())?;
    let tampered = manifest_drift(&workspace)?;

    let replay_run_id = replay_run_id.unwrap_or_else(generate_run_id);
    let mut pipeline = config.pipeline;
    pipeline.paths.runs_dir = runs_dir.to_path_buf();
    pipeline.paths.store_dir = runs_dir.join(REPLAY_STORE_DIR).join(&replay_run_id);
    let store = CandidateStore::open(&pipeline.paths.store_dir)?;
    let executor = LocalExecutor::with_builtin_tools()?;
    let mut request = DesignRequest::new(config.sequence, pipeline);
    request.run_id = Some(replay_run_id.clone());
    request.command = "reproduce".to_string();

    let replay = run_design(&request, &HeuristicAgents, &executor, &store)
        .with_context(|| format!("replay run {run_id}"))?;
    let replay_workspace = RunWorkspace::open(runs_dir, &replay_run_id)?;
    let replayed = hash_artifacts(&replay_workspace.artifacts_dir())?;
    let mismatched_paths = recorded.diff(&replayed).paths();
    let tampered_paths = tampered.paths();
    let candidate_matches = original.candidate_id == replay.summary.candidate_id;

    let artifact_hashes_match = mismatched_paths.is_empty() && tampered_paths.is_empty();
    if artifact_hashes_match {
        info!(replay_run_id = %replay_run_id, "artifact hashes match");
    } else {
        warn!(
            replay_run_id = %replay_run_id,
            mismatched = mismatched_paths.len(),
            tampered = tampered_paths.len(),
            "artifact hashes differ"
        );
    }

    Ok(ReproductionReport {
        run_id: run_id.to_string(),
        replay_run_id,
        artifact_hashes_match,
        mismatched_paths,
        tampered_paths,
        candidate_matches,
        original_outcome: original.outcome,
        replay_outcome: replay.summary.outcome,
        checked_at: Utc::now().to_rfc3339(),
    })
}

fn manifest_drift(workspace: &RunWorkspace) -> Result<ManifestDiff> {
    let recorded = load_manifest(&workspace.manifest_path())?;
    let actual = hash_artifacts(&workspace.artifacts_dir())?;
    Ok(recorded.diff(&actual))
}
