//! Resume a gated run once a signed human decision exists.
//!
//! `run_summary.json` is never rewritten. The resolution is recorded in
//! `resolution.json` next to it, and approved candidates are accepted into
//! the candidate store.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::status::{Outcome, WorkflowState};
use crate::io::candidate_store::CandidateStore;
use crate::io::human_gate::{
    DecisionStatus, GateError, load_selection, validate_human_decision,
};
use crate::io::workspace::{RunWorkspace, read_json, write_json_once};
use crate::lifecycle::load_run_summary;

/// Contents of `resolution.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub run_id: String,
    pub status: DecisionStatus,
    pub outcome: Outcome,
    pub approved_ids: Vec<String>,
    pub rejected_ids: Vec<String>,
    /// Version id recorded in the store for each approved candidate.
    pub candidate_versions: BTreeMap<String, String>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resolved(Resolution),
    /// The decision artifact failed validation; nothing was written.
    Blocked(GateError),
}

#[instrument(skip_all, fields(run_id = %run_id))]
pub fn resume_run(runs_dir: &Path, run_id: &str, store: &CandidateStore) -> Result<ResumeOutcome> {
    let workspace = RunWorkspace::open(runs_dir, run_id)?;
    let summary = load_run_summary(&workspace)
        .with_context(|| format!("load run summary for {run_id}"))?;
    if summary.workflow_state != WorkflowState::AwaitingHumanReview {
        bail!(
            "run {run_id} is not awaiting human review (state {:?})",
            summary.workflow_state
        );
    }
    if workspace.resolution_path().exists() {
        bail!("run {run_id} is already resolved");
    }

    let decision = match validate_human_decision(&workspace.human_decision_path()) {
        Ok(decision) => decision,
        Err(err) => {
            warn!(reason = err.code(), "human decision rejected");
            return Ok(ResumeOutcome::Blocked(err));
        }
    };

    let selection = load_selection(&workspace)?;
    for id in decision.approved_ids.iter().chain(&decision.rejected_ids) {
        if !selection.frozen_ids.contains(id) {
            bail!("candidate {id} was not frozen for review in run {run_id}");
        }
    }

    let mut candidate_versions = BTreeMap::new();
    let outcome = match decision.status {
        DecisionStatus::Approved if !decision.approved_ids.is_empty() => {
            for id in &decision.approved_ids {
                let Some(candidate) = selection.candidates.iter().find(|c| &c.candidate_id == id)
                else {
                    bail!("candidate {id} missing from the frozen selection");
                };
                let record = store
                    .upsert(candidate)
                    .with_context(|| format!("store approved candidate {id}"))?;
                if let Some(version_id) = record.latest_version() {
                    candidate_versions.insert(id.clone(), version_id.to_string());
                }
            }
            Outcome::Accepted
        }
        _ => Outcome::Rejected,
    };

    let resolution = Resolution {
        run_id: run_id.to_string(),
        status: decision.status,
        outcome,
        approved_ids: decision.approved_ids,
        rejected_ids: decision.rejected_ids,
        candidate_versions,
        notes: decision.notes,
    };
    write_json_once(&workspace.resolution_path(), &resolution)?;
    info!(outcome = outcome.as_str(), approved = resolution.approved_ids.len(), "run resolved");
    Ok(ResumeOutcome::Resolved(resolution))
}

pub fn load_resolution(workspace: &RunWorkspace) -> Result<Resolution> {
    read_json(&workspace.resolution_path())
}
