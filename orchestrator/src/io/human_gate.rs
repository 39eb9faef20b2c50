//! Human decision gate.
//!
//! A run that needs review writes a frozen shortlist
//! (`candidate_selection.json`) and a pending `human_decision.json`. An
//! operator fills in the decision and signs it; `resume` only proceeds once
//! [`validate_human_decision`] accepts the file.
//!
//! The signature is the hex SHA-256 of the canonical JSON (sorted keys, no
//! whitespace) of every field except `signature`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::candidates::{Candidate, rank_top_n};
use crate::core::ids::{canonical_json, sha256_hex};
use crate::io::workspace::{RunWorkspace, read_json, write_json};

/// Fields every decision file must carry.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "status",
    "approved_ids",
    "rejected_ids",
    "notes",
    "signature",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Approved => "approved",
            DecisionStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub status: DecisionStatus,
    pub approved_ids: Vec<String>,
    pub rejected_ids: Vec<String>,
    pub notes: String,
    pub signature: String,
}

impl HumanDecision {
    pub fn pending() -> Self {
        Self {
            status: DecisionStatus::Pending,
            approved_ids: Vec::new(),
            rejected_ids: Vec::new(),
            notes: String::new(),
            signature: String::new(),
        }
    }
}

/// Gate failures. The display form is the stable reason code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("missing_human_decision")]
    Missing,

    #[error("missing_fields:{}", .0.join(","))]
    MissingFields(Vec<String>),

    #[error("invalid_status")]
    InvalidStatus,

    #[error("decision_not_finalized")]
    NotFinalized,

    #[error("invalid_signature")]
    InvalidSignature,

    #[error("unreadable_human_decision: {0}")]
    Unreadable(String),
}

impl GateError {
    pub fn code(&self) -> &'static str {
        match self {
            GateError::Missing => "missing_human_decision",
            GateError::MissingFields(_) => "missing_fields",
            GateError::InvalidStatus => "invalid_status",
            GateError::NotFinalized => "decision_not_finalized",
            GateError::InvalidSignature => "invalid_signature",
            GateError::Unreadable(_) => "unreadable_human_decision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionMetadata {
    pub top_n: usize,
    pub total_candidates: usize,
}

/// Shortlist frozen for review (`candidate_selection.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSelection {
    pub candidates: Vec<Candidate>,
    pub frozen_ids: Vec<String>,
    pub metadata: SelectionMetadata,
}

/// Freeze the top `top_n` candidates for review and write a pending decision.
///
/// Returns the frozen candidate ids in rank order.
#[instrument(skip_all, fields(run_id = workspace.run_id(), top_n))]
pub fn require_human_decision(
    candidates: &[Candidate],
    workspace: &RunWorkspace,
    top_n: usize,
) -> Result<Vec<String>> {
    let shortlist = rank_top_n(candidates, top_n);
    let frozen_ids: Vec<String> = shortlist
        .iter()
        .map(|c| c.candidate_id.clone())
        .collect();
    let selection = CandidateSelection {
        candidates: shortlist,
        frozen_ids: frozen_ids.clone(),
        metadata: SelectionMetadata {
            top_n,
            total_candidates: candidates.len(),
        },
    };
    write_json(&workspace.selection_path(), &selection)?;
    write_json(&workspace.human_decision_path(), &HumanDecision::pending())?;
    info!(frozen = frozen_ids.len(), "awaiting human decision");
    Ok(frozen_ids)
}

pub fn load_selection(workspace: &RunWorkspace) -> Result<CandidateSelection> {
    read_json(&workspace.selection_path())
}

/// Signature over every field of `payload` except `signature`.
pub fn sign_payload(payload: &Value) -> String {
    let mut unsigned = payload.clone();
    if let Value::Object(map) = &mut unsigned {
        map.remove("signature");
    }
    sha256_hex(canonical_json(&unsigned).as_bytes())
}

pub fn sign_decision(decision: &mut HumanDecision) -> Result<()> {
    let payload = serde_json::to_value(&*decision).context("serialize decision")?;
    decision.signature = sign_payload(&payload);
    Ok(())
}

/// Recompute and store the signature of the decision file at `path`.
///
/// Unknown fields are kept and covered by the signature.
pub fn sign_decision_file(path: &Path) -> Result<String> {
    let mut payload: Value = read_json(path)?;
    let signature = sign_payload(&payload);
    let Value::Object(map) = &mut payload else {
        anyhow::bail!("{} is not a JSON object", path.display());
    };
    map.insert("signature".to_string(), Value::String(signature.clone()));
    write_json(path, &payload)?;
    debug!(path = %path.display(), "signed human decision");
    Ok(signature)
}

/// Validate a decision file. Checks run in a fixed order: presence, required
/// fields, status, finalization, then signature.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn validate_human_decision(path: &Path) -> Result<HumanDecision, GateError> {
    if !path.exists() {
        warn!("human decision missing");
        return Err(GateError::Missing);
    }
    let contents =
        std::fs::read_to_string(path).map_err(|err| GateError::Unreadable(err.to_string()))?;
    let payload: Value =
        serde_json::from_str(&contents).map_err(|err| GateError::Unreadable(err.to_string()))?;
    let Value::Object(map) = &payload else {
        return Err(GateError::Unreadable("expected a JSON object".to_string()));
    };

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !map.contains_key(**field))
        .map(|field| field.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(GateError::MissingFields(missing));
    }

    let decision: HumanDecision = serde_json::from_value(payload.clone()).map_err(|err| {
        if map.get("status").and_then(Value::as_str).is_some_and(|status| {
            !matches!(status, "pending" | "approved" | "rejected")
        }) {
            GateError::InvalidStatus
        } else {
            GateError::Unreadable(err.to_string())
        }
    })?;
    if decision.status == DecisionStatus::Pending {
        return Err(GateError::NotFinalized);
    }
    if decision.signature != sign_payload(&payload) {
        warn!("human decision signature mismatch");
        return Err(GateError::InvalidSignature);
    }
    debug!(status = ?decision.status, "human decision valid");
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scored_candidate;
    use serde_json::json;

    fn workspace() -> (tempfile::TempDir, RunWorkspace) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = RunWorkspace::create(temp.path(), "run-1").expect("create");
        (temp, ws)
    }

    fn signed(status: DecisionStatus, approved: &[&str]) -> HumanDecision {
        let mut decision = HumanDecision {
            status,
            approved_ids: approved.iter().map(|id| id.to_string()).collect(),
            rejected_ids: Vec::new(),
            notes: "reviewed".to_string(),
            signature: String::new(),
        };
        sign_decision(&mut decision).expect("sign");
        decision
    }

    #[test]
    fn require_decision_freezes_top_n() {
        let (_temp, ws) = workspace();
        let candidates = vec![
            scored_candidate("c1", "ACD", 60.0),
            scored_candidate("c2", "ACD", 90.0),
            scored_candidate("c3", "ACD", 75.0),
        ];
        let frozen = require_human_decision(&candidates, &ws, 2).expect("require");
        assert_eq!(frozen, vec!["c2", "c3"]);

        let selection = load_selection(&ws).expect("selection");
        assert_eq!(selection.metadata.top_n, 2);
        assert_eq!(selection.frozen_ids, frozen);
        let pending: HumanDecision = read_json(&ws.human_decision_path()).expect("decision");
        assert_eq!(pending.status, DecisionStatus::Pending);
    }

    #[test]
    fn missing_file_is_reported() {
        let (_temp, ws) = workspace();
        let err = validate_human_decision(&ws.human_decision_path()).unwrap_err();
        assert_eq!(err.to_string(), "missing_human_decision");
    }

    #[test]
    fn missing_fields_are_listed() {
        let (_temp, ws) = workspace();
        write_json(&ws.human_decision_path(), &json!({"status": "pending"})).expect("write");
        let err = validate_human_decision(&ws.human_decision_path()).unwrap_err();
        assert!(err.to_string().starts_with("missing_fields"));
        assert_eq!(
            err,
            GateError::MissingFields(vec![
                "approved_ids".to_string(),
                "rejected_ids".to_string(),
                "notes".to_string(),
                "signature".to_string(),
            ])
        );
    }

    #[test]
    fn pending_decision_is_not_finalized() {
        let (_temp, ws) = workspace();
        write_json(&ws.human_decision_path(), &signed(DecisionStatus::Pending, &[]))
            .expect("write");
        let err = validate_human_decision(&ws.human_decision_path()).unwrap_err();
        assert_eq!(err, GateError::NotFinalized);
    }

    #[test]
    fn unknown_status_is_invalid() {
        let (_temp, ws) = workspace();
        write_json(
            &ws.human_decision_path(),
            &json!({"status": "maybe", "approved_ids": [], "rejected_ids": [], "notes": "", "signature": ""}),
        )
        .expect("write");
        let err = validate_human_decision(&ws.human_decision_path()).unwrap_err();
        assert_eq!(err.code(), "invalid_status");
    }

    #[test]
    fn signed_decision_validates() {
        let (_temp, ws) = workspace();
        let decision = signed(DecisionStatus::Approved, &["c2"]);
        write_json(&ws.human_decision_path(), &decision).expect("write");
        let validated = validate_human_decision(&ws.human_decision_path()).expect("valid");
        assert_eq!(validated, decision);
    }

    #[test]
    fn tampered_field_fails_signature() {
        let (_temp, ws) = workspace();
        let mut decision = signed(DecisionStatus::Approved, &["c2"]);
        decision.approved_ids.push("c3".to_string());
        write_json(&ws.human_decision_path(), &decision).expect("write");
        let err = validate_human_decision(&ws.human_decision_path()).unwrap_err();
        assert_eq!(err, GateError::InvalidSignature);
    }

    #[test]
    fn sign_file_makes_edited_decision_valid() {
        let (_temp, ws) = workspace();
        let path = ws.human_decision_path();
        write_json(
            &path,
            &json!({"status": "rejected", "approved_ids": [], "rejected_ids": ["c1"], "notes": "weak", "signature": "stale"}),
        )
        .expect("write");
        assert_eq!(
            validate_human_decision(&path).unwrap_err(),
            GateError::InvalidSignature
        );
        sign_decision_file(&path).expect("sign");
        let decision = validate_human_decision(&path).expect("valid");
        assert_eq!(decision.status, DecisionStatus::Rejected);
    }

    #[test]
    fn signature_ignores_key_order() {
        let a = json!({"status": "approved", "notes": "x", "signature": "ignored"});
        let b = json!({"notes": "x", "status": "approved"});
        assert_eq!(sign_payload(&a), sign_payload(&b));
    }
}
