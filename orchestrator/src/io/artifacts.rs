//! Content-addressed run artifacts and the failure record.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::failures::{FailureType, suggest_next_action};
use crate::core::ids::content_hash;
use crate::io::workspace::{RunWorkspace, read_json, write_json};

/// A written artifact. The id is the SHA-256 of the canonical payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub kind: String,
    pub name: String,
}

impl ArtifactRecord {
    /// Path relative to the run's artifacts directory.
    pub fn relative_path(&self) -> String {
        format!("{}/{}.json", self.kind, self.artifact_id)
    }
}

/// Write `payload` under `artifacts/<kind>/<hash>.json`.
///
/// Identical payloads produce the same record and an existing file is left
/// untouched.
pub fn write_artifact(
    workspace: &RunWorkspace,
    kind: &str,
    name: &str,
    payload: &Value,
) -> Result<ArtifactRecord> {
    if kind.is_empty() || kind.contains(['/', '\\']) || kind.contains("..") {
        return Err(anyhow!("invalid artifact kind '{kind}'"));
    }
    let record = ArtifactRecord {
        artifact_id: content_hash(payload)?,
        kind: kind.to_string(),
        name: name.to_string(),
    };
    let path = artifact_path(workspace, &record);
    if path.exists() {
        debug!(artifact = %record.artifact_id, "artifact already present");
        return Ok(record);
    }
    write_json(&path, payload)?;
    debug!(artifact = %record.artifact_id, kind, name, "wrote artifact");
    Ok(record)
}

pub fn load_artifact(workspace: &RunWorkspace, record: &ArtifactRecord) -> Result<Value> {
    let path = artifact_path(workspace, record);
    if !path.exists() {
        return Err(anyhow!("artifact not found: {}", record.relative_path()));
    }
    read_json(&path)
}

fn artifact_path(workspace: &RunWorkspace, record: &ArtifactRecord) -> PathBuf {
    workspace.artifacts_dir().join(record.relative_path())
}

/// Contents of `error.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failure_type: FailureType,
    pub details: Value,
    pub next_action: String,
}

impl FailureRecord {
    pub fn new(failure_type: FailureType, details: Value) -> Self {
        Self {
            failure_type,
            details,
            next_action: suggest_next_action(failure_type).to_string(),
        }
    }
}

/// Write `error.json` for a failed run.
pub fn write_failure_artifacts(workspace: &RunWorkspace, record: &FailureRecord) -> Result<()> {
    warn!(
        run_id = workspace.run_id(),
        failure_type = record.failure_type.as_str(),
        "recording run failure"
    );
    write_json(&workspace.error_path(), record)
        .with_context(|| format!("write failure record for run {}", workspace.run_id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace() -> (tempfile::TempDir, RunWorkspace) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = RunWorkspace::create(temp.path(), "run-1").expect("create");
        (temp, ws)
    }

    #[test]
    fn identical_payloads_share_an_id() {
        let (_temp, ws) = workspace();
        let a = write_artifact(&ws, "tool_output", "fold", &json!({"x": 1, "y": [1, 2]}))
            .expect("write");
        let b = write_artifact(&ws, "tool_output", "fold", &json!({"y": [1, 2], "x": 1}))
            .expect("write");
        assert_eq!(a, b);
        assert_eq!(
            load_artifact(&ws, &a).expect("load"),
            json!({"x": 1, "y": [1, 2]})
        );
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let (_temp, ws) = workspace();
        let record = ArtifactRecord {
            artifact_id: "0".repeat(64),
            kind: "tool_output".to_string(),
            name: "fold".to_string(),
        };
        let err = load_artifact(&ws, &record).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn rejects_path_like_kinds() {
        let (_temp, ws) = workspace();
        assert!(write_artifact(&ws, "../x", "n", &json!({})).is_err());
    }

    #[test]
    fn failure_record_includes_next_action() {
        let (_temp, ws) = workspace();
        let record = FailureRecord::new(FailureType::Oom, json!({"task_id": "t1"}));
        write_failure_artifacts(&ws, &record).expect("write");
        let loaded: Value = read_json(&ws.error_path()).expect("read");
        assert_eq!(loaded["failure_type"], "oom");
        assert_eq!(loaded["next_action"], "reduce_model_size_or_batch");
        assert_eq!(loaded["details"]["task_id"], "t1");
    }
}
