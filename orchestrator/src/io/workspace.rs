//! Per-run workspace layout and JSON file helpers.
//!
//! ```text
//! <runs_dir>/<run_id>/
//!   config.json                  effective run configuration
//!   run_summary.json             written once at completion
//!   analysis.json                timeline, tool stats, iteration deltas
//!   error.json                   only on failure
//!   human_decision.json          gate artifact (pending until signed)
//!   candidate_selection.json     shortlist frozen for review
//!   resolution.json              outcome of a resumed gate
//!   telemetry.json
//!   execution_snapshots.json
//!   telemetry_snapshots.json
//!   candidate.json               accepted candidate
//!   artifact_hashes.json         manifest over artifacts/
//!   artifacts/                   content-addressed run artifacts
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::ids::validate_id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWorkspace {
    run_id: String,
    root: PathBuf,
}

impl RunWorkspace {
    /// Workspace for `run_id` under `runs_dir`. Does not touch the filesystem.
    pub fn for_run(runs_dir: &Path, run_id: &str) -> Result<Self> {
        validate_id(run_id).with_context(|| format!("invalid run id '{run_id}'"))?;
        Ok(Self {
            run_id: run_id.to_string(),
            root: runs_dir.join(run_id),
        })
    }

    /// Open an existing workspace.
    pub fn open(runs_dir: &Path, run_id: &str) -> Result<Self> {
        let workspace = Self::for_run(runs_dir, run_id)?;
        if !workspace.root.is_dir() {
            return Err(anyhow!(
                "run workspace not found: {}",
                workspace.root.display()
            ));
        }
        Ok(workspace)
    }

    /// Create the workspace directories. Fails if the run already exists.
    pub fn create(runs_dir: &Path, run_id: &str) -> Result<Self> {
        let workspace = Self::for_run(runs_dir, run_id)?;
        if workspace.root.exists() {
            return Err(anyhow!(
                "run workspace already exists: {}",
                workspace.root.display()
            ));
        }
        fs::create_dir_all(workspace.artifacts_dir()).with_context(|| {
            format!("create run workspace {}", workspace.root.display())
        })?;
        debug!(root = %workspace.root.display(), "created run workspace");
        Ok(workspace)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }

    pub fn analysis_path(&self) -> PathBuf {
        self.root.join("analysis.json")
    }

    pub fn error_path(&self) -> PathBuf {
        self.root.join("error.json")
    }

    pub fn human_decision_path(&self) -> PathBuf {
        self.root.join("human_decision.json")
    }

    pub fn selection_path(&self) -> PathBuf {
        self.root.join("candidate_selection.json")
    }

    pub fn resolution_path(&self) -> PathBuf {
        self.root.join("resolution.json")
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.root.join("telemetry.json")
    }

    pub fn execution_snapshots_path(&self) -> PathBuf {
        self.root.join("execution_snapshots.json")
    }

    pub fn telemetry_snapshots_path(&self) -> PathBuf {
        self.root.join("telemetry_snapshots.json")
    }

    pub fn candidate_path(&self) -> PathBuf {
        self.root.join("candidate.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("artifact_hashes.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }
}

/// New run id: `run-<UTC timestamp>-<6 lowercase alphanumerics>`.
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{timestamp}-{suffix}")
}

/// Serialize as pretty JSON with a trailing newline.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    Ok(buf)
}

/// Atomically write pretty JSON (temp file + rename).
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let buf = to_pretty_json(value)?;
    write_atomic(path, buf.as_bytes())
}

/// Like [`write_json`] but refuses to replace an existing file.
pub fn write_json_once<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if path.exists() {
        return Err(anyhow!("refusing to overwrite {}", path.display()));
    }
    write_json(path, value)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
