//! Pipeline configuration (`orchestrator.toml`) and the per-run `config.json`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::execution::LoopLimits;
use crate::core::tooling;
use crate::io::tools::{HEURISTIC_TOOL_NAME, HEURISTIC_TOOL_VERSION};
use crate::io::workspace::{RunWorkspace, write_atomic, write_json};

const RUN_CONFIG_SCHEMA: &str = include_str!("../../schemas/run_config.schema.json");

/// Current `config.json` layout version.
pub const RUN_CONFIG_VERSION: u32 = 1;

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "orchestrator.toml";

/// Pipeline configuration (TOML).
///
/// Edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub limits: LoopLimits,
    pub failures: FailurePolicy,
    pub tool: ToolConfig,
    pub qc: QcConfig,
    pub review: ReviewConfig,
    pub stagnation: StagnationConfig,
    pub paths: PathsConfig,
}

/// Error types that abort the run, and those that trigger a replan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FailurePolicy {
    pub fatal_errors: Vec<String>,
    pub replan_errors: Vec<String>,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            fatal_errors: vec![
                tooling::MISSING_TOOL.to_string(),
                tooling::NO_BOUNDARY.to_string(),
                tooling::OOM.to_string(),
                tooling::INVALID_OUTPUT.to_string(),
            ],
            replan_errors: vec![tooling::TIMEOUT.to_string(), tooling::TOOL_ERROR.to_string()],
        }
    }
}

impl FailurePolicy {
    pub fn fatal_set(&self) -> BTreeSet<String> {
        self.fatal_errors.iter().cloned().collect()
    }

    pub fn replan_set(&self) -> BTreeSet<String> {
        self.replan_errors.iter().cloned().collect()
    }
}

/// Structure prediction tool used for every design round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub name: String,
    pub version: String,
    /// Per-task budget in milliseconds. `0` disables the timeout.
    pub timeout_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: HEURISTIC_TOOL_NAME.to_string(),
            version: HEURISTIC_TOOL_VERSION.to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QcConfig {
    /// Minimum `mean_plddt` for a candidate to pass QC.
    pub min_mean_plddt: f64,
    /// Scores within this distance below the minimum go to human review.
    pub review_band: f64,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            min_mean_plddt: 70.0,
            review_band: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    pub top_n: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { top_n: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagnationConfig {
    /// Score improvements below this count as stagnant.
    pub threshold: f64,
    pub max_stagnant_iterations: u32,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            max_stagnant_iterations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub runs_dir: PathBuf,
    pub store_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from("runs"),
            store_dir: PathBuf::from("store"),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        let fatal = self.failures.fatal_set();
        let overlap: Vec<&String> = self
            .failures
            .replan_errors
            .iter()
            .filter(|e| fatal.contains(*e))
            .collect();
        if !overlap.is_empty() {
            return Err(anyhow!(
                "failures: error types both fatal and replan: {overlap:?}"
            ));
        }
        if self.tool.name.trim().is_empty() || self.tool.version.trim().is_empty() {
            return Err(anyhow!("tool.name and tool.version must be non-empty"));
        }
        if !(0.0..=100.0).contains(&self.qc.min_mean_plddt) {
            return Err(anyhow!("qc.min_mean_plddt must be in [0, 100]"));
        }
        if !self.qc.review_band.is_finite() || self.qc.review_band < 0.0 {
            return Err(anyhow!("qc.review_band must be >= 0"));
        }
        if self.review.top_n == 0 {
            return Err(anyhow!("review.top_n must be > 0"));
        }
        if !self.stagnation.threshold.is_finite() {
            return Err(anyhow!("stagnation.threshold must be finite"));
        }
        if self.stagnation.max_stagnant_iterations == 0 {
            return Err(anyhow!("stagnation.max_stagnant_iterations must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing; using defaults");
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Effective configuration of one run, persisted as `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub schema_version: u32,
    pub sequence: String,
    pub pipeline: PipelineConfig,
}

impl RunConfig {
    pub fn new(sequence: impl Into<String>, pipeline: PipelineConfig) -> Self {
        Self {
            schema_version: RUN_CONFIG_VERSION,
            sequence: sequence.into(),
            pipeline,
        }
    }
}

pub fn write_run_config(workspace: &RunWorkspace, config: &RunConfig) -> Result<()> {
    write_json(&workspace.config_path(), config)
}

/// Load `config.json`, checking it against the run config schema first.
pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    validate_run_config_value(&value)
        .with_context(|| format!("validate {}", path.display()))?;
    let config: RunConfig = serde_json::from_value(value)
        .with_context(|| format!("deserialize {}", path.display()))?;
    config.pipeline.validate()?;
    Ok(config)
}

fn validate_run_config_value(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(RUN_CONFIG_SCHEMA).context("parse run config schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("run config schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestrator.toml");
        let mut cfg = PipelineConfig::default();
        cfg.review.top_n = 5;
        cfg.qc.min_mean_plddt = 65.0;
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestrator.toml");
        fs::write(&path, "[limits]\nmax_replans = 1\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.limits.max_replans, 1);
        assert_eq!(cfg.limits.max_executions_per_plan, 4);
        assert_eq!(cfg.tool, ToolConfig::default());
    }

    #[test]
    fn rejects_overlapping_failure_sets() {
        let mut cfg = PipelineConfig::default();
        cfg.failures.replan_errors.push(tooling::OOM.to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("both fatal and replan"));
    }

    #[test]
    fn rejects_invalid_limits() {
        let mut cfg = PipelineConfig::default();
        cfg.limits.max_uncertainty = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn run_config_round_trips_through_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = RunWorkspace::create(temp.path(), "run-1").expect("create");
        let config = RunConfig::new("ACDEFGHIK", PipelineConfig::default());
        write_run_config(&ws, &config).expect("write");
        assert_eq!(load_run_config(&ws.config_path()).expect("load"), config);
    }

    #[test]
    fn schema_rejects_malformed_run_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        fs::write(
            &path,
            json!({"schema_version": 1, "sequence": "", "pipeline": {}}).to_string(),
        )
        .expect("write");
        let err = load_run_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }
}
