//! Side-by-side comparison of two runs.
//!
//! Summaries are required. Analysis sections are optional: a missing or
//! malformed section is reported as a warning and compared as empty.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use orchestrator::io::analysis::{IterationDelta, TimelineEvent};
use orchestrator::io::workspace::{RunWorkspace, read_json};

/// One value per compared run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pair<T> {
    pub run_a: T,
    pub run_b: T,
}

pub type Trajectory = BTreeMap<String, Vec<TimelineEvent>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunComparison {
    pub run_ids: Pair<String>,
    pub outcomes: Pair<Option<String>>,
    pub candidate_trajectories: Pair<Trajectory>,
    pub improvement_deltas: Pair<Vec<IterationDelta>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunComparison {
    pub fn same_outcome(&self) -> bool {
        self.outcomes.run_a == self.outcomes.run_b
    }
}

struct LoadedRun {
    outcome: Option<String>,
    trajectory: Trajectory,
    deltas: Vec<IterationDelta>,
}

pub fn compare_runs(runs_dir: &Path, run_a: &str, run_b: &str) -> Result<RunComparison> {
    let mut warnings = Vec::new();
    let a = load_run(runs_dir, run_a, &mut warnings)?;
    let b = load_run(runs_dir, run_b, &mut warnings)?;
    Ok(RunComparison {
        run_ids: Pair {
            run_a: run_a.to_string(),
            run_b: run_b.to_string(),
        },
        outcomes: Pair {
            run_a: a.outcome,
            run_b: b.outcome,
        },
        candidate_trajectories: Pair {
            run_a: a.trajectory,
            run_b: b.trajectory,
        },
        improvement_deltas: Pair {
            run_a: a.deltas,
            run_b: b.deltas,
        },
        warnings,
    })
}

fn load_run(runs_dir: &Path, run_id: &str, warnings: &mut Vec<String>) -> Result<LoadedRun> {
    let workspace = RunWorkspace::open(runs_dir, run_id)?;
    let summary: Value = read_json(&workspace.summary_path())
        .with_context(|| format!("load run summary for {run_id}"))?;
    let outcome = summary
        .get("outcome")
        .and_then(Value::as_str)
        .map(str::to_string);

    let analysis_path = workspace.analysis_path();
    let analysis: Value = if analysis_path.exists() {
        match read_json(&analysis_path) {
            Ok(value) => value,
            Err(err) => {
                warnings.push(format!("{run_id}: analysis.json unreadable ({err:#})"));
                Value::Null
            }
        }
    } else {
        warnings.push(format!("{run_id}: analysis.json missing"));
        Value::Null
    };

    Ok(LoadedRun {
        outcome,
        trajectory: section(&analysis, "candidate_timeline", run_id, warnings),
        deltas: section(&analysis, "iteration_deltas", run_id, warnings),
    })
}

fn section<T: DeserializeOwned + Default>(
    analysis: &Value,
    name: &str,
    run_id: &str,
    warnings: &mut Vec<String>,
) -> T {
    let Some(raw) = analysis.get(name) else {
        debug!(run_id, section = name, "analysis section absent");
        return T::default();
    };
    match serde_json::from_value(raw.clone()) {
        Ok(value) => value,
        Err(err) => {
            warnings.push(format!("{run_id}: {name} malformed ({err})"));
            T::default()
        }
    }
}
