//! CLI command implementations. Each returns the process exit code.

use std::path::Path;

use anyhow::Result;
use tracing::debug;

use orchestrator::exit_codes;
use orchestrator::io::workspace::to_pretty_json;

use crate::compare::compare_runs;
use crate::reproduce::{reproduce_run, verify_run};

pub fn reproduce(runs_dir: &Path, run_id: &str) -> Result<i32> {
    let report = reproduce_run(runs_dir, run_id, None)?;
    print!("{}", to_pretty_json(&report)?);
    if report.artifact_hashes_match {
        Ok(exit_codes::OK)
    } else {
        for path in report.mismatched_paths.iter().chain(&report.tampered_paths) {
            eprintln!("mismatch: {path}");
        }
        Ok(exit_codes::REPRO_MISMATCH)
    }
}

pub fn verify(runs_dir: &Path, run_id: &str) -> Result<i32> {
    let report = verify_run(runs_dir, run_id)?;
    print!("{}", to_pretty_json(&report)?);
    Ok(if report.matches {
        exit_codes::OK
    } else {
        exit_codes::REPRO_MISMATCH
    })
}

pub fn compare(runs_dir: &Path, run_a: &str, run_b: &str) -> Result<i32> {
    let comparison = compare_runs(runs_dir, run_a, run_b)?;
    debug!(same_outcome = comparison.same_outcome(), "runs compared");
    for warning in &comparison.warnings {
        eprintln!("warning: {warning}");
    }
    print!("{}", to_pretty_json(&comparison)?);
    Ok(exit_codes::OK)
}
