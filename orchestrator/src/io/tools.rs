//! Built-in structure prediction proxy.
//!
//! `heuristic_proxy` derives confidence-like metrics from residue composition
//! alone. It is deterministic and in-process, so runs and their reproduction
//! need no external provider.

use serde_json::json;

use crate::core::sequence::{CANONICAL_RESIDUES, validate_sequence};
use crate::core::tooling::{InvocationInput, ToolError, ToolMetric, ToolOutput, ToolResult};
use crate::io::registry::Tool;

pub const HEURISTIC_TOOL_NAME: &str = "heuristic_proxy";
pub const HEURISTIC_TOOL_VERSION: &str = "1.0";

/// Input carrying the amino-acid sequence.
pub const SEQUENCE_INPUT: &str = "sequence";
/// Output holding the JSON structure summary.
pub const STRUCTURE_SUMMARY_OUTPUT: &str = "structure_summary";

const HYDROPHOBIC: &str = "AVILMFWC";
const HELIX_FORMING: &str = "AELMQKRH";
const IDEAL_HYDROPHOBIC_FRACTION: f64 = 0.35;
const LOW_COMPLEXITY_RUN: usize = 6;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicStructureTool;

/// Composition metrics for a canonical sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProxyMetrics {
    pub length: usize,
    pub hydrophobic_fraction: f64,
    pub helix_fraction: f64,
    pub max_homopolymer_run: usize,
    pub mean_plddt: f64,
}

pub fn proxy_metrics(sequence: &str) -> ProxyMetrics {
    let length = sequence.len();
    let fraction = |set: &str| {
        if length == 0 {
            return 0.0;
        }
        let hits = sequence.chars().filter(|c| set.contains(*c)).count();
        hits as f64 / length as f64
    };
    let hydrophobic_fraction = fraction(HYDROPHOBIC);
    let helix_fraction = fraction(HELIX_FORMING);
    let max_homopolymer_run = longest_run(sequence);

    let packing = 1.0
        - ((hydrophobic_fraction - IDEAL_HYDROPHOBIC_FRACTION).abs() / IDEAL_HYDROPHOBIC_FRACTION)
            .min(1.0);
    let mut plddt = 40.0 + 40.0 * helix_fraction + 20.0 * packing;
    if max_homopolymer_run > LOW_COMPLEXITY_RUN {
        plddt -= 15.0;
    }
    ProxyMetrics {
        length,
        hydrophobic_fraction: round2(hydrophobic_fraction),
        helix_fraction: round2(helix_fraction),
        max_homopolymer_run,
        mean_plddt: round2(plddt.clamp(0.0, 100.0)),
    }
}

fn longest_run(sequence: &str) -> usize {
    let mut best = 0;
    let mut current = 0;
    let mut previous = None;
    for c in sequence.chars() {
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        best = best.max(current);
    }
    best
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Tool for HeuristicStructureTool {
    fn name(&self) -> &str {
        HEURISTIC_TOOL_NAME
    }

    fn version(&self) -> &str {
        HEURISTIC_TOOL_VERSION
    }

    fn run(&self, invocation_id: &str, inputs: &[InvocationInput]) -> ToolResult {
        let Some(raw) = inputs
            .iter()
            .find(|input| input.name == SEQUENCE_INPUT)
            .map(|input| input.value.as_str())
        else {
            return ToolResult::failure(
                invocation_id,
                HEURISTIC_TOOL_NAME,
                ToolError::new("invalid_input", "missing 'sequence' input"),
            );
        };
        let check = validate_sequence(raw);
        if !check.valid {
            return ToolResult::failure(
                invocation_id,
                HEURISTIC_TOOL_NAME,
                ToolError::new(
                    "invalid_input",
                    format!(
                        "sequence must use {CANONICAL_RESIDUES}: {}",
                        check.errors.join(",")
                    ),
                ),
            );
        }

        let metrics = proxy_metrics(&check.sequence);
        let summary = json!({
            "length": metrics.length,
            "helix_fraction": metrics.helix_fraction,
            "hydrophobic_fraction": metrics.hydrophobic_fraction,
            "max_homopolymer_run": metrics.max_homopolymer_run,
        });
        ToolResult::success(
            invocation_id,
            HEURISTIC_TOOL_NAME,
            vec![ToolOutput::new(STRUCTURE_SUMMARY_OUTPUT, summary.to_string())],
            vec![
                ToolMetric::new("mean_plddt", metrics.mean_plddt),
                ToolMetric::new("helix_fraction", metrics.helix_fraction),
                ToolMetric::new("hydrophobic_fraction", metrics.hydrophobic_fraction),
                ToolMetric::new("max_homopolymer_run", metrics.max_homopolymer_run as f64),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(sequence: &str) -> ToolResult {
        HeuristicStructureTool.run("inv-1", &[InvocationInput::new(SEQUENCE_INPUT, sequence)])
    }

    #[test]
    fn metrics_are_deterministic() {
        assert_eq!(run("AELMKKLLEEAG"), run("AELMKKLLEEAG"));
    }

    #[test]
    fn helix_rich_sequences_score_higher() {
        let helix = proxy_metrics("AELKKLAELLKKAEEL");
        let coil = proxy_metrics("GSPGSPGSNGTPDGSG");
        assert!(helix.mean_plddt > coil.mean_plddt);
        assert!((0.0..=100.0).contains(&helix.mean_plddt));
    }

    #[test]
    fn long_homopolymer_runs_are_penalized() {
        let metrics = proxy_metrics("AAAAAAAAAA");
        assert_eq!(metrics.max_homopolymer_run, 10);
        assert!(metrics.mean_plddt < 70.0);
    }

    #[test]
    fn missing_or_invalid_input_fails() {
        let missing = HeuristicStructureTool.run("inv-1", &[]);
        assert_eq!(missing.error_type(), Some("invalid_input"));
        assert_eq!(run("ACDZ").error_type(), Some("invalid_input"));
    }

    #[test]
    fn success_carries_summary_and_metrics() {
        let result = run("AELKKLAELLKKAEEL");
        assert!(result.is_success());
        assert!(result.metric("mean_plddt").is_some());
        let summary: serde_json::Value =
            serde_json::from_str(result.output(STRUCTURE_SUMMARY_OUTPUT).expect("summary"))
                .expect("json");
        assert_eq!(summary["length"], 16);
    }
}
