//! Design agents: the planner that proposes work and the reviewers (critic
//! and QC) that judge its result.
//!
//! The [`DesignAgents`] trait is the seam between the decision loop and
//! whatever produces decisions. [`HeuristicAgents`] is the built-in,
//! deterministic implementation; tests script their own.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::core::coordinator::{CriticOutput, QcOutput, QcStatus};
use crate::core::decisions::Decision;
use crate::core::execution::{ExecutionGraph, ExecutionTask};
use crate::core::sequence::mutate;
use crate::core::tooling::{InvocationInput, ToolInvocationSpec, ToolResult};
use crate::io::config::{QcConfig, ToolConfig};
use crate::io::tools::{SEQUENCE_INPUT, STRUCTURE_SUMMARY_OUTPUT};

/// Homopolymer runs longer than this are rejected as low complexity.
const LOW_COMPLEXITY_RUN: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub iteration: u32,
    /// Number of replans so far; round 0 evaluates the input unchanged.
    pub round: u32,
    /// Sequence proposed in the previous round (the input for round 0).
    pub sequence: &'a str,
    pub tool: &'a ToolConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub sequence: String,
    pub decisions: Vec<Decision>,
    pub graph: ExecutionGraph,
}

#[derive(Debug, Clone)]
pub struct ReviewRequest<'a> {
    pub iteration: u32,
    pub sequence: &'a str,
    pub result: &'a ToolResult,
    pub qc: &'a QcConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub score: f64,
    pub uncertainty: f64,
    pub decisions: Vec<Decision>,
    pub critic: CriticOutput,
    pub qc: QcOutput,
    pub flags: Vec<String>,
    /// Numeric signals per agent, persisted as telemetry snapshots.
    pub signals: BTreeMap<String, BTreeMap<String, f64>>,
}

pub trait DesignAgents {
    fn plan(&self, request: &PlanRequest<'_>) -> Result<Plan>;
    fn review(&self, request: &ReviewRequest<'_>) -> Result<Review>;
}

/// Deterministic planner and reviewers driven by proxy metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAgents;

impl DesignAgents for HeuristicAgents {
    fn plan(&self, request: &PlanRequest<'_>) -> Result<Plan> {
        let sequence = mutate(request.sequence, request.round);
        let (rule, rationale) = if request.round == 0 {
            ("evaluate_input", "evaluate the input sequence as given".to_string())
        } else {
            (
                "helix_point_mutation",
                format!("round {} introduces a helix-favoring point mutation", request.round),
            )
        };

        let task_id = format!("predict-{}", request.iteration);
        let task = ExecutionTask {
            task_id: task_id.clone(),
            tool_invocation: ToolInvocationSpec {
                invocation_id: format!("{task_id}-{}", request.tool.name),
                tool_name: request.tool.name.clone(),
                tool_version: request.tool.version.clone(),
                inputs: vec![InvocationInput::new(SEQUENCE_INPUT, sequence.as_str())],
                expected_outputs: vec![STRUCTURE_SUMMARY_OUTPUT.to_string()],
                constraints: Vec::new(),
                origin_task_id: task_id.clone(),
            },
            input_state_id: format!("round-{}", request.round),
            expected_output_schema: STRUCTURE_SUMMARY_OUTPUT.to_string(),
            timeout_ms: request.tool.timeout_ms,
        };

        let decision = Decision {
            agent_name: "planner".to_string(),
            rationale,
            requested_tools: vec![format!("{}@{}", request.tool.name, request.tool.version)],
            next_tasks: vec![task_id],
            confidence: if request.round == 0 { 1.0 } else { 0.5 },
            input_refs: vec![format!("round-{}", request.round)],
            memory_refs: Vec::new(),
            rules_triggered: vec![rule.to_string()],
            confidence_impact: Vec::new(),
        };

        Ok(Plan {
            sequence,
            decisions: vec![decision],
            graph: ExecutionGraph::single(task),
        })
    }

    fn review(&self, request: &ReviewRequest<'_>) -> Result<Review> {
        let score = request.result.metric("mean_plddt").unwrap_or(0.0);
        let longest_run = request.result.metric("max_homopolymer_run").unwrap_or(0.0);
        let floor = request.qc.min_mean_plddt - request.qc.review_band;
        let uncertainty = (1.0 - score / 100.0).clamp(0.0, 1.0);
        let score_impact = format!("mean_plddt={score:.2}");

        let mut critic = CriticOutput::default();
        if score < floor {
            critic.blocking = true;
            critic
                .issues
                .push(format!("mean_plddt {score:.2} below review floor {floor:.2}"));
        }
        let critic_decision = Decision {
            agent_name: "critic".to_string(),
            rationale: if critic.blocking {
                "predicted confidence too low to refine further".to_string()
            } else {
                "predicted confidence within reach".to_string()
            },
            confidence: 1.0 - uncertainty,
            input_refs: vec![request.result.invocation_id.clone()],
            rules_triggered: vec![if critic.blocking {
                "plddt_below_floor".to_string()
            } else {
                "plddt_above_floor".to_string()
            }],
            confidence_impact: vec![score_impact.clone()],
            ..Decision::default()
        };

        let mut flags = Vec::new();
        let (status, rule, reasons) = if longest_run > LOW_COMPLEXITY_RUN {
            flags.push("qc_reject".to_string());
            (
                QcStatus::Reject,
                "low_complexity",
                vec![format!("homopolymer run of {longest_run} residues")],
            )
        } else if score >= request.qc.min_mean_plddt {
            (QcStatus::Acceptable, "plddt_meets_minimum", Vec::new())
        } else if score >= floor {
            (
                QcStatus::NeedsHuman,
                "plddt_in_review_band",
                vec![format!(
                    "mean_plddt {score:.2} below minimum {:.2}",
                    request.qc.min_mean_plddt
                )],
            )
        } else {
            flags.push("qc_reject".to_string());
            (
                QcStatus::Reject,
                "plddt_below_floor",
                vec![format!("mean_plddt {score:.2} below floor {floor:.2}")],
            )
        };
        let qc_decision = Decision {
            agent_name: "qc".to_string(),
            rationale: format!("quality control verdict: {}", status.as_str()),
            confidence: 1.0 - uncertainty,
            input_refs: vec![request.result.invocation_id.clone()],
            rules_triggered: vec![rule.to_string()],
            confidence_impact: vec![score_impact],
            ..Decision::default()
        };

        let signals = BTreeMap::from([
            (
                "critic".to_string(),
                BTreeMap::from([
                    ("blocking".to_string(), f64::from(u8::from(critic.blocking))),
                    ("mean_plddt".to_string(), score),
                ]),
            ),
            (
                "qc".to_string(),
                BTreeMap::from([
                    ("mean_plddt".to_string(), score),
                    ("uncertainty".to_string(), uncertainty),
                ]),
            ),
        ]);

        Ok(Review {
            score,
            uncertainty,
            decisions: vec![critic_decision, qc_decision],
            critic,
            qc: QcOutput { status, reasons },
            flags,
            signals,
        })
    }
}
