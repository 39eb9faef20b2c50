//! Bounded design loop for `orchestrator run`.
//!
//! Each iteration asks the agents for a plan, lets the coordinator decide,
//! dispatches the planned tasks through the executor, classifies failures,
//! and hands successful results to the reviewers. The loop ends when the
//! coordinator terminates, QC accepts a proposal, a failure is fatal, or
//! scores stagnate.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::agents::{DesignAgents, PlanRequest, Review, ReviewRequest};
use crate::core::candidates::{Candidate, filter_candidates};
use crate::core::coordinator::{CoordinatorInput, DecisionType, QcStatus, StopReason, decide};
use crate::core::failures::{FailureAction, FailureType, evaluate_failure};
use crate::core::ids::candidate_id_for;
use crate::core::sequence::validate_sequence;
use crate::core::stagnation::update_stagnation_count;
use crate::core::status::{ExecutionStatus, WorkflowState};
use crate::core::tooling::ToolResult;
use crate::io::artifacts::{FailureRecord, write_artifact, write_failure_artifacts};
use crate::io::candidate_store::{CandidateStore, StoreError};
use crate::io::config::{PipelineConfig, RunConfig, write_run_config};
use crate::io::executor::{ExecutionContext, LocalExecutor};
use crate::io::human_gate::require_human_decision;
use crate::io::snapshots::{ExecutionSnapshot, TelemetrySnapshot};
use crate::io::workspace::{generate_run_id, write_json};
use crate::lifecycle::{
    FailureSummary, RunCompletion, RunContext, RunSummary, VersionInfo, create_run_context,
};

/// Stop reason recorded when scores stop improving.
pub const STAGNATION: &str = "stagnation";

#[derive(Debug, Clone)]
pub struct DesignRequest {
    pub sequence: String,
    pub pipeline: PipelineConfig,
    /// Explicit run id; generated when absent.
    pub run_id: Option<String>,
    pub command: String,
}

impl DesignRequest {
    pub fn new(sequence: impl Into<String>, pipeline: PipelineConfig) -> Self {
        Self {
            sequence: sequence.into(),
            pipeline,
            run_id: None,
            command: "run".to_string(),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStop {
    Accepted {
        candidate_id: String,
        version_id: String,
    },
    NeedsReview {
        frozen_ids: Vec<String>,
    },
    Stopped {
        reason: String,
    },
    Failed {
        failure_type: FailureType,
    },
}

#[derive(Debug, Clone)]
pub struct DesignOutcome {
    pub summary: RunSummary,
    pub stop: LoopStop,
}

/// Drive one run from input validation to a persisted run summary.
#[instrument(skip_all, fields(run_id))]
pub fn run_design<A: DesignAgents>(
    request: &DesignRequest,
    agents: &A,
    executor: &LocalExecutor,
    store: &CandidateStore,
) -> Result<DesignOutcome> {
    let pipeline = &request.pipeline;
    pipeline.validate()?;
    let run_id = request.run_id.clone().unwrap_or_else(generate_run_id);
    tracing::Span::current().record("run_id", run_id.as_str());

    let mut ctx = create_run_context(&pipeline.paths.runs_dir, &run_id)?;
    write_run_config(
        &ctx.workspace,
        &RunConfig::new(request.sequence.clone(), pipeline.clone()),
    )?;
    let version = VersionInfo::current(&pipeline.tool.name, &pipeline.tool.version);
    info!(tool = %pipeline.tool.name, "run started");

    let check = validate_sequence(&request.sequence);
    ctx.warnings.extend(check.warnings.iter().cloned());
    if !check.valid {
        warn!(errors = ?check.errors, "input sequence rejected");
        let record = FailureRecord::new(
            FailureType::InputInvalid,
            json!({"errors": check.errors, "warnings": check.warnings}),
        );
        write_failure_artifacts(&ctx.workspace, &record)?;
        let summary = ctx.finalize(RunCompletion {
            candidate_id: None,
            command: request.command.clone(),
            execution_status: ExecutionStatus::Failure,
            workflow_state: WorkflowState::Failed,
            qc_status: None,
            failure: Some(FailureSummary {
                failure_type: FailureType::InputInvalid,
                message: check.errors.join(","),
            }),
            stop_reason: None,
            iterations: 0,
            version,
        })?;
        return Ok(DesignOutcome {
            summary,
            stop: LoopStop::Failed {
                failure_type: FailureType::InputInvalid,
            },
        });
    }

    let mut state = LoopProgress::new(check.sequence);
    let ended = drive_loop(request, agents, executor, &mut ctx, &mut state)?;
    finish(request, store, ctx, state, ended, version)
}

/// Mutable bookkeeping carried across iterations.
struct LoopProgress {
    iteration: u32,
    sequence: String,
    last_review: Option<Review>,
    reviewed: BTreeMap<String, Candidate>,
    best_score: Option<f64>,
    stagnant: u32,
}

impl LoopProgress {
    fn new(sequence: String) -> Self {
        Self {
            iteration: 0,
            sequence,
            last_review: None,
            reviewed: BTreeMap::new(),
            best_score: None,
            stagnant: 0,
        }
    }
}

/// How the iteration loop ended, before any persistence.
enum Ended {
    Accepted(Candidate),
    NeedsReview,
    Stopped(String),
    Failed(FailureRecord, String),
}

fn drive_loop<A: DesignAgents>(
    request: &DesignRequest,
    agents: &A,
    executor: &LocalExecutor,
    ctx: &mut RunContext,
    state: &mut LoopProgress,
) -> Result<Ended> {
    let pipeline = &request.pipeline;
    let fatal = pipeline.failures.fatal_set();
    let replan = pipeline.failures.replan_set();

    loop {
        let iteration = state.iteration;
        state.iteration += 1;

        let plan = agents
            .plan(&PlanRequest {
                iteration,
                round: ctx.loop_state.replans,
                sequence: &state.sequence,
                tool: &pipeline.tool,
            })
            .with_context(|| format!("plan iteration {iteration}"))?;
        let order = plan
            .graph
            .execution_order()
            .with_context(|| format!("plan iteration {iteration}"))?;

        let mut decisions = plan.decisions.clone();
        if let Some(review) = &state.last_review {
            decisions.extend(review.decisions.iter().cloned());
        }
        let verdict = decide(&CoordinatorInput {
            decisions: decisions.clone(),
            loop_limits: pipeline.limits,
            loop_state: ctx.loop_state,
            critic_output: state.last_review.as_ref().map(|r| r.critic.clone()),
            qc_output: state.last_review.as_ref().map(|r| r.qc.clone()),
        });
        debug!(iteration, decision = ?verdict.decision, stop_reason = ?verdict.stop_reason, "coordinator verdict");

        let mut snapshot = ExecutionSnapshot {
            iteration,
            state: ctx.loop_state,
            decisions,
            coordinator: Some(verdict),
            tool_results: Vec::new(),
            late_outputs: Vec::new(),
        };

        match (verdict.decision, verdict.stop_reason) {
            (DecisionType::Terminate, reason) => {
                ctx.execution_snapshots.push(snapshot);
                return Ok(match reason {
                    Some(StopReason::QcNeedsHuman) => Ended::NeedsReview,
                    Some(reason) => Ended::Stopped(reason.as_str().to_string()),
                    None => Ended::Stopped("terminated".to_string()),
                });
            }
            (DecisionType::Replan, _) => {
                info!(iteration, "replanning");
                ctx.loop_state.replans += 1;
                ctx.loop_state.executions = 0;
                state.last_review = None;
                ctx.execution_snapshots.push(snapshot);
                continue;
            }
            (DecisionType::Continue, _) => {}
        }

        if state.stagnant >= pipeline.stagnation.max_stagnant_iterations {
            info!(iteration, stagnant = state.stagnant, "scores stagnated");
            ctx.execution_snapshots.push(snapshot);
            return Ok(Ended::Stopped(STAGNATION.to_string()));
        }

        state.sequence = plan.sequence.clone();
        let candidate_id = candidate_id_for(&plan.sequence);
        ctx.analysis
            .record_candidate_event(&candidate_id, iteration, "proposed", None);

        let issued_at = executor.now_ms();
        let exec_context = ExecutionContext {
            run_id: ctx.workspace.run_id().to_string(),
            iteration,
            issued_at_ms: Some(issued_at),
        };
        let mut action = FailureAction::Continue;
        let mut scored: Option<ToolResult> = None;
        for task_id in &order {
            let Some(task) = plan.graph.tasks.get(task_id) else {
                continue;
            };
            let executed = executor.run(task, &exec_context);
            let result = &executed.result;
            ctx.analysis
                .record_tool_call(&result.tool_name, result.is_success(), executed.elapsed_ms);
            ctx.telemetry.increment("tool_calls", 1);
            if executed.dispatched {
                ctx.telemetry.add_cost("tool_units", 1.0);
                ctx.telemetry
                    .add_cost("cpu_seconds", executed.elapsed_ms as f64 / 1000.0);
            }
            ctx.telemetry
                .observe("tool_latency_ms", executed.elapsed_ms as f64);
            snapshot.tool_results.push(result.clone());
            snapshot
                .late_outputs
                .extend(executed.late_outputs.iter().cloned());

            action = evaluate_failure(result, &fatal, &replan);
            match action {
                FailureAction::Terminate => {
                    let failure_type = result
                        .error
                        .as_ref()
                        .map(FailureType::from_error)
                        .unwrap_or(FailureType::Unknown);
                    let message = result
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_default();
                    let record = FailureRecord::new(
                        failure_type,
                        json!({
                            "iteration": iteration,
                            "task_id": task_id,
                            "tool": result.tool_name,
                            "error": result.error,
                        }),
                    );
                    ctx.execution_snapshots.push(snapshot);
                    return Ok(Ended::Failed(record, message));
                }
                FailureAction::Replan => break,
                FailureAction::Continue if result.is_success() => {
                    let payload = serde_json::to_value(result).context("serialize tool result")?;
                    write_artifact(&ctx.workspace, "tool_output", task_id, &payload)?;
                    scored = Some(result.clone());
                }
                FailureAction::Continue => {
                    let error_type = result.error_type().unwrap_or("unknown");
                    warn!(task = %task_id, error_type, "tool failure tolerated");
                    ctx.warnings
                        .push(format!("tool_failure:{task_id}:{error_type}"));
                }
            }
        }

        if action == FailureAction::Replan {
            info!(iteration, "tool failure triggers replan");
            ctx.loop_state.replans += 1;
            ctx.loop_state.executions = 0;
            state.last_review = None;
            ctx.execution_snapshots.push(snapshot);
            continue;
        }

        ctx.loop_state.executions += 1;
        let Some(result) = scored else {
            state.last_review = None;
            ctx.execution_snapshots.push(snapshot);
            continue;
        };

        let review = agents
            .review(&ReviewRequest {
                iteration,
                sequence: &plan.sequence,
                result: &result,
                qc: &pipeline.qc,
            })
            .with_context(|| format!("review iteration {iteration}"))?;
        ctx.loop_state.uncertainty = review.uncertainty;
        let scored_proposal = ScoredProposal {
            iteration,
            candidate_id: &candidate_id,
            sequence: &plan.sequence,
            result: &result,
            review: &review,
        };
        record_review(ctx, state, &scored_proposal, pipeline.stagnation.threshold);
        ctx.execution_snapshots.push(snapshot);

        let accepted = review.qc.status == QcStatus::Acceptable && !review.critic.blocking;
        state.last_review = Some(review);
        if accepted {
            let candidate = state
                .reviewed
                .get(&candidate_id)
                .cloned()
                .with_context(|| format!("accepted candidate {candidate_id} was not recorded"))?;
            return Ok(Ended::Accepted(candidate));
        }
    }
}

struct ScoredProposal<'a> {
    iteration: u32,
    candidate_id: &'a str,
    sequence: &'a str,
    result: &'a ToolResult,
    review: &'a Review,
}

fn record_review(
    ctx: &mut RunContext,
    state: &mut LoopProgress,
    proposal: &ScoredProposal<'_>,
    stagnation_threshold: f64,
) {
    let ScoredProposal {
        iteration,
        candidate_id,
        sequence,
        result,
        review,
    } = *proposal;
    let mut candidate = Candidate::new(candidate_id, sequence);
    candidate.metrics = result
        .metrics
        .iter()
        .map(|m| (m.name.clone(), m.value))
        .collect();
    candidate.flags = review.flags.clone();
    state.reviewed.insert(candidate_id.to_string(), candidate);

    ctx.analysis.record_candidate_event(
        candidate_id,
        iteration,
        review.qc.status.as_str(),
        Some(review.score),
    );
    if let Some(best) = state.best_score {
        let delta = review.score - best;
        ctx.analysis.record_delta(iteration, delta, None);
        state.stagnant = update_stagnation_count(state.stagnant, delta, stagnation_threshold);
    }
    state.best_score = Some(state.best_score.map_or(review.score, |b| b.max(review.score)));

    ctx.telemetry.gauge("mean_plddt", review.score);
    ctx.telemetry.gauge("uncertainty", review.uncertainty);
    for (agent, signals) in &review.signals {
        ctx.telemetry_snapshots.push(TelemetrySnapshot {
            iteration,
            agent: agent.clone(),
            signals: signals.clone(),
        });
    }
}

fn finish(
    request: &DesignRequest,
    store: &CandidateStore,
    mut ctx: RunContext,
    state: LoopProgress,
    ended: Ended,
    version: VersionInfo,
) -> Result<DesignOutcome> {
    let pipeline = &request.pipeline;
    let last_qc = state.last_review.as_ref().map(|r| r.qc.status);
    let iterations = state.iteration;
    let mut completion = RunCompletion {
        candidate_id: None,
        command: request.command.clone(),
        execution_status: ExecutionStatus::Success,
        workflow_state: WorkflowState::Completed,
        qc_status: last_qc,
        failure: None,
        stop_reason: None,
        iterations,
        version,
    };

    let stop = match ended {
        Ended::Accepted(candidate) => {
            let stored = store_accepted(store, &candidate, ctx.workspace.run_id(), iterations);
            let version_id = match stored {
                Ok(version_id) => version_id,
                Err(err) => {
                    warn!(candidate = %candidate.candidate_id, error = %err, "accepted candidate could not be stored");
                    let record = FailureRecord::new(
                        FailureType::Unknown,
                        json!({
                            "iteration": iterations.saturating_sub(1),
                            "stage": "candidate_store",
                            "candidate_id": candidate.candidate_id,
                            "error": err.to_string(),
                        }),
                    );
                    let message = format!("store candidate {}: {err}", candidate.candidate_id);
                    let stop = record_failure(
                        &mut ctx,
                        &mut completion,
                        candidate.candidate_id.clone(),
                        record,
                        message,
                    )?;
                    let summary = ctx.finalize(completion)?;
                    return Ok(DesignOutcome { summary, stop });
                }
            };
            write_artifact(
                &ctx.workspace,
                "candidate",
                &candidate.candidate_id,
                &serde_json::to_value(&candidate).context("serialize candidate")?,
            )?;
            write_json(
                &ctx.workspace.candidate_path(),
                &json!({"candidate": candidate, "version_id": version_id}),
            )?;
            ctx.analysis.record_candidate_event(
                &candidate.candidate_id,
                iterations.saturating_sub(1),
                "accepted",
                Some(candidate.score()),
            );
            info!(candidate = %candidate.candidate_id, version = %version_id, "candidate accepted");
            completion.candidate_id = Some(candidate.candidate_id.clone());
            completion.qc_status = Some(QcStatus::Acceptable);
            LoopStop::Accepted {
                candidate_id: candidate.candidate_id,
                version_id,
            }
        }
        Ended::NeedsReview => {
            let floor = pipeline.qc.min_mean_plddt - pipeline.qc.review_band;
            let reviewed: Vec<Candidate> = state.reviewed.values().cloned().collect();
            let eligible = filter_candidates(&reviewed, floor);
            let frozen_ids = require_human_decision(&eligible, &ctx.workspace, pipeline.review.top_n)?;
            completion.candidate_id = frozen_ids.first().cloned();
            completion.workflow_state = WorkflowState::AwaitingHumanReview;
            completion.stop_reason = Some(StopReason::QcNeedsHuman.as_str().to_string());
            LoopStop::NeedsReview { frozen_ids }
        }
        Ended::Stopped(reason) => {
            info!(reason = %reason, "run stopped");
            completion.candidate_id = Some(candidate_id_for(&state.sequence));
            completion.stop_reason = Some(reason.clone());
            LoopStop::Stopped { reason }
        }
        Ended::Failed(record, message) => record_failure(
            &mut ctx,
            &mut completion,
            candidate_id_for(&state.sequence),
            record,
            message,
        )?,
    };

    let summary = ctx.finalize(completion)?;
    Ok(DesignOutcome { summary, stop })
}

/// Persist an accepted candidate and its provenance. Returns the stored version id.
fn store_accepted(
    store: &CandidateStore,
    candidate: &Candidate,
    run_id: &str,
    iterations: u32,
) -> Result<String, StoreError> {
    let record = store.upsert(candidate)?;
    let version_id = record.latest_version().unwrap_or_default().to_string();
    store.create_artifact(
        &candidate.candidate_id,
        &version_id,
        "provenance",
        "design_run",
        &json!({"run_id": run_id, "iterations": iterations}),
    )?;
    Ok(version_id)
}

fn record_failure(
    ctx: &mut RunContext,
    completion: &mut RunCompletion,
    candidate_id: String,
    record: FailureRecord,
    message: String,
) -> Result<LoopStop> {
    write_failure_artifacts(&ctx.workspace, &record)?;
    ctx.warnings
        .push(format!("failure:{}", record.failure_type.as_str()));
    completion.candidate_id = Some(candidate_id);
    completion.execution_status = ExecutionStatus::Failure;
    completion.workflow_state = WorkflowState::Failed;
    completion.failure = Some(FailureSummary {
        failure_type: record.failure_type,
        message,
    });
    Ok(LoopStop::Failed {
        failure_type: record.failure_type,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agents::Plan;
    use crate::core::coordinator::{CriticOutput, QcOutput};
    use crate::core::decisions::Decision;
    use crate::io::boundary::ToolBoundary;
    use crate::io::registry::ToolRegistry;
    use crate::test_support::{ManualClock, ScriptedAgents, ScriptedTool, TestEnv, scored_result, signals};

    fn scripted_executor(tool: Arc<ScriptedTool>) -> LocalExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(tool).expect("register");
        LocalExecutor::new(
            Some(ToolBoundary::new(Arc::new(registry))),
            Arc::new(ManualClock::new()),
        )
    }

    fn request(env: &TestEnv, run_id: &str) -> DesignRequest {
        let mut request = DesignRequest::new("ACDEFGHIKL", env.config.clone());
        request.run_id = Some(run_id.to_string());
        request
    }

    fn heuristic_plan(env: &TestEnv) -> Plan {
        crate::agents::HeuristicAgents
            .plan(&PlanRequest {
                iteration: 0,
                round: 0,
                sequence: "ACDEFGHIKL",
                tool: &env.config.tool,
            })
            .expect("plan")
    }

    #[test]
    fn opaque_plan_terminates_before_dispatch() {
        let env = TestEnv::new().with_scripted_tool(0);
        let tool = Arc::new(ScriptedTool::new("scripted", "1.0"));
        let agents = ScriptedAgents::new();
        let mut plan = heuristic_plan(&env);
        plan.decisions = vec![Decision {
            agent_name: "planner".to_string(),
            rationale: "trust me".to_string(),
            memory_refs: vec!["m1".to_string()],
            ..Decision::default()
        }];
        agents.push_plan(plan);

        let outcome = run_design(
            &request(&env, "run-opaque"),
            &agents,
            &scripted_executor(tool.clone()),
            &env.store(),
        )
        .expect("run");
        assert_eq!(
            outcome.stop,
            LoopStop::Stopped {
                reason: "opaque_decision".to_string()
            }
        );
        assert_eq!(tool.calls(), 0);
        assert_eq!(outcome.summary.iterations, 1);
    }

    #[test]
    fn uncertain_review_hits_the_uncertainty_limit() {
        let env = TestEnv::new().with_scripted_tool(0);
        let tool = Arc::new(ScriptedTool::new("scripted", "1.0"));
        tool.repeat(scored_result(65.0));
        let agents = ScriptedAgents::new();
        agents.push_review(Review {
            score: 65.0,
            uncertainty: 0.95,
            decisions: vec![Decision {
                agent_name: "qc".to_string(),
                rationale: "ensemble disagrees".to_string(),
                rules_triggered: vec!["ensemble_spread".to_string()],
                ..Decision::default()
            }],
            critic: CriticOutput::default(),
            qc: QcOutput::new(QcStatus::NeedsHuman),
            flags: Vec::new(),
            signals: BTreeMap::from([("qc".to_string(), signals(&[("uncertainty", 0.95)]))]),
        });

        let outcome = run_design(
            &request(&env, "run-uncertain"),
            &agents,
            &scripted_executor(tool),
            &env.store(),
        )
        .expect("run");
        assert_eq!(
            outcome.stop,
            LoopStop::Stopped {
                reason: "max_uncertainty_exceeded".to_string()
            }
        );
        assert!((outcome.summary.loop_state.uncertainty - 0.95).abs() < 1e-9);
        assert_eq!(outcome.summary.outcome, crate::core::status::Outcome::Rejected);
    }
}
