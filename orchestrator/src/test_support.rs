//! Test-only builders and scripted doubles.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tempfile::TempDir;

use crate::agents::{DesignAgents, HeuristicAgents, Plan, PlanRequest, Review, ReviewRequest};
use crate::core::candidates::{Candidate, SCORE_METRIC};
use crate::core::execution::ExecutionTask;
use crate::core::tooling::{
    InvocationInput, ToolError, ToolInvocationSpec, ToolMetric, ToolOutput, ToolResult,
};
use crate::io::candidate_store::CandidateStore;
use crate::io::config::{PipelineConfig, ToolConfig};
use crate::io::executor::Clock;
use crate::io::registry::Tool;

/// Invocation spec with a fixed `sequence` input.
pub fn invocation(invocation_id: &str, tool_name: &str, tool_version: &str) -> ToolInvocationSpec {
    ToolInvocationSpec {
        invocation_id: invocation_id.to_string(),
        tool_name: tool_name.to_string(),
        tool_version: tool_version.to_string(),
        inputs: vec![InvocationInput::new("sequence", "ACDE")],
        expected_outputs: Vec::new(),
        constraints: Vec::new(),
        origin_task_id: invocation_id.to_string(),
    }
}

/// Task dispatching to `scripted@1.0`.
pub fn task(id: &str, timeout_ms: u64) -> ExecutionTask {
    ExecutionTask {
        task_id: id.to_string(),
        tool_invocation: ToolInvocationSpec {
            origin_task_id: id.to_string(),
            ..invocation(&format!("{id}-inv"), "scripted", "1.0")
        },
        input_state_id: "state-0".to_string(),
        expected_output_schema: "structure_summary".to_string(),
        timeout_ms,
    }
}

pub fn scored_candidate(id: &str, sequence: &str, score: f64) -> Candidate {
    let mut candidate = Candidate::new(id, sequence);
    candidate.metrics.insert(SCORE_METRIC.to_string(), score);
    candidate
}

/// Successful result reporting `mean_plddt = score`.
pub fn scored_result(score: f64) -> ToolResult {
    ToolResult::success(
        "scripted-inv",
        "scripted",
        vec![ToolOutput::new("structure_summary", "{}")],
        vec![ToolMetric::new(SCORE_METRIC, score)],
    )
}

pub fn failed_result(error_type: &str) -> ToolResult {
    ToolResult::failure(
        "scripted-inv",
        "scripted",
        ToolError::new(error_type, "scripted failure"),
    )
}

/// Clock that only moves when told to.
///
/// Queued samples are returned first, one per call; afterwards the current
/// value is returned.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(samples: &[u64]) -> Self {
        Self {
            now: AtomicU64::new(0),
            samples: Mutex::new(samples.iter().copied().collect()),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        let next = self.samples.lock().expect("clock lock").pop_front();
        match next {
            Some(sample) => {
                self.now.store(sample, Ordering::SeqCst);
                sample
            }
            None => self.now.load(Ordering::SeqCst),
        }
    }
}

/// Tool returning queued results. Each result may advance a manual clock to
/// simulate a slow call.
pub struct ScriptedTool {
    name: String,
    version: String,
    queue: Mutex<VecDeque<(ToolResult, u64)>>,
    fallback: Mutex<Option<ToolResult>>,
    clock: Option<Arc<ManualClock>>,
    calls: AtomicUsize,
}

impl ScriptedTool {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            clock: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn push(&self, result: ToolResult) {
        self.push_delayed(result, 0);
    }

    /// Queue a result that takes `delay_ms` on the attached clock.
    pub fn push_delayed(&self, result: ToolResult, delay_ms: u64) {
        self.queue
            .lock()
            .expect("queue lock")
            .push_back((result, delay_ms));
    }

    /// Result returned once the queue is empty.
    pub fn repeat(&self, result: ToolResult) {
        *self.fallback.lock().expect("fallback lock") = Some(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn run(&self, invocation_id: &str, _inputs: &[InvocationInput]) -> ToolResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.queue.lock().expect("queue lock").pop_front();
        let (mut result, delay_ms) = match next {
            Some(entry) => entry,
            None => match self.fallback.lock().expect("fallback lock").clone() {
                Some(result) => (result, 0),
                None => (failed_result("tool_error"), 0),
            },
        };
        if let Some(clock) = &self.clock {
            clock.advance(delay_ms);
        }
        result.invocation_id = invocation_id.to_string();
        result.tool_name = self.name.clone();
        result
    }
}

/// Tool that always panics.
pub struct PanickingTool;

impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panics"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn run(&self, _invocation_id: &str, _inputs: &[InvocationInput]) -> ToolResult {
        panic!("scripted panic")
    }
}

/// Agents that replay queued plans/reviews and fall back to the heuristic agents.
#[derive(Default)]
pub struct ScriptedAgents {
    plans: Mutex<VecDeque<Plan>>,
    reviews: Mutex<VecDeque<Review>>,
    fallback: HeuristicAgents,
}

impl ScriptedAgents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_plan(&self, plan: Plan) {
        self.plans.lock().expect("plans lock").push_back(plan);
    }

    pub fn push_review(&self, review: Review) {
        self.reviews.lock().expect("reviews lock").push_back(review);
    }
}

impl DesignAgents for ScriptedAgents {
    fn plan(&self, request: &PlanRequest<'_>) -> Result<Plan> {
        match self.plans.lock().expect("plans lock").pop_front() {
            Some(plan) => Ok(plan),
            None => self.fallback.plan(request),
        }
    }

    fn review(&self, request: &ReviewRequest<'_>) -> Result<Review> {
        match self.reviews.lock().expect("reviews lock").pop_front() {
            Some(review) => Ok(review),
            None => self.fallback.review(request),
        }
    }
}

/// Temp directory with runs/store layout and a pipeline config pointing at it.
pub struct TestEnv {
    pub temp: TempDir,
    pub config: PipelineConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = PipelineConfig::default();
        config.paths.runs_dir = temp.path().join("runs");
        config.paths.store_dir = temp.path().join("store");
        Self { temp, config }
    }

    /// Route design rounds to `scripted@1.0` with the given budget.
    pub fn with_scripted_tool(mut self, timeout_ms: u64) -> Self {
        self.config.tool = ToolConfig {
            name: "scripted".to_string(),
            version: "1.0".to_string(),
            timeout_ms,
        };
        self
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.config.paths.runs_dir.clone()
    }

    pub fn store(&self) -> CandidateStore {
        CandidateStore::open(&self.config.paths.store_dir).expect("store")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Signal map helper for review doubles.
pub fn signals(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}
