//! Execution tasks, task graphs, and per-run loop bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::tooling::ToolInvocationSpec;

/// A unit of planned work, consumed exactly once by the local executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub task_id: String,
    pub tool_invocation: ToolInvocationSpec,
    pub input_state_id: String,
    pub expected_output_schema: String,
    /// Timeout budget in milliseconds. `0` disables the timeout.
    #[serde(default)]
    pub timeout_ms: u64,
}

/// Planned tasks plus their dependency relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub tasks: BTreeMap<String, ExecutionTask>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub entry_tasks: Vec<String>,
}

impl ExecutionGraph {
    /// Graph holding a single entry task with no dependencies.
    pub fn single(task: ExecutionTask) -> Self {
        let id = task.task_id.clone();
        let mut tasks = BTreeMap::new();
        tasks.insert(id.clone(), task);
        Self {
            tasks,
            dependencies: BTreeMap::new(),
            entry_tasks: vec![id],
        }
    }

    /// Fail with every violated invariant joined into one message.
    pub fn validate(&self) -> Result<()> {
        let errors = graph_errors(self);
        if errors.is_empty() {
            return Ok(());
        }
        Err(anyhow!("invalid execution graph: {}", errors.join("; ")))
    }

    /// Deterministic topological order (ties broken by task id).
    pub fn execution_order(&self) -> Result<Vec<String>> {
        self.validate()?;
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .tasks
            .keys()
            .map(|id| {
                let deps = self
                    .dependencies
                    .get(id)
                    .map(|deps| deps.iter().map(String::as_str).collect())
                    .unwrap_or_default();
                (id.as_str(), deps)
            })
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        loop {
            let ready = remaining
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id);
            let Some(next) = ready else {
                break;
            };
            remaining.remove(next);
            for deps in remaining.values_mut() {
                deps.remove(next);
            }
            order.push(next.to_string());
        }
        Ok(order)
    }
}

/// Check graph invariants:
/// - At least one task
/// - Entry tasks and dependencies reference known tasks
/// - Dependency relation is acyclic
pub fn graph_errors(graph: &ExecutionGraph) -> Vec<String> {
    let mut errors = Vec::new();
    if graph.tasks.is_empty() {
        errors.push("execution graph must contain at least one task".to_string());
        return errors;
    }

    for entry in &graph.entry_tasks {
        if !graph.tasks.contains_key(entry) {
            errors.push(format!("Unknown execution entry task '{entry}'"));
        }
    }
    for (task_id, deps) in &graph.dependencies {
        if !graph.tasks.contains_key(task_id) {
            errors.push(format!("Unknown execution task '{task_id}' in dependencies"));
        }
        for dep in deps {
            if !graph.tasks.contains_key(dep) {
                errors.push(format!(
                    "Unknown execution dependency '{dep}' for task '{task_id}'"
                ));
            }
        }
    }
    if !errors.is_empty() {
        return errors;
    }

    if let Some(task_id) = find_cycle(graph) {
        errors.push(format!("execution graph has a cycle through '{task_id}'"));
    }
    errors
}

fn find_cycle(graph: &ExecutionGraph) -> Option<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        graph: &'a ExecutionGraph,
        marks: &mut BTreeMap<&'a str, Mark>,
    ) -> Option<String> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => return Some(id.to_string()),
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        if let Some(deps) = graph.dependencies.get(id) {
            for dep in deps {
                if let Some(found) = visit(dep, graph, marks) {
                    return Some(found);
                }
            }
        }
        marks.insert(id, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    graph
        .tasks
        .keys()
        .find_map(|id| visit(id.as_str(), graph, &mut marks))
}

/// Counters mutated once per iteration by the run lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopState {
    pub replans: u32,
    pub executions: u32,
    pub uncertainty: f64,
}

/// Configured loop ceilings. Immutable for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopLimits {
    pub max_replans: u32,
    pub max_executions_per_plan: u32,
    pub max_uncertainty: f64,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_replans: 3,
            max_executions_per_plan: 4,
            max_uncertainty: 0.9,
        }
    }
}

impl LoopLimits {
    pub fn validate(&self) -> Result<()> {
        let errors = limits_errors(self);
        if errors.is_empty() {
            return Ok(());
        }
        Err(anyhow!("invalid loop limits: {}", errors.join("; ")))
    }
}

pub fn limits_errors(limits: &LoopLimits) -> Vec<String> {
    let mut errors = Vec::new();
    if limits.max_executions_per_plan == 0 {
        errors.push("max_executions_per_plan must be > 0".to_string());
    }
    if !limits.max_uncertainty.is_finite()
        || limits.max_uncertainty <= 0.0
        || limits.max_uncertainty > 1.0
    {
        errors.push(format!(
            "max_uncertainty must be in (0, 1] (got {})",
            limits.max_uncertainty
        ));
    }
    errors
}
