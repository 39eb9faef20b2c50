//! Ordered per-iteration snapshots persisted next to the run summary.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::coordinator::CoordinatorDecision;
use crate::core::decisions::Decision;
use crate::core::execution::LoopState;
use crate::core::tooling::{ToolOutput, ToolResult};
use crate::io::workspace::write_json;

/// Loop state, decisions, and tool results for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub iteration: u32,
    pub state: LoopState,
    pub decisions: Vec<Decision>,
    pub coordinator: Option<CoordinatorDecision>,
    pub tool_results: Vec<ToolResult>,
    /// Outputs that arrived after a timeout. Kept for forensics only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub late_outputs: Vec<ToolOutput>,
}

/// Numeric signals reported by one agent in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub iteration: u32,
    pub agent: String,
    pub signals: BTreeMap<String, f64>,
}

/// Append-only, ordered snapshot list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLog<T> {
    pub snapshots: Vec<T>,
}

impl<T> Default for SnapshotLog<T> {
    fn default() -> Self {
        Self {
            snapshots: Vec::new(),
        }
    }
}

impl<T: Serialize> SnapshotLog<T> {
    pub fn push(&mut self, snapshot: T) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::read_json;

    #[test]
    fn snapshots_keep_insertion_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("telemetry_snapshots.json");
        let mut log = SnapshotLog::default();
        for iteration in [2, 0, 1] {
            log.push(TelemetrySnapshot {
                iteration,
                agent: "critic".to_string(),
                signals: BTreeMap::from([("score".to_string(), f64::from(iteration))]),
            });
        }
        log.write(&path).expect("write");

        let loaded: SnapshotLog<TelemetrySnapshot> = read_json(&path).expect("read");
        let order: Vec<u32> = loaded.snapshots.iter().map(|s| s.iteration).collect();
        assert_eq!(order, vec![2, 0, 1]);
    }
}
