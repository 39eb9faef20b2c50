//! Per-run analysis written to `analysis.json`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::io::workspace::write_json;

/// One entry in a candidate's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub iteration: u32,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolStats {
    pub success: u32,
    pub failure: u32,
    pub success_rate: f64,
    pub latency_p50_ms: f64,
    pub latencies_ms: Vec<u64>,
}

impl ToolStats {
    fn record(&mut self, success: bool, latency_ms: u64) {
        if success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
        self.latencies_ms.push(latency_ms);
        let total = f64::from(self.success + self.failure);
        self.success_rate = f64::from(self.success) / total;
        self.latency_p50_ms = median(&self.latencies_ms);
    }
}

fn median(samples: &[u64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationDelta {
    pub iteration: u32,
    pub improvement_delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Candidate timeline, tool reliability, and per-iteration improvement.
///
/// Every section defaults to empty so partial files still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunAnalysis {
    pub candidate_timeline: BTreeMap<String, Vec<TimelineEvent>>,
    pub tool_stats: BTreeMap<String, ToolStats>,
    pub iteration_deltas: Vec<IterationDelta>,
}

impl RunAnalysis {
    pub fn record_candidate_event(
        &mut self,
        candidate_id: &str,
        iteration: u32,
        event: &str,
        score: Option<f64>,
    ) {
        self.candidate_timeline
            .entry(candidate_id.to_string())
            .or_default()
            .push(TimelineEvent {
                iteration,
                event: event.to_string(),
                score,
            });
    }

    pub fn record_tool_call(&mut self, tool_name: &str, success: bool, latency_ms: u64) {
        self.tool_stats
            .entry(tool_name.to_string())
            .or_default()
            .record(success, latency_ms);
    }

    /// Record an iteration delta rounded to three decimals.
    pub fn record_delta(&mut self, iteration: u32, delta: f64, note: Option<String>) {
        self.iteration_deltas.push(IterationDelta {
            iteration,
            improvement_delta: round3(delta),
            note,
        });
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::read_json;

    #[test]
    fn timeline_keeps_events_in_order() {
        let mut analysis = RunAnalysis::default();
        analysis.record_candidate_event("cand-1", 0, "proposed", None);
        analysis.record_candidate_event("cand-1", 1, "accepted", Some(81.0));
        let events: Vec<&str> = analysis.candidate_timeline["cand-1"]
            .iter()
            .map(|e| e.event.as_str())
            .collect();
        assert_eq!(events, vec!["proposed", "accepted"]);
    }

    #[test]
    fn tool_stats_track_rate_and_median_latency() {
        let mut analysis = RunAnalysis::default();
        analysis.record_tool_call("fold", true, 10);
        analysis.record_tool_call("fold", false, 20);
        let stats = &analysis.tool_stats["fold"];
        assert_eq!((stats.success, stats.failure), (1, 1));
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.latency_p50_ms, 15.0);
    }

    #[test]
    fn deltas_are_rounded() {
        let mut analysis = RunAnalysis::default();
        analysis.record_delta(1, 0.12345, None);
        assert_eq!(analysis.iteration_deltas[0].improvement_delta, 0.123);
    }

    #[test]
    fn partial_file_loads_with_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("analysis.json");
        std::fs::write(&path, "{\"iteration_deltas\": []}\n").expect("write");
        let loaded: RunAnalysis = read_json(&path).expect("read");
        assert!(loaded.candidate_timeline.is_empty());
        assert!(loaded.tool_stats.is_empty());
    }
}
