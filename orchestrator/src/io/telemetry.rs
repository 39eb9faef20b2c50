//! Run telemetry persisted as `telemetry.json`.
//!
//! This is a product artifact of the run and is written regardless of the
//! tracing filter.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::workspace::write_json;

/// Cost keys that must be present in every emitted telemetry file.
pub const COST_KEYS: [&str; 3] = ["tool_units", "cpu_seconds", "gpu_seconds"];

/// Cost accumulator. Missing keys read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostSummary(BTreeMap<String, f64>);

impl CostSummary {
    pub fn get(&self, key: &str) -> f64 {
        self.0.get(key).copied().unwrap_or(0.0)
    }

    pub fn add(&mut self, key: &str, amount: f64) {
        *self.0.entry(key.to_string()).or_insert(0.0) += amount;
    }

    /// Insert any missing cost key with a zero value.
    pub fn ensure_keys(&mut self) {
        for key in COST_KEYS {
            self.0.entry(key.to_string()).or_insert(0.0);
        }
    }

    pub fn missing_keys(&self) -> Vec<&'static str> {
        COST_KEYS
            .into_iter()
            .filter(|key| !self.0.contains_key(*key))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryClient {
    pub run_id: String,
    pub event_count: u64,
    pub costs: CostSummary,
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub observations: BTreeMap<String, Vec<f64>>,
}

impl TelemetryClient {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Self::default()
        }
    }

    pub fn increment(&mut self, name: &str, by: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += by;
        self.event_count += 1;
    }

    pub fn gauge(&mut self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
        self.event_count += 1;
    }

    pub fn observe(&mut self, name: &str, value: f64) {
        self.observations
            .entry(name.to_string())
            .or_default()
            .push(value);
        self.event_count += 1;
    }

    pub fn add_cost(&mut self, key: &str, amount: f64) {
        self.costs.add(key, amount);
        self.event_count += 1;
    }

    pub fn ensure_costs(&mut self) {
        self.costs.ensure_keys();
    }

    /// Write `telemetry.json`. All cost keys must already be present.
    pub fn flush(&self, path: &Path) -> Result<()> {
        let missing = self.costs.missing_keys();
        if !missing.is_empty() {
            bail!("Missing telemetry fields: {}", missing.join(", "));
        }
        debug!(run_id = %self.run_id, events = self.event_count, "flushing telemetry");
        write_json(path, self)
    }
}
