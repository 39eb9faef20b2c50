//! I/O helpers for orchestrator commands.

pub mod analysis;
pub mod artifacts;
pub mod boundary;
pub mod candidate_store;
pub mod config;
pub mod executor;
pub mod human_gate;
pub mod manifest;
pub mod registry;
pub mod snapshots;
pub mod telemetry;
pub mod tools;
pub mod workspace;
