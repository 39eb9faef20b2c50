//! Deterministic, pure logic shared by the orchestration engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod candidates;
pub mod coordinator;
pub mod decisions;
pub mod execution;
pub mod failures;
pub mod ids;
pub mod sequence;
pub mod stagnation;
pub mod status;
pub mod tooling;
