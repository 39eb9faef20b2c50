//! Protein-design run orchestration.
//!
//! A run takes one input sequence through a bounded loop of plan, execute,
//! and review rounds. Every run owns a workspace directory of auditable
//! artifacts and ends with an immutable `run_summary.json`.
//!
//! - **[`core`]**: Pure, deterministic logic (coordinator, failure
//!   classification, status derivation, ids, candidate ranking). No I/O.
//! - **[`io`]**: Side effects (tool registry and boundary, executor, run
//!   workspace, candidate store, human decision gate, configuration).
//!
//! Orchestration modules ([`design_loop`], [`resume`], [`lifecycle`],
//! [`agents`]) combine the two to implement CLI commands.

pub mod agents;
pub mod core;
pub mod design_loop;
pub mod exit_codes;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod resume;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
