//! Stable exit codes for orchestrator and replay commands.

use crate::core::status::Outcome;

/// Command succeeded or the run was accepted.
pub const OK: i32 = 0;
/// Invalid input, configuration, decision artifact, or any other error.
pub const INVALID: i32 = 1;
/// The run finished without an accepted candidate.
pub const REJECTED: i32 = 2;
/// The run is waiting on a signed human decision.
pub const NEEDS_REVIEW: i32 = 3;
/// `replay reproduce` or `replay verify` found differing artifacts.
pub const REPRO_MISMATCH: i32 = 4;

pub fn for_outcome(outcome: Outcome) -> i32 {
    match outcome {
        Outcome::Accepted => OK,
        Outcome::Rejected => REJECTED,
        Outcome::NeedsReview => NEEDS_REVIEW,
    }
}
