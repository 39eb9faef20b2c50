//! Timeout budget arithmetic for sampled (non-preemptive) timeout checks.

/// Milliseconds elapsed between two clock samples. Never negative.
pub fn elapsed_ms(started_ms: u64, now_ms: u64) -> u64 {
    now_ms.saturating_sub(started_ms)
}

/// True when a non-zero budget has been strictly exceeded.
///
/// A `timeout_ms` of `0` means "no timeout".
pub fn exceeds_budget(started_ms: u64, now_ms: u64, timeout_ms: u64) -> bool {
    timeout_ms > 0 && elapsed_ms(started_ms, now_ms) > timeout_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_never_expires() {
        assert!(!exceeds_budget(0, u64::MAX, 0));
    }

    #[test]
    fn budget_is_exceeded_only_past_the_limit() {
        assert!(!exceeds_budget(1_000, 2_000, 1_000));
        assert!(exceeds_budget(1_000, 2_001, 1_000));
    }

    #[test]
    fn clock_going_backwards_counts_as_zero_elapsed() {
        assert_eq!(elapsed_ms(5_000, 4_000), 0);
    }
}
