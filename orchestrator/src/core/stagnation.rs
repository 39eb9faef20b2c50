//! Stagnation counting across design iterations.

/// Increment `count` when the improvement is below `threshold`, otherwise reset.
pub fn update_stagnation_count(count: u32, improvement_delta: f64, threshold: f64) -> u32 {
    if improvement_delta < threshold {
        count + 1
    } else {
        0
    }
}
