//! Development-time tracing.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. Run
//! artifacts (`telemetry.json`, snapshots, `analysis.json`) are product
//! output and are written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=orchestrator=debug orchestrator run --sequence AELKKLAELLKKAEEL
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
