//! Tracing subscriber setup for embedders and tests.

use tracing_subscriber::EnvFilter;

/// Install a global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info` for this crate.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scribeq=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}
