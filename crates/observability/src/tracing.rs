//! Tracing/logging initialization.
//!
//! The fulfillment core emits structured events (order placed, substitution
//! committed/compensated, conflicts retried) through `tracing`; this module
//! owns how those events leave the process.

use tracing_subscriber::EnvFilter;

/// Initialize JSON logging for the process, filtered via `RUST_LOG`
/// (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Human-readable output for test runs, visible under `--nocapture`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
