//! Tracing/logging initialization.
//!
//! JSON logs on stdout, filtered through `RUST_LOG`. Ledger operations carry
//! their document id, scheme and allocated number as span fields.

use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(SystemTime)
        .with_target(false)
        .try_init();
}
