//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Defaults to `info` with compact console output; override per-module via
/// `RUST_LOG` (e.g. `RUST_LOG=wayfare_infra::occ=debug`). Set
/// `WAYFARE_LOG_JSON=1` for machine-readable logs in deployments.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("WAYFARE_LOG_JSON").is_ok_and(|v| v == "1");
    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(true)
            .try_init();
    }
}
