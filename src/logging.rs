//! Logging setup
//!
//! Installs a `tracing_subscriber::fmt` subscriber. `RUST_LOG` wins when set;
//! otherwise the configured level applies to this crate and `warn` to
//! everything else.

use tracing_subscriber::EnvFilter;

/// Build the filter used by [`init`]
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,probe_station={}", level)))
}

/// Install the global subscriber
///
/// Returns an error if a global subscriber is already set.
pub fn init(level: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
