//! Logging setup
//!
//! Installs a `tracing` subscriber with an env-driven filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "screenrec=debug";

/// Repeated failures are logged on the first and then every this many
pub const FAILURE_LOG_EVERY: u64 = 100;

/// Initialize tracing/logging
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::debug!("Logging initialized");
    }
}

/// Whether a loop's `failures`-th failure should be logged
pub fn should_log_failure(failures: u64) -> bool {
    failures == 1 || (failures > 0 && failures % FAILURE_LOG_EVERY == 0)
}
