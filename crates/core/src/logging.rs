//! Structured logging for Sovledger processes.
//!
//! Log level can be configured via the `RUST_LOG` environment variable and
//! defaults to `info`.

use crate::error::{CoreError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a human-readable subscriber.
///
/// # Example
/// ```no_run
/// use sovledger_core::logging;
///
/// logging::init();
/// tracing::info!("ledger node started");
/// ```
pub fn init() {
    // A subscriber that is already installed is kept
    let _ = try_init();
}

/// Install a JSON subscriber for log aggregation.
pub fn init_json() {
    let _ = try_init_json();
}

pub fn try_init() -> Result<()> {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init()
        .map_err(|e| CoreError::Logging(e.to_string()))
}

pub fn try_init_json() -> Result<()> {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .try_init()
        .map_err(|e| CoreError::Logging(e.to_string()))
}
