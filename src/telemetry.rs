//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level. With `structured_logging`
//! every event is written as one JSON object per line.

use tracing_subscriber::EnvFilter;

use crate::config::MonitoringConfig;
use crate::error::{Error, Result};

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn env_filter(config: &MonitoringConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(config: &MonitoringConfig) -> Result<()> {
    let filter = env_filter(config);

    let installed = if config.structured_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .try_init()
    };

    installed.map_err(|e| Error::Configuration(format!("Failed to install tracing: {}", e)))
}
