//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level when it is set.

use offsync_domain::{LoggingConfig, QueueError, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber described by `config`.
///
/// # Errors
/// Returns `QueueError::Config` if the level directive is invalid or a
/// global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_current_span(true).with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr).with_target(true)).try_init()
    };

    installed.map_err(|err| QueueError::Config(format!("failed to install tracing subscriber: {err}")))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|err| QueueError::Config(format!("invalid log level {:?}: {err}", config.level)))
}
