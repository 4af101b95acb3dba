//! Logging setup
//!
//! The runtime only emits `tracing` events. Applications that want them
//! printed call [`init_tracing`] once at startup.

use pledge_config::DiagnosticsConfig;
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable overriding the configured log filter
pub const LOG_ENV: &str = "PLEDGE_LOG";

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: ParseError,
    },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Install a global fmt subscriber filtered per `config`
///
/// `PLEDGE_LOG`, when set, replaces the configured filter.
pub fn init_tracing(config: &DiagnosticsConfig) -> Result<(), DiagnosticsError> {
    let directives = filter_directives(config, std::env::var(LOG_ENV).ok());
    let filter = EnvFilter::try_new(&directives).map_err(|source| DiagnosticsError::InvalidFilter {
        filter: directives.clone(),
        source,
    })?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(config.with_target()))
        .with(filter)
        .try_init()?;

    tracing::debug!(filter = %directives, "tracing initialized");
    Ok(())
}

fn filter_directives(config: &DiagnosticsConfig, env_override: Option<String>) -> String {
    env_override
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.log_filter().to_string())
}
