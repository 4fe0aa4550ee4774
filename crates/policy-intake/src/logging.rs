//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level. Records emitted
//! through the `log` facade are forwarded to the same subscriber.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{IntakeError, Result};

/// Builds the env filter for a configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| IntakeError::Logging(format!("invalid level '{}': {}", config.level, e)))
}

/// Installs the global subscriber. Calling it a second time returns an
/// error and leaves the first subscriber in place.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let subscriber = Registry::default()
        .with(filter)
        .with(config.json.then(|| fmt::layer().json()))
        .with((!config.json).then(fmt::layer));

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| IntakeError::Logging(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| IntakeError::Logging(e.to_string()))?;

    Ok(())
}
