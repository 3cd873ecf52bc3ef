//! # Telemetry: tracing subscriber setup

use crate::config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter directive.
///
/// # Panics
/// Panics if a global subscriber is already installed. Use
/// [`try_init_tracing`] where that can happen (tests, embedding).
pub fn init_tracing(config: &LogConfig) {
    if let Err(e) = try_init_tracing(config) {
        panic!("failed to install tracing subscriber: {e}");
    }
}

/// Initialize the global tracing subscriber, reporting an error when one is
/// already installed.
pub fn try_init_tracing(
    config: &LogConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_reports_error() {
        let config = LogConfig::default();
        let _ = try_init_tracing(&config);
        assert!(try_init_tracing(&config).is_err());
    }
}
