//! Logging setup for embedding processes.
//!
//! The library itself only emits through `tracing`; this module is the
//! opt-in glue for binaries that want a subscriber without wiring
//! `tracing-subscriber` themselves. `RUST_LOG` overrides the configured
//! default filter.

use crate::errors::DagrunError;
use tracing_subscriber::EnvFilter;

/// Subscriber configuration for [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit one JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Switches to JSON output.
    #[must_use]
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Installs a global `tracing` subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<(), DagrunError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let result = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|err| DagrunError::Internal(format!("installing tracing subscriber: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new().with_filter("dagrun=debug").with_json();
        assert_eq!(config.filter, "dagrun=debug");
        assert!(config.json);
    }

    #[test]
    fn test_init_twice_reports_error() {
        let config = LogConfig::default();
        // Whichever call loses the race, the second install must fail
        // cleanly rather than panic.
        let first = init(&config);
        let second = init(&config);
        assert!(first.is_err() || second.is_err());
    }
}
