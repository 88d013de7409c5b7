//! Logging setup.
//!
//! Library code only emits `tracing` events with structured fields (`dataset`, `file`,
//! `schema`, `table`, ...). Binaries and tests that want to see them call [`init_logging`] once.
//!
//! ```no_run
//! use tabular_ingest::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default()).unwrap();
//! tracing::info!(dataset = "positions", "ingest started");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{ConfigError, ConfigResult};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is unset (e.g. `info,tabular_ingest=debug`).
    pub directives: String,
    pub format: LogFormat,
    pub include_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directives: "info".to_string(),
            format: LogFormat::Text,
            include_thread_ids: false,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> ConfigResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.directives).map_err(|e| ConfigError::Invalid {
            message: format!("bad log directives '{}': {e}", config.directives),
        })?,
    };

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_ids(config.include_thread_ids);

    let installed = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init(),
    };

    installed.map_err(|e| ConfigError::Invalid {
        message: format!("logging already initialised: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.directives, "info");
        assert!(!config.include_thread_ids);
    }
}
