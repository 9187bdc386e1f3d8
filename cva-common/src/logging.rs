//! Logging initialisation.
//!
//! ```ignore
//! let mut log_config = LogConfig::from_env("info").with_stderr();
//! if verbose {
//!     log_config = log_config.with_level("debug");
//! }
//! init_logging(&log_config)?;
//! ```

use crate::config::EnvParser;
use crate::error::{AnalysisError, Result};
use crate::scope::{EnvLookup, ProcessEnv};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Output encoding for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive string.
    pub filter: String,
    pub format: LogFormat,
    /// Write to stderr instead of stdout.
    pub stderr: bool,
}

impl LogConfig {
    /// Build from `CVA_LOG` (falling back to `RUST_LOG`) and `CVA_LOG_FORMAT`.
    pub fn from_env(default_level: &str) -> Self {
        Self::from_lookup(default_level, &ProcessEnv)
    }

    /// As [`LogConfig::from_env`] but over an arbitrary lookup.
    ///
    /// Unknown formats fall back to text; the subscriber is not up yet, so
    /// there is nowhere to report them.
    pub fn from_lookup(default_level: &str, env: &dyn EnvLookup) -> Self {
        let mut parser = EnvParser::new(env);
        let filter = parser
            .get_optional_string("LOG")
            .value
            .or_else(|| env.get("RUST_LOG").filter(|v| !v.is_empty()))
            .unwrap_or_else(|| default_level.to_string());
        let format = match parser.get_choice("LOG_FORMAT", "text", &["text", "json"]).value.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self {
            filter,
            format,
            stderr: false,
        }
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.filter = level.to_string();
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| AnalysisError::ConfigParse {
        what: "log filter".to_string(),
        reason: e.to_string(),
    })?;

    let writer = if config.stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };
    let layer = match config.format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Text => fmt::layer().with_target(false).with_writer(writer).boxed(),
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = LogConfig::from_lookup("info", &env(&[]));
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Text);
        assert!(!config.stderr);
    }

    #[test]
    fn test_env_overrides() {
        let config = LogConfig::from_lookup(
            "info",
            &env(&[("CVA_LOG", "cva=trace"), ("RUST_LOG", "warn"), ("CVA_LOG_FORMAT", "JSON")]),
        );
        assert_eq!(config.filter, "cva=trace");
        assert_eq!(config.format, LogFormat::Json);

        let fallback = LogConfig::from_lookup("info", &env(&[("RUST_LOG", "warn")]));
        assert_eq!(fallback.filter, "warn");
    }

    #[test]
    fn test_builders() {
        let config = LogConfig::from_lookup("info", &env(&[]))
            .with_level("debug")
            .with_stderr()
            .with_json();
        assert_eq!(config.filter, "debug");
        assert!(config.stderr);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig::from_lookup("info", &env(&[])).with_stderr();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_invalid_filter() {
        let config = LogConfig::from_lookup("info", &env(&[])).with_level("cva=notalevel");
        assert!(init_logging(&config).is_err());
    }
}
