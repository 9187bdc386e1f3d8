//! Environment variable parsing with type safety.
//!
//! Reads `CVA_*` tunables through an injected [`EnvLookup`], validating
//! ranges and collecting every problem so they can be reported at once.

use crate::error::{AnalysisError, Result};
use crate::scope::EnvLookup;
use crate::verify::PollPolicy;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::mounted::DEFAULT_CONFIG_DIR;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Where a setting's value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueOrigin {
    Default,
    Environment(String),
}

/// A value tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub origin: ValueOrigin,
}

impl<T> Sourced<T> {
    fn from_env(value: T, var: String) -> Self {
        Self {
            value,
            origin: ValueOrigin::Environment(var),
        }
    }

    fn default_value(value: T) -> Self {
        Self {
            value,
            origin: ValueOrigin::Default,
        }
    }

    pub fn is_default(&self) -> bool {
        self.origin == ValueOrigin::Default
    }
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser<'a> {
    prefix: &'static str,
    env: &'a dyn EnvLookup,
    errors: Vec<EnvError>,
}

impl<'a> EnvParser<'a> {
    /// Create a new parser with the CVA_ prefix.
    pub fn new(env: &'a dyn EnvLookup) -> Self {
        Self {
            prefix: "CVA_",
            env,
            errors: Vec::new(),
        }
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a string restricted to `allowed` (case-insensitive, lowercased).
    pub fn get_choice(&mut self, name: &str, default: &str, allowed: &[&str]) -> Sourced<String> {
        let var_name = self.var_name(name);
        match self.env.get(&var_name) {
            Some(value) => {
                let lower = value.trim().to_lowercase();
                if allowed.contains(&lower.as_str()) {
                    Sourced::from_env(lower, var_name)
                } else {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: allowed.join("|"),
                        value,
                    });
                    Sourced::from_env(default.to_string(), var_name)
                }
            }
            None => Sourced::default_value(default.to_string()),
        }
    }

    /// Get a u32 value with default and range validation.
    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> Sourced<u32> {
        let var_name = self.var_name(name);
        match self.env.get(&var_name) {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 32-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            None => Sourced::default_value(default),
        }
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let var_name = self.var_name(name);
        match self.env.get(&var_name) {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            None => Sourced::default_value(default),
        }
    }

    /// Get a path value; empty values fall back to the default.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        let var_name = self.var_name(name);
        match self.env.get(&var_name) {
            Some(value) if !value.trim().is_empty() => {
                Sourced::from_env(PathBuf::from(value.trim()), var_name)
            }
            _ => Sourced::default_value(PathBuf::from(default)),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match self.env.get(&var_name) {
            Some(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Some(value) => Sourced::from_env(Some(value), var_name),
            None => Sourced::default_value(None),
        }
    }
}

/// Process-level tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Root of the mounted inputs.
    pub config_dir: PathBuf,
    /// Delay between score fetches while the run is `RUNNING`.
    pub poll_interval: Duration,
    /// Failed score fetches tolerated over the whole poll loop.
    pub poll_retry_budget: u32,
    /// Transport-level connect timeout.
    pub connect_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            poll_interval: policy.interval,
            poll_retry_budget: policy.retry_budget,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl RuntimeSettings {
    /// Read `CVA_*` overrides; every invalid variable is reported together.
    pub fn from_env(env: &dyn EnvLookup) -> Result<Self> {
        let defaults = Self::default();
        let mut parser = EnvParser::new(env);

        let config_dir = parser.get_path("CONFIG_DIR", DEFAULT_CONFIG_DIR);
        let interval =
            parser.get_u64_range("POLL_INTERVAL_SECS", defaults.poll_interval.as_secs(), 1, 300);
        let budget = parser.get_u32_range("POLL_RETRY_BUDGET", defaults.poll_retry_budget, 0, 100);
        let timeout = parser.get_u64_range(
            "CONNECT_TIMEOUT_SECS",
            defaults.connect_timeout.as_secs(),
            1,
            300,
        );

        if parser.has_errors() {
            let reason = parser
                .take_errors()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AnalysisError::ConfigParse {
                what: "environment".to_string(),
                reason,
            });
        }

        let settings = Self {
            config_dir: config_dir.value.clone(),
            poll_interval: Duration::from_secs(interval.value),
            poll_retry_budget: budget.value,
            connect_timeout: Duration::from_secs(timeout.value),
        };
        debug!(
            config_dir = %settings.config_dir.display(),
            poll_interval_secs = settings.poll_interval.as_secs(),
            poll_retry_budget = settings.poll_retry_budget,
            connect_timeout_secs = settings.connect_timeout.as_secs(),
            overridden = !(config_dir.is_default() && interval.is_default() && budget.is_default() && timeout.is_default()),
            "runtime settings"
        );
        Ok(settings)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            retry_budget: self.poll_retry_budget,
        }
    }
}
