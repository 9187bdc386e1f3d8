//! Error taxonomy for canary request assembly and verification.
//!
//! Every failure the job can hit is a variant of [`AnalysisError`]. Each
//! variant belongs to one [`ErrorCategory`], which decides how the failure is
//! reported and whether the poll loop may retry it.
//!
//! | Category     | Retried | Examples                                      |
//! |--------------|---------|-----------------------------------------------|
//! | `Config`     | never   | contradictory spec fields, bad service blocks |
//! | `Resolution` | never   | unset placeholder, unparsable timestamp       |
//! | `Template`   | never   | malformed template, name mismatch, rejection  |
//! | `Transport`  | polling | connection refused, 5xx while polling         |
//! | `Remote`     | never   | `error`/`message` in a 200 body, bad score    |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;

/// Coarse classification of an [`AnalysisError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or contradictory declarative input.
    Config,
    /// Placeholder or timestamp resolution failures.
    Resolution,
    /// Template normalisation or registration failures.
    Template,
    /// Connection-level failures talking to a remote endpoint.
    Transport,
    /// Business errors reported by the analysis service.
    Remote,
}

impl ErrorCategory {
    /// Prefix used when the error is surfaced to operators.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Config => "provider config map validation error",
            Self::Resolution => "analysisTemplate validation error",
            Self::Template => "gitops template validation error",
            Self::Transport => "transport error",
            Self::Remote => "analysis error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors raised while assembling, submitting or evaluating a canary run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------
    #[error("{0}")]
    InvalidSpec(String),

    #[error("{reason} of service '{service}'")]
    InvalidService { service: String, reason: String },

    #[error("duplicate service name '{0}' in serviceList")]
    DuplicateServiceName(String),

    #[error("at least one of log or metric context must be provided for service '{0}'")]
    NoAnalysisContextForService(String),

    #[error("no services provided")]
    NoServicesProvided,

    #[error("{path}: {reason}\n Action Required: {hint}")]
    MissingInput {
        path: String,
        reason: String,
        hint: String,
    },

    #[error("cannot parse {what}: {reason}")]
    ConfigParse { what: String, reason: String },

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------
    #[error("environment variable {0} not set")]
    MissingEnvironmentVariable(String),

    #[error("Error in parsing {field}: {reason}")]
    TimeParse { field: String, reason: String },

    #[error("{0}")]
    Ordering(String),

    // ---------------------------------------------------------------------
    // Template synchronisation
    // ---------------------------------------------------------------------
    #[error("gitops '{template}' template validation error: {reason}")]
    TemplateInvalid { template: String, reason: String },

    #[error(
        "gitops '{template}' template validation error: criticality field can only take values Low/Medium/High, got '{value}'"
    )]
    InvalidCriticality { template: String, value: String },

    #[error(
        "gitops '{0}' template validation error: metric template {0} does not have any members defined for the groups field"
    )]
    EmptyTemplateGroups(String),

    #[error(
        "gitops '{template}' template validation error: templateName in json does not match the template name ('{found}' != '{template}')"
    )]
    TemplateNameMismatch { template: String, found: String },

    #[error("gitops '{template}' template validation error: {message}")]
    TemplateRejected { template: String, message: String },

    // ---------------------------------------------------------------------
    // Transport
    // ---------------------------------------------------------------------
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("score polling gave up after {failures} failed fetches, last error: {last_error}")]
    PollExhausted { failures: u32, last_error: String },

    // ---------------------------------------------------------------------
    // Remote state
    // ---------------------------------------------------------------------
    #[error("Error: {error}\nMessage: {message}")]
    RemoteRejection { error: String, message: String },

    #[error("score url not found")]
    ScoreUrlNotFound,

    #[error("invalid {what} response: {reason}")]
    MalformedResponse { what: String, reason: String },

    #[error("cannot parse overallScore '{0}' as a number")]
    ScoreParse(String),

    // ---------------------------------------------------------------------
    // Collaborators
    // ---------------------------------------------------------------------
    #[error("status report failed: {0}")]
    Report(String),
}

impl AnalysisError {
    /// Category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidSpec(_)
            | Self::InvalidService { .. }
            | Self::DuplicateServiceName(_)
            | Self::NoAnalysisContextForService(_)
            | Self::NoServicesProvided
            | Self::MissingInput { .. }
            | Self::ConfigParse { .. } => ErrorCategory::Config,
            Self::MissingEnvironmentVariable(_) | Self::TimeParse { .. } | Self::Ordering(_) => {
                ErrorCategory::Resolution
            }
            Self::TemplateInvalid { .. }
            | Self::InvalidCriticality { .. }
            | Self::EmptyTemplateGroups(_)
            | Self::TemplateNameMismatch { .. }
            | Self::TemplateRejected { .. } => ErrorCategory::Template,
            Self::Transport { .. } | Self::PollExhausted { .. } | Self::Report(_) => {
                ErrorCategory::Transport
            }
            Self::RemoteRejection { .. }
            | Self::ScoreUrlNotFound
            | Self::MalformedResponse { .. }
            | Self::ScoreParse(_) => ErrorCategory::Remote,
        }
    }

    /// Whether the poll loop may spend retry budget on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Message with the category prefix, as written to the Job status.
    pub fn operator_message(&self) -> String {
        format!("{}: {}", self.category(), self)
    }

    pub(crate) fn invalid_service(service: &str, reason: impl Into<String>) -> Self {
        Self::InvalidService {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(url: &str, reason: impl fmt::Display) -> Self {
        Self::Transport {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(what: &str, reason: impl fmt::Display) -> Self {
        Self::MalformedResponse {
            what: what.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AnalysisError::transport("http://gate", "connection refused").is_retryable());
        assert!(!AnalysisError::ScoreUrlNotFound.is_retryable());
        assert!(!AnalysisError::NoServicesProvided.is_retryable());
        assert!(!AnalysisError::ScoreParse("9a7".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            AnalysisError::MissingEnvironmentVariable("X".into()).category(),
            ErrorCategory::Resolution
        );
        assert_eq!(
            AnalysisError::EmptyTemplateGroups("t".into()).category(),
            ErrorCategory::Template
        );
        assert_eq!(
            AnalysisError::DuplicateServiceName("svc".into()).category(),
            ErrorCategory::Config
        );
        assert_eq!(
            AnalysisError::RemoteRejection {
                error: "e".into(),
                message: "m".into()
            }
            .category(),
            ErrorCategory::Remote
        );
    }

    #[test]
    fn test_service_message_names_service() {
        let err = AnalysisError::invalid_service(
            "service2",
            "mismatch in number of log scope variables and baseline/canary log scope",
        );
        assert_eq!(
            err.to_string(),
            "mismatch in number of log scope variables and baseline/canary log scope of service 'service2'"
        );
    }

    #[test]
    fn test_operator_message_prefix() {
        let err = AnalysisError::MissingEnvironmentVariable("STABLE_POD_HASH".into());
        assert_eq!(
            err.operator_message(),
            "analysisTemplate validation error: environment variable STABLE_POD_HASH not set"
        );
    }

    #[test]
    fn test_remote_rejection_passes_message_through() {
        let err = AnalysisError::RemoteRejection {
            error: "Here is Error".into(),
            message: "Error is Here".into(),
        };
        assert_eq!(err.to_string(), "Error: Here is Error\nMessage: Error is Here");
    }
}
