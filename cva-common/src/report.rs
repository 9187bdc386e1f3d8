//! Outbound status reporting.
//!
//! The run's progress is published as conditions on the owning Job's
//! status. [`JobStatusPatch`] renders the strategic-merge patch body; a
//! [`StatusReporter`] decides where it goes.

use crate::error::{AnalysisError, Result};
use crate::verify::{Outcome, VerificationRun};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Exit status for runs that ended in an error.
pub const EXIT_ERROR: i32 = 1;

/// Condition type carrying the analysis details.
pub const ANALYSIS_CONDITION: &str = "OpsmxAnalysis";

/// Condition type marking the Job as failed.
pub const FAILED_CONDITION: &str = "Failed";

/// What operators see about a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanaryDetails {
    pub user: String,
    pub canary_id: String,
    pub gate_url: String,
    pub report_url: Option<String>,
    pub score: Option<i64>,
    /// Replaces the generic message on the `Failed` condition.
    pub failure_reason: Option<String>,
}

impl CanaryDetails {
    pub fn from_run(run: &VerificationRun, user: &str, gate_url: &str) -> Self {
        Self {
            user: user.to_string(),
            canary_id: run.canary_id.clone(),
            gate_url: gate_url.to_string(),
            report_url: run.report_url.clone(),
            score: run.score,
            failure_reason: None,
        }
    }

    /// Multi-line condition message.
    pub fn message(&self) -> String {
        let mut message = format!(
            "User: {}\nCanary ID: {}\nReport URL: {}\nGate URL: {}",
            self.user,
            self.canary_id,
            self.report_url.as_deref().unwrap_or_default(),
            self.gate_url
        );
        if let Some(score) = self.score {
            message.push_str(&format!("\nScore: {score}"));
        }
        message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub last_probe_time: String,
    pub message: String,
}

impl JobCondition {
    fn new(kind: &str, message: String, now: DateTime<Utc>) -> Self {
        Self {
            kind: kind.to_string(),
            status: "True".to_string(),
            last_probe_time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusBody {
    pub conditions: Vec<JobCondition>,
}

/// Body of a `jobs/<name>/status` strategic-merge patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusPatch {
    pub status: JobStatusBody,
}

impl JobStatusPatch {
    fn with(conditions: Vec<JobCondition>) -> Self {
        Self {
            status: JobStatusBody { conditions },
        }
    }

    /// Analysis registered; report URL known, no score yet.
    pub fn started(details: &CanaryDetails, now: DateTime<Utc>) -> Self {
        Self::with(vec![JobCondition::new(
            ANALYSIS_CONDITION,
            details.message(),
            now,
        )])
    }

    /// Terminal outcome. Anything but success also marks the Job failed.
    pub fn outcome(details: &CanaryDetails, outcome: Outcome, now: DateTime<Utc>) -> Self {
        let mut conditions = vec![JobCondition::new(
            ANALYSIS_CONDITION,
            details.message(),
            now,
        )];
        if outcome != Outcome::Successful {
            let message = details
                .failure_reason
                .clone()
                .unwrap_or_else(|| format!("The analysis was {outcome}"));
            conditions.push(JobCondition::new(FAILED_CONDITION, message, now));
        }
        Self::with(conditions)
    }

    pub fn error(message: &str, now: DateTime<Utc>) -> Self {
        Self::with(vec![JobCondition::new(
            ANALYSIS_CONDITION,
            message.to_string(),
            now,
        )])
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AnalysisError::Report(e.to_string()))
    }
}

/// Where run progress is published.
pub trait StatusReporter {
    fn report_started(&self, details: &CanaryDetails) -> Result<()>;

    fn report_outcome(&self, details: &CanaryDetails, outcome: Outcome) -> Result<()>;

    fn report_error(&self, message: &str) -> Result<()>;
}

impl<T: StatusReporter + ?Sized> StatusReporter for &T {
    fn report_started(&self, details: &CanaryDetails) -> Result<()> {
        (**self).report_started(details)
    }

    fn report_outcome(&self, details: &CanaryDetails, outcome: Outcome) -> Result<()> {
        (**self).report_outcome(details, outcome)
    }

    fn report_error(&self, message: &str) -> Result<()> {
        (**self).report_error(message)
    }
}

/// Reporter that only logs; used when the Job status is not patched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report_started(&self, details: &CanaryDetails) -> Result<()> {
        info!(
            canary_id = %details.canary_id,
            report_url = details.report_url.as_deref().unwrap_or_default(),
            "analysis started"
        );
        Ok(())
    }

    fn report_outcome(&self, details: &CanaryDetails, outcome: Outcome) -> Result<()> {
        info!(
            canary_id = %details.canary_id,
            score = ?details.score,
            %outcome,
            reason = details.failure_reason.as_deref().unwrap_or_default(),
            "analysis finished"
        );
        Ok(())
    }

    fn report_error(&self, message: &str) -> Result<()> {
        warn!(error = message, "analysis failed");
        Ok(())
    }
}
