//! Submit, poll and classify a canary run.
//!
//! ```text
//! submit ──► Polling ──RUNNING──► sleep ──► Polling
//!               │
//!               ├─ CANCELLED ─────────────► Cancelled
//!               └─ anything else ─► score ─► Successful | Inconclusive | Failed
//! ```
//!
//! Transient score-fetch failures draw from a retry budget shared by the
//! whole loop. Everything else ends the run immediately.

use crate::clock::Clock;
use crate::error::{AnalysisError, Result};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, join_url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Canary registration path under the gate URL.
pub const REGISTER_CANARY_PATH: &str = "/autopilot/api/v5/registerCanary";

/// Poll cadence and failure tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Failed fetches tolerated across the whole loop.
    pub retry_budget: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            retry_budget: 5,
        }
    }
}

/// Terminal classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Successful,
    Inconclusive,
    Failed,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Successful => "Successful",
            Self::Inconclusive => "Inconclusive",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Successful => 0,
            Self::Failed => 2,
            Self::Inconclusive => 3,
            Self::Cancelled => 4,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote lifecycle state from `status.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Running,
    Completed,
    Cancelled,
    Error,
}

impl RunState {
    /// Anything other than the known non-completed states counts as done.
    pub fn from_status(status: Option<&str>) -> Self {
        match status {
            Some("RUNNING") => Self::Running,
            Some("CANCELLED") => Self::Cancelled,
            Some("ERROR") => Self::Error,
            _ => Self::Completed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Body of the registration response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(default)]
    pub canary_id: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScoreStatus {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryResult {
    #[serde(default)]
    pub overall_score: Option<serde_json::Value>,
    #[serde(default, rename = "canaryReportURL")]
    pub canary_report_url: Option<String>,
    /// Interval being evaluated when interval analysis is on.
    #[serde(default)]
    pub interval_no: Option<serde_json::Value>,
}

/// One score snapshot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResponse {
    #[serde(default)]
    pub status: Option<ScoreStatus>,
    #[serde(default)]
    pub canary_result: Option<CanaryResult>,
}

impl ScoreResponse {
    pub fn state(&self) -> RunState {
        RunState::from_status(self.status.as_ref().and_then(|s| s.status.as_deref()))
    }

    pub fn report_url(&self) -> Option<&str> {
        self.canary_result
            .as_ref()
            .and_then(|r| r.canary_report_url.as_deref())
            .filter(|url| !url.is_empty())
    }

    pub fn overall_score(&self) -> Option<&serde_json::Value> {
        self.canary_result.as_ref().and_then(|r| r.overall_score.as_ref())
    }

    pub fn interval_no(&self) -> Option<String> {
        match self.canary_result.as_ref()?.interval_no.as_ref()? {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

/// In-memory record of one canary run.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRun {
    pub canary_id: String,
    pub score_url: String,
    pub report_url: Option<String>,
    /// Latest interval number reported by the service.
    pub interval_no: Option<String>,
    pub state: RunState,
    pub snapshot: Option<ScoreResponse>,
    pub score: Option<i64>,
    pub outcome: Option<Outcome>,
}

impl VerificationRun {
    pub fn new(canary_id: impl Into<String>, score_url: impl Into<String>) -> Self {
        Self {
            canary_id: canary_id.into(),
            score_url: score_url.into(),
            report_url: None,
            interval_no: None,
            state: RunState::Running,
            snapshot: None,
            score: None,
            outcome: None,
        }
    }

    fn record(&mut self, snapshot: ScoreResponse) {
        if self.report_url.is_none() {
            self.report_url = snapshot.report_url().map(str::to_string);
        }
        if let Some(interval) = snapshot.interval_no() {
            self.interval_no = Some(interval);
        }
        self.state = snapshot.state();
        self.snapshot = Some(snapshot);
    }

    /// Classify the final snapshot; stores score and outcome on the run.
    pub fn evaluate(&mut self, pass: u32, marginal: Option<u32>) -> Result<Outcome> {
        let outcome = if self.state == RunState::Cancelled {
            Outcome::Cancelled
        } else {
            let raw = self.snapshot.as_ref().and_then(ScoreResponse::overall_score);
            let score = parse_score(raw)?;
            self.score = Some(score);
            classify(score, pass, marginal)
        };
        self.outcome = Some(outcome);
        Ok(outcome)
    }

    /// Operator-facing reason for a failed interval analysis.
    ///
    /// `None` unless the run was evaluated as [`Outcome::Failed`] and
    /// `interval_analysis` is set.
    pub fn failure_reason(&self, interval_analysis: bool) -> Option<String> {
        if !interval_analysis || self.outcome != Some(Outcome::Failed) {
            return None;
        }
        Some(format!(
            "Interval Analysis Failed at intervalNo. {}",
            self.interval_no.as_deref().unwrap_or("unknown")
        ))
    }
}

/// Round to the nearest integer, ties away from zero.
pub fn round_score(score: f64) -> i64 {
    score.round() as i64
}

/// Interpret `canaryResult.overallScore`. Absent means zero.
pub fn parse_score(raw: Option<&serde_json::Value>) -> Result<i64> {
    use serde_json::Value;

    match raw {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(i),
            None => n
                .as_f64()
                .map(round_score)
                .ok_or_else(|| AnalysisError::ScoreParse(n.to_string())),
        },
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(i);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(round_score)
                .ok_or_else(|| AnalysisError::ScoreParse(s.clone()))
        }
        Some(other) => Err(AnalysisError::ScoreParse(other.to_string())),
    }
}

/// Three-tier classification; without a marginal score it is pass/fail.
pub fn classify(score: i64, pass: u32, marginal: Option<u32>) -> Outcome {
    if score >= i64::from(pass) {
        return Outcome::Successful;
    }
    match marginal {
        Some(marginal) if score >= i64::from(marginal) => Outcome::Inconclusive,
        _ => Outcome::Failed,
    }
}

/// Talks to the registration and score endpoints.
pub struct Verifier<'a> {
    transport: &'a dyn HttpTransport,
    clock: &'a dyn Clock,
    gate_url: String,
    user: String,
    policy: PollPolicy,
}

impl<'a> Verifier<'a> {
    pub fn new(
        transport: &'a dyn HttpTransport,
        clock: &'a dyn Clock,
        gate_url: impl Into<String>,
        user: impl Into<String>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            transport,
            clock,
            gate_url: gate_url.into(),
            user: user.into(),
            policy,
        }
    }

    /// Register the canary; returns a run positioned at its score URL.
    pub fn submit(&self, payload: &str) -> Result<VerificationRun> {
        let url = join_url(&self.gate_url, REGISTER_CANARY_PATH);
        let response = self
            .transport
            .send(HttpRequest::post(&url).user(&self.user).json_body(payload))
            .map_err(|e| AnalysisError::transport(&url, e))?;

        let parsed: RegistrationResponse = serde_json::from_str(&response.body)
            .map_err(|e| AnalysisError::malformed("canary registration", e))?;

        if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
            return Err(AnalysisError::RemoteRejection {
                error,
                message: parsed.message.unwrap_or_default(),
            });
        }

        let canary_id = match parsed.canary_id {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            _ => {
                return Err(AnalysisError::malformed(
                    "canary registration",
                    "canaryId missing",
                ));
            }
        };

        let score_url = response
            .header("Location")
            .filter(|l| !l.is_empty())
            .ok_or(AnalysisError::ScoreUrlNotFound)?;

        info!(canary_id = %canary_id, score_url, "canary registered");
        Ok(VerificationRun::new(canary_id, score_url))
    }

    fn fetch(&self, url: &str) -> Result<ScoreResponse> {
        let response: HttpResponse = self
            .transport
            .send(HttpRequest::get(url).user(&self.user))
            .map_err(|e| AnalysisError::transport(url, e))?;
        if response.is_server_error() {
            return Err(AnalysisError::transport(
                url,
                format!("server responded with status {}", response.status),
            ));
        }
        serde_json::from_str(&response.body).map_err(|e| AnalysisError::malformed("score", e))
    }

    /// Poll until the run leaves `RUNNING`.
    ///
    /// `on_first_snapshot` runs once, right after the first successful
    /// fetch, so the report URL can be published before the verdict.
    pub fn poll(
        &self,
        run: &mut VerificationRun,
        on_first_snapshot: &mut dyn FnMut(&VerificationRun) -> Result<()>,
    ) -> Result<()> {
        let mut failures = 0u32;
        let mut fetches = 0u32;

        loop {
            match self.fetch(&run.score_url) {
                Ok(snapshot) => {
                    fetches += 1;
                    run.record(snapshot);
                    debug!(canary_id = %run.canary_id, state = ?run.state, fetches, "score snapshot");
                    if fetches == 1 {
                        on_first_snapshot(run)?;
                    }
                    if run.state.is_terminal() {
                        info!(canary_id = %run.canary_id, state = ?run.state, fetches, "analysis finished");
                        return Ok(());
                    }
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if failures > self.policy.retry_budget {
                        return Err(AnalysisError::PollExhausted {
                            failures,
                            last_error: err.to_string(),
                        });
                    }
                    warn!(
                        canary_id = %run.canary_id,
                        attempt = failures,
                        budget = self.policy.retry_budget,
                        error = %err,
                        "score fetch failed, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
            self.clock.sleep(self.policy.interval);
        }
    }
}
