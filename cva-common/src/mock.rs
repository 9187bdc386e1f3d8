//! Deterministic test doubles for the injected capabilities.
//!
//! None of these touch the network, the filesystem or the real clock, so a
//! full run can be scripted end to end in-process.

use crate::clock::Clock;
use crate::config::ConfigSource;
use crate::error::{AnalysisError, Result};
use crate::report::{CanaryDetails, StatusReporter};
use crate::spec::AnalysisSpec;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::verify::Outcome;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`HttpTransport`] replaying scripted responses in FIFO order.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<std::result::Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full response.
    pub fn push(&self, response: HttpResponse) {
        lock(&self.responses).push_back(Ok(response));
    }

    /// Queue a response with status and body only.
    pub fn push_ok(&self, status: u16, body: impl Into<String>) {
        self.push(HttpResponse::new(status, body));
    }

    /// Queue a connection-level failure.
    pub fn push_err(&self, reason: impl Into<String>) {
        lock(&self.responses).push_back(Err(TransportError(reason.into())));
    }

    /// Every request sent so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Requests whose URL starts with `prefix`.
    pub fn requests_to(&self, prefix: &str) -> Vec<HttpRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }
}

impl HttpTransport for MockTransport {
    fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let description = format!("{} {}", request.method, request.url);
        lock(&self.requests).push(request);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError(format!("no scripted response for {description}"))))
    }
}

/// [`Clock`] frozen at a fixed instant; sleeps are recorded, not taken.
#[derive(Debug)]
pub struct MockClock {
    now: DateTime<Utc>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::at(Utc.timestamp_opt(1_660_137_300, 0).single().unwrap_or_default())
    }
}

impl MockClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
    }
}

/// One call observed by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Started(CanaryDetails),
    Outcome(CanaryDetails, Outcome),
    Error(String),
}

/// [`StatusReporter`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
    fail_with: Option<String>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter whose every call fails after being recorded.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_with: Some(reason.into()),
        }
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        lock(&self.events).clone()
    }

    fn record(&self, event: ReportEvent) -> Result<()> {
        lock(&self.events).push(event);
        match &self.fail_with {
            Some(reason) => Err(AnalysisError::Report(reason.clone())),
            None => Ok(()),
        }
    }
}

impl StatusReporter for RecordingReporter {
    fn report_started(&self, details: &CanaryDetails) -> Result<()> {
        self.record(ReportEvent::Started(details.clone()))
    }

    fn report_outcome(&self, details: &CanaryDetails, outcome: Outcome) -> Result<()> {
        self.record(ReportEvent::Outcome(details.clone(), outcome))
    }

    fn report_error(&self, message: &str) -> Result<()> {
        self.record(ReportEvent::Error(message.to_string()))
    }
}

/// In-memory [`ConfigSource`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    spec: Option<AnalysisSpec>,
    secrets: HashMap<String, String>,
    templates: HashMap<String, Vec<u8>>,
}

impl MemoryConfig {
    pub fn with_spec(mut self, spec: AnalysisSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }

    pub fn with_template(mut self, name: impl Into<String>, body: impl AsRef<[u8]>) -> Self {
        self.templates.insert(name.into(), body.as_ref().to_vec());
        self
    }

    fn missing(what: &str, hint: &str) -> AnalysisError {
        AnalysisError::MissingInput {
            path: what.to_string(),
            reason: "not present in memory config".to_string(),
            hint: hint.to_string(),
        }
    }
}

impl ConfigSource for MemoryConfig {
    fn provider_config(&self) -> Result<AnalysisSpec> {
        self.spec
            .clone()
            .ok_or_else(|| Self::missing("provider/providerConfig", "call with_spec"))
    }

    fn secret(&self, key: &str) -> Result<String> {
        self.secrets
            .get(key)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| Self::missing(&format!("secrets/{key}"), "call with_secret"))
    }

    fn template(&self, name: &str) -> Result<Vec<u8>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| Self::missing(&format!("templates/{name}"), "call with_template"))
    }
}
