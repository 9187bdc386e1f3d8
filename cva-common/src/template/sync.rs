//! Content-addressed template registration.

use super::{TemplateKind, canonicalize};
use crate::config::ConfigSource;
use crate::error::{AnalysisError, Result};
use crate::transport::{HttpRequest, HttpTransport, join_url};
use serde::Deserialize;
use tracing::{debug, info};

/// Template endpoint path under the gate URL.
pub const TEMPLATE_API_PATH: &str = "/autopilot/api/v5/external/template";

const CREATED: &str = "CREATED";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_message: Option<serde_json::Value>,
}

impl RegisterResponse {
    fn is_created(&self) -> bool {
        self.status.as_deref() == Some(CREATED) || self.error.as_deref() == Some(CREATED)
    }

    fn rejection_message(&self) -> String {
        let listed = match &self.error_message {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        if !listed.is_empty() {
            return listed;
        }
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .or_else(|| self.status.clone().map(|s| format!("unexpected status {s}")))
            .unwrap_or_else(|| "template registration was not acknowledged".to_string())
    }
}

/// Makes local templates available on the analysis service.
///
/// Every call re-verifies against the remote registry; the registry is the
/// only record of what already exists.
pub struct TemplateSynchronizer<'a> {
    transport: &'a dyn HttpTransport,
    source: &'a dyn ConfigSource,
    gate_url: String,
    user: String,
}

impl<'a> TemplateSynchronizer<'a> {
    pub fn new(
        transport: &'a dyn HttpTransport,
        source: &'a dyn ConfigSource,
        gate_url: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            source,
            gate_url: gate_url.into(),
            user: user.into(),
        }
    }

    fn template_url(&self, kind: TemplateKind, name: &str, digest: &str) -> String {
        format!(
            "{}?sha1={digest}&templateType={}&templateName={}",
            join_url(&self.gate_url, TEMPLATE_API_PATH),
            kind.as_str(),
            urlencoding::encode(name)
        )
    }

    /// Verify, and register if needed, template `name`; returns its digest.
    pub fn sync(&self, kind: TemplateKind, name: &str, filter_key: &str) -> Result<String> {
        let raw = self.source.template(name)?;
        let canonical = canonicalize(kind, name, &raw, filter_key)?;
        let url = self.template_url(kind, name, &canonical.digest);

        let response = self
            .transport
            .send(HttpRequest::get(&url).user(&self.user).header("Content-Type", "application/json"))
            .map_err(|e| AnalysisError::transport(&url, e))?;
        let registered: bool = serde_json::from_str(response.body.trim()).map_err(|e| {
            AnalysisError::malformed(&format!("template '{name}' verification"), e)
        })?;

        if registered {
            debug!(template = name, digest = %canonical.digest, "template already registered");
            return Ok(canonical.digest);
        }

        let body = String::from_utf8_lossy(&canonical.bytes).into_owned();
        let response = self
            .transport
            .send(HttpRequest::post(&url).user(&self.user).json_body(body))
            .map_err(|e| AnalysisError::transport(&url, e))?;
        let parsed: RegisterResponse = serde_json::from_str(&response.body).map_err(|e| {
            AnalysisError::malformed(&format!("template '{name}' registration"), e)
        })?;

        if !parsed.is_created() {
            return Err(AnalysisError::TemplateRejected {
                template: name.to_string(),
                message: parsed.rejection_message(),
            });
        }

        info!(template = name, kind = %kind, digest = %canonical.digest, "registered template");
        Ok(canonical.digest)
    }
}
