//! GitOps template normalisation and content addressing.
//!
//! A template is read by name, normalised into the canonical JSON the
//! analysis service stores, and identified by the SHA-1 of those bytes. The
//! same digest is the dedup key for registration and the `templateSha1`
//! payload reference.
//!
//! Two schemas exist, [`LogTemplate`] and [`MetricTemplate`]; both implement
//! [`TemplateSchema`] so the YAML path is one generic function.

mod log;
mod metric;
mod sync;

pub use log::{CustomTag, DEFAULT_ERROR_TOPICS, ErrorTopic, LogTemplate, TopicOrigin};
pub use metric::{MetricEntry, MetricGroup, MetricSetup, MetricTemplate, normalize_criticality};
pub use sync::{TEMPLATE_API_PATH, TemplateSynchronizer};

use crate::error::{AnalysisError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use std::fmt;

/// Which analysis a template drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Log,
    Metric,
}

impl TemplateKind {
    /// Value of the `templateType` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "LOG",
            Self::Metric => "METRIC",
        }
    }

    /// Lower-case label used in validation messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Metric => "metric",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A template schema that can be normalised in place.
pub trait TemplateSchema: Serialize + DeserializeOwned {
    const KIND: TemplateKind;

    /// Apply injections, defaults and checks for template `name`.
    fn normalize(&mut self, name: &str, filter_key: &str) -> Result<()>;
}

/// Canonical template bytes with their digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTemplate {
    pub name: String,
    pub kind: TemplateKind,
    pub bytes: Vec<u8>,
    pub digest: String,
}

/// SHA-1 hex digest of canonical template bytes.
pub fn template_digest(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

fn parse_json_object(raw: &[u8]) -> Option<serde_json::Map<String, serde_json::Value>> {
    serde_json::from_slice(raw).ok()
}

fn normalize_yaml<T: TemplateSchema>(raw: &[u8], name: &str, filter_key: &str) -> Result<Vec<u8>> {
    let mut template: T =
        serde_yaml_ng::from_slice(raw).map_err(|e| AnalysisError::TemplateInvalid {
            template: name.to_string(),
            reason: e.to_string(),
        })?;
    template.normalize(name, filter_key)?;
    serde_json::to_vec(&template).map_err(|e| AnalysisError::TemplateInvalid {
        template: name.to_string(),
        reason: e.to_string(),
    })
}

/// Produce the canonical bytes and digest for a raw template body.
///
/// JSON bodies are taken as-is but must carry a matching `templateName`.
/// Anything else is parsed as YAML of the schema selected by `kind`.
pub fn canonicalize(
    kind: TemplateKind,
    name: &str,
    raw: &[u8],
    filter_key: &str,
) -> Result<CanonicalTemplate> {
    let bytes = match parse_json_object(raw) {
        Some(object) => {
            let found = object
                .get("templateName")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if found != name {
                return Err(AnalysisError::TemplateNameMismatch {
                    template: name.to_string(),
                    found: found.to_string(),
                });
            }
            raw.to_vec()
        }
        None => match kind {
            TemplateKind::Log => normalize_yaml::<LogTemplate>(raw, name, filter_key)?,
            TemplateKind::Metric => normalize_yaml::<MetricTemplate>(raw, name, filter_key)?,
        },
    };

    let digest = template_digest(&bytes);
    Ok(CanonicalTemplate {
        name: name.to_string(),
        kind,
        bytes,
        digest,
    })
}
