//! Log template schema.

use super::{TemplateKind, TemplateSchema};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Error topics merged into every log template unless disabled, in order.
pub const DEFAULT_ERROR_TOPICS: &[(&str, &str)] = &[
    ("OnOutOfMemoryError", "CRITICAL"),
    ("StackOverflowError", "CRITICAL"),
    ("ClassNotFoundException", "CRITICAL"),
    ("FileNotFoundException", "ERROR"),
    ("ArrayIndexOutOfBounds", "ERROR"),
    ("NullPointerException", "ERROR"),
    ("StringIndexOutOfBoundsException", "ERROR"),
    ("FATAL", "CRITICAL"),
    ("SEVERE", "CRITICAL"),
    ("ERROR", "ERROR"),
    ("WARN", "WARN"),
    ("WARNING", "WARN"),
];

/// Whether an error topic came from the user or the builtin set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicOrigin {
    #[default]
    Custom,
    Default,
}

/// `errorString` to severity rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTopic {
    #[serde(rename(deserialize = "errorString", serialize = "string"))]
    pub error_string: String,
    pub topic: String,
    #[serde(rename = "type", default, skip_deserializing)]
    pub origin: TopicOrigin,
}

/// `errorString` to user tag rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTag {
    #[serde(rename(deserialize = "errorString", serialize = "string"))]
    pub error_string: String,
    pub tag: String,
}

/// Log analysis template, YAML in and canonical JSON out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTemplate {
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub filter_key: String,
    #[serde(default, skip_deserializing)]
    pub tag_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contextual_cluster: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contextual_window_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_scoring: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg_ex_filter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg_ex_response_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regular_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_baseline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<String>,
    #[serde(default, skip_serializing)]
    pub disable_default_error_topics: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<CustomTag>,
    #[serde(default)]
    pub error_topics: Vec<ErrorTopic>,
}

impl LogTemplate {
    fn set_template_name(&mut self, name: &str) {
        if !self.template_name.is_empty() && self.template_name != name {
            warn!(
                template = name,
                declared = %self.template_name,
                "templateName defined in log template will be overridden"
            );
        }
        self.template_name = name.to_string();
    }

    fn set_filter_key(&mut self, name: &str, filter_key: &str) {
        if !self.filter_key.is_empty() && self.filter_key != filter_key {
            warn!(
                template = name,
                declared = %self.filter_key,
                filter_key,
                "filterKey defined in log template will be overridden"
            );
        }
        self.filter_key = filter_key.to_string();
    }

    fn merge_default_error_topics(&mut self, name: &str) {
        if self.disable_default_error_topics {
            debug!(template = name, "default error topics disabled");
            return;
        }
        for (error_string, topic) in DEFAULT_ERROR_TOPICS {
            let declared = self
                .error_topics
                .iter()
                .any(|t| t.error_string == *error_string);
            if !declared {
                self.error_topics.push(ErrorTopic {
                    error_string: (*error_string).to_string(),
                    topic: (*topic).to_string(),
                    origin: TopicOrigin::Default,
                });
            }
        }
    }
}

impl TemplateSchema for LogTemplate {
    const KIND: TemplateKind = TemplateKind::Log;

    fn normalize(&mut self, name: &str, filter_key: &str) -> Result<()> {
        self.set_template_name(name);
        self.set_filter_key(name, filter_key);
        self.tag_enabled = !self.tags.is_empty();
        self.merge_default_error_topics(name);
        Ok(())
    }
}
