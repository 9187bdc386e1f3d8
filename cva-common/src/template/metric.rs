//! Metric template schema.

use super::{TemplateKind, TemplateSchema};
use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One metric inside a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nan_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_direction: Option<String>,
    #[serde(
        default,
        rename(
            deserialize = "customThresholdHigherPercentage",
            serialize = "customThresholdHigher"
        ),
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_threshold_higher: Option<i64>,
    #[serde(
        default,
        rename(
            deserialize = "customThresholdLowerPercentage",
            serialize = "customThresholdLower"
        ),
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_threshold_lower: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<String>,
    #[serde(default)]
    pub watchlist: bool,
}

/// A named group of metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub metrics: Vec<MetricEntry>,
}

/// `metricTemplateSetup` block, emitted as `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSetup {
    #[serde(
        default,
        rename = "percent_diff_threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub percent_diff_threshold: Option<serde_json::Value>,
    #[serde(default)]
    pub is_normalize: bool,
    #[serde(default)]
    pub groups: Vec<MetricGroup>,
}

/// Metric analysis template, YAML in and canonical JSON out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTemplate {
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub filter_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(default)]
    pub advanced_provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nan_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<String>,
    #[serde(rename(deserialize = "metricTemplateSetup", serialize = "data"), default)]
    pub setup: MetricSetup,
}

/// Map `low|medium|high` (any case) to the service's criticality names.
pub fn normalize_criticality(template: &str, value: &str) -> Result<String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" => Ok("Normal".to_string()),
        "medium" => Ok("MustHave".to_string()),
        "high" => Ok("Critical".to_string()),
        _ => Err(AnalysisError::InvalidCriticality {
            template: template.to_string(),
            value: value.to_string(),
        }),
    }
}

fn blank_to_none(value: &mut Option<String>) {
    if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
        *value = None;
    }
}

fn normalize_in_place(template: &str, value: &mut Option<String>) -> Result<()> {
    if let Some(raw) = value.as_deref() {
        *value = Some(normalize_criticality(template, raw)?);
    }
    Ok(())
}

impl MetricTemplate {
    fn entries_mut(&mut self) -> impl Iterator<Item = &mut MetricEntry> {
        self.setup
            .groups
            .iter_mut()
            .flat_map(|group| group.metrics.iter_mut())
    }

    /// Push a global value onto every entry lacking its own, then clear it.
    fn flatten_field<T: Clone>(
        &mut self,
        template: &str,
        field: &str,
        global: fn(&mut MetricTemplate) -> &mut Option<T>,
        entry: fn(&mut MetricEntry) -> &mut Option<T>,
    ) {
        let Some(value) = global(self).take() else {
            debug!(
                template,
                field, "field not defined at the global level, metric level values are kept"
            );
            return;
        };
        let mut overridden = 0usize;
        for metric in self.entries_mut() {
            let slot = entry(metric);
            if slot.is_some() {
                overridden += 1;
            } else {
                *slot = Some(value.clone());
            }
        }
        if overridden > 0 {
            warn!(
                template,
                field,
                overridden,
                "field defined both globally and on individual metrics, metric level values win"
            );
        }
    }

    fn inject_identity(&mut self, name: &str, filter_key: &str) {
        if !self.template_name.is_empty() && self.template_name != name {
            warn!(
                template = name,
                declared = %self.template_name,
                "templateName defined in metric template will be overridden"
            );
        }
        if !self.filter_key.is_empty() && self.filter_key != filter_key {
            warn!(
                template = name,
                declared = %self.filter_key,
                filter_key,
                "filterKey defined in metric template will be overridden"
            );
        }
        self.template_name = name.to_string();
        self.filter_key = filter_key.to_string();
    }

    fn clear_blanks(&mut self) {
        blank_to_none(&mut self.account_name);
        blank_to_none(&mut self.metric_type);
        blank_to_none(&mut self.nan_strategy);
        blank_to_none(&mut self.criticality);
        for metric in self.entries_mut() {
            blank_to_none(&mut metric.metric_type);
            blank_to_none(&mut metric.nan_strategy);
            blank_to_none(&mut metric.account_name);
            blank_to_none(&mut metric.criticality);
        }
    }

    fn normalize_criticalities(&mut self, name: &str) -> Result<()> {
        normalize_in_place(name, &mut self.criticality)?;
        for metric in self.entries_mut() {
            normalize_in_place(name, &mut metric.criticality)?;
        }
        Ok(())
    }
}

impl TemplateSchema for MetricTemplate {
    const KIND: TemplateKind = TemplateKind::Metric;

    fn normalize(&mut self, name: &str, filter_key: &str) -> Result<()> {
        self.inject_identity(name, filter_key);
        self.clear_blanks();
        self.normalize_criticalities(name)?;

        if self.setup.groups.is_empty() {
            return Err(AnalysisError::EmptyTemplateGroups(name.to_string()));
        }

        self.flatten_field(name, "metricType", |t| &mut t.metric_type, |m| &mut m.metric_type);
        self.flatten_field(
            name,
            "metricWeight",
            |t| &mut t.metric_weight,
            |m| &mut m.metric_weight,
        );
        self.flatten_field(name, "nanStrategy", |t| &mut t.nan_strategy, |m| &mut m.nan_strategy);
        self.flatten_field(name, "criticality", |t| &mut t.criticality, |m| &mut m.criticality);
        self.flatten_field(name, "accountName", |t| &mut t.account_name, |m| &mut m.account_name);
        Ok(())
    }
}
