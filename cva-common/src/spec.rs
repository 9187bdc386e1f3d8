//! Declarative analysis input.
//!
//! [`AnalysisSpec`] is deserialised from the mounted provider config and
//! checked with [`AnalysisSpec::validate`] before anything touches the clock
//! or the network. Per-service block checks live in the payload assembler,
//! where the service name is known.

use crate::error::{AnalysisError, Result};
use crate::template::TemplateKind;
use serde::{Deserialize, Serialize};

/// Minimum accepted value for `lifetimeMinutes` and `intervalTime`.
pub const MIN_WINDOW_MINUTES: u32 = 3;

/// The whole declarative request for one canary run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSpec {
    pub application: String,
    /// Overrides the `user` secret when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Overrides the gate URL secret when set.
    #[serde(
        default,
        rename = "opsmxIsdUrl",
        alias = "gateUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub gate_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime_minutes: Option<u32>,
    pub pass_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marginal_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub look_back_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    #[serde(default)]
    pub gitops: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_log_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_metric_template: Option<String>,
    #[serde(default, rename = "serviceList", alias = "services")]
    pub services: Vec<ServiceSpec>,
}

/// One compared service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_scope_variables: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_log_scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_log_scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_template_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_scope_variables: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_metric_scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary_metric_scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_template_version: Option<String>,
}

/// Borrowed view over the log or metric half of a [`ServiceSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeBlock<'a> {
    pub kind: TemplateKind,
    pub scope_variables: Option<&'a str>,
    pub baseline_scope: Option<&'a str>,
    pub canary_scope: Option<&'a str>,
    pub template_name: Option<&'a str>,
    pub template_version: Option<&'a str>,
}

impl ScopeBlock<'_> {
    /// True when no field of the block was supplied.
    pub fn is_empty(&self) -> bool {
        self.scope_variables.is_none() && self.baseline_scope.is_none() && self.canary_scope.is_none()
    }
}

/// Treat `Some("")` the same as `None`; YAML configs often carry empty keys.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl ServiceSpec {
    /// Name used in the payload: explicit, or `service<index+1>`.
    pub fn resolved_name(&self, index: usize) -> String {
        non_empty(&self.service_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("service{}", index + 1))
    }

    pub fn log_block(&self) -> ScopeBlock<'_> {
        ScopeBlock {
            kind: TemplateKind::Log,
            scope_variables: non_empty(&self.log_scope_variables),
            baseline_scope: non_empty(&self.baseline_log_scope),
            canary_scope: non_empty(&self.canary_log_scope),
            template_name: non_empty(&self.log_template_name),
            template_version: non_empty(&self.log_template_version),
        }
    }

    pub fn metric_block(&self) -> ScopeBlock<'_> {
        ScopeBlock {
            kind: TemplateKind::Metric,
            scope_variables: non_empty(&self.metric_scope_variables),
            baseline_scope: non_empty(&self.baseline_metric_scope),
            canary_scope: non_empty(&self.canary_metric_scope),
            template_name: non_empty(&self.metric_template_name),
            template_version: non_empty(&self.metric_template_version),
        }
    }
}

impl AnalysisSpec {
    /// `lifetimeMinutes`, with zero meaning unset.
    pub fn lifetime(&self) -> Option<u32> {
        self.lifetime_minutes.filter(|m| *m != 0)
    }

    pub fn interval(&self) -> Option<u32> {
        self.interval_time.filter(|m| *m != 0)
    }

    pub fn delay_minutes(&self) -> Option<u32> {
        self.delay.filter(|m| *m != 0)
    }

    pub fn end(&self) -> Option<&str> {
        non_empty(&self.end_time)
    }

    pub fn baseline_start(&self) -> Option<&str> {
        non_empty(&self.baseline_start_time)
    }

    pub fn canary_start(&self) -> Option<&str> {
        non_empty(&self.canary_start_time)
    }

    pub fn look_back(&self) -> Option<&str> {
        non_empty(&self.look_back_type)
    }

    /// Global template for the given block kind.
    pub fn global_template(&self, kind: TemplateKind) -> Option<&str> {
        match kind {
            TemplateKind::Log => non_empty(&self.global_log_template),
            TemplateKind::Metric => non_empty(&self.global_metric_template),
        }
    }

    /// Score passed as the minimum acceptable result to the service.
    pub fn minimum_score(&self) -> u32 {
        self.marginal_score.unwrap_or(self.pass_score)
    }

    /// Check the request-level invariants.
    pub fn validate(&self) -> Result<()> {
        if let Some(marginal) = self.marginal_score
            && self.pass_score <= marginal
        {
            return Err(AnalysisError::InvalidSpec(
                "pass score cannot be less than or equal to marginal score".to_string(),
            ));
        }

        match (self.lifetime(), self.end()) {
            (None, None) => {
                return Err(AnalysisError::InvalidSpec(
                    "provide either lifetimeMinutes or end time".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(AnalysisError::InvalidSpec(
                    "provide either lifetimeMinutes or end time, not both".to_string(),
                ));
            }
            (None, Some(_)) if self.canary_start() != self.baseline_start() => {
                return Err(AnalysisError::InvalidSpec(
                    "both canaryStartTime and baselineStartTime should be kept same while using endTime argument for analysis"
                        .to_string(),
                ));
            }
            _ => {}
        }

        if let Some(lifetime) = self.lifetime()
            && lifetime < MIN_WINDOW_MINUTES
        {
            return Err(AnalysisError::InvalidSpec(format!(
                "lifetimeMinutes cannot be less than {MIN_WINDOW_MINUTES} minutes"
            )));
        }

        if let Some(interval) = self.interval()
            && interval < MIN_WINDOW_MINUTES
        {
            return Err(AnalysisError::InvalidSpec(format!(
                "intervalTime cannot be less than {MIN_WINDOW_MINUTES} minutes"
            )));
        }

        if self.interval().is_some() != self.look_back().is_some() {
            return Err(AnalysisError::InvalidSpec(
                "intervalTime should be given along with lookBackType to perform interval analysis"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
