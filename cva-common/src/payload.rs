//! Canary registration payload.
//!
//! Assembly runs in two passes. The first validates every service and
//! resolves its scopes without touching the network; the second attaches
//! template references, synchronising GitOps templates as needed. A request
//! with any invalid service therefore never reaches the analysis service.

use crate::config::GateSecrets;
use crate::error::{AnalysisError, Result};
use crate::scope::{EnvLookup, resolve_scope};
use crate::spec::{AnalysisSpec, ScopeBlock};
use crate::template::{TemplateKind, TemplateSynchronizer};
use crate::window::ResolvedWindow;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Per-service fields keyed by service name.
pub type ServiceScopes = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryPayload {
    pub application: String,
    pub source_name: String,
    pub source_type: String,
    pub canary_config: CanaryConfig,
    pub canary_deployments: Vec<CanaryDeployment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryConfig {
    pub lifetime_minutes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub look_back_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    pub canary_health_check_handler: HealthCheckHandler,
    pub canary_success_criteria: SuccessCriteria,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckHandler {
    pub minimum_canary_result_score: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessCriteria {
    pub canary_result_score: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryDeployment {
    pub canary_start_time_ms: String,
    pub baseline_start_time_ms: String,
    pub canary: DeploymentScopes,
    pub baseline: DeploymentScopes,
}

/// `log` and `metric` maps for one side of the comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentScopes {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub log: ServiceScopes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metric: ServiceScopes,
}

impl DeploymentScopes {
    fn entries(&mut self, kind: TemplateKind) -> &mut ServiceScopes {
        match kind {
            TemplateKind::Log => &mut self.log,
            TemplateKind::Metric => &mut self.metric,
        }
    }
}

impl CanaryPayload {
    /// Exact bytes sent as the registration body.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AnalysisError::InvalidSpec(format!("cannot serialise canary payload: {e}")))
    }
}

/// How a block references its template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateRef {
    Version(String),
    Sha1(String),
    Name,
}

/// One validated log or metric block, scopes already resolved.
#[derive(Debug)]
struct PlannedBlock<'a> {
    kind: TemplateKind,
    service: String,
    gate: String,
    scope_variables: &'a str,
    baseline_scope: String,
    canary_scope: String,
    template: &'a str,
    version: Option<&'a str>,
}

impl PlannedBlock<'_> {
    fn entry(&self, resolved_scope: &str, template: &TemplateRef) -> BTreeMap<String, String> {
        let mut entry = BTreeMap::new();
        entry.insert(self.scope_variables.to_string(), resolved_scope.to_string());
        entry.insert("serviceGate".to_string(), self.gate.clone());
        entry.insert("template".to_string(), self.template.to_string());
        match template {
            TemplateRef::Version(version) => {
                entry.insert("templateVersion".to_string(), version.clone());
            }
            TemplateRef::Sha1(digest) => {
                entry.insert("templateSha1".to_string(), digest.clone());
            }
            TemplateRef::Name => {}
        }
        entry
    }
}

fn element_count(list: &str) -> usize {
    list.split(',').count()
}

fn plan_block<'a>(
    spec: &'a AnalysisSpec,
    service: &str,
    gate: &str,
    block: ScopeBlock<'a>,
    env: &dyn EnvLookup,
) -> Result<Option<PlannedBlock<'a>>> {
    let kind = block.kind.label();

    if block.is_empty() {
        return Ok(None);
    }
    let Some(scope_variables) = block.scope_variables else {
        return Err(AnalysisError::invalid_service(
            service,
            format!("missing {kind} Scope placeholder for the provided baseline/canary"),
        ));
    };

    let (Some(baseline), Some(canary)) = (block.baseline_scope, block.canary_scope) else {
        return Err(AnalysisError::invalid_service(
            service,
            format!("missing baseline/canary for {kind} analysis"),
        ));
    };

    let expected = element_count(scope_variables);
    if element_count(baseline) != expected || element_count(canary) != expected {
        return Err(AnalysisError::invalid_service(
            service,
            format!("mismatch in number of {kind} scope variables and baseline/canary {kind} scope"),
        ));
    }

    let Some(template) = block
        .template_name
        .or_else(|| spec.global_template(block.kind))
    else {
        return Err(AnalysisError::invalid_service(
            service,
            format!("provide either a service specific {kind} template or global {kind} template"),
        ));
    };

    Ok(Some(PlannedBlock {
        kind: block.kind,
        service: service.to_string(),
        gate: gate.to_string(),
        scope_variables,
        baseline_scope: resolve_scope(baseline, env)?,
        canary_scope: resolve_scope(canary, env)?,
        template,
        version: block.template_version,
    }))
}

/// Validate every service and resolve its scopes. No network access.
fn plan<'a>(spec: &'a AnalysisSpec, env: &dyn EnvLookup) -> Result<Vec<PlannedBlock<'a>>> {
    if spec.services.is_empty() {
        return Err(AnalysisError::NoServicesProvided);
    }

    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for (index, service) in spec.services.iter().enumerate() {
        let name = service.resolved_name(index);
        if !seen.insert(name.clone()) {
            return Err(AnalysisError::DuplicateServiceName(name));
        }
        let gate = format!("gate{}", index + 1);

        let mut contributed = false;
        for block in [service.log_block(), service.metric_block()] {
            if let Some(planned) = plan_block(spec, &name, &gate, block, env)? {
                blocks.push(planned);
                contributed = true;
            }
        }
        if !contributed {
            return Err(AnalysisError::NoAnalysisContextForService(name));
        }
    }
    Ok(blocks)
}

fn canary_config(spec: &AnalysisSpec, window: &ResolvedWindow) -> CanaryConfig {
    CanaryConfig {
        lifetime_minutes: window.lifetime_minutes.to_string(),
        look_back_type: spec.look_back().map(str::to_string),
        interval: spec.interval().map(|m| m.to_string()),
        delay: spec.delay_minutes().map(|m| m.to_string()),
        canary_health_check_handler: HealthCheckHandler {
            minimum_canary_result_score: spec.minimum_score().to_string(),
        },
        canary_success_criteria: SuccessCriteria {
            canary_result_score: spec.pass_score.to_string(),
        },
    }
}

/// Build the registration payload for `spec`.
///
/// In GitOps mode every block without a pinned template version has its
/// template synchronised through `templates` and referenced by digest.
pub fn assemble(
    spec: &AnalysisSpec,
    window: &ResolvedWindow,
    secrets: &GateSecrets,
    env: &dyn EnvLookup,
    templates: &TemplateSynchronizer<'_>,
) -> Result<CanaryPayload> {
    let blocks = plan(spec, env)?;
    debug!(blocks = blocks.len(), "service list validated");

    let mut baseline = DeploymentScopes::default();
    let mut canary = DeploymentScopes::default();
    for block in &blocks {
        let template = match block.version {
            Some(version) => TemplateRef::Version(version.to_string()),
            None if spec.gitops => {
                TemplateRef::Sha1(templates.sync(block.kind, block.template, block.scope_variables)?)
            }
            None => TemplateRef::Name,
        };
        debug!(
            service = %block.service,
            kind = %block.kind,
            template = block.template,
            reference = ?template,
            "service block added"
        );
        baseline
            .entries(block.kind)
            .insert(block.service.clone(), block.entry(&block.baseline_scope, &template));
        canary
            .entries(block.kind)
            .insert(block.service.clone(), block.entry(&block.canary_scope, &template));
    }

    let payload = CanaryPayload {
        application: spec.application.clone(),
        source_name: secrets.source_name.clone(),
        source_type: secrets.integration.source_type().to_string(),
        canary_config: canary_config(spec, window),
        canary_deployments: vec![CanaryDeployment {
            canary_start_time_ms: window.canary_start_ms.to_string(),
            baseline_start_time_ms: window.baseline_start_ms.to_string(),
            canary,
            baseline,
        }],
    };
    info!(
        application = %payload.application,
        services = spec.services.len(),
        gitops = spec.gitops,
        "assembled canary payload"
    );
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdIntegration;
    use crate::mock::{MemoryConfig, MockTransport};
    use crate::spec::ServiceSpec;
    use crate::template::template_digest;
    use std::collections::HashMap;

    fn window() -> ResolvedWindow {
        ResolvedWindow {
            baseline_start_ms: 1_660_137_300_000,
            canary_start_ms: 1_660_137_300_000,
            lifetime_minutes: 30,
        }
    }

    fn secrets() -> GateSecrets {
        GateSecrets {
            gate_url: "https://opsmx.test.tst".into(),
            user: "admin".into(),
            source_name: "sourcename".into(),
            integration: CdIntegration::ArgoCd,
        }
    }

    fn env() -> HashMap<String, String> {
        HashMap::from([
            ("STABLE_POD_HASH".to_string(), "6c9f8b5d4".to_string()),
            ("LATEST_POD_HASH".to_string(), "7d8e9f0a1".to_string()),
        ])
    }

    fn log_service() -> ServiceSpec {
        ServiceSpec {
            log_scope_variables: Some("kubernetes.pod_name".into()),
            baseline_log_scope: Some(".*{{env.STABLE_POD_HASH}}.*".into()),
            canary_log_scope: Some(".*{{env.LATEST_POD_HASH}}.*".into()),
            log_template_name: Some("loggytemp".into()),
            ..Default::default()
        }
    }

    fn metric_service() -> ServiceSpec {
        ServiceSpec {
            metric_scope_variables: Some("job_name".into()),
            baseline_metric_scope: Some("oes-datascience-br".into()),
            canary_metric_scope: Some("oes-datascience-cr".into()),
            metric_template_name: Some("metrictemplate".into()),
            ..Default::default()
        }
    }

    fn spec(services: Vec<ServiceSpec>) -> AnalysisSpec {
        AnalysisSpec {
            application: "testapp".into(),
            pass_score: 80,
            lifetime_minutes: Some(30),
            services,
            ..Default::default()
        }
    }

    fn run(spec: &AnalysisSpec, transport: &MockTransport, config: &MemoryConfig) -> Result<CanaryPayload> {
        let templates = TemplateSynchronizer::new(transport, config, "https://opsmx.test.tst", "admin");
        assemble(spec, &window(), &secrets(), &env(), &templates)
    }

    fn assemble_offline(spec: &AnalysisSpec) -> Result<CanaryPayload> {
        run(spec, &MockTransport::new(), &MemoryConfig::default())
    }

    fn service_message(spec: &AnalysisSpec) -> String {
        assemble_offline(spec).unwrap_err().to_string()
    }

    #[test]
    fn test_payload_shape() {
        let spec = AnalysisSpec {
            marginal_score: Some(60),
            interval_time: Some(3),
            look_back_type: Some("growing".into()),
            delay: Some(1),
            ..spec(vec![log_service(), metric_service()])
        };
        let payload = assemble_offline(&spec).unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();

        assert_eq!(json["application"], "testapp");
        assert_eq!(json["sourceName"], "sourcename");
        assert_eq!(json["sourceType"], "argocd");
        let config = &json["canaryConfig"];
        assert_eq!(config["lifetimeMinutes"], "30");
        assert_eq!(config["lookBackType"], "growing");
        assert_eq!(config["interval"], "3");
        assert_eq!(config["delay"], "1");
        assert_eq!(config["canaryHealthCheckHandler"]["minimumCanaryResultScore"], "60");
        assert_eq!(config["canarySuccessCriteria"]["canaryResultScore"], "80");

        let deployment = &json["canaryDeployments"][0];
        assert_eq!(deployment["canaryStartTimeMs"], "1660137300000");
        assert_eq!(deployment["baselineStartTimeMs"], "1660137300000");

        let baseline_log = &deployment["baseline"]["log"]["service1"];
        assert_eq!(baseline_log["kubernetes.pod_name"], ".*6c9f8b5d4.*");
        assert_eq!(baseline_log["serviceGate"], "gate1");
        assert_eq!(baseline_log["template"], "loggytemp");
        assert_eq!(deployment["canary"]["log"]["service1"]["kubernetes.pod_name"], ".*7d8e9f0a1.*");

        let canary_metric = &deployment["canary"]["metric"]["service2"];
        assert_eq!(canary_metric["job_name"], "oes-datascience-cr");
        assert_eq!(canary_metric["serviceGate"], "gate2");
        assert!(canary_metric.get("templateSha1").is_none());
    }

    #[test]
    fn test_optional_config_fields_omitted() {
        let payload = assemble_offline(&spec(vec![metric_service()])).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        let config = &json["canaryConfig"];
        assert!(config.get("interval").is_none());
        assert!(config.get("delay").is_none());
        assert!(config.get("lookBackType").is_none());
        assert_eq!(config["canaryHealthCheckHandler"]["minimumCanaryResultScore"], "80");
        assert!(json["canaryDeployments"][0]["baseline"].get("log").is_none());
    }

    #[test]
    fn test_no_services() {
        assert_eq!(
            assemble_offline(&spec(vec![])).unwrap_err(),
            AnalysisError::NoServicesProvided
        );
    }

    #[test]
    fn test_service_without_blocks_fails_whole_request() {
        let spec = spec(vec![metric_service(), ServiceSpec::default()]);
        assert_eq!(
            assemble_offline(&spec).unwrap_err(),
            AnalysisError::NoAnalysisContextForService("service2".into())
        );
    }

    #[test]
    fn test_duplicate_service_names() {
        let named = ServiceSpec {
            service_name: Some("service2".into()),
            ..log_service()
        };
        let spec = spec(vec![named, metric_service()]);
        assert_eq!(
            assemble_offline(&spec).unwrap_err(),
            AnalysisError::DuplicateServiceName("service2".into())
        );
    }

    #[test]
    fn test_scope_count_mismatch_before_network() {
        let mismatched = ServiceSpec {
            metric_scope_variables: Some("a,b".into()),
            baseline_metric_scope: Some("x".into()),
            canary_metric_scope: Some("x".into()),
            ..metric_service()
        };
        let spec = AnalysisSpec {
            gitops: true,
            ..spec(vec![log_service(), mismatched])
        };
        let transport = MockTransport::new();
        let err = run(&spec, &transport, &MemoryConfig::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "mismatch in number of metric scope variables and baseline/canary metric scope of service 'service2'"
        );
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_block_validation_messages() {
        let no_placeholder = ServiceSpec {
            log_scope_variables: None,
            ..log_service()
        };
        assert_eq!(
            service_message(&spec(vec![no_placeholder])),
            "missing log Scope placeholder for the provided baseline/canary of service 'service1'"
        );

        let no_canary = ServiceSpec {
            canary_metric_scope: None,
            ..metric_service()
        };
        assert_eq!(
            service_message(&spec(vec![no_canary])),
            "missing baseline/canary for metric analysis of service 'service1'"
        );

        let no_template = ServiceSpec {
            log_template_name: None,
            ..log_service()
        };
        assert_eq!(
            service_message(&spec(vec![no_template])),
            "provide either a service specific log template or global log template of service 'service1'"
        );
    }

    #[test]
    fn test_blank_block_is_skipped() {
        let blank_log = ServiceSpec {
            log_scope_variables: Some(String::new()),
            baseline_log_scope: Some("  ".into()),
            canary_log_scope: Some(String::new()),
            log_template_name: Some("loggytemp".into()),
            ..metric_service()
        };
        let json = serde_json::to_value(assemble_offline(&spec(vec![blank_log])).unwrap()).unwrap();
        let deployment = &json["canaryDeployments"][0];
        assert!(deployment["canary"].get("log").is_none());
        assert_eq!(deployment["canary"]["metric"]["service1"]["job_name"], "oes-datascience-cr");

        let canary_only = ServiceSpec {
            log_scope_variables: Some(" ".into()),
            baseline_log_scope: None,
            ..log_service()
        };
        assert_eq!(
            service_message(&spec(vec![canary_only])),
            "missing log Scope placeholder for the provided baseline/canary of service 'service1'"
        );
    }

    #[test]
    fn test_global_template_fallback() {
        let service = ServiceSpec {
            metric_template_name: None,
            ..metric_service()
        };
        let spec = AnalysisSpec {
            global_metric_template: Some("global-metrics".into()),
            ..spec(vec![service])
        };
        let payload = assemble_offline(&spec).unwrap();
        assert_eq!(
            payload.canary_deployments[0].baseline.metric["service1"]["template"],
            "global-metrics"
        );
    }

    #[test]
    fn test_missing_env_variable_aborts() {
        let service = ServiceSpec {
            baseline_log_scope: Some(".*{{env.UNSET_HASH}}.*".into()),
            ..log_service()
        };
        assert_eq!(
            assemble_offline(&spec(vec![service])).unwrap_err(),
            AnalysisError::MissingEnvironmentVariable("UNSET_HASH".into())
        );
    }

    #[test]
    fn test_gitops_attaches_digest() {
        let template = br#"{"templateName":"metrictemplate","data":{}}"#;
        let config = MemoryConfig::default().with_template("metrictemplate", template);
        let transport = MockTransport::new();
        transport.push_ok(200, "true");

        let spec = AnalysisSpec {
            gitops: true,
            ..spec(vec![metric_service()])
        };
        let payload = run(&spec, &transport, &config).unwrap();
        let entry = &payload.canary_deployments[0].canary.metric["service1"];
        assert_eq!(entry["templateSha1"], template_digest(template));
        assert!(!entry.contains_key("templateVersion"));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_pinned_version_skips_sync() {
        let service = ServiceSpec {
            log_template_version: Some("2".into()),
            ..log_service()
        };
        let spec = AnalysisSpec {
            gitops: true,
            ..spec(vec![service])
        };
        let transport = MockTransport::new();
        let payload = run(&spec, &transport, &MemoryConfig::default()).unwrap();
        let entry = &payload.canary_deployments[0].baseline.log["service1"];
        assert_eq!(entry["templateVersion"], "2");
        assert!(!entry.contains_key("templateSha1"));
        assert!(transport.requests().is_empty());
    }
}
