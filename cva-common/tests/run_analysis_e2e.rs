//! Full runs over a mounted config directory and a scripted analysis service.

mod common;

use common::{GATE_URL, MountFixture, SCORE_URL, init_test_logging, score_body};
use cva_common::mock::{MockClock, MockTransport, RecordingReporter, ReportEvent};
use cva_common::{
    AnalysisError, Collaborators, EXIT_ERROR, HttpResponse, Method, MountedConfig, Outcome,
    PollPolicy, RunOptions, RunReport, exit_code, run_analysis,
};
use std::collections::HashMap;
use std::time::Duration;

const METRIC_ONLY: &str = r#"
application: testapp
lifetimeMinutes: 30
passScore: 80
serviceList:
  - serviceName: service1
    metricScopeVariables: "${namespace_key},${pod_key}"
    baselineMetricScope: "argocd,{{env.STABLE_POD_HASH}}"
    canaryMetricScope: "argocd,{{env.LATEST_POD_HASH}}"
    metricTemplateName: metrictemplate
    metricTemplateVersion: "1"
"#;

const INTERVAL_ANALYSIS: &str = r#"
application: testapp
lifetimeMinutes: 30
passScore: 80
intervalTime: 5
lookBackType: growing
serviceList:
  - serviceName: service1
    metricScopeVariables: "${namespace_key},${pod_key}"
    baselineMetricScope: "argocd,{{env.STABLE_POD_HASH}}"
    canaryMetricScope: "argocd,{{env.LATEST_POD_HASH}}"
    metricTemplateName: metrictemplate
    metricTemplateVersion: "1"
"#;

const GITOPS_TWO_SERVICES: &str = r#"
application: testapp
lifetimeMinutes: 30
passScore: 80
marginalScore: 60
gitops: true
globalMetricTemplate: metrictemplate
serviceList:
  - serviceName: service1
    metricScopeVariables: "${namespace_key},${pod_key}"
    baselineMetricScope: "argocd,{{env.STABLE_POD_HASH}}"
    canaryMetricScope: "argocd,{{env.LATEST_POD_HASH}}"
  - serviceName: service2
    metricScopeVariables: "${namespace_key},${pod_key}"
    baselineMetricScope: "argocd,{{env.STABLE_POD_HASH}}"
    canaryMetricScope: "argocd,{{env.LATEST_POD_HASH}}"
"#;

const METRIC_TEMPLATE: &str = r#"
accountName: prometheus
advancedProvider: PROMETHEUS
metricTemplateSetup:
  percent_diff_threshold: hard
  isNormalize: false
  groups:
    - group: cpu
      metrics:
        - name: container_cpu_usage
          metricType: ADVANCED
          riskDirection: Higher
          criticality: high
"#;

struct Run {
    transport: MockTransport,
    clock: MockClock,
    reporter: RecordingReporter,
    env: HashMap<String, String>,
    policy: PollPolicy,
}

impl Run {
    fn new() -> Self {
        Self {
            transport: MockTransport::new(),
            clock: MockClock::default(),
            reporter: RecordingReporter::new(),
            env: HashMap::from([
                ("STABLE_POD_HASH".to_string(), "6c9f8b5d4".to_string()),
                ("LATEST_POD_HASH".to_string(), "7d8e9f0a1".to_string()),
            ]),
            policy: PollPolicy::default(),
        }
    }

    fn registered(&self) {
        self.transport.push(
            HttpResponse::new(200, r#"{"canaryId":1424}"#).with_header("Location", SCORE_URL),
        );
    }

    fn execute(&self, mount: &MountFixture) -> cva_common::Result<RunReport> {
        let config = MountedConfig::new(mount.root());
        let collaborators = Collaborators {
            config: &config,
            transport: &self.transport,
            clock: &self.clock,
            env: &self.env,
            reporter: &self.reporter,
        };
        run_analysis(
            &collaborators,
            &RunOptions {
                policy: self.policy,
                dry_run: false,
            },
        )
    }

    fn payload(&self) -> serde_json::Value {
        let request = self
            .transport
            .requests_to(&format!("{GATE_URL}/autopilot/api/v5/registerCanary"))
            .remove(0);
        serde_json::from_str(request.body.as_deref().unwrap()).unwrap()
    }
}

#[test]
fn test_metric_only_run_succeeds() {
    init_test_logging();
    let mount = MountFixture::new(METRIC_ONLY);
    let run = Run::new();
    run.registered();
    run.transport.push_ok(200, score_body("RUNNING", None));
    run.transport.push_ok(200, score_body("COMPLETED", Some(100.0)));

    let result = run.execute(&mount);
    assert_eq!(exit_code(&result), 0);
    let RunReport::Finished { outcome, details } = result.unwrap() else {
        panic!("expected a finished run");
    };
    assert_eq!(outcome, Outcome::Successful);
    assert_eq!(details.score, Some(100));
    assert_eq!(details.canary_id, "1424");

    assert_eq!(run.transport.requests_to(SCORE_URL).len(), 2);
    assert_eq!(run.clock.sleeps(), vec![Duration::from_secs(3)]);

    let payload = run.payload();
    assert_eq!(payload["sourceType"], "argocd");
    assert_eq!(payload["canaryConfig"]["lifetimeMinutes"], "30");
    let canary = &payload["canaryDeployments"][0]["canary"]["metric"]["service1"];
    assert_eq!(canary["${namespace_key},${pod_key}"], "argocd,7d8e9f0a1");
    assert_eq!(canary["templateVersion"], "1");
    assert_eq!(canary["serviceGate"], "gate1");

    let events = run.reporter.events();
    assert!(matches!(&events[0], ReportEvent::Started(d) if d.score.is_none()));
    assert!(matches!(&events[1], ReportEvent::Outcome(d, Outcome::Successful) if d.score == Some(100)));
}

#[test]
fn test_gitops_template_registered_once_and_referenced_by_digest() {
    init_test_logging();
    let mount = MountFixture::new(GITOPS_TWO_SERVICES).with_template("metrictemplate", METRIC_TEMPLATE);
    let run = Run::new();
    // service1: unknown digest, registered; service2: already known.
    run.transport.push_ok(200, "false");
    run.transport.push_ok(200, r#"{"status":"CREATED"}"#);
    run.transport.push_ok(200, "true");
    run.registered();
    run.transport.push_ok(200, score_body("COMPLETED", Some(61.6)));

    let result = run.execute(&mount).unwrap();
    assert_eq!(result.exit_code(), 3);
    assert!(matches!(result, RunReport::Finished { outcome: Outcome::Inconclusive, ref details } if details.score == Some(62)));

    let template_calls = run
        .transport
        .requests_to(&format!("{GATE_URL}/autopilot/api/v5/external/template"));
    assert_eq!(template_calls.len(), 3);
    let posts: Vec<_> = template_calls
        .iter()
        .filter(|r| r.method == Method::Post)
        .collect();
    assert_eq!(posts.len(), 1);
    assert!(posts[0].url.contains("templateType=METRIC&templateName=metrictemplate"));
    assert_eq!(posts[0].header_value("x-spinnaker-user"), Some("admin"));

    let registered: serde_json::Value =
        serde_json::from_str(posts[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(registered["templateName"], "metrictemplate");
    assert_eq!(registered["data"]["groups"][0]["metrics"][0]["criticality"], "Critical");

    let digest = |req: &cva_common::HttpRequest| {
        req.url
            .split("sha1=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap()
            .to_string()
    };
    assert_eq!(digest(&template_calls[0]), digest(&template_calls[2]));

    let payload = run.payload();
    let metric = &payload["canaryDeployments"][0]["baseline"]["metric"];
    assert_eq!(metric["service1"]["templateSha1"], digest(&template_calls[0]));
    assert_eq!(metric["service2"]["templateSha1"], digest(&template_calls[0]));
    assert_eq!(metric["service2"]["serviceGate"], "gate2");
    assert_eq!(metric["service1"]["${namespace_key},${pod_key}"], "argocd,6c9f8b5d4");
    test_log!("gitops run registered template {}", digest(&template_calls[0]));
}

#[test]
fn test_validation_failure_precedes_network() {
    init_test_logging();
    let broken = GITOPS_TWO_SERVICES.replace("canaryMetricScope: \"argocd,{{env.LATEST_POD_HASH}}\"\n  - serviceName", "canaryMetricScope: \"argocd\"\n  - serviceName");
    let mount = MountFixture::new(&broken).with_template("metrictemplate", METRIC_TEMPLATE);
    let run = Run::new();

    let err = run.execute(&mount).unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidService { .. }));
    assert!(err.to_string().contains("of service 'service1'"));
    assert!(run.transport.requests().is_empty());
    assert!(matches!(&run.reporter.events()[..], [ReportEvent::Error(_)]));
}

#[test]
fn test_missing_secret_is_reported() {
    init_test_logging();
    let mount = MountFixture::new(METRIC_ONLY).without_secret("source-name");
    let run = Run::new();

    let result = run.execute(&mount);
    assert_eq!(exit_code(&result), EXIT_ERROR);
    assert!(matches!(result, Err(AnalysisError::MissingInput { .. })));
    let events = run.reporter.events();
    assert!(matches!(&events[0], ReportEvent::Error(m) if m.contains("source-name")));
}

#[test]
fn test_poll_budget_exhausted() {
    init_test_logging();
    let mount = MountFixture::new(METRIC_ONLY);
    let mut run = Run::new();
    run.policy = PollPolicy {
        interval: Duration::from_secs(1),
        retry_budget: 1,
    };
    run.registered();
    run.transport.push_err("connection refused");
    run.transport.push_ok(503, "unavailable");

    let err = run.execute(&mount).unwrap_err();
    assert!(matches!(err, AnalysisError::PollExhausted { failures: 2, .. }));
    assert_eq!(run.transport.remaining(), 0);
    assert_eq!(run.clock.sleeps(), vec![Duration::from_secs(1)]);
}

#[test]
fn test_interval_analysis_failure_names_interval() {
    init_test_logging();
    let mount = MountFixture::new(INTERVAL_ANALYSIS);
    let run = Run::new();
    run.registered();
    run.transport.push_ok(
        200,
        r#"{"status":{"status":"RUNNING"},"canaryResult":{"intervalNo":1}}"#,
    );
    run.transport.push_ok(
        200,
        r#"{"status":{"status":"COMPLETED"},"canaryResult":{"overallScore":35,"intervalNo":2}}"#,
    );

    let result = run.execute(&mount);
    assert_eq!(exit_code(&result), 2);
    let RunReport::Finished { outcome, details } = result.unwrap() else {
        panic!("expected a finished run");
    };
    assert_eq!(outcome, Outcome::Failed);
    assert_eq!(
        details.failure_reason.as_deref(),
        Some("Interval Analysis Failed at intervalNo. 2")
    );

    let payload = run.payload();
    assert_eq!(payload["canaryConfig"]["interval"], "5");
    assert_eq!(payload["canaryConfig"]["lookBackType"], "growing");
    assert!(matches!(
        &run.reporter.events()[1],
        ReportEvent::Outcome(d, Outcome::Failed) if d.failure_reason.is_some()
    ));
}
