//! Job status reporting through the in-cluster Kubernetes API.
//!
//! The job runs as a pod owned by a batch Job. At start-up the reporter
//! resolves that Job from the pod named by `MY_POD_NAME` and proves it may
//! patch the Job's status subresource; afterwards every report becomes a
//! strategic-merge patch of `status.conditions`.

use cva_common::{
    AnalysisError, CanaryDetails, Clock, EnvLookup, HttpRequest, HttpTransport, JobStatusPatch,
    Method, Outcome, StatusReporter, join_url,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

/// Mounted service-account credentials.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Environment variable carrying this pod's name.
pub const POD_NAME_VAR: &str = "MY_POD_NAME";

const STRATEGIC_MERGE: &str = "application/strategic-merge-patch+json";

#[derive(Debug, Error)]
pub enum KubeError {
    #[error("environment variable {0} not set")]
    MissingEnv(String),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pod {pod} is not owned by a Job")]
    NotOwnedByJob { pod: String },

    #[error("{method} {url} failed: {reason}")]
    Request {
        method: Method,
        url: String,
        reason: String,
    },

    #[error("{method} {url} returned {status}: {body}")]
    Api {
        method: Method,
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid pod object: {0}")]
    InvalidPod(String),
}

impl From<KubeError> for AnalysisError {
    fn from(err: KubeError) -> Self {
        AnalysisError::Report(err.to_string())
    }
}

/// API server address and service-account credentials.
#[derive(Debug, Clone)]
pub struct InClusterConfig {
    pub api_server: String,
    pub token: String,
    pub namespace: String,
    pub ca_pem: Vec<u8>,
}

fn read_file(path: &Path) -> Result<Vec<u8>, KubeError> {
    fs::read(path).map_err(|source| KubeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn require_env(env: &dyn EnvLookup, name: &str) -> Result<String, KubeError> {
    env.get(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| KubeError::MissingEnv(name.to_string()))
}

/// Name of the pod this job runs in; empty counts as unset.
pub fn pod_name(env: &dyn EnvLookup) -> Result<String, KubeError> {
    require_env(env, POD_NAME_VAR)
}

impl InClusterConfig {
    /// Read `KUBERNETES_SERVICE_HOST`/`_PORT` and the service-account files.
    pub fn load(env: &dyn EnvLookup, account_dir: &Path) -> Result<Self, KubeError> {
        let host = require_env(env, "KUBERNETES_SERVICE_HOST")?;
        let port = require_env(env, "KUBERNETES_SERVICE_PORT")?;
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let token = String::from_utf8_lossy(&read_file(&account_dir.join("token"))?)
            .trim()
            .to_string();
        let namespace = String::from_utf8_lossy(&read_file(&account_dir.join("namespace"))?)
            .trim()
            .to_string();
        let ca_pem = read_file(&account_dir.join("ca.crt"))?;

        Ok(Self {
            api_server: format!("https://{host}:{port}"),
            token,
            namespace,
            ca_pem,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerReference {
    kind: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    #[serde(default)]
    owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: ObjectMeta,
}

/// [`StatusReporter`] patching the owning Job's status.
pub struct KubeJobReporter<T, C> {
    transport: T,
    clock: C,
    api_server: String,
    token: String,
    namespace: String,
    job_name: String,
}

impl<T: HttpTransport, C: Clock> KubeJobReporter<T, C> {
    /// Resolve the owning Job and check that its status can be patched.
    pub fn connect(
        transport: T,
        clock: C,
        cluster: &InClusterConfig,
        pod_name: &str,
    ) -> Result<Self, KubeError> {
        let mut reporter = Self {
            transport,
            clock,
            api_server: cluster.api_server.clone(),
            token: cluster.token.clone(),
            namespace: cluster.namespace.clone(),
            job_name: String::new(),
        };
        reporter.job_name = reporter.owning_job(pod_name)?;
        debug!(pod = pod_name, job = %reporter.job_name, "resolved owning job");

        if let Err(err) = reporter.send_patch("{}") {
            error!(
                error = %err,
                "Cannot patch to Job, check the service account has the right permissions and the pod name is correct"
            );
            return Err(err);
        }
        Ok(reporter)
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    fn request(&self, method: Method, path: &str) -> HttpRequest {
        HttpRequest::new(method, join_url(&self.api_server, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json")
    }

    fn execute(&self, request: HttpRequest) -> Result<String, KubeError> {
        let method = request.method;
        let url = request.url.clone();
        let response = self
            .transport
            .send(request)
            .map_err(|e| KubeError::Request {
                method,
                url: url.clone(),
                reason: e.to_string(),
            })?;
        if !(200..300).contains(&response.status) {
            return Err(KubeError::Api {
                method,
                url,
                status: response.status,
                body: response.body,
            });
        }
        Ok(response.body)
    }

    fn owning_job(&self, pod_name: &str) -> Result<String, KubeError> {
        let path = format!("/api/v1/namespaces/{}/pods/{pod_name}", self.namespace);
        let body = self.execute(self.request(Method::Get, &path))?;
        let pod: Pod =
            serde_json::from_str(&body).map_err(|e| KubeError::InvalidPod(e.to_string()))?;
        match pod.metadata.owner_references.first() {
            Some(owner) if owner.kind == "Job" => Ok(owner.name.clone()),
            _ => Err(KubeError::NotOwnedByJob {
                pod: pod_name.to_string(),
            }),
        }
    }

    fn send_patch(&self, body: &str) -> Result<(), KubeError> {
        let path = format!(
            "/apis/batch/v1/namespaces/{}/jobs/{}/status",
            self.namespace, self.job_name
        );
        let request = self
            .request(Method::Patch, &path)
            .header("Content-Type", STRATEGIC_MERGE)
            .body(body);
        self.execute(request).map(|_| ())
    }

    fn patch(&self, patch: &JobStatusPatch) -> cva_common::Result<()> {
        self.send_patch(&patch.to_json()?)?;
        Ok(())
    }
}

impl<T: HttpTransport, C: Clock> StatusReporter for KubeJobReporter<T, C> {
    fn report_started(&self, details: &CanaryDetails) -> cva_common::Result<()> {
        self.patch(&JobStatusPatch::started(details, self.clock.now()))?;
        info!(canary_id = %details.canary_id, job = %self.job_name, "patched job with canary details");
        Ok(())
    }

    fn report_outcome(&self, details: &CanaryDetails, outcome: Outcome) -> cva_common::Result<()> {
        self.patch(&JobStatusPatch::outcome(details, outcome, self.clock.now()))?;
        info!(
            canary_id = %details.canary_id,
            job = %self.job_name,
            %outcome,
            "patched job with the score"
        );
        Ok(())
    }

    fn report_error(&self, message: &str) -> cva_common::Result<()> {
        self.patch(&JobStatusPatch::error(message, self.clock.now()))
    }
}
