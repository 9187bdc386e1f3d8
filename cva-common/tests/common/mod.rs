//! Shared helpers for cva-common integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing_subscriber::{EnvFilter, fmt};

pub fn init_test_logging() {
    let _ = fmt()
        .with_test_writer()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("cva_common=debug".parse().unwrap()),
        )
        .try_init();
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}

pub const GATE_URL: &str = "https://opsmx.test.tst";
pub const SCORE_URL: &str = "https://opsmx.test.tst/autopilot/canaries/1424";

/// A config mount laid out like the Job's volumes.
pub struct MountFixture {
    pub dir: TempDir,
}

impl MountFixture {
    pub fn new(provider_config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "provider/providerConfig", provider_config);
        write(dir.path(), "secrets/user", "admin\n");
        write(dir.path(), "secrets/gate-url", GATE_URL);
        write(dir.path(), "secrets/source-name", "sourcename");
        write(dir.path(), "secrets/cd-integration", "true");
        Self { dir }
    }

    pub fn with_template(self, name: &str, body: &str) -> Self {
        write(self.dir.path(), &format!("templates/{name}"), body);
        self
    }

    pub fn without_secret(self, key: &str) -> Self {
        fs::remove_file(self.dir.path().join("secrets").join(key)).unwrap();
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Score document as served by the analysis service.
pub fn score_body(status: &str, score: Option<f64>) -> String {
    let mut result = serde_json::json!({
        "canaryReportURL": "https://opsmx.test.tst/reportURL"
    });
    if let Some(score) = score {
        result["overallScore"] = serde_json::json!(score);
    }
    serde_json::json!({
        "status": {"status": status},
        "canaryResult": result
    })
    .to_string()
}
