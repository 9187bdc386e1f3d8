//! [`ConfigSource`] backed by the ConfigMap and Secret volumes of the Job.

use super::ConfigSource;
use crate::error::{AnalysisError, Result};
use crate::spec::AnalysisSpec;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mount point used when nothing else is configured.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/config";

const PROVIDER_CONFIG: &str = "provider/providerConfig";
const SECRETS_DIR: &str = "secrets";
const TEMPLATES_DIR: &str = "templates";

/// Reads inputs from files under a mount root.
///
/// ```text
/// <root>/provider/providerConfig   analysis request (YAML)
/// <root>/secrets/<key>             one secret per file
/// <root>/templates/<name>          GitOps template bodies
/// ```
#[derive(Debug, Clone)]
pub struct MountedConfig {
    root: PathBuf,
}

impl Default for MountedConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }
}

impl MountedConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, relative: &str, hint: &str) -> Result<Vec<u8>> {
        let path = self.root.join(relative);
        debug!(path = %path.display(), "reading mounted input");
        fs::read(&path).map_err(|e| AnalysisError::MissingInput {
            path: path.display().to_string(),
            reason: e.to_string(),
            hint: hint.to_string(),
        })
    }
}

impl ConfigSource for MountedConfig {
    fn provider_config(&self) -> Result<AnalysisSpec> {
        let hint = format!(
            "Please ensure the provider config map is mounted at {}/provider",
            self.root.display()
        );
        let raw = self.read(PROVIDER_CONFIG, &hint)?;
        serde_yaml_ng::from_slice(&raw).map_err(|e| AnalysisError::ConfigParse {
            what: "provider config".to_string(),
            reason: e.to_string(),
        })
    }

    fn secret(&self, key: &str) -> Result<String> {
        let hint = format!(
            "Please ensure the secret with key '{key}' is mounted at {}/{SECRETS_DIR}",
            self.root.display()
        );
        let raw = self.read(&format!("{SECRETS_DIR}/{key}"), &hint)?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }

    fn template(&self, name: &str) -> Result<Vec<u8>> {
        let hint = format!(
            "Please ensure the template '{name}' is present in the templates config map mounted at {}/{TEMPLATES_DIR}",
            self.root.display()
        );
        self.read(&format!("{TEMPLATES_DIR}/{name}"), &hint)
    }
}
