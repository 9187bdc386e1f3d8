//! Declarative inputs and runtime settings.
//!
//! The job reads three things from its mounts: the provider config (an
//! [`AnalysisSpec`] in YAML), a handful of gate secrets and the GitOps
//! template bodies. All of them go through [`ConfigSource`] so the core can
//! be driven from memory in tests. Runtime tunables come from `CVA_*`
//! environment variables via [`EnvParser`].

mod env;
mod mounted;

pub use env::{EnvError, EnvParser, RuntimeSettings, Sourced, ValueOrigin};
pub use mounted::{DEFAULT_CONFIG_DIR, MountedConfig};

use crate::error::{AnalysisError, Result};
use crate::spec::{AnalysisSpec, non_empty};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Secret keys read from the mounted secret volume.
pub mod secret_keys {
    pub const USER: &str = "user";
    pub const GATE_URL: &str = "gate-url";
    pub const SOURCE_NAME: &str = "source-name";
    pub const CD_INTEGRATION: &str = "cd-integration";
}

/// Read-only access to the job's declarative inputs.
pub trait ConfigSource {
    /// The analysis request.
    fn provider_config(&self) -> Result<AnalysisSpec>;

    /// One secret value, trimmed. Missing secrets are errors.
    fn secret(&self, key: &str) -> Result<String>;

    /// Raw bytes of the named template.
    fn template(&self, name: &str) -> Result<Vec<u8>>;
}

impl<T: ConfigSource + ?Sized> ConfigSource for &T {
    fn provider_config(&self) -> Result<AnalysisSpec> {
        (**self).provider_config()
    }

    fn secret(&self, key: &str) -> Result<String> {
        (**self).secret(key)
    }

    fn template(&self, name: &str) -> Result<Vec<u8>> {
        (**self).template(name)
    }
}

/// Which CD integration submits the canary; becomes `sourceType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CdIntegration {
    ArgoCd,
    ArgoRollouts,
}

impl CdIntegration {
    /// Value of the payload's `sourceType` field.
    pub fn source_type(&self) -> &'static str {
        match self {
            Self::ArgoCd => "argocd",
            Self::ArgoRollouts => "argorollouts",
        }
    }
}

impl fmt::Display for CdIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_type())
    }
}

impl FromStr for CdIntegration {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "true" => Ok(Self::ArgoCd),
            "false" => Ok(Self::ArgoRollouts),
            _ => Err(AnalysisError::ConfigParse {
                what: format!("{} secret", secret_keys::CD_INTEGRATION),
                reason: "cd-integration should be either true or false".to_string(),
            }),
        }
    }
}

/// Connection details for the analysis service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSecrets {
    pub gate_url: String,
    pub user: String,
    pub source_name: String,
    pub integration: CdIntegration,
}

impl GateSecrets {
    /// Merge spec overrides with mounted secrets.
    ///
    /// `user` and the gate URL are only read from the secret volume when the
    /// spec leaves them unset.
    pub fn load(source: &dyn ConfigSource, spec: &AnalysisSpec) -> Result<Self> {
        let gate_url = match non_empty(&spec.gate_url) {
            Some(url) => url.to_string(),
            None => source.secret(secret_keys::GATE_URL)?,
        };
        let user = match non_empty(&spec.user) {
            Some(user) => user.to_string(),
            None => source.secret(secret_keys::USER)?,
        };
        let integration = source.secret(secret_keys::CD_INTEGRATION)?.parse()?;
        let source_name = source.secret(secret_keys::SOURCE_NAME)?;

        debug!(%gate_url, %user, %integration, %source_name, "resolved gate secrets");
        Ok(Self {
            gate_url,
            user,
            source_name,
            integration,
        })
    }
}
