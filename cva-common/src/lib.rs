//! Canary request assembly and verification.
//!
//! The pieces, leaves first:
//!
//! - [`scope`]: `{{env.NAME}}` substitution in scope strings
//! - [`window`]: RFC3339 timestamps to epoch millis and a lifetime
//! - [`template`]: GitOps template normalisation and registration
//! - [`payload`]: service validation and the registration document
//! - [`verify`]: submit, poll and classify
//!
//! [`runner::run_analysis`] wires them together over injected capabilities
//! ([`config::ConfigSource`], [`transport::HttpTransport`], [`clock::Clock`],
//! [`scope::EnvLookup`], [`report::StatusReporter`]).

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod mock;
pub mod payload;
pub mod report;
pub mod runner;
pub mod scope;
pub mod spec;
pub mod template;
pub mod transport;
pub mod verify;
pub mod window;

pub use clock::{Clock, SystemClock};
pub use config::{CdIntegration, ConfigSource, GateSecrets, MountedConfig, RuntimeSettings};
pub use error::{AnalysisError, ErrorCategory, Result};
pub use logging::{LogConfig, LogFormat, init_logging};
pub use payload::{CanaryPayload, assemble};
pub use report::{CanaryDetails, EXIT_ERROR, JobStatusPatch, LogReporter, StatusReporter};
pub use runner::{Collaborators, RunOptions, RunReport, exit_code, run_analysis};
pub use scope::{EnvLookup, ProcessEnv, resolve_scope};
pub use spec::{AnalysisSpec, ServiceSpec};
pub use template::{TemplateKind, TemplateSynchronizer};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError, join_url};
pub use verify::{Outcome, PollPolicy, RunState, VerificationRun, Verifier};
pub use window::{ResolvedWindow, resolve_window};
