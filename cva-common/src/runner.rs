//! One complete canary run, from mounted inputs to the Job status.

use crate::clock::Clock;
use crate::config::{ConfigSource, GateSecrets};
use crate::error::Result;
use crate::payload::assemble;
use crate::report::{CanaryDetails, EXIT_ERROR, StatusReporter};
use crate::scope::EnvLookup;
use crate::template::TemplateSynchronizer;
use crate::transport::HttpTransport;
use crate::verify::{Outcome, PollPolicy, Verifier};
use crate::window::resolve_window;
use tracing::{error, info, warn};

/// Capabilities a run needs from its host.
pub struct Collaborators<'a> {
    pub config: &'a dyn ConfigSource,
    pub transport: &'a dyn HttpTransport,
    pub clock: &'a dyn Clock,
    pub env: &'a dyn EnvLookup,
    pub reporter: &'a dyn StatusReporter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub policy: PollPolicy,
    /// Stop after assembling the payload.
    pub dry_run: bool,
}

/// How a run ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// Payload assembled but not submitted.
    DryRun { payload: String },
    Finished {
        outcome: Outcome,
        details: CanaryDetails,
    },
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DryRun { .. } => 0,
            Self::Finished { outcome, .. } => outcome.exit_code(),
        }
    }
}

/// Process exit status for a run result.
pub fn exit_code(result: &Result<RunReport>) -> i32 {
    match result {
        Ok(report) => report.exit_code(),
        Err(_) => EXIT_ERROR,
    }
}

/// Run the analysis and publish its result.
///
/// Errors are reported through the reporter before being returned.
pub fn run_analysis(collaborators: &Collaborators<'_>, options: &RunOptions) -> Result<RunReport> {
    let result = execute(collaborators, options);
    if let Err(err) = &result {
        error!(category = %err.category(), error = %err, "analysis failed");
        if let Err(report_err) = collaborators.reporter.report_error(&err.operator_message()) {
            warn!(error = %report_err, "could not report analysis failure");
        }
    }
    result
}

fn execute(c: &Collaborators<'_>, options: &RunOptions) -> Result<RunReport> {
    let spec = c.config.provider_config()?;
    spec.validate()?;
    let secrets = GateSecrets::load(c.config, &spec)?;

    let window = resolve_window(
        spec.baseline_start(),
        spec.canary_start(),
        spec.end(),
        spec.lifetime(),
        c.clock,
    )?;

    let templates = TemplateSynchronizer::new(c.transport, c.config, &secrets.gate_url, &secrets.user);
    let payload = assemble(&spec, &window, &secrets, c.env, &templates)?.to_json()?;

    if options.dry_run {
        info!(bytes = payload.len(), "dry run, payload not submitted");
        return Ok(RunReport::DryRun { payload });
    }

    let verifier = Verifier::new(
        c.transport,
        c.clock,
        &secrets.gate_url,
        &secrets.user,
        options.policy,
    );
    let mut run = verifier.submit(&payload)?;
    verifier.poll(&mut run, &mut |snapshot| {
        c.reporter.report_started(&CanaryDetails::from_run(
            snapshot,
            &secrets.user,
            &secrets.gate_url,
        ))
    })?;

    let outcome = run.evaluate(spec.pass_score, spec.marginal_score)?;
    let mut details = CanaryDetails::from_run(&run, &secrets.user, &secrets.gate_url);
    details.failure_reason = run.failure_reason(spec.look_back().is_some());
    info!(
        canary_id = %details.canary_id,
        score = ?details.score,
        interval = ?run.interval_no,
        %outcome,
        "analysis complete"
    );
    c.reporter.report_outcome(&details, outcome)?;

    Ok(RunReport::Finished { outcome, details })
}
