//! Canary Verification Agent
//!
//! Single-shot Kubernetes Job: reads the mounted provider config, registers
//! a canary analysis, polls it to completion and records the verdict on the
//! owning Job's status. The process exit code carries the outcome.

#![forbid(unsafe_code)]

mod http;
mod kube;

use anyhow::{Context, Result};
use clap::Parser;
use cva_common::{
    Collaborators, EXIT_ERROR, LogConfig, LogReporter, MountedConfig, ProcessEnv, RunOptions,
    RunReport, RuntimeSettings, StatusReporter, SystemClock, exit_code, init_logging,
    run_analysis,
};
use http::UreqTransport;
use kube::{InClusterConfig, KubeJobReporter, SERVICE_ACCOUNT_DIR, pod_name};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cva")]
#[command(author, version, about = "Canary verification job for progressive delivery")]
struct Cli {
    /// Root of the mounted provider config, secrets and templates
    #[arg(long, env = "CVA_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Assemble and print the registration payload without submitting it
    #[arg(long)]
    dry_run: bool,

    /// Log the outcome instead of patching the owning Job
    #[arg(long, env = "CVA_NO_REPORT")]
    no_report: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

fn job_reporter(connect_timeout: Duration) -> Result<KubeJobReporter<UreqTransport, SystemClock>> {
    let cluster = InClusterConfig::load(&ProcessEnv, Path::new(SERVICE_ACCOUNT_DIR))
        .context("loading in-cluster credentials")?;
    let transport = UreqTransport::with_ca(connect_timeout, &cluster.ca_pem)
        .context("building API server client")?;
    let pod = pod_name(&ProcessEnv)?;
    let reporter = KubeJobReporter::connect(transport, SystemClock, &cluster, &pod)
        .context("Cannot patch to Job")?;
    info!(job = reporter.job_name(), "reporting to job status");
    Ok(reporter)
}

fn run(cli: Cli) -> Result<i32> {
    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    init_logging(&log_config)?;

    let settings = RuntimeSettings::from_env(&ProcessEnv)?;
    let config_dir = cli.config_dir.unwrap_or_else(|| settings.config_dir.clone());
    info!(config_dir = %config_dir.display(), dry_run = cli.dry_run, "starting canary verification");

    let reporter: Box<dyn StatusReporter> = if cli.no_report || cli.dry_run {
        Box::new(LogReporter)
    } else {
        Box::new(job_reporter(settings.connect_timeout)?)
    };

    let config = MountedConfig::new(config_dir);
    let transport = UreqTransport::new(settings.connect_timeout);
    let collaborators = Collaborators {
        config: &config,
        transport: &transport,
        clock: &SystemClock,
        env: &ProcessEnv,
        reporter: reporter.as_ref(),
    };
    let options = RunOptions {
        policy: settings.poll_policy(),
        dry_run: cli.dry_run,
    };

    let result = run_analysis(&collaborators, &options);
    match &result {
        Ok(RunReport::DryRun { payload }) => println!("{payload}"),
        Ok(RunReport::Finished { outcome, details }) => {
            println!("{}", details.message());
            println!("Result: {outcome}");
        }
        Err(err) => eprintln!("Error: {}", err.operator_message()),
    }
    Ok(exit_code(&result))
}
