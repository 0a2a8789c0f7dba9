//! accessgate-e2e: smoke test an AccessGate deployment on Kubernetes

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use accessgate_common::EventSink;
use accessgate_e2e::{RunConfig, RunOutcome, SmokeRunner};

#[derive(Parser)]
#[command(name = "accessgate-e2e")]
#[command(about = "Smoke test an AccessGate deployment: pods, tunnels, API and browser probes")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults apply when absent)
    #[arg(short, long, env = "ACCESSGATE_E2E_CONFIG", default_value = "accessgate-e2e.toml")]
    config: PathBuf,

    /// JSON Lines event log
    #[arg(long, env = "ACCESSGATE_E2E_LOG")]
    log_file: Option<PathBuf>,

    /// Kubernetes namespace
    #[arg(short, long, env = "ACCESSGATE_NAMESPACE")]
    namespace: Option<String>,

    /// Deploy the manifests before testing
    #[arg(long)]
    deploy: bool,

    /// Also run the Playwright browser probes
    #[arg(long)]
    browser: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries the event stream
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("AccessGate E2E v{}", env!("CARGO_PKG_VERSION"));

    let mut config = RunConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(log_file) = cli.log_file {
        config.log_file = log_file;
    }
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }
    config.deploy.enabled |= cli.deploy;
    config.browser.enabled |= cli.browser;

    let sink = EventSink::open(&config.log_file)
        .with_context(|| format!("opening event log {}", config.log_file.display()))?;

    let runner = SmokeRunner::new(config, sink);
    let outcome = runner.run().await;
    print_summary(runner.config(), &outcome);

    Ok(ExitCode::from(outcome.exit_code() as u8))
}

fn print_summary(config: &RunConfig, outcome: &RunOutcome) {
    let log = config.log_file.display();

    match outcome {
        RunOutcome::Completed(report) => {
            let summary = &report.summary;
            eprintln!();
            eprintln!("Results:");
            eprintln!("  tests passed: {}/{}", summary.succeeded, summary.total);
            eprintln!("  success rate: {:.1}%", summary.success_rate);
            for (name, success) in report.outcomes.iter() {
                eprintln!("  {}: {}", name, if success { "✅" } else { "❌" });
            }

            if summary.passed() {
                eprintln!("\nE2E tests passed. Detailed events in {}", log);
                eprintln!("\nApplication available at:");
                eprintln!("  frontend: {}", config.frontend_url);
                eprintln!("  backend:  {}", config.backend_url);
            } else {
                eprintln!("\nSome tests failed. See {}", log);
            }
        }
        RunOutcome::Aborted(reason) => {
            eprintln!("\nRun aborted: {}. See {}", reason, log);
        }
        RunOutcome::Interrupted => {
            eprintln!("\nInterrupted by user. See {}", log);
        }
    }
}
