use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sonargate_core::client::SonarClient;
use sonargate_core::report::{self, RunReport, ToolInfo};
use sonargate_core::{Orchestrator, RunOutcome};

mod args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = args::Args::parse();
    init_tracing(args.verbose);

    let tool = ToolInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let config = args.to_config();
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on(wait_for_signal(), cancel.clone()));

    let report = match SonarClient::from_config(&config) {
        Ok(client) => Orchestrator::new(&config, &client).report(tool, &cancel).await,
        Err(err) => RunReport::new(tool, config.summary(), &RunOutcome::default(), &Err(err)),
    };

    let output = match args.format {
        args::OutputFormat::Json => serde_json::to_string_pretty(&report)? + "\n",
        args::OutputFormat::Text => report::render_text(&report),
    };

    match args.out {
        Some(path) => std::fs::write(path, &output)?,
        None => print!("{output}"),
    }

    std::process::exit(report.exit_code());
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Cancel the run once `signal` fires.
///
/// If no handler can be installed the run continues uncancellable.
async fn cancel_on(signal: impl Future<Output = std::io::Result<()>>, cancel: CancellationToken) {
    if let Err(err) = signal.await {
        tracing::warn!(error = %err, "signal handler unavailable, run cannot be cancelled");
        return;
    }

    tracing::warn!("cancellation requested");
    cancel.cancel();
}

/// Ctrl-C, or SIGTERM from the CI runner.
#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = term.recv() => Ok(()),
        },
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM handler unavailable");
            tokio::signal::ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
