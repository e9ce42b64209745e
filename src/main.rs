use clap::Parser;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gitcron::config::SupervisorConfig;
use gitcron::scheduler::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "gitcron")]
#[command(about = "GitOps-driven cron supervisor: run jobs declared in a Git repository")]
struct Args {
    /// Remote repository containing the job definitions
    #[arg(short, long)]
    repo: String,

    /// Working tree the repository is synced into
    #[arg(short = 'd', long, default_value = "./jobs")]
    jobs_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Perform one sync + reload, print the health report, and exit
    #[arg(short, long)]
    force_sync: bool,
}

/// Wait for SIGTERM or SIGINT and report which one arrived.
async fn termination_signal() -> &'static str {
    let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM listener");
    let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT listener");
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

/// Token that is cancelled once the process is asked to stop.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            let signal_name = termination_signal().await;
            tracing::info!(signal = signal_name, "Shutdown requested, draining");
            token.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = SupervisorConfig::new(args.repo, args.jobs_dir);
    let supervisor = Supervisor::new(config)?;

    if args.force_sync {
        supervisor.force_sync().await?;
        let report = supervisor.health_check().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let shutdown = shutdown_token();
    supervisor.run(shutdown).await;

    Ok(())
}
