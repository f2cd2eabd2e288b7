//! claimdesk daemon: runs auto-pilot and dashboard aggregation until Ctrl-C.

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use claimdesk_app::{AppBuilder, AppError};

#[derive(Parser)]
#[command(name = "claimdesk")]
#[command(about = "Claim ledger and approval engine", long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "claimdesk failed");
        eprintln!("claimdesk: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut builder = AppBuilder::new("claimdesk").verbose(cli.verbose);
    if let Some(path) = &cli.config {
        builder = builder.config_path(path);
    }
    let engine = builder.build()?.into_engine()?;
    let tasks = engine.start().await?;

    let mut dashboard = tasks.dashboard.clone();
    let reporter = tokio::spawn(async move {
        while dashboard.changed().await.is_ok() {
            let d = dashboard.borrow_and_update().clone();
            info!(
                revision = d.revision,
                badge = d.badge_total(),
                total_balance = d.total_balance,
                "dashboard updated"
            );
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "unable to listen for shutdown signal"),
    }

    engine.shutdown();
    tasks.join().await;
    reporter.abort();
    info!("claimdesk stopped");
    Ok(())
}
