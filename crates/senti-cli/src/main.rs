use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use senti_storage::PgRecordStore;
use senti_worker::{
    build_worker, database_url_from_env, BatchWorker, WorkerConfig, DEFAULT_CLAIM_LEASE_SECS,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "senti")]
#[command(about = "Batch sentiment worker for uploaded CSV rows")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll for unprocessed rows until interrupted (default).
    Run,
    /// Run a single pass and print its report as JSON.
    Once,
    /// Apply the bundled schema to DATABASE_URL.
    Migrate,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
}

async fn worker_from_env() -> Result<BatchWorker> {
    let config = WorkerConfig::from_env().context("loading worker configuration")?;
    build_worker(&config).await
}

async fn migrate_from_env() -> Result<()> {
    let database_url = database_url_from_env().context("loading migration target")?;
    let lease = Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS);
    PgRecordStore::connect(&database_url, lease)
        .await?
        .migrate()
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let worker = worker_from_env().await?;
            info!("senti worker starting");
            worker.run_until(shutdown_signal()).await;
        }
        Commands::Once => {
            let report = worker_from_env().await?.run_pass().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Migrate => {
            migrate_from_env().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
