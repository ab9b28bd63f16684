//! Main entry point for the comment-ingest CLI

use anyhow::Context;
use clap::Parser;
use comment_ingest::cli::Cli;
use comment_ingest::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("comment_ingest=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // First Ctrl+C finishes the current pages, the second one aborts waits
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing current pages (press again to abort)");
                shutdown.request_shutdown();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Second Ctrl+C received - aborting");
                shutdown.request_abort();
            }
        }
    });

    let result = cli
        .execute(shutdown.clone())
        .await
        .context("ingestion run failed");

    match result {
        Ok(summary) => {
            println!("{summary}");
            if summary.failed().next().is_some() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}
