//! The `comment-ingest` command line

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use super::CliError;
use crate::config::{IngestConfig, MAX_CONCURRENCY};
use crate::filter::{split_csv, SelectionFilter};
use crate::ingest::{Orchestrator, RunSummary};
use crate::metrics::init_metrics;
use crate::shutdown::SharedShutdown;
use crate::UnitId;

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Comment ingestion CLI
#[derive(Parser, Debug)]
#[command(name = "comment-ingest")]
#[command(about = "Ingest YouTube comments and video metadata, resumably and within quota", long_about = None)]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, default_value = "ingest.json")]
    pub config: PathBuf,

    /// Only process these unit names (comma-separated)
    #[arg(long)]
    pub channels: Option<String>,

    /// Skip these unit names (comma-separated)
    #[arg(long)]
    pub skip: Option<String>,

    /// Only process units carrying one of these tags (comma-separated)
    #[arg(long)]
    pub types: Option<String>,

    /// Skip units carrying any of these tags (comma-separated)
    #[arg(long)]
    pub exclude_types: Option<String>,

    /// Forget the progress of a unit before running (e.g. chan::UC123); repeatable
    #[arg(long, value_name = "UNIT")]
    pub reset: Vec<UnitId>,

    /// Number of units processed concurrently (overrides the config file, max: 32)
    #[arg(long, value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Selection filter built from the name and tag flags
    pub fn selection_filter(&self) -> SelectionFilter {
        let list = |value: &Option<String>| value.as_deref().map(split_csv).unwrap_or_default();
        SelectionFilter::default()
            .with_channels(list(&self.channels))
            .with_skip(list(&self.skip))
            .with_types(list(&self.types))
            .with_exclude_types(list(&self.exclude_types))
    }

    /// Load the configuration and apply command-line overrides
    pub fn load_config(&self) -> Result<IngestConfig, CliError> {
        let mut config = IngestConfig::from_path(&self.config)?;
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        config.validate()?;
        Ok(config)
    }

    /// Run the ingestion described by the arguments
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<RunSummary, CliError> {
        let config = self.load_config()?;

        if let Some(addr) = self.metrics_addr {
            init_metrics(addr)
                .await
                .map_err(|e| CliError::MetricsError(e.to_string()))?;
        }

        let orchestrator = Orchestrator::from_config(&config)
            .await?
            .with_shutdown(shutdown);

        for unit_id in &self.reset {
            if !config.units.iter().any(|u| &u.id() == unit_id) {
                return Err(CliError::InvalidArgument(format!(
                    "unit {unit_id} is not configured"
                )));
            }
            orchestrator.reset_unit(unit_id).await?;
            info!(unit = %unit_id, "Progress reset on request");
        }

        let summary = orchestrator
            .run(config.units.clone(), &self.selection_filter())
            .await?;
        Ok(summary)
    }
}
