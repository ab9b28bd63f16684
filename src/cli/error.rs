//! CLI error types and conversions

use crate::config::ConfigError;
use crate::ingest::IngestError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),

    /// Ingestion error
    #[error("ingestion error: {0}")]
    IngestError(#[from] IngestError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Metrics exporter could not be started
    #[error("metrics error: {0}")]
    MetricsError(String),
}
