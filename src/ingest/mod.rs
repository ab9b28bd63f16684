//! Unit-of-work orchestration
//!
//! The [`Orchestrator`] composes the durable pieces of the crate. For each
//! selected unit it:
//!
//! 1. **Resumes**: reads the unit's resume point from the [`ProgressTracker`]
//! 2. **Lists**: fetches the next page through the [`RetryEngine`]; a
//!    playlist lists its items, then pages through each video's comments
//! 3. **Enriches**: resolves video, channel and playlist metadata from the
//!    [`PersistentCache`], fetching misses remotely
//! 4. **Commits**: hands the merged records to the [`Sink`]
//! 5. **Checkpoints**: advances the tracker only after the commit succeeded
//!
//! Units run concurrently on a bounded pool; pages within a unit are
//! strictly sequential.
//!
//! # Error Handling
//!
//! Failures local to one unit end that unit and are reported in the
//! [`RunSummary`]; sibling units keep going. Failures of the durable store
//! (startup load, checkpoint writes, final flush) end the whole run with an
//! [`IngestError`] for which [`IngestError::is_process_fatal`] is true.
//!
//! [`ProgressTracker`]: crate::resume::ProgressTracker
//! [`RetryEngine`]: crate::retry::RetryEngine
//! [`PersistentCache`]: crate::cache::PersistentCache
//! [`Sink`]: crate::sink::Sink

pub mod orchestrator;
pub mod summary;

pub use orchestrator::Orchestrator;
pub use summary::{RunSummary, UnitOutcome, UnitReport};

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::remote::ApiError;
use crate::resume::ProgressError;
use crate::retry::RetryError;
use crate::sink::SinkError;
use crate::store::StoreError;
use crate::UnitId;

/// Orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Durable store failure
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    /// Checkpoint could not be read or written
    #[error("progress checkpoint error: {0}")]
    Progress(#[from] ProgressError),

    /// Cache could not be loaded or flushed
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Sink refused a commit
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Remote call reached a terminal state
    #[error(transparent)]
    Retry(#[from] RetryError),

    /// Remote client could not be built
    #[error("remote client error: {0}")]
    Remote(#[from] ApiError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The remote returned the current page token as the next one
    #[error("page token repeated for {unit}: {token}")]
    RepeatedToken {
        /// Unit being listed
        unit: UnitId,
        /// Repeated token
        token: String,
    },
}

impl IngestError {
    /// Whether the error must end the whole run rather than one unit
    pub fn is_process_fatal(&self) -> bool {
        match self {
            IngestError::Store(_) | IngestError::Progress(_) | IngestError::Config(_) => true,
            IngestError::Cache(CacheError::LoadFailed(_)) => true,
            IngestError::Cache(_)
            | IngestError::Sink(_)
            | IngestError::Retry(_)
            | IngestError::Remote(_)
            | IngestError::RepeatedToken { .. } => false,
        }
    }
}
