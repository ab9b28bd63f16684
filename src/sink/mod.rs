//! Downstream record sinks
//!
//! A sink receives each page's merged records once the page is complete.
//! Sinks must be idempotent on `record_id`: the orchestrator re-delivers the
//! last page after a crash between commit and checkpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::{Record, RecordKind, VideoMetadata};
use crate::UnitId;

pub mod csv;
pub mod memory;

pub use self::csv::CsvSink;
pub use memory::MemorySink;

/// Sink errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// The sink refused the batch
    #[error("commit rejected: {0}")]
    Rejected(String),
}

/// What a commit changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Records newly stored
    pub written: u64,
    /// Records already stored before this commit
    pub duplicates_skipped: u64,
}

/// A listed record merged with its video metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    /// Stable remote id
    pub record_id: String,
    /// Record kind
    pub kind: RecordKind,
    /// Video id
    pub video_id: Option<String>,
    /// Video title
    pub video_title: Option<String>,
    /// Channel that owns the video
    pub channel_id: Option<String>,
    /// Display name of that channel
    pub channel_name: Option<String>,
    /// Video publication time
    pub video_published_at: Option<DateTime<Utc>>,
    /// Title of the playlist the record was reached through
    pub playlist_title: Option<String>,
    /// Author display name
    pub author: Option<String>,
    /// Author channel id
    pub author_channel_id: Option<String>,
    /// Raw text
    pub text: Option<String>,
    /// Like count
    pub like_count: Option<u64>,
    /// Publication time
    pub published_at: Option<DateTime<Utc>>,
    /// Last update time
    pub updated_at: Option<DateTime<Utc>>,
}

impl SinkRecord {
    /// Merge a record with its (optional) video metadata
    pub fn merge(record: Record, video: Option<&VideoMetadata>) -> Self {
        Self {
            record_id: record.record_id,
            kind: record.kind,
            video_id: record.video_id,
            video_title: video.map(|v| v.title.clone()),
            channel_id: video.map(|v| v.channel_id.clone()),
            channel_name: None,
            video_published_at: video.and_then(|v| v.published_at),
            playlist_title: None,
            author: record.author,
            author_channel_id: record.author_channel_id,
            text: record.text,
            like_count: record.like_count,
            published_at: record.published_at,
            updated_at: record.updated_at,
        }
    }

    /// Attach the owning channel's display name
    pub fn with_channel_name(mut self, name: Option<String>) -> Self {
        self.channel_name = name;
        self
    }

    /// Attach the title of the playlist the record came from
    pub fn with_playlist_title(mut self, title: Option<String>) -> Self {
        self.playlist_title = title;
        self
    }
}

/// Idempotent downstream destination
#[async_trait]
pub trait Sink: Send + Sync {
    /// Durably store `records` for `unit_id`, skipping ids already stored
    async fn commit(&self, unit_id: &UnitId, records: &[SinkRecord])
        -> Result<CommitReport, SinkError>;
}
