//! Remote API boundary
//!
//! The orchestrator and retry engine only see the [`RemoteApi`] trait; the
//! YouTube Data API client in [`youtube`] is one implementation, test fakes
//! are another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::Credential;
use crate::resume::Cursor;
use crate::{Blob, EntityKey, EntityType, UnitDescriptor, UnitKind};

pub mod youtube;

pub use youtube::YouTubeClient;

/// How the retry engine should treat a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff
    Retryable,
    /// The credential's quota is spent; rotate and retry immediately
    QuotaSignal,
    /// Retrying cannot help
    NonRetryable,
}

/// Remote API errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Connection reset, DNS failure and similar network errors
    #[error("transient network error: {0}")]
    Transient(String),

    /// The call did not complete in time
    #[error("request timed out")]
    Timeout,

    /// 5xx response
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// The credential's quota is exceeded
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The credential was rejected
    #[error("invalid credential: {0}")]
    AuthInvalid(String),

    /// The requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The request (or the response to it) could not be understood
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Retry classification of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Transient(_) | ApiError::Timeout | ApiError::Server { .. } => {
                ErrorClass::Retryable
            }
            ApiError::QuotaExceeded(_) => ErrorClass::QuotaSignal,
            ApiError::AuthInvalid(_) | ApiError::NotFound(_) | ApiError::Malformed(_) => {
                ErrorClass::NonRetryable
            }
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ApiError::Transient(_) => "transient",
            ApiError::Timeout => "timeout",
            ApiError::Server { .. } => "server",
            ApiError::QuotaExceeded(_) => "quota_exceeded",
            ApiError::AuthInvalid(_) => "auth_invalid",
            ApiError::NotFound(_) => "not_found",
            ApiError::Malformed(_) => "malformed",
        }
    }
}

/// Result type for remote calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Kind of remote call, used to price it in quota units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Metadata lookup for one entity
    FetchEntity(EntityType),
    /// One page of a unit's listing
    ListPage(UnitKind),
    /// One page of a single video's comment threads
    ListVideoComments,
}

impl CallKind {
    /// Operation name for logs and metrics
    pub fn operation(&self) -> &'static str {
        match self {
            CallKind::FetchEntity(_) => "fetch_entity",
            CallKind::ListPage(_) => "list_page",
            CallKind::ListVideoComments => "list_video_comments",
        }
    }
}

/// Kind of listed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Top-level comment of a comment thread
    Comment,
    /// Video entry of a playlist
    PlaylistItem,
}

/// One record of a listed page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable remote id, used for sink deduplication
    pub record_id: String,
    /// Record kind
    pub kind: RecordKind,
    /// Video the record belongs to
    pub video_id: Option<String>,
    /// Author display name
    pub author: Option<String>,
    /// Author channel id
    pub author_channel_id: Option<String>,
    /// Comment text (raw, no cleanup)
    pub text: Option<String>,
    /// Like count
    pub like_count: Option<u64>,
    /// First publication time
    pub published_at: Option<DateTime<Utc>>,
    /// Last update time
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    /// A comment on `video_id` last updated at `updated_at`
    pub fn comment(
        record_id: impl Into<String>,
        video_id: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            kind: RecordKind::Comment,
            video_id: Some(video_id.into()),
            author: None,
            author_channel_id: None,
            text: None,
            like_count: None,
            published_at: Some(updated_at),
            updated_at: Some(updated_at),
        }
    }

    /// A playlist entry pointing at `video_id`
    pub fn playlist_item(record_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            kind: RecordKind::PlaylistItem,
            video_id: Some(video_id.into()),
            author: None,
            author_channel_id: None,
            text: None,
            like_count: None,
            published_at: None,
            updated_at: None,
        }
    }

    /// Set the comment text
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// One page of a unit's listing
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Records in remote order (newest first for comment threads)
    pub records: Vec<Record>,
    /// Token of the following page, `None` on the last page
    pub next_token: Option<String>,
}

/// Normalized video metadata, as cached under [`EntityType::Video`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Video id
    pub id: String,
    /// Title
    pub title: String,
    /// Owning channel id
    pub channel_id: String,
    /// Publication time
    pub published_at: Option<DateTime<Utc>>,
}

impl VideoMetadata {
    /// Decode a cached blob
    pub fn from_blob(blob: &Blob) -> Option<Self> {
        serde_json::from_value(blob.clone()).ok()
    }

    /// Encode as a cacheable blob
    pub fn to_blob(&self) -> Blob {
        serde_json::to_value(self).unwrap_or(Blob::Null)
    }
}

/// Title of a channel or playlist, decoded from the same cached blob shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTitle {
    /// Entity id
    pub id: String,
    /// Display title
    pub title: String,
}

impl EntityTitle {
    /// Decode a cached blob
    pub fn from_blob(blob: &Blob) -> Option<Self> {
        serde_json::from_value(blob.clone()).ok()
    }
}

/// Quota-metered remote API
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetch normalized metadata for one entity
    async fn fetch_entity(&self, key: &EntityKey, credential: &Credential) -> ApiResult<Blob>;

    /// Fetch the page of `unit` that `cursor.token` points at
    ///
    /// Channel units list comment threads; playlist units list the
    /// playlist's items, whose comments are then paged per video.
    async fn list_page(
        &self,
        unit: &UnitDescriptor,
        cursor: &Cursor,
        credential: &Credential,
    ) -> ApiResult<Page>;

    /// Fetch one page of a video's comment threads, newest first
    ///
    /// A video that is gone or has comments disabled answers `NotFound`.
    async fn list_video_comments(
        &self,
        video_id: &str,
        token: Option<&str>,
        credential: &Credential,
    ) -> ApiResult<Page>;

    /// Quota units charged for one call of `kind`
    fn cost(&self, _kind: CallKind) -> u64 {
        1
    }
}
