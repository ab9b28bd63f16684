//! YouTube Data API v3 client
//!
//! A thin reqwest client implementing [`RemoteApi`]. It performs exactly one
//! HTTP request per call: retries, backoff and credential rotation belong to
//! the retry engine. Responses are reduced to the fields ingestion needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{ApiError, ApiResult, Page, Record, RecordKind, RemoteApi};
use crate::quota::Credential;
use crate::resume::Cursor;
use crate::{Blob, EntityKey, EntityType, UnitDescriptor, UnitKind};

/// Production API endpoint
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Largest page the commentThreads endpoint serves
pub const MAX_COMMENT_PAGE_SIZE: u32 = 100;

/// Largest page the playlistItems endpoint serves
pub const MAX_PLAYLIST_PAGE_SIZE: u32 = 50;

const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded", "userRateLimitExceeded"];
const AUTH_REASONS: &[&str] = &["keyInvalid", "keyExpired", "forbidden", "ipRefererBlocked"];
const UNAVAILABLE_REASONS: &[&str] = &["commentsDisabled", "videoNotFound", "playlistNotFound"];

/// [`RemoteApi`] over the YouTube Data API
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl YouTubeClient {
    /// Create a client against `base_url`
    ///
    /// `request_timeout` bounds a single HTTP exchange at the transport level.
    pub fn new(
        base_url: impl Into<String>,
        page_size: u32,
        request_timeout: Duration,
    ) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("comment-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transient(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        credential: &Credential,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(endpoint, credential = %credential.id(), params = params.len(), "GET");

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", credential.api_key())])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Malformed(format!("Failed to deserialize {endpoint}: {e}")))
    }

    async fn list_comment_threads(
        &self,
        filter: (&str, &str),
        token: Option<&str>,
        credential: &Credential,
    ) -> ApiResult<Page> {
        let mut params = vec![
            ("part", "snippet".to_string()),
            (filter.0, filter.1.to_string()),
            ("maxResults", self.page_size.min(MAX_COMMENT_PAGE_SIZE).to_string()),
            ("order", "time".to_string()),
            ("textFormat", "plainText".to_string()),
        ];
        if let Some(token) = token {
            params.push(("pageToken", token.to_string()));
        }

        let response: ListResponse<CommentThread> =
            self.get("commentThreads", &params, credential).await?;
        Ok(response.into_page(CommentThread::into_record))
    }

    async fn list_playlist_items(
        &self,
        playlist_id: &str,
        cursor: &Cursor,
        credential: &Credential,
    ) -> ApiResult<Page> {
        let mut params = vec![
            ("part", "snippet,contentDetails".to_string()),
            ("playlistId", playlist_id.to_string()),
            ("maxResults", self.page_size.min(MAX_PLAYLIST_PAGE_SIZE).to_string()),
        ];
        if let Some(token) = &cursor.token {
            params.push(("pageToken", token.clone()));
        }

        let response: ListResponse<PlaylistItem> =
            self.get("playlistItems", &params, credential).await?;
        Ok(response.into_page(PlaylistItem::into_record))
    }
}

#[async_trait]
impl RemoteApi for YouTubeClient {
    async fn fetch_entity(&self, key: &EntityKey, credential: &Credential) -> ApiResult<Blob> {
        let endpoint = match key.entity_type {
            EntityType::Video => "videos",
            EntityType::Channel => "channels",
            EntityType::Playlist => "playlists",
        };
        let params = [
            ("part", "snippet".to_string()),
            ("id", key.entity_id.clone()),
            ("maxResults", "1".to_string()),
        ];

        let response: ListResponse<Resource> = self.get(endpoint, &params, credential).await?;
        let resource = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(key.to_string()))?;

        Ok(resource.into_blob(key.entity_type))
    }

    async fn list_page(
        &self,
        unit: &UnitDescriptor,
        cursor: &Cursor,
        credential: &Credential,
    ) -> ApiResult<Page> {
        match unit.kind {
            UnitKind::Channel => {
                self.list_comment_threads(
                    ("allThreadsRelatedToChannelId", &unit.remote_id),
                    cursor.token.as_deref(),
                    credential,
                )
                .await
            }
            UnitKind::Playlist => {
                self.list_playlist_items(&unit.remote_id, cursor, credential)
                    .await
            }
        }
    }

    async fn list_video_comments(
        &self,
        video_id: &str,
        token: Option<&str>,
        credential: &Credential,
    ) -> ApiResult<Page> {
        self.list_comment_threads(("videoId", video_id), token, credential)
            .await
    }
}

fn map_transport_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transient(error.to_string())
    }
}

/// Map a non-success response to the error space of [`RemoteApi`]
pub(crate) fn classify_error(status: StatusCode, body: &str) -> ApiError {
    let parsed: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
    let (message, reason) = match &parsed {
        Some(envelope) => (
            envelope.error.message.clone(),
            envelope
                .error
                .errors
                .first()
                .map(|e| e.reason.clone())
                .unwrap_or_default(),
        ),
        None => (body.chars().take(200).collect(), String::new()),
    };

    if QUOTA_REASONS.contains(&reason.as_str()) {
        return ApiError::QuotaExceeded(reason);
    }
    if UNAVAILABLE_REASONS.contains(&reason.as_str()) {
        return ApiError::NotFound(reason);
    }

    match status.as_u16() {
        429 => ApiError::Transient(format!("rate limited: {message}")),
        s if s >= 500 => ApiError::Server { status: s, message },
        401 | 403 => ApiError::AuthInvalid(if reason.is_empty() { message } else { reason }),
        400 if AUTH_REASONS.contains(&reason.as_str()) => ApiError::AuthInvalid(reason),
        404 => ApiError::NotFound(message),
        s => ApiError::Malformed(format!("HTTP {s}: {message}")),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

impl<T> ListResponse<T> {
    fn into_page(self, convert: impl Fn(T) -> Record) -> Page {
        Page {
            records: self.items.into_iter().map(convert).collect(),
            next_token: self.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThread {
    id: String,
    snippet: CommentThreadSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadSnippet {
    video_id: Option<String>,
    top_level_comment: TopLevelComment,
}

#[derive(Debug, Deserialize)]
struct TopLevelComment {
    snippet: CommentSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    video_id: Option<String>,
    author_display_name: Option<String>,
    author_channel_id: Option<AuthorChannelId>,
    text_original: Option<String>,
    text_display: Option<String>,
    like_count: Option<u64>,
    published_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AuthorChannelId {
    value: String,
}

impl CommentThread {
    fn into_record(self) -> Record {
        let comment = self.snippet.top_level_comment.snippet;
        Record {
            record_id: self.id,
            kind: RecordKind::Comment,
            video_id: comment.video_id.or(self.snippet.video_id),
            author: comment.author_display_name,
            author_channel_id: comment.author_channel_id.map(|a| a.value),
            text: comment.text_original.or(comment.text_display),
            like_count: comment.like_count,
            published_at: comment.published_at,
            updated_at: comment.updated_at.or(comment.published_at),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    id: String,
    snippet: Option<PlaylistItemSnippet>,
    content_details: PlaylistItemDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    title: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_id: String,
    video_published_at: Option<DateTime<Utc>>,
}

impl PlaylistItem {
    fn into_record(self) -> Record {
        let (title, added_at) = match self.snippet {
            Some(s) => (s.title, s.published_at),
            None => (None, None),
        };
        Record {
            record_id: self.id,
            kind: RecordKind::PlaylistItem,
            video_id: Some(self.content_details.video_id),
            author: None,
            author_channel_id: None,
            text: title,
            like_count: None,
            published_at: self.content_details.video_published_at,
            updated_at: added_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    id: String,
    snippet: ResourceSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSnippet {
    #[serde(default)]
    title: String,
    channel_id: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

impl Resource {
    fn into_blob(self, entity_type: EntityType) -> Blob {
        // A channel owns itself
        let channel_id = match entity_type {
            EntityType::Channel => Some(self.id.clone()),
            _ => self.snippet.channel_id,
        };
        serde_json::json!({
            "id": self.id,
            "title": self.snippet.title,
            "channel_id": channel_id,
            "published_at": self.snippet.published_at,
        })
    }
}
