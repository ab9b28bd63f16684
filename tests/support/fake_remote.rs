//! Scripted in-process `RemoteApi`

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use comment_ingest::quota::Credential;
use comment_ingest::remote::{ApiError, ApiResult, Page, Record, RemoteApi, VideoMetadata};
use comment_ingest::resume::Cursor;
use comment_ingest::shutdown::SharedShutdown;
use comment_ingest::{Blob, EntityKey, EntityType, UnitDescriptor, UnitId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

/// Fixed point in time used for record timestamps
pub fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 8, n, 12, 0, 0).unwrap()
}

/// Comments on `video_id`, one per id, all updated on `updated_day`
pub fn comments(ids: &[&str], video_id: &str, updated_day: u32) -> Vec<Record> {
    ids.iter()
        .map(|id| Record::comment(*id, video_id, day(updated_day)).with_text(format!("text of {id}")))
        .collect()
}

/// Page of `pages` that follows `token`, as the remote would serve it
fn page_after(pages: &[Page], token: Option<&str>) -> ApiResult<Page> {
    let index = match token {
        None => 0,
        Some(token) => {
            pages
                .iter()
                .position(|p| p.next_token.as_deref() == Some(token))
                .ok_or_else(|| ApiError::Malformed(format!("unknown page token {token}")))?
                + 1
        }
    };
    pages
        .get(index)
        .cloned()
        .ok_or_else(|| ApiError::Malformed(format!("no page {index}")))
}

/// Chain record batches into pages with tokens `{prefix}1`, `{prefix}2`, ...
fn chain(prefix: &str, pages: Vec<Vec<Record>>) -> Vec<Page> {
    let count = pages.len();
    pages
        .into_iter()
        .enumerate()
        .map(|(i, records)| Page {
            records,
            next_token: (i + 1 < count).then(|| format!("{prefix}{}", i + 1)),
        })
        .collect()
}

#[derive(Default)]
struct State {
    list_calls: Vec<(UnitId, u64)>,
    comment_calls: Vec<(String, Option<String>)>,
    fetch_calls: Vec<String>,
    credentials_used: Vec<String>,
    fail_next_lists: VecDeque<ApiError>,
    fail_page_once: HashMap<(UnitId, u64), ApiError>,
    rejected_credentials: HashSet<String>,
    shutdown_after_page: Option<(u64, SharedShutdown)>,
}

/// Serves pre-built pages and entity metadata, recording every call
#[derive(Default)]
pub struct FakeRemote {
    pages: HashMap<UnitId, Vec<Page>>,
    video_comments: HashMap<String, Vec<Page>>,
    videos: HashMap<String, VideoMetadata>,
    titles: HashMap<EntityKey, String>,
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a video owned by `channel_id`
    pub fn with_video(mut self, video_id: &str, channel_id: &str) -> Self {
        self.videos.insert(
            video_id.to_string(),
            VideoMetadata {
                id: video_id.to_string(),
                title: format!("Title of {video_id}"),
                channel_id: channel_id.to_string(),
                published_at: Some(day(1)),
            },
        );
        self
    }

    /// Register a channel's display name
    pub fn with_channel(mut self, channel_id: &str, title: &str) -> Self {
        self.titles
            .insert(EntityKey::channel(channel_id), title.to_string());
        self
    }

    /// Register a playlist's title
    pub fn with_playlist(mut self, playlist_id: &str, title: &str) -> Self {
        self.titles
            .insert(EntityKey::playlist(playlist_id), title.to_string());
        self
    }

    /// Pages of `unit`, chained with tokens `t1`, `t2`, ...
    pub fn with_pages(mut self, unit: &UnitDescriptor, pages: Vec<Vec<Record>>) -> Self {
        self.pages.insert(unit.id(), chain("t", pages));
        self
    }

    /// Items of a playlist unit, one page per batch of video ids
    pub fn with_playlist_items(self, unit: &UnitDescriptor, pages: Vec<Vec<&str>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|videos| {
                videos
                    .into_iter()
                    .map(|video| Record::playlist_item(format!("item-{video}"), video))
                    .collect()
            })
            .collect();
        self.with_pages(unit, pages)
    }

    /// Comment pages of one video, chained with tokens `{video_id}-c1`, ...
    pub fn with_video_comments(self, video_id: &str, pages: Vec<Vec<Record>>) -> Self {
        let pages = chain(&format!("{video_id}-c"), pages);
        self.with_raw_video_comments(video_id, pages)
    }

    /// Comment pages of one video with explicit tokens
    pub fn with_raw_video_comments(mut self, video_id: &str, pages: Vec<Page>) -> Self {
        self.video_comments.insert(video_id.to_string(), pages);
        self
    }

    /// `count` empty pages for `unit`
    pub fn with_empty_pages(self, unit: &UnitDescriptor, count: usize) -> Self {
        self.with_pages(unit, vec![Vec::new(); count])
    }

    /// Pages of `unit` with explicit tokens
    pub fn with_raw_pages(mut self, unit: &UnitDescriptor, pages: Vec<Page>) -> Self {
        self.pages.insert(unit.id(), pages);
        self
    }

    /// Fail the next list calls (any unit) with these errors, in order
    pub fn fail_next_lists(&self, errors: Vec<ApiError>) {
        self.state.lock().fail_next_lists.extend(errors);
    }

    /// Fail the first attempt to list page `page` of `unit_id`
    pub fn fail_page_once(&self, unit_id: &UnitId, page: u64, error: ApiError) {
        self.state
            .lock()
            .fail_page_once
            .insert((unit_id.clone(), page), error);
    }

    /// Answer every call made with this credential with `quotaExceeded`
    pub fn reject_credential(&self, credential_id: &str) {
        self.state
            .lock()
            .rejected_credentials
            .insert(credential_id.to_string());
    }

    /// Request a graceful shutdown while page `page` is being listed
    pub fn shutdown_after_page(&self, page: u64, shutdown: SharedShutdown) {
        self.state.lock().shutdown_after_page = Some((page, shutdown));
    }

    /// Page numbers listed for a unit, including failed attempts
    pub fn listed_pages(&self, unit_id: &UnitId) -> Vec<u64> {
        self.state
            .lock()
            .list_calls
            .iter()
            .filter(|(id, _)| id == unit_id)
            .map(|(_, page)| *page)
            .collect()
    }

    /// Total list calls, including failed attempts
    pub fn list_count(&self) -> usize {
        self.state.lock().list_calls.len()
    }

    /// Comment page tokens requested for one video, in call order
    pub fn comment_tokens(&self, video_id: &str) -> Vec<Option<String>> {
        self.state
            .lock()
            .comment_calls
            .iter()
            .filter(|(id, _)| id == video_id)
            .map(|(_, token)| token.clone())
            .collect()
    }

    /// Metadata fetches of one entity id
    pub fn fetch_count(&self, entity_id: &str) -> usize {
        self.state
            .lock()
            .fetch_calls
            .iter()
            .filter(|id| *id == entity_id)
            .count()
    }

    /// Credential used by every call, in call order
    pub fn credentials_used(&self) -> Vec<String> {
        self.state.lock().credentials_used.clone()
    }

    fn use_credential(&self, credential: &Credential) -> ApiResult<()> {
        let mut state = self.state.lock();
        let id = credential.id().as_str().to_string();
        state.credentials_used.push(id.clone());
        if state.rejected_credentials.contains(&id) {
            return Err(ApiError::QuotaExceeded("quotaExceeded".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn fetch_entity(&self, key: &EntityKey, credential: &Credential) -> ApiResult<Blob> {
        self.use_credential(credential)?;
        self.state.lock().fetch_calls.push(key.entity_id.clone());

        let not_found = || ApiError::NotFound(key.to_string());
        match key.entity_type {
            EntityType::Video => self
                .videos
                .get(&key.entity_id)
                .map(VideoMetadata::to_blob)
                .ok_or_else(not_found),
            EntityType::Channel | EntityType::Playlist => self
                .titles
                .get(key)
                .map(|title| serde_json::json!({"id": key.entity_id, "title": title}))
                .ok_or_else(not_found),
        }
    }

    async fn list_page(
        &self,
        unit: &UnitDescriptor,
        cursor: &Cursor,
        credential: &Credential,
    ) -> ApiResult<Page> {
        self.use_credential(credential)?;
        let unit_id = unit.id();
        {
            let mut state = self.state.lock();
            state.list_calls.push((unit_id.clone(), cursor.page));
            if let Some(error) = state.fail_next_lists.pop_front() {
                return Err(error);
            }
            if let Some(error) = state.fail_page_once.remove(&(unit_id.clone(), cursor.page)) {
                return Err(error);
            }
            if let Some((page, shutdown)) = &state.shutdown_after_page {
                if *page == cursor.page {
                    shutdown.request_shutdown();
                }
            }
        }

        let pages = self
            .pages
            .get(&unit_id)
            .ok_or_else(|| ApiError::NotFound(unit_id.to_string()))?;
        page_after(pages, cursor.token.as_deref())
    }

    async fn list_video_comments(
        &self,
        video_id: &str,
        token: Option<&str>,
        credential: &Credential,
    ) -> ApiResult<Page> {
        self.use_credential(credential)?;
        self.state
            .lock()
            .comment_calls
            .push((video_id.to_string(), token.map(str::to_string)));

        let pages = self
            .video_comments
            .get(video_id)
            .ok_or_else(|| ApiError::NotFound("commentsDisabled".to_string()))?;
        page_after(pages, token)
    }
}
