//! Orchestrator: drives units of work page by page

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{IngestError, RunSummary, UnitOutcome, UnitReport};
use crate::cache::{CacheError, PersistentCache};
use crate::config::IngestConfig;
use crate::filter::UnitFilter;
use crate::metrics::record_unit_finished;
use crate::quota::QuotaLedger;
use crate::remote::{
    ApiError, CallKind, EntityTitle, Page, Record, RecordKind, RemoteApi, VideoMetadata,
    YouTubeClient,
};
use crate::resume::{Cursor, ProgressTracker, VideoCursor};
use crate::retry::{RetryEngine, RetryError};
use crate::shutdown::{self, SharedShutdown, ShutdownCoordinator};
use crate::sink::{CsvSink, Sink, SinkRecord};
use crate::store::{DurableStore, FileStore};
use crate::{Blob, EntityKey, UnitDescriptor, UnitId, UnitKind};

/// Default number of units processed concurrently
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Composes remote, retry engine, cache, tracker and sink (see module docs)
pub struct Orchestrator {
    remote: Arc<dyn RemoteApi>,
    engine: RetryEngine,
    cache: Arc<PersistentCache>,
    tracker: Arc<ProgressTracker>,
    sink: Arc<dyn Sink>,
    shutdown: SharedShutdown,
    concurrency: usize,
    cutoff: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("concurrency", &self.concurrency)
            .field("cutoff", &self.cutoff)
            .field("cache", &self.cache)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Compose an orchestrator from its parts
    ///
    /// Uses the global shutdown coordinator when one is installed.
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        engine: RetryEngine,
        cache: Arc<PersistentCache>,
        tracker: Arc<ProgressTracker>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let shutdown = shutdown::get_global_shutdown().unwrap_or_else(ShutdownCoordinator::shared);
        Self {
            remote,
            engine: engine.with_shutdown(shutdown.clone()),
            cache,
            tracker,
            sink,
            shutdown,
            concurrency: DEFAULT_CONCURRENCY,
            cutoff: None,
        }
    }

    /// Build the production stack from a validated configuration
    ///
    /// Opens the file store under `state_dir`, restores the cache and the
    /// checkpoints, and writes CSV output under `output_dir`.
    pub async fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        config.validate()?;

        let store: Arc<dyn DurableStore> = Arc::new(FileStore::open(config.state_dir.clone())?);
        let cache =
            PersistentCache::open(store.clone(), config.cache.capacity, config.cache.flush).await?;
        let tracker = ProgressTracker::open(store).await?;

        let ledger = QuotaLedger::new(config.quota.reset_interval());
        let now = Utc::now();
        for (credential, limit) in config.quota.credentials() {
            ledger.add_credential_at(credential, limit, now);
        }

        let policy = config.retry_policy();
        let remote = YouTubeClient::new(
            config.api_base_url.clone(),
            config.page_size,
            policy.call_timeout,
        )?;
        let sink = CsvSink::new(config.output_dir.clone())?;

        info!(
            state_dir = %config.state_dir.display(),
            output_dir = %config.output_dir.display(),
            credentials = ledger.len(),
            "Ingestion stack ready"
        );

        Ok(Self::new(
            Arc::new(remote),
            RetryEngine::new(Arc::new(ledger), policy),
            Arc::new(cache),
            Arc::new(tracker),
            Arc::new(sink),
        )
        .with_concurrency(config.concurrency)
        .with_cutoff(config.cutoff))
    }

    /// Set the number of units processed concurrently
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Drop comments last updated before `cutoff`
    pub fn with_cutoff(mut self, cutoff: Option<DateTime<Utc>>) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Attach a shutdown handle for graceful and immediate cancellation
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.engine = self.engine.with_shutdown(shutdown.clone());
        self.shutdown = shutdown;
        self
    }

    /// Progress tracker
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Metadata cache
    pub fn cache(&self) -> &Arc<PersistentCache> {
        &self.cache
    }

    /// Quota ledger
    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        self.engine.ledger()
    }

    /// Forget a unit's progress so the next run starts it from scratch
    pub async fn reset_unit(&self, unit_id: &UnitId) -> Result<(), IngestError> {
        self.tracker.reset(unit_id).await?;
        Ok(())
    }

    /// Process every unit `filter` selects and flush the cache
    ///
    /// Returns `Err` only for process-fatal failures; everything else is
    /// reported per unit in the summary.
    pub async fn run(
        &self,
        units: Vec<UnitDescriptor>,
        filter: &dyn UnitFilter,
    ) -> Result<RunSummary, IngestError> {
        let selected: Vec<UnitDescriptor> = units
            .into_iter()
            .filter(|unit| {
                let keep = filter.should_process(unit);
                if !keep {
                    debug!(unit = %unit.id(), name = %unit.name, "Unit not selected");
                }
                keep
            })
            .collect();

        info!(
            units = selected.len(),
            concurrency = self.concurrency,
            "Starting ingestion run"
        );

        let mut reports: Vec<(usize, UnitReport)> = Vec::with_capacity(selected.len());
        let mut fatal = None;
        {
            let mut results = stream::iter(selected.iter().enumerate())
                .map(|(index, unit)| async move { (index, self.run_unit(unit).await) })
                .buffer_unordered(self.concurrency);

            while let Some((index, result)) = results.next().await {
                match result {
                    Ok(report) => reports.push((index, report)),
                    Err(e) => {
                        if fatal.is_none() {
                            error!(error = %e, "Store failure, aborting run");
                            self.shutdown.request_abort();
                            fatal = Some(e);
                        }
                    }
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        self.cache.flush().await.map_err(|e| match e {
            CacheError::WriteFailed { source, .. } => IngestError::Store(source),
            other => IngestError::Cache(other),
        })?;

        reports.sort_by_key(|(index, _)| *index);
        let summary = RunSummary {
            units: reports.into_iter().map(|(_, report)| report).collect(),
        };

        let stats = self.cache.stats().await;
        info!(
            completed = summary.completed().count(),
            failed = summary.failed().count(),
            in_progress = summary.in_progress().count(),
            records_written = summary.records_written(),
            cache_hit_rate = stats.hit_rate(),
            "Ingestion run finished"
        );
        Ok(summary)
    }

    /// Process one unit from its resume point
    ///
    /// Unit-local failures are folded into the report's outcome; only
    /// process-fatal errors are returned as `Err`.
    pub async fn run_unit(&self, unit: &UnitDescriptor) -> Result<UnitReport, IngestError> {
        let span = info_span!("unit", unit = %unit.id(), name = %unit.name);
        async move {
            let mut report = UnitReport::new(unit, UnitOutcome::Interrupted);
            let outcome = match self.process_unit(unit, &mut report).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_process_fatal() => {
                    error!(error = %e, pages = report.pages, "Unit aborted");
                    record_unit_finished("aborted");
                    return Err(e);
                }
                Err(IngestError::Retry(RetryError::Cancelled)) => UnitOutcome::Interrupted,
                Err(IngestError::Retry(e @ RetryError::QuotaExhausted { .. })) => {
                    UnitOutcome::Suspended {
                        reason: e.to_string(),
                    }
                }
                Err(e) => UnitOutcome::Failed {
                    reason: e.to_string(),
                },
            };

            match &outcome {
                UnitOutcome::Completed => info!(
                    pages = report.pages,
                    records_written = report.records_written,
                    "Unit completed"
                ),
                UnitOutcome::AlreadyCompleted => debug!("Unit already completed, skipped"),
                UnitOutcome::Failed { reason } => {
                    warn!(reason = %reason, pages = report.pages, "Unit failed, checkpoint kept")
                }
                UnitOutcome::Suspended { reason } => {
                    warn!(reason = %reason, pages = report.pages, "Unit suspended on quota")
                }
                UnitOutcome::Interrupted => info!(pages = report.pages, "Unit interrupted"),
            }
            record_unit_finished(outcome.label());

            report.outcome = outcome;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn process_unit(
        &self,
        unit: &UnitDescriptor,
        report: &mut UnitReport,
    ) -> Result<UnitOutcome, IngestError> {
        let unit_id = unit.id();
        if self.tracker.is_completed(&unit_id) {
            return Ok(UnitOutcome::AlreadyCompleted);
        }

        let cursor = self.tracker.resume_point(&unit_id).cursor();
        if cursor.is_exhausted() {
            // last page was checkpointed but completion was not recorded
            self.tracker.mark_completed(&unit_id).await?;
            return Ok(UnitOutcome::Completed);
        }
        if cursor.page > 0 {
            info!(page = cursor.page, "Resuming from checkpoint");
        } else {
            info!("Starting unit");
        }

        match unit.kind {
            UnitKind::Channel => self.process_channel(unit, cursor, report).await,
            UnitKind::Playlist => self.process_playlist(unit, cursor, report).await,
        }
    }

    async fn process_channel(
        &self,
        unit: &UnitDescriptor,
        mut cursor: Cursor,
        report: &mut UnitReport,
    ) -> Result<UnitOutcome, IngestError> {
        let unit_id = unit.id();
        loop {
            if self.shutdown.is_shutdown_requested() {
                info!(page = cursor.page, "Shutdown requested, stopping at page boundary");
                return Ok(UnitOutcome::Interrupted);
            }

            let page = self.list_page(unit, &cursor).await?;
            check_token_advances(&unit_id, cursor.token.as_deref(), &page)?;

            let listed = page.records.len();
            let (records, reached_cutoff) = self.prepare_page(unit, page.records, None).await?;
            let next_cursor = cursor.next(page.next_token);
            self.commit_page(&unit_id, &records, &next_cursor, listed, report)
                .await?;
            cursor = next_cursor;

            if reached_cutoff || cursor.token.is_none() {
                if reached_cutoff {
                    info!(cutoff = ?self.cutoff, "Reached cutoff");
                }
                self.tracker.mark_completed(&unit_id).await?;
                return Ok(UnitOutcome::Completed);
            }
        }
    }

    /// Walk a playlist's items and, per item, that video's comment pages
    ///
    /// Every committed comment page advances the cursor. The cutoff and a
    /// video with comments unavailable end only the current item.
    async fn process_playlist(
        &self,
        unit: &UnitDescriptor,
        mut cursor: Cursor,
        report: &mut UnitReport,
    ) -> Result<UnitOutcome, IngestError> {
        let unit_id = unit.id();
        let mut playlist_title: Option<Option<String>> = None;

        loop {
            if self.shutdown.is_shutdown_requested() {
                info!(page = cursor.page, "Shutdown requested, stopping at page boundary");
                return Ok(UnitOutcome::Interrupted);
            }

            let items = self.list_page(unit, &cursor).await?;
            check_token_advances(&unit_id, cursor.token.as_deref(), &items)?;
            let videos: Vec<String> = items
                .records
                .into_iter()
                .filter_map(|record| record.video_id)
                .collect();
            debug!(videos = videos.len(), "Playlist items listed");

            let (mut item, mut token) = start_position(&cursor, &videos);
            loop {
                let Some(video_id) = videos.get(item) else {
                    // nothing left on this items page
                    let next_cursor = cursor.next(items.next_token.clone());
                    self.tracker.advance(&unit_id, next_cursor.clone(), 0).await?;
                    cursor = next_cursor;
                    break;
                };
                if self.shutdown.is_shutdown_requested() {
                    info!(page = cursor.page, video = %video_id, "Shutdown requested, stopping at page boundary");
                    return Ok(UnitOutcome::Interrupted);
                }

                let listing = self.list_video_comments(video_id, token.as_deref()).await;
                let page = match listing {
                    Ok(page) => page,
                    Err(IngestError::Retry(RetryError::Fatal {
                        error: ApiError::NotFound(reason),
                        ..
                    })) => {
                        info!(video = %video_id, reason = %reason, "Comments unavailable, skipping video");
                        item += 1;
                        token = None;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                check_token_advances(&unit_id, token.as_deref(), &page)?;

                if playlist_title.is_none() {
                    let title = self
                        .entity_title(EntityKey::playlist(unit.remote_id.as_str()))
                        .await?;
                    playlist_title = Some(title.map(|t| t.title));
                }

                let listed = page.records.len();
                let (records, reached_cutoff) = self
                    .prepare_page(unit, page.records, playlist_title.clone().flatten())
                    .await?;
                if reached_cutoff {
                    debug!(video = %video_id, cutoff = ?self.cutoff, "Reached cutoff for video");
                }

                let next_cursor = match page.next_token {
                    Some(next) if !reached_cutoff => cursor.next_in_playlist(Some(VideoCursor {
                        item,
                        video_id: video_id.clone(),
                        token: Some(next),
                    })),
                    _ => match videos.get(item + 1) {
                        Some(next_video) => cursor.next_in_playlist(Some(VideoCursor {
                            item: item + 1,
                            video_id: next_video.clone(),
                            token: None,
                        })),
                        None => cursor.next(items.next_token.clone()),
                    },
                };
                self.commit_page(&unit_id, &records, &next_cursor, listed, report)
                    .await?;
                cursor = next_cursor;

                match &cursor.video {
                    Some(position) => {
                        item = position.item;
                        token = position.token.clone();
                    }
                    None => break,
                }
            }

            if cursor.is_exhausted() {
                self.tracker.mark_completed(&unit_id).await?;
                return Ok(UnitOutcome::Completed);
            }
        }
    }

    /// Deliver a page to the sink, then checkpoint past it
    async fn commit_page(
        &self,
        unit_id: &UnitId,
        records: &[SinkRecord],
        next_cursor: &Cursor,
        listed: usize,
        report: &mut UnitReport,
    ) -> Result<(), IngestError> {
        let commit = self.sink.commit(unit_id, records).await?;
        self.tracker
            .advance(unit_id, next_cursor.clone(), records.len() as u64)
            .await?;
        report.pages += 1;
        report.records_written += commit.written;
        debug!(
            page = next_cursor.page,
            listed,
            kept = records.len(),
            written = commit.written,
            duplicates_skipped = commit.duplicates_skipped,
            "Page committed"
        );
        Ok(())
    }

    async fn list_page(&self, unit: &UnitDescriptor, cursor: &Cursor) -> Result<Page, IngestError> {
        let kind = CallKind::ListPage(unit.kind);
        let page = self
            .engine
            .call(kind, self.remote.cost(kind), |credential| async move {
                self.remote.list_page(unit, cursor, &credential).await
            })
            .await?;
        Ok(page)
    }

    async fn list_video_comments(
        &self,
        video_id: &str,
        token: Option<&str>,
    ) -> Result<Page, IngestError> {
        let kind = CallKind::ListVideoComments;
        let page = self
            .engine
            .call(kind, self.remote.cost(kind), |credential| async move {
                self.remote
                    .list_video_comments(video_id, token, &credential)
                    .await
            })
            .await?;
        Ok(page)
    }

    /// Merge a page's records with their video and channel metadata
    ///
    /// Returns the records to commit and whether the cutoff was reached.
    async fn prepare_page(
        &self,
        unit: &UnitDescriptor,
        records: Vec<Record>,
        playlist_title: Option<String>,
    ) -> Result<(Vec<SinkRecord>, bool), IngestError> {
        let mut videos: HashMap<String, Option<VideoMetadata>> = HashMap::new();
        let mut channels: HashMap<String, Option<String>> = HashMap::new();
        let mut kept = Vec::with_capacity(records.len());

        for record in records {
            if self.is_before_cutoff(&record) {
                return Ok((kept, true));
            }

            let video = match &record.video_id {
                Some(video_id) => {
                    let metadata = match videos.entry(video_id.clone()) {
                        Entry::Occupied(entry) => entry.get().clone(),
                        Entry::Vacant(entry) => {
                            entry.insert(self.video_metadata(video_id).await?).clone()
                        }
                    };
                    let Some(metadata) = metadata else {
                        debug!(record = %record.record_id, video = %video_id, "Video not found, dropping record");
                        continue;
                    };
                    Some(metadata)
                }
                None => None,
            };

            if unit.kind == UnitKind::Channel {
                if let Some(video) = &video {
                    if video.channel_id != unit.remote_id {
                        debug!(
                            record = %record.record_id,
                            video = %video.id,
                            owner = %video.channel_id,
                            "Video owned by another channel, dropping record"
                        );
                        continue;
                    }
                }
            }

            let channel_name = match &video {
                Some(video) => match channels.entry(video.channel_id.clone()) {
                    Entry::Occupied(entry) => entry.get().clone(),
                    Entry::Vacant(entry) => {
                        let title = self
                            .entity_title(EntityKey::channel(video.channel_id.as_str()))
                            .await?;
                        entry.insert(title.map(|t| t.title)).clone()
                    }
                },
                None => None,
            };

            kept.push(
                SinkRecord::merge(record, video.as_ref())
                    .with_channel_name(channel_name)
                    .with_playlist_title(playlist_title.clone()),
            );
        }
        Ok((kept, false))
    }

    fn is_before_cutoff(&self, record: &Record) -> bool {
        match (self.cutoff, record.kind, record.updated_at) {
            (Some(cutoff), RecordKind::Comment, Some(updated_at)) => updated_at < cutoff,
            _ => false,
        }
    }

    /// Cached metadata of a video, fetched on a miss; `None` if the video is gone
    async fn video_metadata(&self, video_id: &str) -> Result<Option<VideoMetadata>, IngestError> {
        self.entity_metadata(EntityKey::video(video_id), VideoMetadata::from_blob)
            .await
    }

    /// Cached title of a channel or playlist; `None` if it is gone
    async fn entity_title(&self, key: EntityKey) -> Result<Option<EntityTitle>, IngestError> {
        self.entity_metadata(key, EntityTitle::from_blob).await
    }

    async fn entity_metadata<T>(
        &self,
        key: EntityKey,
        decode: fn(&Blob) -> Option<T>,
    ) -> Result<Option<T>, IngestError> {
        if let Some(blob) = self.cache.get(&key).await {
            match decode(&blob) {
                Some(value) => return Ok(Some(value)),
                None => warn!(key = %key, "Undecodable cached metadata, refetching"),
            }
        }

        let kind = CallKind::FetchEntity(key.entity_type);
        let key_ref = &key;
        let fetched = self
            .engine
            .call(kind, self.remote.cost(kind), |credential| async move {
                self.remote.fetch_entity(key_ref, &credential).await
            })
            .await;

        let blob = match fetched {
            Ok(blob) => blob,
            Err(RetryError::Fatal {
                error: ApiError::NotFound(_),
                ..
            }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(value) = decode(&blob) else {
            return Err(IngestError::Remote(ApiError::Malformed(format!(
                "unexpected metadata for {key}"
            ))));
        };

        if let Err(e) = self.cache.put(key, blob).await {
            warn!(error = %e, "Cache write failed, continuing without persistence");
            self.cache.degrade_to_memory_only().await;
        }
        Ok(Some(value))
    }
}

/// Fail when the remote hands back the token that was just requested
fn check_token_advances(
    unit_id: &UnitId,
    requested: Option<&str>,
    page: &Page,
) -> Result<(), IngestError> {
    match (page.next_token.as_deref(), requested) {
        (Some(next), Some(current)) if next == current => Err(IngestError::RepeatedToken {
            unit: unit_id.clone(),
            token: next.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Item and comment token to continue a playlist items page from
///
/// Follows the recorded video when the playlist was reordered since the
/// checkpoint; restarts the item when the video left the playlist.
fn start_position(cursor: &Cursor, videos: &[String]) -> (usize, Option<String>) {
    let Some(position) = &cursor.video else {
        return (0, None);
    };
    if videos.get(position.item) == Some(&position.video_id) {
        return (position.item, position.token.clone());
    }
    match videos.iter().position(|id| *id == position.video_id) {
        Some(item) => {
            warn!(video = %position.video_id, from = position.item, to = item, "Playlist reordered, following video");
            (item, position.token.clone())
        }
        None => {
            warn!(video = %position.video_id, "Video left the playlist, continuing with the item in its place");
            (position.item, None)
        }
    }
}
