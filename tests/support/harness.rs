//! Wiring of an orchestrator over in-memory collaborators

use async_trait::async_trait;
use chrono::Utc;
use comment_ingest::cache::{FlushPolicy, PersistentCache};
use comment_ingest::ingest::Orchestrator;
use comment_ingest::quota::{Credential, QuotaLedger, DEFAULT_RESET_INTERVAL};
use comment_ingest::remote::RemoteApi;
use comment_ingest::resume::ProgressTracker;
use comment_ingest::retry::{QuotaPolicy, RetryEngine, RetryPolicy};
use comment_ingest::shutdown::{SharedShutdown, ShutdownCoordinator};
use comment_ingest::sink::{CommitReport, MemorySink, Sink, SinkError, SinkRecord};
use comment_ingest::store::{DurableStore, MemoryStore};
use comment_ingest::UnitId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::fake_remote::FakeRemote;

/// Ledger with credentials `key-1`, `key-2`, ... and the given limits
pub fn ledger(limits: &[u64]) -> Arc<QuotaLedger> {
    ledger_with_window(limits, DEFAULT_RESET_INTERVAL)
}

/// [`ledger`] with a custom quota window
pub fn ledger_with_window(limits: &[u64], window: Duration) -> Arc<QuotaLedger> {
    let ledger = QuotaLedger::new(window);
    let now = Utc::now();
    for (i, limit) in limits.iter().enumerate() {
        ledger.add_credential_at(
            Credential::new(format!("key-{}", i + 1), format!("secret-{}", i + 1)),
            *limit,
            now,
        );
    }
    Arc::new(ledger)
}

/// Millisecond backoff, no jitter
pub fn fast_policy(on_quota_exhausted: QuotaPolicy) -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        call_timeout: Duration::from_secs(2),
        on_quota_exhausted,
        jitter: false,
    }
}

/// Everything a test run shares across simulated restarts
pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub cache_store: MemoryStore,
    pub progress_store: MemoryStore,
    pub sink: Arc<dyn Sink>,
    pub ledger: Arc<QuotaLedger>,
    pub policy: RetryPolicy,
    pub flush: FlushPolicy,
    pub capacity: usize,
    pub shutdown: SharedShutdown,
}

impl Harness {
    /// One store for cache and checkpoints, a memory sink and a generous ledger
    pub fn new(remote: FakeRemote, sink: &MemorySink) -> Self {
        let store = MemoryStore::new();
        Self {
            remote: Arc::new(remote),
            cache_store: store.clone(),
            progress_store: store,
            sink: Arc::new(sink.clone()),
            ledger: ledger(&[10_000]),
            policy: fast_policy(QuotaPolicy::Fail),
            flush: FlushPolicy::Synchronous,
            capacity: 100,
            shutdown: ShutdownCoordinator::shared(),
        }
    }

    /// Build an orchestrator as a fresh process would: cache and checkpoints
    /// are reloaded from the stores
    pub async fn start(&self) -> Orchestrator {
        let cache_store: Arc<dyn DurableStore> = Arc::new(self.cache_store.clone());
        let progress_store: Arc<dyn DurableStore> = Arc::new(self.progress_store.clone());
        let cache = PersistentCache::open(cache_store, self.capacity, self.flush)
            .await
            .unwrap();
        let tracker = ProgressTracker::open(progress_store).await.unwrap();
        let remote: Arc<dyn RemoteApi> = self.remote.clone();

        Orchestrator::new(
            remote,
            RetryEngine::new(self.ledger.clone(), self.policy.clone()),
            Arc::new(cache),
            Arc::new(tracker),
            self.sink.clone(),
        )
        .with_shutdown(self.shutdown.clone())
    }
}

/// Forwards to a [`MemorySink`] but rejects its `fail_on`-th commit (1-based)
pub struct CrashingSink {
    inner: MemorySink,
    fail_on: u64,
    attempts: AtomicU64,
}

impl CrashingSink {
    pub fn new(inner: &MemorySink, fail_on: u64) -> Self {
        Self {
            inner: inner.clone(),
            fail_on,
            attempts: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Sink for CrashingSink {
    async fn commit(
        &self,
        unit_id: &UnitId,
        records: &[SinkRecord],
    ) -> Result<CommitReport, SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_on {
            return Err(SinkError::IoError("simulated crash".to_string()));
        }
        self.inner.commit(unit_id, records).await
    }
}
