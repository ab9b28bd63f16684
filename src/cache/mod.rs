//! Persistent LRU cache for entity metadata
//!
//! Deduplicates metadata lookups (video, channel, playlist) across units and
//! across process restarts. Entries persist through the
//! [`DurableStore`](crate::store::DurableStore) under `cache/<type>/<id>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;
use crate::{Blob, EntityKey};

mod lru;

pub use lru::PersistentCache;

/// Default cache capacity (entries)
pub const DEFAULT_CAPACITY: usize = 1000;

/// Store key prefix of persisted entries
pub const KEY_PREFIX: &str = "cache/";

/// When mutations reach the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Every mutation is written through before the call returns
    Synchronous,
    /// Dirty entries are written once `every` mutations are pending, and on
    /// [`PersistentCache::flush`]
    Batched {
        /// Pending mutation threshold
        every: usize,
    },
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::Batched { every: 50 }
    }
}

/// Cache errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A mutation could not be persisted; the in-memory cache is updated
    #[error("cache write failed for {key}: {source}")]
    WriteFailed {
        /// Entity key of the failed write
        key: String,
        /// Store error
        #[source]
        source: StoreError,
    },

    /// Persisted entries could not be read
    #[error("cache load failed: {0}")]
    LoadFailed(#[source] StoreError),

    /// Entry could not be encoded
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// One cached entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entity key
    pub key: EntityKey,
    /// Cached payload
    pub value: Blob,
    /// First insertion (refreshed on re-fetch)
    pub inserted_at: DateTime<Utc>,
    /// Last read or write
    pub last_accessed_at: DateTime<Utc>,
    pub(crate) insert_seq: u64,
    pub(crate) access_seq: u64,
}

impl CacheEntry {
    fn recency(&self) -> (u64, u64) {
        (self.access_seq, self.insert_seq)
    }
}

/// Hit/miss/eviction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from memory
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Entries evicted to respect capacity
    pub evictions: u64,
}

impl CacheStats {
    /// Share of lookups that hit, 0.0 when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub(crate) fn store_key(key: &EntityKey) -> String {
    format!("{KEY_PREFIX}{}/{}", key.entity_type, key.entity_id)
}
