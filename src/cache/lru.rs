//! Capacity-bounded LRU cache backed by the durable store
//!
//! All state sits behind one async mutex that stays held across store
//! writes, so the eviction decision, the recency update and the durable
//! mutation of a call form a single linearizable step.
//!
//! Recency is a logical clock: every insert or access takes the next value.
//! The clock values persist with the entries, so `load()` rebuilds the exact
//! ranking. Ties (only possible with hand-edited data) fall back to the
//! insertion sequence.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    store_key, CacheEntry, CacheError, CacheStats, FlushPolicy, KEY_PREFIX,
};
use crate::metrics::{record_cache_eviction, record_cache_lookup};
use crate::store::DurableStore;
use crate::{Blob, EntityKey};

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<EntityKey, CacheEntry>,
    /// (access_seq, insert_seq) -> key; first entry is least recently used
    recency: BTreeMap<(u64, u64), EntityKey>,
    clock: u64,
    dirty: HashSet<EntityKey>,
    removed: HashSet<EntityKey>,
    pending: usize,
    memory_only: bool,
    stats: CacheStats,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, key: &EntityKey) -> Option<CacheEntry> {
        let seq = self.tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.recency());
        entry.access_seq = seq;
        entry.last_accessed_at = Utc::now();
        self.recency.insert(entry.recency(), key.clone());
        Some(entry.clone())
    }

    fn remove(&mut self, key: &EntityKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.recency());
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<EntityKey> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        self.stats.evictions += 1;
        record_cache_eviction();
        Some(key)
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.recency.insert(entry.recency(), entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
    }
}

/// Persistent, capacity-bounded LRU cache (see module docs)
pub struct PersistentCache {
    store: Arc<dyn DurableStore>,
    capacity: usize,
    policy: FlushPolicy,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PersistentCache {
    /// Create an empty cache; call [`Self::load`] to restore persisted entries
    pub fn new(store: Arc<dyn DurableStore>, capacity: usize, policy: FlushPolicy) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Create a cache and restore its persisted entries
    pub async fn open(
        store: Arc<dyn DurableStore>,
        capacity: usize,
        policy: FlushPolicy,
    ) -> Result<Self, CacheError> {
        let cache = Self::new(store, capacity, policy);
        cache.load().await?;
        Ok(cache)
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Flush policy
    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Look up `key`, refreshing its recency on a hit
    pub async fn get(&self, key: &EntityKey) -> Option<Blob> {
        let mut state = self.state.lock().await;

        let Some(entry) = state.touch(key) else {
            state.stats.misses += 1;
            record_cache_lookup(false);
            return None;
        };
        state.stats.hits += 1;
        record_cache_lookup(true);

        if !state.memory_only {
            match self.policy {
                FlushPolicy::Synchronous => {
                    if let Err(e) = self.write_entry(&entry).await {
                        warn!(key = %key, error = %e, "Failed to persist cache recency");
                        state.dirty.insert(key.clone());
                    }
                }
                FlushPolicy::Batched { .. } => {
                    state.dirty.insert(key.clone());
                }
            }
        }

        Some(entry.value)
    }

    /// Insert or refresh `key`, evicting the least recently used entry when full
    ///
    /// On a store failure the in-memory cache still holds the new value and
    /// [`CacheError::WriteFailed`] is returned; the failed mutation stays
    /// pending for the next flush.
    pub async fn put(&self, key: EntityKey, value: Blob) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let evicted = if let Some(mut entry) = state.remove(&key) {
            entry.value = value;
            entry.inserted_at = now;
            entry.last_accessed_at = now;
            entry.access_seq = state.tick();
            state.insert(entry);
            None
        } else {
            let evicted = if state.entries.len() >= self.capacity {
                state.evict_lru()
            } else {
                None
            };
            let seq = state.tick();
            state.insert(CacheEntry {
                key: key.clone(),
                value,
                inserted_at: now,
                last_accessed_at: now,
                insert_seq: seq,
                access_seq: seq,
            });
            evicted
        };

        if let Some(evicted) = &evicted {
            debug!(evicted = %evicted, inserted = %key, "Evicted least recently used entry");
        }

        if state.memory_only {
            return Ok(());
        }

        state.removed.remove(&key);
        state.dirty.insert(key.clone());
        if let Some(evicted) = evicted {
            state.dirty.remove(&evicted);
            state.removed.insert(evicted);
        }
        state.pending += 1;

        let due = match self.policy {
            FlushPolicy::Synchronous => true,
            FlushPolicy::Batched { every } => state.pending >= every.max(1),
        };
        if due {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// Drop `key` from the cache; returns whether it was present
    pub async fn invalidate(&self, key: &EntityKey) -> Result<bool, CacheError> {
        let mut state = self.state.lock().await;
        if state.remove(key).is_none() {
            return Ok(false);
        }
        debug!(key = %key, "Invalidated cache entry");

        if state.memory_only {
            return Ok(true);
        }

        state.dirty.remove(key);
        state.removed.insert(key.clone());
        state.pending += 1;

        let due = match self.policy {
            FlushPolicy::Synchronous => true,
            FlushPolicy::Batched { every } => state.pending >= every.max(1),
        };
        if due {
            self.flush_locked(&mut state).await?;
        }
        Ok(true)
    }

    /// Persist every mutation since the last successful flush
    pub async fn flush(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        if state.memory_only {
            return Ok(());
        }
        self.flush_locked(&mut state).await
    }

    /// Replace the in-memory contents with the persisted entries
    ///
    /// Entries beyond capacity are evicted in LRU order; undecodable entries
    /// are skipped. Returns the number of entries loaded.
    pub async fn load(&self) -> Result<usize, CacheError> {
        let persisted = self
            .store
            .scan(KEY_PREFIX)
            .await
            .map_err(CacheError::LoadFailed)?;

        let mut decoded: Vec<CacheEntry> = Vec::with_capacity(persisted.len());
        for (store_key, bytes) in persisted {
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => decoded.push(entry),
                Err(e) => warn!(key = %store_key, error = %e, "Skipping undecodable cache entry"),
            }
        }
        decoded.sort_by_key(|e| e.recency());

        let mut state = self.state.lock().await;
        let memory_only = state.memory_only;
        let stats = state.stats;
        *state = CacheState {
            memory_only,
            stats,
            ..CacheState::default()
        };

        let overflow = decoded.len().saturating_sub(self.capacity);
        for entry in decoded.drain(..overflow) {
            state.removed.insert(entry.key);
        }
        state.clock = decoded
            .iter()
            .map(|e| e.access_seq.max(e.insert_seq))
            .max()
            .unwrap_or(0);
        for entry in decoded {
            state.insert(entry);
        }

        if overflow > 0 {
            info!(
                evicted = overflow,
                capacity = self.capacity,
                "Persisted cache exceeded capacity, evicted oldest entries"
            );
            state.stats.evictions += overflow as u64;
            if !memory_only {
                self.flush_locked(&mut state).await?;
            }
        }

        let loaded = state.entries.len();
        info!(entries = loaded, capacity = self.capacity, "Loaded metadata cache");
        Ok(loaded)
    }

    /// Stop persisting; the cache keeps serving from memory
    pub async fn degrade_to_memory_only(&self) {
        let mut state = self.state.lock().await;
        if !state.memory_only {
            warn!(
                pending = state.dirty.len() + state.removed.len(),
                "Cache degraded to memory-only, pending writes dropped"
            );
        }
        state.memory_only = true;
        state.dirty.clear();
        state.removed.clear();
        state.pending = 0;
    }

    /// Whether the cache stopped persisting
    pub async fn is_degraded(&self) -> bool {
        self.state.lock().await.memory_only
    }

    /// Number of entries in memory
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Counters since creation
    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats
    }

    /// Read an entry without touching its recency
    pub async fn peek(&self, key: &EntityKey) -> Option<CacheEntry> {
        self.state.lock().await.entries.get(key).cloned()
    }

    /// Keys ordered from least to most recently used
    pub async fn keys_by_recency(&self) -> Vec<EntityKey> {
        self.state.lock().await.recency.values().cloned().collect()
    }

    async fn write_entry(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        self.store
            .put(&store_key(&entry.key), &bytes)
            .await
            .map_err(|source| CacheError::WriteFailed {
                key: entry.key.to_string(),
                source,
            })
    }

    async fn flush_locked(&self, state: &mut CacheState) -> Result<(), CacheError> {
        let removed: Vec<EntityKey> = state.removed.iter().cloned().collect();
        for key in removed {
            self.store
                .delete(&store_key(&key))
                .await
                .map_err(|source| CacheError::WriteFailed {
                    key: key.to_string(),
                    source,
                })?;
            state.removed.remove(&key);
        }

        let dirty: Vec<EntityKey> = state.dirty.iter().cloned().collect();
        let written = dirty.len();
        for key in dirty {
            if let Some(entry) = state.entries.get(&key) {
                self.write_entry(entry).await?;
            }
            state.dirty.remove(&key);
        }

        state.pending = 0;
        if written > 0 {
            debug!(entries = written, "Flushed cache entries");
        }
        Ok(())
    }
}
