//! In-process durable store
//!
//! Survives as long as the `MemoryStore` value (or a clone of it) is alive,
//! which makes it a stand-in for a durable backend across simulated restarts
//! in tests. Write failures can be injected to exercise degraded paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::{DurableStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Shared {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

/// [`DurableStore`] kept in memory; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put`/`delete` fail until switched off
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `put`/`delete` calls so far
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::SeqCst)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::IoError("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_writable()?;
        self.shared
            .entries
            .lock()
            .insert(key.to_string(), value.to_vec());
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.shared.entries.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.shared.entries.lock().remove(key);
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let entries = self.shared.entries.lock();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
