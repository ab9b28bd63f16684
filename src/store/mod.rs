//! Durable key-value storage
//!
//! Both the metadata cache and the progress tracker persist through the
//! [`DurableStore`] trait and never touch a concrete storage engine directly.
//! Keys are `/`-separated strings (`cache/video/<id>`, `progress/<unit>`);
//! values are opaque bytes, JSON-encoded by the callers.

use async_trait::async_trait;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Durable store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backing store cannot be reached or opened
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),

    /// Stored value too large to load
    #[error("value too large for key {key}: {size} bytes (max: {max} bytes)")]
    ValueTooLarge {
        /// Offending key
        key: String,
        /// Actual size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value persistence with atomic single-key writes (see module docs)
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Atomically write `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Remove `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Load every entry whose key starts with `prefix`, ordered by key
    async fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;
}
