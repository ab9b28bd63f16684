//! File-backed durable store
//!
//! One file per key inside a single directory. File names are the hex
//! encoding of the key so arbitrary ids map to portable names and prefix
//! scans can decode them back. Writes go through a temp file in the same
//! directory, are fsynced and then atomically renamed over the target.
//! An advisory `store.lock` file (fd-lock) serializes writers across
//! processes; readers take the shared lock.

use async_trait::async_trait;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{DurableStore, StoreError, StoreResult};

/// Maximum size of a single stored value (10 MB)
pub const MAX_VALUE_SIZE: u64 = 10 * 1024 * 1024;

const LOCK_FILE_NAME: &str = "store.lock";
const VALUE_EXTENSION: &str = "json";

/// Directory-backed [`DurableStore`]
#[derive(Debug, Clone)]
pub struct FileStore {
    root: Arc<PathBuf>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    ///
    /// Fails with [`StoreError::Unavailable`] when the directory cannot be
    /// created or the lock file cannot be opened.
    pub fn open<P: Into<PathBuf>>(root: P) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StoreError::Unavailable(format!("Failed to create {}: {e}", root.display()))
        })?;

        open_lock_file(&root).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(path = %root.display(), "Opened file store");
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(root: &Path, key: &str) -> PathBuf {
        root.join(format!("{}.{VALUE_EXTENSION}", hex::encode(key.as_bytes())))
    }

    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> StoreResult<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || op(root.as_path()))
            .await
            .map_err(|e| StoreError::IoError(format!("Store task failed: {e}")))?
    }
}

fn open_lock_file(root: &Path) -> StoreResult<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(root.join(LOCK_FILE_NAME))
        .map_err(|e| StoreError::LockError(format!("Failed to open lock file: {e}")))
}

fn write_atomic(root: &Path, key: &str, value: &[u8]) -> StoreResult<()> {
    let path = FileStore::path_for(root, key);

    let mut lock = RwLock::new(open_lock_file(root)?);
    let _guard = lock
        .write()
        .map_err(|e| StoreError::LockError(format!("Failed to acquire write lock: {e}")))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(root)
        .map_err(|e| StoreError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(value)
        .map_err(|e| StoreError::IoError(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| StoreError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| StoreError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(&path)
        .map_err(|e| StoreError::IoError(format!("Failed to persist temp file: {e}")))?;

    // Make the rename itself durable
    if let Ok(dir) = File::open(root) {
        let _ = dir.sync_all();
    }

    debug!(key, bytes = value.len(), "Stored value");
    Ok(())
}

fn read_value(path: &Path, key: &str) -> StoreResult<Option<Vec<u8>>> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::IoError(e.to_string())),
    };
    if metadata.len() > MAX_VALUE_SIZE {
        return Err(StoreError::ValueTooLarge {
            key: key.to_string(),
            size: metadata.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::IoError(e.to_string())),
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_vec();
        self.blocking(move |root| write_atomic(root, &key, &value))
            .await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |root| {
            let lock = RwLock::new(open_lock_file(root)?);
            let _guard = lock
                .read()
                .map_err(|e| StoreError::LockError(format!("Failed to acquire read lock: {e}")))?;
            read_value(&FileStore::path_for(root, &key), &key)
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.blocking(move |root| {
            let mut lock = RwLock::new(open_lock_file(root)?);
            let _guard = lock
                .write()
                .map_err(|e| StoreError::LockError(format!("Failed to acquire write lock: {e}")))?;
            match std::fs::remove_file(FileStore::path_for(root, &key)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::IoError(e.to_string())),
            }
        })
        .await
    }

    async fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let prefix = prefix.to_string();
        self.blocking(move |root| {
            let lock = RwLock::new(open_lock_file(root)?);
            let _guard = lock
                .read()
                .map_err(|e| StoreError::LockError(format!("Failed to acquire read lock: {e}")))?;

            let entries = std::fs::read_dir(root)
                .map_err(|e| StoreError::Unavailable(format!("Failed to read store: {e}")))?;

            let mut found = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| StoreError::IoError(e.to_string()))?;
                let path = entry.path();
                if !path.extension().is_some_and(|ext| ext == VALUE_EXTENSION) {
                    continue;
                }
                // Temp files and foreign files do not decode to a key
                let Some(key) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| hex::decode(stem).ok())
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                else {
                    continue;
                };
                if !key.starts_with(&prefix) {
                    continue;
                }
                if let Some(value) = read_value(&path, &key)? {
                    found.push((key, value));
                }
            }
            found.sort_by(|a, b| a.0.cmp(&b.0));

            debug!(prefix = %prefix, entries = found.len(), "Scanned file store");
            Ok(found)
        })
        .await
    }
}
