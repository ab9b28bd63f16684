//! Progress tracker
//!
//! Keeps the latest [`ProgressCheckpoint`] of every unit in memory and
//! writes each change through to the durable store before the in-memory view
//! is updated, so a reader never observes progress that is not durable.
//!
//! Writers of one unit are serialized by a per-unit async lock held across
//! compare, store write and view update; concurrent or out-of-order
//! `advance` calls therefore never move a cursor backwards.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::checkpoint::{Cursor, ProgressCheckpoint, ResumePoint, SCHEMA_VERSION};
use crate::store::{DurableStore, StoreError};
use crate::UnitId;

const KEY_PREFIX: &str = "progress/";

/// Progress tracker errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProgressError {
    /// Schema version mismatch
    #[error("schema version mismatch for {key}: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Store key of the checkpoint
        key: String,
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error for {key}: {message}")]
    DeserializationError {
        /// Store key of the checkpoint
        key: String,
        /// Decoder message
        message: String,
    },

    /// Durable store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Durable cursor store for all units
pub struct ProgressTracker {
    store: Arc<dyn DurableStore>,
    checkpoints: Mutex<HashMap<UnitId, ProgressCheckpoint>>,
    writers: Mutex<HashMap<UnitId, Arc<AsyncMutex<()>>>>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("units", &self.checkpoints.lock().len())
            .finish()
    }
}

fn store_key(unit_id: &UnitId) -> String {
    format!("{KEY_PREFIX}{unit_id}")
}

impl ProgressTracker {
    /// Load every checkpoint from `store` with a single prefix scan
    ///
    /// Fails on a checkpoint written with an unknown schema version or that
    /// cannot be decoded; silently dropping it would restart the unit.
    pub async fn open(store: Arc<dyn DurableStore>) -> Result<Self, ProgressError> {
        let entries = store.scan(KEY_PREFIX).await?;

        let mut checkpoints = HashMap::with_capacity(entries.len());
        for (key, bytes) in entries {
            let checkpoint: ProgressCheckpoint =
                serde_json::from_slice(&bytes).map_err(|e| {
                    warn!(key = %key, error = %e, "Failed to decode checkpoint");
                    ProgressError::DeserializationError {
                        key: key.clone(),
                        message: e.to_string(),
                    }
                })?;

            if checkpoint.schema_version != SCHEMA_VERSION {
                warn!(
                    key = %key,
                    found_version = %checkpoint.schema_version,
                    expected_version = SCHEMA_VERSION,
                    "Checkpoint schema version mismatch"
                );
                return Err(ProgressError::SchemaVersionMismatch {
                    key,
                    expected: SCHEMA_VERSION.to_string(),
                    found: checkpoint.schema_version,
                });
            }

            checkpoints.insert(checkpoint.unit_id.clone(), checkpoint);
        }

        info!(units = checkpoints.len(), "Loaded progress checkpoints");
        Ok(Self {
            store,
            checkpoints: Mutex::new(checkpoints),
            writers: Mutex::new(HashMap::new()),
        })
    }

    fn writer(&self, unit_id: &UnitId) -> Arc<AsyncMutex<()>> {
        self.writers
            .lock()
            .entry(unit_id.clone())
            .or_default()
            .clone()
    }

    fn current(&self, unit_id: &UnitId) -> ProgressCheckpoint {
        self.checkpoints
            .lock()
            .get(unit_id)
            .cloned()
            .unwrap_or_else(|| ProgressCheckpoint::new(unit_id.clone()))
    }

    /// Last durably recorded cursor of a unit, or [`ResumePoint::Start`]
    pub fn resume_point(&self, unit_id: &UnitId) -> ResumePoint {
        match self.checkpoints.lock().get(unit_id) {
            Some(checkpoint) if checkpoint.cursor.page > 0 => {
                ResumePoint::At(checkpoint.cursor.clone())
            }
            _ => ResumePoint::Start,
        }
    }

    /// Current checkpoint of a unit
    pub fn checkpoint(&self, unit_id: &UnitId) -> Option<ProgressCheckpoint> {
        self.checkpoints.lock().get(unit_id).cloned()
    }

    /// Every known checkpoint, ordered by unit id
    pub fn checkpoints(&self) -> Vec<ProgressCheckpoint> {
        let mut all: Vec<_> = self.checkpoints.lock().values().cloned().collect();
        all.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        all
    }

    /// Whether a unit is marked completed
    pub fn is_completed(&self, unit_id: &UnitId) -> bool {
        self.checkpoints
            .lock()
            .get(unit_id)
            .is_some_and(|c| c.completed)
    }

    /// Record that everything up to `new_cursor` is committed downstream
    ///
    /// A cursor that is not strictly greater than the stored one is a no-op,
    /// as is advancing a completed unit. Returns whether the checkpoint moved.
    pub async fn advance(
        &self,
        unit_id: &UnitId,
        new_cursor: Cursor,
        delta_count: u64,
    ) -> Result<bool, ProgressError> {
        let writer = self.writer(unit_id);
        let _guard = writer.lock().await;

        let mut updated = self.current(unit_id);
        if updated.completed {
            warn!(unit = %unit_id, "Ignoring advance of a completed unit");
            return Ok(false);
        }
        if new_cursor <= updated.cursor {
            debug!(
                unit = %unit_id,
                stored = updated.cursor.page,
                requested = new_cursor.page,
                "Ignoring non-advancing cursor"
            );
            return Ok(false);
        }
        updated.cursor = new_cursor;
        updated.processed_count += delta_count;
        updated.updated_at = Utc::now();

        self.persist(&updated).await?;
        debug!(
            unit = %unit_id,
            page = updated.cursor.page,
            processed = updated.processed_count,
            "Checkpoint advanced"
        );
        self.checkpoints.lock().insert(unit_id.clone(), updated);
        Ok(true)
    }

    /// Mark a unit completed; completed units are skipped until [`Self::reset`]
    pub async fn mark_completed(&self, unit_id: &UnitId) -> Result<(), ProgressError> {
        let writer = self.writer(unit_id);
        let _guard = writer.lock().await;

        let mut updated = self.current(unit_id);
        if updated.completed {
            return Ok(());
        }
        updated.completed = true;
        updated.updated_at = Utc::now();

        self.persist(&updated).await?;
        info!(
            unit = %unit_id,
            pages = updated.cursor.page,
            processed = updated.processed_count,
            "Unit marked completed"
        );
        self.checkpoints.lock().insert(unit_id.clone(), updated);
        Ok(())
    }

    /// Forget all progress of a unit
    pub async fn reset(&self, unit_id: &UnitId) -> Result<(), ProgressError> {
        let writer = self.writer(unit_id);
        let _guard = writer.lock().await;

        self.store.delete(&store_key(unit_id)).await?;
        if self.checkpoints.lock().remove(unit_id).is_some() {
            info!(unit = %unit_id, "Progress reset");
        }
        Ok(())
    }

    async fn persist(&self, checkpoint: &ProgressCheckpoint) -> Result<(), ProgressError> {
        let bytes = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| ProgressError::SerializationError(e.to_string()))?;
        self.store
            .put(&store_key(&checkpoint.unit_id), &bytes)
            .await?;
        Ok(())
    }
}
