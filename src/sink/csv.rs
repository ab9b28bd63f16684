//! CSV sink: one file per unit
//!
//! Deduplicates on `record_id`. Ids already in a unit's file are reloaded
//! the first time the unit commits, so re-delivery after a restart does not
//! duplicate rows. Every commit is flushed and fsynced before it returns.

use async_trait::async_trait;
use csv::{ReaderBuilder, WriterBuilder};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{CommitReport, Sink, SinkError, SinkRecord};
use crate::UnitId;

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

type SeenIds = Arc<Mutex<Option<HashSet<String>>>>;

/// [`Sink`] writing `<dir>/<unit>.csv`
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: Arc<PathBuf>,
    seen: Arc<Mutex<HashMap<UnitId, SeenIds>>>,
}

impl CsvSink {
    /// Create a sink writing into `dir` (created if missing)
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| SinkError::IoError(format!("Failed to create directory: {e}")))?;
        info!(path = %dir.display(), "CSV sink ready");
        Ok(Self {
            dir: Arc::new(dir),
            seen: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// File a unit's records are written to
    pub fn path_for(&self, unit_id: &UnitId) -> PathBuf {
        unit_path(&self.dir, unit_id)
    }

    fn seen_for(&self, unit_id: &UnitId) -> SeenIds {
        self.seen
            .lock()
            .entry(unit_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}

fn unit_path(dir: &Path, unit_id: &UnitId) -> PathBuf {
    let name: String = unit_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{name}.csv"))
}

/// Read the `record_id` column of an existing file
fn load_seen_ids(path: &Path) -> Result<HashSet<String>, SinkError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| SinkError::CsvError(format!("Failed to open {}: {e}", path.display())))?;

    let mut seen = HashSet::new();
    for row in reader.records() {
        let row = row.map_err(|e| SinkError::CsvError(format!("Failed to read row: {e}")))?;
        if let Some(id) = row.get(0) {
            seen.insert(id.to_string());
        }
    }
    debug!(path = %path.display(), ids = seen.len(), "Reloaded stored record ids");
    Ok(seen)
}

/// Append `records`; nothing is written unless every row encodes
fn append_records<T: Serialize>(path: &Path, records: &[T]) -> Result<(), SinkError> {
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let mut writer = WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(Vec::with_capacity(DEFAULT_BUFFER_SIZE));
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| SinkError::CsvError(format!("Failed to write record: {e}")))?;
    }
    let encoded = writer
        .into_inner()
        .map_err(|e| SinkError::CsvError(format!("Failed to encode records: {e}")))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SinkError::IoError(format!("Failed to open file: {e}")))?;
    file.write_all(&encoded)
        .map_err(|e| SinkError::IoError(format!("Failed to write records: {e}")))?;
    file.sync_all()
        .map_err(|e| SinkError::IoError(format!("Failed to sync file: {e}")))
}

#[async_trait]
impl Sink for CsvSink {
    async fn commit(
        &self,
        unit_id: &UnitId,
        records: &[SinkRecord],
    ) -> Result<CommitReport, SinkError> {
        let path = self.path_for(unit_id);
        let seen = self.seen_for(unit_id);
        let records = records.to_vec();
        let unit = unit_id.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = seen.lock();
            if guard.is_none() {
                *guard = Some(load_seen_ids(&path)?);
            }
            let Some(seen_ids) = guard.as_mut() else {
                return Err(SinkError::IoError("record id set missing".to_string()));
            };

            let mut batch_ids = HashSet::new();
            let fresh: Vec<&SinkRecord> = records
                .iter()
                .filter(|r| !seen_ids.contains(&r.record_id) && batch_ids.insert(r.record_id.clone()))
                .collect();
            let report = CommitReport {
                written: fresh.len() as u64,
                duplicates_skipped: (records.len() - fresh.len()) as u64,
            };

            if !fresh.is_empty() {
                append_records(&path, &fresh)?;
                seen_ids.extend(batch_ids);
            }

            debug!(
                unit = %unit,
                written = report.written,
                duplicates_skipped = report.duplicates_skipped,
                "Committed records to CSV"
            );
            Ok(report)
        })
        .await
        .map_err(|e| SinkError::IoError(format!("Commit task failed: {e}")))?
    }
}
