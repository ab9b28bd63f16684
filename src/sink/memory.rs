//! In-memory sink that records every delivery

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{CommitReport, Sink, SinkError, SinkRecord};
use crate::UnitId;

#[derive(Debug, Default)]
struct Inner {
    stored: HashMap<UnitId, Vec<SinkRecord>>,
    stored_ids: HashSet<String>,
    deliveries: HashMap<String, u64>,
    commits: u64,
    fail_next: u32,
}

/// [`Sink`] keeping records in memory; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` commits
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.lock().fail_next = n;
    }

    /// Records stored for a unit, in commit order
    pub fn records(&self, unit_id: &UnitId) -> Vec<SinkRecord> {
        self.inner
            .lock()
            .stored
            .get(unit_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Records stored across all units
    pub fn total_records(&self) -> usize {
        self.inner.lock().stored_ids.len()
    }

    /// How many times a record id was handed to `commit`
    pub fn deliveries(&self, record_id: &str) -> u64 {
        self.inner
            .lock()
            .deliveries
            .get(record_id)
            .copied()
            .unwrap_or(0)
    }

    /// Largest delivery count of any record id
    pub fn max_deliveries(&self) -> u64 {
        self.inner
            .lock()
            .deliveries
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// Successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.inner.lock().commits
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn commit(
        &self,
        unit_id: &UnitId,
        records: &[SinkRecord],
    ) -> Result<CommitReport, SinkError> {
        let mut inner = self.inner.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(SinkError::Rejected("injected commit failure".to_string()));
        }

        let mut report = CommitReport::default();
        for record in records {
            *inner.deliveries.entry(record.record_id.clone()).or_default() += 1;
            if inner.stored_ids.insert(record.record_id.clone()) {
                inner
                    .stored
                    .entry(unit_id.clone())
                    .or_default()
                    .push(record.clone());
                report.written += 1;
            } else {
                report.duplicates_skipped += 1;
            }
        }
        inner.commits += 1;
        Ok(report)
    }
}
