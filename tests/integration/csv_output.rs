//! Integration tests for CSV output across restarts

use comment_ingest::filter::SelectionFilter;
use comment_ingest::sink::{CsvSink, MemorySink};
use comment_ingest::UnitDescriptor;
use std::sync::Arc;
use tempfile::TempDir;

use crate::support::fake_remote::{comments, FakeRemote};
use crate::support::harness::Harness;

fn csv_rows(path: &std::path::Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|r| r.unwrap()).collect()
}

#[tokio::test]
async fn test_records_written_with_video_columns() {
    let dir = TempDir::new().unwrap();
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let remote = FakeRemote::new()
        .with_channel("UC1", "Accolonn")
        .with_video("v1", "UC1")
        .with_pages(
            &unit,
            vec![comments(&["c1", "c2"], "v1", 9), comments(&["c3"], "v1", 8)],
        );
    let mut harness = Harness::new(remote, &MemorySink::new());
    let sink = CsvSink::new(dir.path().join("output")).unwrap();
    harness.sink = Arc::new(sink.clone());

    let summary = harness
        .start()
        .await
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();
    assert_eq!(summary.records_written(), 3);

    let path = sink.path_for(&unit.id());
    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.get(0), Some("record_id"));
    assert!(headers.iter().any(|h| h == "video_title"));

    let title_column = headers.iter().position(|h| h == "video_title").unwrap();
    let channel_column = headers.iter().position(|h| h == "channel_name").unwrap();
    let rows = csv_rows(&path);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.get(title_column) == Some("Title of v1")));
    assert!(rows.iter().all(|r| r.get(channel_column) == Some("Accolonn")));
}

#[tokio::test]
async fn test_rerun_after_reset_does_not_duplicate_rows() {
    let dir = TempDir::new().unwrap();
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let remote = FakeRemote::new().with_video("v1", "UC1").with_pages(
        &unit,
        vec![comments(&["c1", "c2"], "v1", 9), comments(&["c3"], "v1", 8)],
    );
    let mut harness = Harness::new(remote, &MemorySink::new());
    harness.sink = Arc::new(CsvSink::new(dir.path()).unwrap());

    let first = harness.start().await;
    first
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();
    first.reset_unit(&unit.id()).await.unwrap();
    drop(first);

    // a new process reopens the output directory
    let sink = CsvSink::new(dir.path()).unwrap();
    harness.sink = Arc::new(sink.clone());
    let summary = harness
        .start()
        .await
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();

    assert!(summary.all_completed());
    assert_eq!(summary.records_written(), 0);
    assert_eq!(harness.remote.listed_pages(&unit.id()), vec![0, 1, 0, 1]);
    assert_eq!(csv_rows(&sink.path_for(&unit.id())).len(), 3);
}
