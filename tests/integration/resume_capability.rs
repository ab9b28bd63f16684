//! Integration tests for resuming units across restarts

use comment_ingest::filter::SelectionFilter;
use comment_ingest::ingest::UnitOutcome;
use comment_ingest::remote::ApiError;
use comment_ingest::shutdown::ShutdownCoordinator;
use comment_ingest::sink::MemorySink;
use comment_ingest::UnitDescriptor;
use std::sync::Arc;

use crate::support::fake_remote::{comments, FakeRemote};
use crate::support::harness::{CrashingSink, Harness};

fn three_page_remote(unit: &UnitDescriptor) -> FakeRemote {
    FakeRemote::new().with_video("v1", &unit.remote_id).with_pages(
        unit,
        vec![
            comments(&["c1", "c2"], "v1", 9),
            comments(&["c3", "c4"], "v1", 8),
            comments(&["c5", "c6"], "v1", 7),
        ],
    )
}

#[tokio::test]
async fn test_end_to_end_resume_after_failure_on_last_page() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let unit_id = unit.id();
    let remote = three_page_remote(&unit);
    remote.fail_page_once(&unit_id, 2, ApiError::Malformed("simulated crash".into()));
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);

    let first = harness.start().await;
    let summary = first
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();
    assert!(matches!(
        summary.get(&unit_id).unwrap().outcome,
        UnitOutcome::Failed { .. }
    ));
    let checkpoint = first.tracker().checkpoint(&unit_id).unwrap();
    assert_eq!(checkpoint.cursor.page, 2);
    assert!(!checkpoint.completed);
    assert_eq!(sink.total_records(), 4);
    drop(first);

    // restart over the same stores
    let second = harness.start().await;
    let summary = second
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();
    assert_eq!(summary.get(&unit_id).unwrap().outcome, UnitOutcome::Completed);
    assert_eq!(summary.get(&unit_id).unwrap().pages, 1);

    // page 2 was attempted once per run, pages 0 and 1 only in the first run
    assert_eq!(harness.remote.listed_pages(&unit_id), vec![0, 1, 2, 2]);
    assert_eq!(sink.total_records(), 6);
    assert_eq!(sink.max_deliveries(), 1);

    let checkpoint = second.tracker().checkpoint(&unit_id).unwrap();
    assert!(checkpoint.completed);
    assert_eq!(checkpoint.processed_count, 6);
}

#[tokio::test]
async fn test_failed_commit_leaves_checkpoint_behind() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let unit_id = unit.id();
    let sink = MemorySink::new();
    let mut harness = Harness::new(three_page_remote(&unit), &sink);
    harness.sink = Arc::new(CrashingSink::new(&sink, 3));

    let first = harness.start().await;
    let summary = first.run(vec![unit.clone()], &SelectionFilter::default()).await.unwrap();
    let report = summary.get(&unit_id).unwrap();
    assert!(matches!(&report.outcome, UnitOutcome::Failed { reason } if reason.contains("simulated crash")));
    assert_eq!(first.tracker().checkpoint(&unit_id).unwrap().cursor.page, 2);

    let second = harness.start().await;
    let summary = second.run(vec![unit], &SelectionFilter::default()).await.unwrap();
    assert!(summary.all_completed());
    assert_eq!(sink.total_records(), 6);
    assert_eq!(sink.max_deliveries(), 1);
}

#[tokio::test]
async fn test_checkpoint_write_failure_aborts_run() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let unit_id = unit.id();
    let sink = MemorySink::new();
    let mut harness = Harness::new(three_page_remote(&unit), &sink);

    let first = harness.start().await;
    harness.progress_store.set_fail_writes(true);
    let result = first.run(vec![unit.clone()], &SelectionFilter::default()).await;
    let error = result.unwrap_err();
    assert!(error.is_process_fatal());
    // page 0 reached the sink but was never checkpointed
    assert_eq!(sink.total_records(), 2);
    drop(first);

    // the fatal error aborted the coordinator of the first process
    assert!(harness.shutdown.is_abort_requested());
    harness.shutdown = ShutdownCoordinator::shared();
    harness.progress_store.set_fail_writes(false);
    let second = harness.start().await;
    let summary = second.run(vec![unit], &SelectionFilter::default()).await.unwrap();
    assert!(summary.all_completed());

    // page 0 is re-delivered, the sink keeps one copy
    assert_eq!(sink.deliveries("c1"), 2);
    assert_eq!(sink.deliveries("c5"), 1);
    assert_eq!(sink.total_records(), 6);
    assert_eq!(
        second.tracker().checkpoint(&unit_id).unwrap().processed_count,
        6
    );
}

#[tokio::test]
async fn test_completed_unit_skipped_until_reset() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let unit_id = unit.id();
    let sink = MemorySink::new();
    let harness = Harness::new(three_page_remote(&unit), &sink);

    let orchestrator = harness.start().await;
    orchestrator
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();
    assert_eq!(harness.remote.list_count(), 3);

    let summary = orchestrator
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();
    assert_eq!(
        summary.get(&unit_id).unwrap().outcome,
        UnitOutcome::AlreadyCompleted
    );
    assert_eq!(harness.remote.list_count(), 3);

    orchestrator.reset_unit(&unit_id).await.unwrap();
    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();
    let report = summary.get(&unit_id).unwrap();
    assert_eq!(report.outcome, UnitOutcome::Completed);
    assert_eq!(report.records_written, 0);
    assert_eq!(harness.remote.list_count(), 6);
    assert_eq!(sink.total_records(), 6);
}

#[tokio::test]
async fn test_checkpointed_last_page_completes_without_listing() {
    let unit = UnitDescriptor::playlist("Lore", "PL1");
    let unit_id = unit.id();
    let sink = MemorySink::new();
    let harness = Harness::new(FakeRemote::new().with_empty_pages(&unit, 1), &sink);

    // the last page was committed and checkpointed, completion was not recorded
    let orchestrator = harness.start().await;
    orchestrator
        .tracker()
        .advance(&unit_id, comment_ingest::resume::Cursor::start().next(None), 0)
        .await
        .unwrap();

    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();
    assert_eq!(summary.get(&unit_id).unwrap().outcome, UnitOutcome::Completed);
    assert_eq!(harness.remote.list_count(), 0);
    assert!(orchestrator.tracker().is_completed(&unit_id));
}

#[tokio::test]
async fn test_playlist_resumes_inside_a_video() {
    let unit = UnitDescriptor::playlist("Lore", "PL1");
    let unit_id = unit.id();
    let remote = FakeRemote::new()
        .with_video("v1", "UC1")
        .with_video("v2", "UC1")
        .with_playlist_items(&unit, vec![vec!["v1", "v2"]])
        .with_video_comments(
            "v1",
            vec![comments(&["c1"], "v1", 9), comments(&["c2"], "v1", 8), comments(&["c3"], "v1", 7)],
        )
        .with_video_comments("v2", vec![comments(&["c4"], "v2", 9)]);
    let sink = MemorySink::new();
    let mut harness = Harness::new(remote, &sink);
    harness.sink = Arc::new(CrashingSink::new(&sink, 2));

    let first = harness.start().await;
    let summary = first.run(vec![unit.clone()], &SelectionFilter::default()).await.unwrap();
    assert!(matches!(
        &summary.get(&unit_id).unwrap().outcome,
        UnitOutcome::Failed { reason } if reason.contains("simulated crash")
    ));
    let cursor = first.tracker().checkpoint(&unit_id).unwrap().cursor;
    assert_eq!(cursor.page, 1);
    let position = cursor.video.unwrap();
    assert_eq!((position.item, position.video_id.as_str()), (0, "v1"));
    assert_eq!(position.token.as_deref(), Some("v1-c1"));

    let second = harness.start().await;
    let summary = second.run(vec![unit], &SelectionFilter::default()).await.unwrap();
    assert!(summary.all_completed());
    assert_eq!(
        harness.remote.comment_tokens("v1"),
        vec![
            None,
            Some("v1-c1".to_string()),
            Some("v1-c1".to_string()),
            Some("v1-c2".to_string()),
        ]
    );
    assert_eq!(harness.remote.comment_tokens("v2"), vec![None]);
    let ids: Vec<String> = sink.records(&unit_id).into_iter().map(|r| r.record_id).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
    assert_eq!(sink.max_deliveries(), 1);
    assert_eq!(second.tracker().checkpoint(&unit_id).unwrap().processed_count, 4);
}
