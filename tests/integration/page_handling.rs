//! Integration tests for per-page record handling

use comment_ingest::filter::SelectionFilter;
use comment_ingest::ingest::UnitOutcome;
use comment_ingest::remote::{Page, RecordKind};
use comment_ingest::sink::MemorySink;
use comment_ingest::UnitDescriptor;

use crate::support::fake_remote::{comments, day, FakeRemote};
use crate::support::harness::Harness;

#[tokio::test]
async fn test_cutoff_ends_unit() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let unit_id = unit.id();
    let mut second_page = comments(&["c3"], "v1", 8);
    second_page.extend(comments(&["c4", "c5"], "v1", 2));
    let remote = FakeRemote::new().with_video("v1", "UC1").with_pages(
        &unit,
        vec![
            comments(&["c1", "c2"], "v1", 10),
            second_page,
            comments(&["c6"], "v1", 1),
        ],
    );
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);

    let orchestrator = harness.start().await.with_cutoff(Some(day(5)));
    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();

    assert_eq!(summary.get(&unit_id).unwrap().outcome, UnitOutcome::Completed);
    assert_eq!(harness.remote.listed_pages(&unit_id), vec![0, 1]);
    let ids: Vec<String> = sink.records(&unit_id).into_iter().map(|r| r.record_id).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    assert!(orchestrator.tracker().is_completed(&unit_id));
}

#[tokio::test]
async fn test_records_merged_with_video_metadata() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let remote = FakeRemote::new()
        .with_video("v1", "UC1")
        .with_pages(&unit, vec![comments(&["c1"], "v1", 9)]);
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);

    harness
        .start()
        .await
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();

    let records = sink.records(&unit.id());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].video_title.as_deref(), Some("Title of v1"));
    assert_eq!(records[0].channel_id.as_deref(), Some("UC1"));
    assert_eq!(records[0].text.as_deref(), Some("text of c1"));
}

#[tokio::test]
async fn test_foreign_and_missing_videos_are_dropped() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let mut page = comments(&["own"], "v1", 9);
    page.extend(comments(&["foreign"], "v2", 9));
    page.extend(comments(&["ghost"], "deleted", 9));
    let remote = FakeRemote::new()
        .with_video("v1", "UC1")
        .with_video("v2", "UC_OTHER")
        .with_pages(&unit, vec![page]);
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);

    let summary = harness
        .start()
        .await
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();

    assert!(summary.all_completed());
    let ids: Vec<String> = sink.records(&unit.id()).into_iter().map(|r| r.record_id).collect();
    assert_eq!(ids, vec!["own"]);
    assert_eq!(harness.remote.fetch_count("deleted"), 1);
}

#[tokio::test]
async fn test_playlist_ingests_comments_of_every_video() {
    let unit = UnitDescriptor::playlist("Lore Mix", "PL1");
    let unit_id = unit.id();
    let mut older = comments(&["c3"], "v1", 8);
    older.extend(comments(&["c4"], "v1", 2));
    let remote = FakeRemote::new()
        .with_playlist("PL1", "Lore Mix")
        .with_channel("UC1", "Accolonn")
        .with_video("v1", "UC1")
        .with_video("v2", "UC2")
        .with_video("v3", "UC1")
        .with_playlist_items(&unit, vec![vec!["v1", "v2", "v4"], vec!["v3"]])
        .with_video_comments("v1", vec![comments(&["c1", "c2"], "v1", 9), older])
        .with_video_comments("v2", vec![comments(&["c6"], "v2", 9)])
        .with_video_comments("v3", vec![comments(&["c5"], "v3", 9)]);
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);

    let orchestrator = harness.start().await.with_cutoff(Some(day(5)));
    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();

    assert_eq!(summary.get(&unit_id).unwrap().outcome, UnitOutcome::Completed);
    let records = sink.records(&unit_id);
    let ids: Vec<&str> = records.iter().map(|r| r.record_id.as_str()).collect();
    // c4 is past the cutoff, v4 has comments disabled
    assert_eq!(ids, vec!["c1", "c2", "c3", "c6", "c5"]);
    assert!(records.iter().all(|r| r.kind == RecordKind::Comment));
    assert!(records.iter().all(|r| r.playlist_title.as_deref() == Some("Lore Mix")));

    // videos of any channel are kept
    let foreign = records.iter().find(|r| r.record_id == "c6").unwrap();
    assert_eq!(foreign.channel_id.as_deref(), Some("UC2"));
    assert_eq!(foreign.channel_name, None);
    let own = records.iter().find(|r| r.record_id == "c5").unwrap();
    assert_eq!(own.channel_name.as_deref(), Some("Accolonn"));

    assert_eq!(
        harness.remote.comment_tokens("v1"),
        vec![None, Some("v1-c1".to_string())]
    );
    assert_eq!(harness.remote.comment_tokens("v4"), vec![None]);
    assert_eq!(harness.remote.listed_pages(&unit_id), vec![0, 4]);
    assert_eq!(harness.remote.fetch_count("PL1"), 1);
    assert_eq!(harness.remote.fetch_count("UC1"), 1);

    let checkpoint = orchestrator.tracker().checkpoint(&unit_id).unwrap();
    assert!(checkpoint.completed);
    assert_eq!(checkpoint.processed_count, 5);
}

#[tokio::test]
async fn test_playlist_without_items_completes() {
    let unit = UnitDescriptor::playlist("Empty", "PL1");
    let unit_id = unit.id();
    let remote = FakeRemote::new().with_playlist_items(&unit, vec![vec![], vec![]]);
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);

    let orchestrator = harness.start().await;
    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();

    assert!(summary.all_completed());
    assert_eq!(harness.remote.listed_pages(&unit_id), vec![0, 1]);
    assert_eq!(sink.total_records(), 0);
    // the title is only looked up once there is something to label
    assert_eq!(harness.remote.fetch_count("PL1"), 0);
}

#[tokio::test]
async fn test_repeated_comment_token_fails_playlist_unit() {
    let unit = UnitDescriptor::playlist("Lore", "PL1");
    let unit_id = unit.id();
    let remote = FakeRemote::new()
        .with_video("v1", "UC1")
        .with_playlist_items(&unit, vec![vec!["v1"]])
        .with_raw_video_comments(
            "v1",
            vec![
                Page {
                    records: comments(&["c1"], "v1", 9),
                    next_token: Some("v1-c1".into()),
                },
                Page {
                    records: comments(&["c2"], "v1", 8),
                    next_token: Some("v1-c1".into()),
                },
            ],
        );
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);

    let orchestrator = harness.start().await;
    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();

    let report = summary.get(&unit_id).unwrap();
    assert!(matches!(&report.outcome, UnitOutcome::Failed { reason } if reason.contains("page token repeated")));
    assert_eq!(orchestrator.tracker().checkpoint(&unit_id).unwrap().cursor.page, 1);
    assert_eq!(sink.total_records(), 1);
}

#[tokio::test]
async fn test_repeated_page_token_fails_unit() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let unit_id = unit.id();
    let remote = FakeRemote::new().with_video("v1", "UC1").with_raw_pages(
        &unit,
        vec![
            Page {
                records: comments(&["c1"], "v1", 9),
                next_token: Some("t1".into()),
            },
            Page {
                records: comments(&["c2"], "v1", 8),
                next_token: Some("t1".into()),
            },
        ],
    );
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);

    let orchestrator = harness.start().await;
    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();

    let report = summary.get(&unit_id).unwrap();
    assert!(matches!(&report.outcome, UnitOutcome::Failed { reason } if reason.contains("page token repeated")));
    assert_eq!(orchestrator.tracker().checkpoint(&unit_id).unwrap().cursor.page, 1);
    assert_eq!(sink.total_records(), 1);
}

#[tokio::test]
async fn test_selection_filter_limits_processed_units() {
    let wanted = UnitDescriptor::playlist("Wanted", "PL1").with_tags(["lore"]);
    let other = UnitDescriptor::playlist("Other", "PL2").with_tags(["news"]);
    let mut old = UnitDescriptor::playlist("Old", "PL3").with_tags(["lore"]);
    old.outdated = true;
    let remote = FakeRemote::new()
        .with_empty_pages(&wanted, 1)
        .with_empty_pages(&other, 1)
        .with_empty_pages(&old, 1);
    let sink = MemorySink::new();
    let harness = Harness::new(remote, &sink);
    let orchestrator = harness.start().await;

    let filter = SelectionFilter::default().with_types(["LORE"]);
    let summary = orchestrator
        .run(vec![wanted.clone(), other.clone(), old.clone()], &filter)
        .await
        .unwrap();
    assert_eq!(summary.units.len(), 1);
    assert_eq!(summary.units[0].unit_id, wanted.id());

    let only_other = |u: &UnitDescriptor| u.name == "Other";
    let summary = orchestrator
        .run(vec![wanted, other.clone(), old], &only_other)
        .await
        .unwrap();
    assert_eq!(summary.units.len(), 1);
    assert_eq!(summary.units[0].unit_id, other.id());
}
