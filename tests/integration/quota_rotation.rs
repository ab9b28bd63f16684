//! Integration tests for credential rotation and quota exhaustion

use comment_ingest::filter::SelectionFilter;
use comment_ingest::ingest::UnitOutcome;
use comment_ingest::retry::QuotaPolicy;
use comment_ingest::sink::MemorySink;
use comment_ingest::UnitDescriptor;
use std::time::Duration;

use crate::support::fake_remote::{comments, FakeRemote};
use crate::support::harness::{fast_policy, ledger, ledger_with_window, Harness};

#[tokio::test]
async fn test_rotation_after_limit_reached() {
    let unit = UnitDescriptor::playlist("Lore", "PL1");
    let sink = MemorySink::new();
    let mut harness = Harness::new(FakeRemote::new().with_empty_pages(&unit, 15), &sink);
    harness.ledger = ledger(&[10, 10]);

    let orchestrator = harness.start().await;
    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();
    assert!(summary.all_completed());

    let used = harness.remote.credentials_used();
    assert_eq!(used.len(), 15);
    assert!(used[..10].iter().all(|c| c == "key-1"));
    assert!(used[10..].iter().all(|c| c == "key-2"));

    let budgets = orchestrator.ledger().snapshot();
    assert!(budgets[0].is_exhausted());
    assert_eq!(budgets[1].consumed_units, 5);
}

#[tokio::test]
async fn test_remote_quota_signal_rotates_credential() {
    let unit = UnitDescriptor::channel("Accolonn", "UC1");
    let remote = FakeRemote::new()
        .with_video("v1", "UC1")
        .with_pages(&unit, vec![comments(&["c1"], "v1", 9), comments(&["c2"], "v1", 8)]);
    remote.reject_credential("key-1");
    let sink = MemorySink::new();
    let mut harness = Harness::new(remote, &sink);
    harness.ledger = ledger(&[100, 100]);
    // a quota signal must not consume the single attempt
    harness.policy.max_attempts = 1;

    let orchestrator = harness.start().await;
    let summary = orchestrator
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();
    assert!(summary.all_completed());
    assert_eq!(sink.total_records(), 2);

    let used = harness.remote.credentials_used();
    assert_eq!(used[0], "key-1");
    assert!(used[1..].iter().all(|c| c == "key-2"));
    assert!(orchestrator.ledger().snapshot()[0].is_exhausted());
}

#[tokio::test]
async fn test_total_exhaustion_suspends_unit_with_fail_policy() {
    let unit = UnitDescriptor::playlist("Lore", "PL1");
    let unit_id = unit.id();
    let sink = MemorySink::new();
    let mut harness = Harness::new(FakeRemote::new().with_empty_pages(&unit, 3), &sink);
    harness.ledger = ledger(&[2]);

    let first = harness.start().await;
    let summary = first
        .run(vec![unit.clone()], &SelectionFilter::default())
        .await
        .unwrap();
    let report = summary.get(&unit_id).unwrap();
    assert!(matches!(&report.outcome, UnitOutcome::Suspended { reason } if reason.contains("exhausted")));
    assert_eq!(summary.in_progress().count(), 1);
    assert_eq!(first.tracker().checkpoint(&unit_id).unwrap().cursor.page, 2);

    // a new quota day
    harness.ledger = ledger(&[10]);
    let second = harness.start().await;
    let summary = second
        .run(vec![unit], &SelectionFilter::default())
        .await
        .unwrap();
    assert!(summary.all_completed());
    assert_eq!(harness.remote.listed_pages(&unit_id), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_wait_policy_continues_after_window_reset() {
    let unit = UnitDescriptor::playlist("Lore", "PL1");
    let sink = MemorySink::new();
    let mut harness = Harness::new(FakeRemote::new().with_empty_pages(&unit, 2), &sink);
    harness.ledger = ledger_with_window(&[1], Duration::from_millis(100));
    harness.policy = fast_policy(QuotaPolicy::Wait);

    let orchestrator = harness.start().await;
    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(vec![unit], &SelectionFilter::default()),
    )
    .await
    .expect("quota wait should end at the window reset")
    .unwrap();
    assert!(summary.all_completed());
    assert_eq!(harness.remote.list_count(), 2);
}

#[tokio::test]
async fn test_exhaustion_is_shared_across_units() {
    let first_unit = UnitDescriptor::playlist("One", "PL1");
    let second_unit = UnitDescriptor::playlist("Two", "PL2");
    let remote = FakeRemote::new()
        .with_empty_pages(&first_unit, 2)
        .with_empty_pages(&second_unit, 2);
    let sink = MemorySink::new();
    let mut harness = Harness::new(remote, &sink);
    harness.ledger = ledger(&[3]);

    let orchestrator = harness.start().await.with_concurrency(1);
    let summary = orchestrator
        .run(vec![first_unit, second_unit], &SelectionFilter::default())
        .await
        .unwrap();

    // four list calls are needed, three units of quota exist
    assert_eq!(harness.remote.list_count(), 3);
    assert_eq!(summary.completed().count(), 1);
    assert_eq!(summary.in_progress().count(), 1);
}
