//! Tests for result aggregation and persistence

use super::*;
use crate::controller::checker::CheckOutcome;
use crate::controller::store::{is_superseded, MemoryStateStore};
use std::time::Duration;

fn result(name: &str, ok: bool, errors: &[&str]) -> CheckResult {
    let outcome = if ok {
        CheckOutcome::passed()
    } else {
        CheckOutcome::failed(errors.iter().map(|e| e.to_string()).collect())
    };
    CheckResult::new(name, outcome, Duration::from_millis(5), "kuberhealthy-0")
}

fn completed(mut result: CheckResult, at: DateTime<Utc>) -> CheckResult {
    result.completed_at = at;
    result
}

fn known(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn test_empty_status_is_ok() {
    let status = AggregatedStatus::default();
    assert!(status.ok());
    assert!(status.errors().is_empty());
    assert!(status.last_update().is_none());
}

#[test]
fn test_latest_result_supersedes_previous() {
    let status = AggregatedStatus::from_results(vec![
        result("dns-status", false, &["lookup failed"]),
        result("dns-status", true, &[]),
    ]);

    assert!(status.ok());
    assert_eq!(status.checks().len(), 1);
    assert!(status.get("dns-status").unwrap().errors.is_empty());
}

#[test]
fn test_one_failure_fails_overall() {
    let status = AggregatedStatus::from_results(vec![
        result("dns-status", true, &[]),
        result(
            "pod-restarts-x",
            false,
            &["3 restarts detected in namespace X"],
        ),
        result("pod-status-x", true, &[]),
    ]);

    assert!(!status.ok());
    // Detail surfaces verbatim
    assert_eq!(
        status.get("pod-restarts-x").unwrap().errors,
        vec!["3 restarts detected in namespace X".to_string()]
    );
    assert_eq!(
        status.errors(),
        vec!["3 restarts detected in namespace X".to_string()]
    );
}

#[tokio::test]
async fn test_record_updates_snapshot_and_store() {
    let store = MemoryStateStore::new();
    let aggregator = StateAggregator::new(Arc::new(store.clone()), known(&["a", "b"]));

    aggregator.record(result("a", true, &[])).await;
    aggregator.record(result("b", false, &["b broke"])).await;

    let snapshot = aggregator.snapshot().await;
    assert!(!snapshot.ok());
    assert_eq!(snapshot.checks().len(), 2);
    assert!(snapshot.last_update().is_some());

    let stored = store.stored().expect("record should persist");
    assert_eq!(stored, snapshot);
}

#[tokio::test]
async fn test_store_failure_keeps_memory_authoritative() {
    let store = MemoryStateStore::new();
    store.fail_saves(true);
    let aggregator = StateAggregator::new(Arc::new(store.clone()), known(&["a"]));

    aggregator.record(result("a", false, &["down"])).await;

    assert!(!aggregator.snapshot().await.ok());
    assert!(store.stored().is_none());
}

/// Overall OK equals the AND of the latest result per check for any interleaving
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_records_derive_consistent_ok() {
    let store = MemoryStateStore::new();
    let names: Vec<String> = (0..8).map(|i| format!("check-{}", i)).collect();
    let aggregator = StateAggregator::new(
        Arc::new(store.clone()),
        names.iter().cloned().collect(),
    );

    let mut handles = Vec::new();
    let mut expected_ok = true;
    for (i, name) in names.iter().enumerate() {
        // Each check reports a sequence whose last element is deterministic
        let sequence: Vec<bool> = (0..25).map(|n| (n + i) % 3 != 0).collect();
        expected_ok &= *sequence.last().unwrap();

        let aggregator = aggregator.clone();
        let name = name.clone();
        handles.push(tokio::spawn(async move {
            for ok in sequence {
                aggregator.record(result(&name, ok, &["failed"])).await;
                tokio::task::yield_now().await;
            }
        }));
    }
    futures::future::join_all(handles).await;

    let snapshot = aggregator.snapshot().await;
    assert_eq!(snapshot.checks().len(), names.len());
    assert_eq!(snapshot.ok(), expected_ok);
    assert_eq!(
        snapshot.ok(),
        snapshot.checks().values().all(|r| r.ok),
        "derived flag must match the map"
    );

    // The last persisted snapshot matches memory once writers are done
    assert_eq!(store.stored().unwrap(), snapshot);
}

/// Save on one instance, load on a fresh one
#[tokio::test]
async fn test_fresh_instance_restores_saved_state() {
    let store = MemoryStateStore::new();
    let first = StateAggregator::new(Arc::new(store.clone()), known(&["a", "b"]));
    first.record(result("a", true, &[])).await;
    first
        .record(result("b", false, &["3 restarts detected in namespace X"]))
        .await;

    let second = StateAggregator::new(Arc::new(store.clone()), known(&["a", "b"]));
    assert!(second.snapshot().await.is_empty());

    let restored = second.sync_from_store().await.unwrap();
    assert_eq!(restored, 2);

    let before = first.snapshot().await;
    let after = second.snapshot().await;
    assert_eq!(after.ok(), before.ok());
    for (name, result) in before.checks() {
        let other = after.get(name).unwrap();
        assert_eq!(other.ok, result.ok);
        assert_eq!(other.errors, result.errors);
    }
}

#[tokio::test]
async fn test_sync_drops_unregistered_checks() {
    let store = MemoryStateStore::new();
    let writer = StateAggregator::new(Arc::new(store.clone()), known(&["a", "gone"]));
    writer.record(result("a", true, &[])).await;
    writer.record(result("gone", false, &["old failure"])).await;

    let reader = StateAggregator::new(Arc::new(store), known(&["a"]));
    assert_eq!(reader.sync_from_store().await.unwrap(), 1);

    let snapshot = reader.snapshot().await;
    assert!(snapshot.ok());
    assert!(snapshot.get("gone").is_none());
}

#[tokio::test]
async fn test_sync_with_empty_store_is_not_an_error() {
    let aggregator = StateAggregator::new(Arc::new(MemoryStateStore::new()), known(&["a"]));
    assert_eq!(aggregator.sync_from_store().await.unwrap(), 0);
    assert!(aggregator.snapshot().await.is_empty());
}

#[test]
fn test_only_strictly_newer_stored_entry_supersedes() {
    let now = Utc::now();
    let stored = completed(result("a", true, &[]), now);

    assert!(!is_superseded(None, &stored));
    assert!(!is_superseded(Some(&stored), &completed(result("a", false, &["x"]), now)));
    assert!(is_superseded(
        Some(&stored),
        &completed(result("a", false, &["x"]), now - chrono::Duration::seconds(1))
    ));
}

/// A standby holding an old view must not overwrite what the leader wrote since
#[tokio::test]
async fn test_standby_flush_keeps_newer_leader_result() {
    let store = MemoryStateStore::new();
    let leader = StateAggregator::new(Arc::new(store.clone()), known(&["dns-status"]));
    let standby = StateAggregator::new(Arc::new(store.clone()), known(&["dns-status"]));
    let start = Utc::now();

    leader
        .record(completed(result("dns-status", false, &["old failure"]), start))
        .await;
    assert_eq!(standby.sync_from_store().await.unwrap(), 1);

    leader
        .record(completed(
            result("dns-status", true, &[]),
            start + chrono::Duration::seconds(60),
        ))
        .await;
    standby.flush().await;

    let stored = store.stored().unwrap();
    assert!(stored.ok());
    assert!(stored.get("dns-status").unwrap().errors.is_empty());
}

/// Recording one check only writes that check's entry
#[tokio::test]
async fn test_record_leaves_other_entries_untouched() {
    let store = MemoryStateStore::new();
    let start = Utc::now();

    let stale = StateAggregator::new(Arc::new(store.clone()), known(&["a", "b"]));
    stale
        .record(completed(result("a", false, &["a broke"]), start))
        .await;

    let current = StateAggregator::new(Arc::new(store.clone()), known(&["a", "b"]));
    current
        .record(completed(
            result("a", true, &[]),
            start + chrono::Duration::seconds(30),
        ))
        .await;

    // Still holds the old failure for "a" in memory
    stale
        .record(completed(
            result("b", true, &[]),
            start + chrono::Duration::seconds(40),
        ))
        .await;

    let stored = store.stored().unwrap();
    assert!(stored.get("a").unwrap().ok);
    assert!(stored.get("b").unwrap().ok);
    assert!(!stale.snapshot().await.get("a").unwrap().ok);
}

#[tokio::test]
async fn test_flush_writes_every_entry() {
    let store = MemoryStateStore::new();
    let aggregator = StateAggregator::new(Arc::new(store.clone()), known(&["a", "b"]));

    store.fail_saves(true);
    aggregator.record(result("a", true, &[])).await;
    aggregator.record(result("b", false, &["b broke"])).await;
    assert!(store.stored().is_none());

    store.fail_saves(false);
    aggregator.flush().await;
    assert_eq!(store.stored().unwrap(), aggregator.snapshot().await);
}
