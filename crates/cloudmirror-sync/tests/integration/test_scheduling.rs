//! Integration tests for scheduling across files
//!
//! - Filtered entries, directories and orphans in the report
//! - Single writer per remote id
//! - Aggregate bandwidth cap
//! - Cancellation before a run and recovery after it
//! - Pausing and resuming a run
//! - Entries that share a local path

use std::time::{Duration, Instant};

use cloudmirror_core::domain::{Decision, LocalState, RemoteEntry, SyncFilter, SyncTask};
use cloudmirror_sync::bandwidth::BandwidthCap;
use cloudmirror_sync::diff::SyncPlan;
use cloudmirror_sync::{RunOptions, TaskStatus};
use tempfile::TempDir;

use crate::common::{self, content, status};

#[tokio::test]
async fn test_filtered_entries_are_reported_and_never_recorded() {
    let h = common::harness().await;
    let keep = h.remote.put("1", "keep.txt", &content(5, 0));
    let drop = h.remote.put("2", "scratch.tmp", &content(5, 1));
    let filter = SyncFilter::new().with_exclude_extensions(["tmp"]);

    let report = h
        .sync_with(&[keep, drop], &filter, RunOptions::default())
        .await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert_eq!(status(&report, "2"), TaskStatus::SkippedByFilter);
    assert_eq!(report.counts.skipped_by_filter, 1);
    assert!(report.is_success());
    assert!(h.remote.fetched_offsets("2").is_empty());

    let progress = h.engine.get_progress().await.unwrap();
    assert_eq!(progress.records.len(), 1);
    assert_eq!(progress.records[0].id().as_str(), "1");
}

#[tokio::test]
async fn test_directories_are_created_before_their_files() {
    let h = common::harness().await;
    let now = chrono::Utc::now();
    let top = RemoteEntry::directory("d1".parse().unwrap(), "docs".parse().unwrap(), now);
    let nested = RemoteEntry::directory("d2".parse().unwrap(), "docs/sub".parse().unwrap(), now);
    let file = h.remote.put("f", "docs/sub/a.txt", &content(9, 2));

    // Files listed before their folders still land after them
    let report = h.sync(&[file, nested, top]).await;

    assert_eq!(report.counts.completed, 3);
    let order: Vec<&str> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(order, vec!["d1", "d2", "f"]);
    assert!(h.root.path().join("docs/sub").is_dir());
    assert_eq!(h.local("docs/sub/a.txt"), content(9, 2));
}

#[tokio::test]
async fn test_duplicate_tasks_never_run_concurrently() {
    let h = common::harness().await;
    let entry = h.remote.put("dup", "dup.bin", &content(4, 3));
    h.remote.set_delay(Duration::from_millis(30));

    let task = SyncTask::new(entry, Decision::New);
    let plan = SyncPlan {
        tasks: vec![task.clone(), task],
        ..SyncPlan::default()
    };
    let report = h
        .engine
        .run_sync(&plan, RunOptions::default().with_concurrency(4))
        .await
        .unwrap();

    assert_eq!(report.counts.completed, 2);
    assert_eq!(h.remote.max_in_flight("dup"), 1);
    assert_eq!(h.local("dup.bin"), content(4, 3));
}

#[tokio::test]
async fn test_many_files_complete_under_bounded_concurrency() {
    let h = common::harness().await;
    h.remote.set_delay(Duration::from_millis(2));
    let snapshot: Vec<RemoteEntry> = (0..8u8)
        .map(|i| h.remote.put(&format!("f{i}"), &format!("f{i}.bin"), &content(10, i)))
        .collect();

    let report = h
        .sync_with(&snapshot, &SyncFilter::new(), RunOptions::default().with_concurrency(2))
        .await;

    assert_eq!(report.counts.completed, 8);
    assert_eq!(report.bytes_transferred, 80);
    assert_eq!(report.bytes_completed_total, 80);
    for i in 0..8u8 {
        assert_eq!(h.local(&format!("f{i}.bin")), content(10, i));
    }
}

#[tokio::test]
async fn test_bandwidth_cap_is_shared_by_all_files() {
    let root = TempDir::new().unwrap();
    let mut settings = common::fast_settings(&root);
    settings.transfer.chunk_size = 1024;
    let h = common::harness_with(
        root,
        settings,
        std::sync::Arc::new(cloudmirror_core::ports::StaticCredentials::anonymous()),
    )
    .await;
    let snapshot: Vec<RemoteEntry> = (0..3u8)
        .map(|i| h.remote.put(&format!("f{i}"), &format!("f{i}.bin"), &content(2048, i)))
        .collect();

    let options = RunOptions::default()
        .with_concurrency(3)
        .with_bandwidth(BandwidthCap::Limited {
            rate: 4096,
            burst: 1024,
        });
    let started = Instant::now();
    let report = h.sync_with(&snapshot, &SyncFilter::new(), options).await;
    let elapsed = started.elapsed();

    assert_eq!(report.counts.completed, 3);
    // 6144 bytes with a 1024 byte burst at 4096 B/s needs at least 1.25s
    assert!(
        elapsed >= Duration::from_millis(1150),
        "finished too fast: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_throttled_chunk_is_not_timed_out() {
    let root = TempDir::new().unwrap();
    let mut settings = common::fast_settings(&root);
    settings.transfer.chunk_size = 3000;
    settings.transfer.chunk_timeout = Duration::from_secs(1);
    let h = common::harness_with(
        root,
        settings,
        std::sync::Arc::new(cloudmirror_core::ports::StaticCredentials::anonymous()),
    )
    .await;
    let data = content(3000, 5);
    let a = h.remote.put("1", "slow.bin", &data);

    // One chunk needs about 2s of tokens, twice the chunk timeout
    let options = RunOptions::default().with_bandwidth(BandwidthCap::Limited {
        rate: 1000,
        burst: 1000,
    });
    let report = h.sync_with(&[a], &SyncFilter::new(), options).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed, "{:?}", report.failures);
    assert_eq!(h.remote.fetch_count(), 1);
    assert_eq!(h.local("slow.bin"), data);
}

#[tokio::test]
async fn test_cancel_before_run_then_recover() {
    let h = common::harness().await;
    let a = h.remote.put("1", "a.bin", &content(8, 0));
    let b = h.remote.put("2", "b.bin", &content(8, 1));

    h.engine.cancel();
    let report = h.sync(&[a.clone(), b.clone()]).await;
    assert!(report.cancelled);
    assert_eq!(report.counts.cancelled, 2);
    assert_eq!(h.remote.fetch_count(), 0);

    let report = h.sync(&[a, b]).await;
    assert!(report.is_success());
    assert_eq!(report.counts.completed, 2);
}

#[tokio::test]
async fn test_orphans_are_reported_and_cleaned_on_request() {
    let h = common::harness().await;
    let a = h.remote.put("1", "a.bin", &content(8, 0));
    let b = h.remote.put("2", "b.bin", &content(8, 1));
    h.sync(&[a.clone(), b]).await;

    let report = h.sync(&[a]).await;
    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.orphans[0].entry.id.as_str(), "2");
    assert!(h.root.path().join("b.bin").exists());

    let removed = h.engine.cleanup_orphan(&"2".parse().unwrap()).await.unwrap();
    assert!(removed);
    assert!(!h.root.path().join("b.bin").exists());

    let progress = h.engine.get_progress().await.unwrap();
    assert_eq!(progress.records.len(), 1);
    assert_eq!(progress.bytes_completed, 8);
}

#[tokio::test]
async fn test_orphan_cleanup_keeps_file_reused_by_live_entry() {
    let h = common::harness().await;
    let old = h.remote.put("old", "x.bin", &content(8, 0));
    h.sync(&[old]).await;

    // Deleted and uploaded again under a new id at the same path
    let fresh_data = content(8, 9);
    let fresh = h.remote.put("new", "x.bin", &fresh_data);
    let report = h.sync(&[fresh]).await;
    assert_eq!(status(&report, "new"), TaskStatus::Completed);
    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.orphans[0].entry.id.as_str(), "old");

    let removed = h.engine.cleanup_orphan(&"old".parse().unwrap()).await.unwrap();
    assert!(!removed);
    assert_eq!(h.local("x.bin"), fresh_data);

    let progress = h.engine.get_progress().await.unwrap();
    assert_eq!(progress.records.len(), 1);
    assert_eq!(progress.records[0].id().as_str(), "new");
    assert_eq!(progress.records[0].state(), LocalState::Complete);
}

#[tokio::test]
async fn test_entries_sharing_a_path_are_held_back() {
    let h = common::harness().await;
    let first_data = content(16, 1);
    let first = h.remote.put("a", "same.bin", &first_data);
    h.sync(&[first.clone()]).await;

    let second = h.remote.put("b", "same.bin", &content(16, 2));
    let options = RunOptions::default().with_concurrency(2);
    for _ in 0..2 {
        let report = h
            .sync_with(&[first.clone(), second.clone()], &SyncFilter::new(), options)
            .await;
        assert_eq!(report.counts.total(), 0);
        assert!(report.failures.is_empty());
        assert!(report.orphans.is_empty());
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].path.as_str(), "same.bin");
        assert_eq!(report.conflicts[0].entries.len(), 2);
    }

    assert_eq!(h.remote.fetch_count(), 4);
    assert_eq!(h.local("same.bin"), first_data);
    assert_eq!(h.store.record("a").await.state(), LocalState::Complete);

    let plan = h
        .engine
        .plan_sync(vec![first, second], &SyncFilter::new())
        .await
        .unwrap();
    assert!(plan.tasks.is_empty());
    assert!(plan.permanently_failed.is_empty());
}

#[tokio::test]
async fn test_paused_run_waits_for_resume() {
    let h = common::harness().await;
    let data = content(12, 6);
    let a = h.remote.put("1", "a.bin", &data);
    let handle = h.engine.cancel_handle();
    handle.pause();

    let resume = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.remote.fetch_count(), 0);
        handle.resume();
    };
    let files = [a];
    let (report, ()) = tokio::join!(h.sync(&files), resume);

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert!(!handle.is_paused());
    assert_eq!(h.local("a.bin"), data);
}

#[tokio::test]
async fn test_pause_holds_file_between_chunks() {
    let h = common::harness().await;
    h.remote.set_delay(Duration::from_millis(5));
    let data = content(40, 8);
    let a = h.remote.put("1", "a.bin", &data);
    let handle = h.engine.cancel_handle();

    let pause_then_resume = async {
        while h.remote.fetch_count() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.pause();
        let paused_at = h.remote.fetch_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(h.remote.fetch_count() <= paused_at + 1);
        handle.resume();
    };
    let files = [a];
    let (report, ()) = tokio::join!(h.sync(&files), pause_then_resume);

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert_eq!(h.remote.fetch_count(), 10);
    assert_eq!(h.local("a.bin"), data);
}

#[tokio::test]
async fn test_cancel_while_paused_stops_the_run() {
    let h = common::harness().await;
    let a = h.remote.put("1", "a.bin", &content(8, 0));
    let b = h.remote.put("2", "b.bin", &content(8, 1));
    let handle = h.engine.cancel_handle();
    handle.pause();

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    };
    let files = [a.clone(), b.clone()];
    let (report, ()) = tokio::join!(h.sync(&files), cancel);

    assert!(report.cancelled);
    assert_eq!(report.counts.cancelled, 2);
    assert_eq!(h.remote.fetch_count(), 0);

    handle.resume();
    let report = h.sync(&[a, b]).await;
    assert!(report.is_success());
}
