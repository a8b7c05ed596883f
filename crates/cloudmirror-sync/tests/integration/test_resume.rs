//! Integration tests for resumable transfers
//!
//! - Interrupted files resume with only their missing chunks
//! - Changed remote content discards earlier progress
//! - Tampered or lost partial files are re-validated
//! - Unchanged snapshots produce no work
//! - Chunks of one file fetched in parallel land in place

use std::sync::Arc;
use std::time::Duration;

use cloudmirror_core::domain::{Decision, LocalState, RemoteEntry, SyncFilter, TransferError};
use cloudmirror_core::ports::StaticCredentials;
use cloudmirror_sync::TaskStatus;
use tempfile::TempDir;

use crate::common::{self, content, offsets, status, Fault, CHUNK};

/// Run `entry` and stop it while the fifth chunk is being fetched
async fn interrupted_after_five(h: &common::Harness, entry: &RemoteEntry) {
    h.remote.cancel_on_fetch(5, h.engine.cancel_handle());
    let report = h.sync(std::slice::from_ref(entry)).await;

    assert!(report.cancelled);
    assert_eq!(status(&report, entry.id.as_str()), TaskStatus::Cancelled);
    assert_eq!(report.bytes_transferred, 5 * CHUNK);
}

#[tokio::test]
async fn test_resume_fetches_only_remaining_chunks() {
    let h = common::harness().await;
    let data = content(40, 1);
    let a = h.remote.put("1", "A.bin", &data);

    interrupted_after_five(&h, &a).await;
    let record = h.store.record("1").await;
    assert_eq!(record.state(), LocalState::InProgress);
    assert_eq!(record.bytes_completed(), 5 * CHUNK);
    assert_eq!(h.remote.fetched_offsets("1"), offsets(0, 20));

    h.remote.clear_log();
    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert!(!report.cancelled);
    assert_eq!(h.remote.fetched_offsets("1"), offsets(20, 40));
    assert_eq!(report.bytes_transferred, 20);
    assert_eq!(h.local("A.bin"), data);

    let record = h.store.record("1").await;
    assert_eq!(record.state(), LocalState::Complete);
    assert_eq!(record.bytes_completed(), 40);
}

#[tokio::test]
async fn test_modified_content_discards_progress() {
    let h = common::harness().await;
    let first = h.remote.put("2", "B.bin", &content(24, 7));
    interrupted_after_five(&h, &first).await;

    let changed_data = content(24, 99);
    let changed = h.remote.put("2", "B.bin", &changed_data);
    let plan = h
        .engine
        .plan_sync(vec![changed.clone()], &SyncFilter::new())
        .await
        .unwrap();
    assert_eq!(plan.count(Decision::Modified), 1);

    h.remote.clear_log();
    let report = h.sync(&[changed]).await;

    assert_eq!(status(&report, "2"), TaskStatus::Completed);
    assert_eq!(h.remote.fetched_offsets("2"), offsets(0, 24));
    assert_eq!(h.local("B.bin"), changed_data);
}

#[tokio::test]
async fn test_tampered_chunk_is_refetched() {
    let h = common::harness().await;
    let data = content(40, 3);
    let a = h.remote.put("1", "A.bin", &data);
    interrupted_after_five(&h, &a).await;

    // Overwrite part of chunk 1 behind the engine's back
    let path = h.root.path().join("A.bin");
    let mut local = std::fs::read(&path).unwrap();
    local[5] ^= 0xff;
    std::fs::write(&path, &local).unwrap();

    h.remote.clear_log();
    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    let mut expected = vec![CHUNK];
    expected.extend(offsets(20, 40));
    assert_eq!(h.remote.fetched_offsets("1"), expected);
    assert_eq!(h.local("A.bin"), data);
}

#[tokio::test]
async fn test_lost_partial_file_restarts_from_zero() {
    let h = common::harness().await;
    let data = content(40, 5);
    let a = h.remote.put("1", "A.bin", &data);
    interrupted_after_five(&h, &a).await;

    std::fs::remove_file(h.root.path().join("A.bin")).unwrap();

    h.remote.clear_log();
    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert_eq!(h.remote.fetched_offsets("1"), offsets(0, 40));
    assert_eq!(h.local("A.bin"), data);
}

#[tokio::test]
async fn test_unchanged_snapshot_is_idempotent() {
    let h = common::harness().await;
    let docs = RemoteEntry::directory(
        "d".parse().unwrap(),
        "docs".parse().unwrap(),
        chrono::Utc::now(),
    );
    let a = h.remote.put("1", "docs/a.txt", &content(10, 1));
    let b = h.remote.put("2", "b.txt", &content(3, 2));
    let snapshot = vec![docs, a, b];

    let report = h.sync(&snapshot).await;
    assert!(report.is_success());
    assert_eq!(report.counts.completed, 3);
    assert_eq!(report.bytes_completed_total, 13);
    let fetched = h.remote.fetch_count();

    let plan = h
        .engine
        .plan_sync(snapshot.clone(), &SyncFilter::new())
        .await
        .unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.unchanged, 3);

    let report = h.sync(&snapshot).await;
    assert_eq!(report.counts.total(), 0);
    assert_eq!(h.remote.fetch_count(), fetched);
}

#[tokio::test]
async fn test_rename_moves_local_copy_without_refetch() {
    let h = common::harness().await;
    let data = content(12, 4);
    let original = h.remote.put("1", "old/name.bin", &data);
    h.sync(&[original]).await;
    let fetched = h.remote.fetch_count();

    let renamed = h.remote.put("1", "new/name.bin", &data);
    let report = h.sync(&[renamed]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert_eq!(h.remote.fetch_count(), fetched);
    assert_eq!(h.local("new/name.bin"), data);
    assert!(!h.root.path().join("old/name.bin").exists());
    assert_eq!(h.store.record("1").await.path().as_str(), "new/name.bin");
}

#[tokio::test]
async fn test_completed_file_gets_remote_mtime() {
    let h = common::harness().await;
    let a = h.remote.put("1", "A.bin", &content(8, 0));
    h.sync(&[a.clone()]).await;

    let meta = std::fs::metadata(h.root.path().join("A.bin")).unwrap();
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    assert_eq!(mtime.unix_seconds(), a.modified_time.timestamp());
}

#[tokio::test]
async fn test_parallel_chunks_with_a_retry_complete_the_file() {
    let root = TempDir::new().unwrap();
    let mut settings = common::fast_settings(&root);
    settings.transfer.chunk_parallelism = 3;
    let h = common::harness_with(root, settings, Arc::new(StaticCredentials::new("token"))).await;
    h.remote.set_delay(Duration::from_millis(20));

    let data = content(40, 4);
    let a = h.remote.put("1", "A.bin", &data);
    h.remote.script(
        "1",
        [
            Fault::Pass,
            Fault::Fail(TransferError::Transient("connection reset".into())),
        ],
    );

    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert!(h.remote.max_in_flight("1") > 1);
    assert_eq!(h.remote.fetch_count(), 11);
    assert_eq!(report.bytes_transferred, 40);
    assert_eq!(h.local("A.bin"), data);

    let record = h.store.record("1").await;
    assert_eq!(record.state(), LocalState::Complete);
    assert_eq!(record.bytes_completed(), 40);
}
