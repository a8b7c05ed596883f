//! Integration tests for failure handling
//!
//! Covers chunk retries, whole-file corruption, permanent per-file errors,
//! expired credentials and the error log.

use std::sync::Arc;
use std::time::Duration;

use cloudmirror_core::domain::{ErrorKind, LocalState, RemoteEntry, SyncFilter, TransferError};
use cloudmirror_core::ports::IProgressStore;
use cloudmirror_sync::TaskStatus;
use tempfile::TempDir;

use crate::common::{self, content, status, ExpiredCredentials, Fault};

fn transient() -> Fault {
    Fault::Fail(TransferError::Transient("connection reset".into()))
}

#[tokio::test]
async fn test_three_transient_failures_then_success() {
    let h = common::harness().await;
    let data = content(8, 1);
    let a = h.remote.put("1", "A.bin", &data);
    h.remote
        .script("1", [Fault::Pass, transient(), transient(), transient()]);

    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert_eq!(h.remote.fetched_offsets("1"), vec![0, 4, 4, 4, 4]);
    assert!(h.store.attempt_history("1").ends_with(&[1, 2, 3, 4, 0]));

    let record = h.store.record("1").await;
    assert_eq!(record.state(), LocalState::Complete);
    assert_eq!(record.attempt_count(), 0);
    assert!(record.last_error().is_none());
    assert_eq!(h.local("A.bin"), data);
}

#[tokio::test]
async fn test_short_read_retries_only_that_chunk() {
    let h = common::harness().await;
    let data = content(12, 2);
    let a = h.remote.put("1", "A.bin", &data);
    h.remote.script("1", [Fault::Pass, Fault::Truncate]);

    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert_eq!(h.remote.fetched_offsets("1"), vec![0, 4, 4, 8]);
    assert_eq!(h.local("A.bin"), data);
}

#[tokio::test]
async fn test_rate_limit_hint_is_honoured() {
    let h = common::harness().await;
    let a = h.remote.put("1", "A.bin", &content(4, 0));
    h.remote.script(
        "1",
        [Fault::Fail(TransferError::RateLimited {
            retry_after: Some(Duration::from_millis(20)),
        })],
    );

    let started = std::time::Instant::now();
    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(h.remote.fetched_offsets("1"), vec![0, 0]);
}

#[tokio::test]
async fn test_exhausted_retries_fail_file_with_last_error() {
    let h = common::harness().await;
    let a = h.remote.put("1", "A.bin", &content(4, 0));
    h.remote.script("1", std::iter::repeat_with(transient).take(5));

    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Failed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ErrorKind::Transient);
    assert_eq!(h.remote.fetched_offsets("1").len(), 5);

    let record = h.store.record("1").await;
    assert_eq!(record.state(), LocalState::Failed);
    assert_eq!(record.failure_count(), 1);
    assert_eq!(record.last_error().map(|e| e.kind), Some(ErrorKind::Transient));

    let log = h.store.list_errors(10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, ErrorKind::Transient);
    assert_eq!(log[0].attempt_count, 5);
}

#[tokio::test]
async fn test_checksum_mismatch_refetches_whole_file_once() {
    let h = common::harness().await;
    let data = content(8, 6);
    let a = h.remote.put("1", "A.bin", &data);
    h.remote.script("1", [Fault::Corrupt]);

    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Completed);
    assert_eq!(h.remote.fetched_offsets("1"), vec![0, 4, 0, 4]);
    assert_eq!(h.local("A.bin"), data);
    assert_eq!(h.store.record("1").await.corruption_count(), 0);
}

#[tokio::test]
async fn test_recurring_mismatch_is_permanent() {
    let h = common::harness().await;
    let a = h.remote.put("1", "A.bin", &content(8, 6));
    h.remote
        .script("1", [Fault::Corrupt, Fault::Pass, Fault::Corrupt, Fault::Pass]);

    let report = h.sync(&[a]).await;

    assert_eq!(status(&report, "1"), TaskStatus::Failed);
    assert_eq!(report.failures[0].kind, ErrorKind::ChecksumMismatch);
    assert_eq!(h.remote.fetched_offsets("1"), vec![0, 4, 0, 4]);

    let record = h.store.record("1").await;
    assert_eq!(record.state(), LocalState::Failed);
    assert_eq!(record.bytes_completed(), 0);
    assert_eq!(record.corruption_count(), 2);
}

#[tokio::test]
async fn test_not_found_spares_siblings_and_becomes_permanent() {
    let h = common::harness().await;
    let sibling = h.remote.put("ok", "ok.bin", &content(6, 1));
    let ghost = RemoteEntry::file(
        "ghost".parse().unwrap(),
        "ghost.bin".parse().unwrap(),
        6,
        None,
        chrono::Utc::now(),
    );
    let snapshot = vec![sibling, ghost];

    let report = h.sync(&snapshot).await;
    assert_eq!(status(&report, "ok"), TaskStatus::Completed);
    assert_eq!(status(&report, "ghost"), TaskStatus::Failed);
    assert_eq!(report.counts.completed, 1);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.failures[0].kind, ErrorKind::NotFound);

    // Two more failed runs reach the default ceiling of three
    h.sync(&snapshot).await;
    h.sync(&snapshot).await;
    assert_eq!(h.store.record("ghost").await.failure_count(), 3);

    let plan = h
        .engine
        .plan_sync(snapshot.clone(), &SyncFilter::new())
        .await
        .unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.permanently_failed.len(), 1);
    assert_eq!(plan.permanently_failed[0].entry.id.as_str(), "ghost");

    let log = h.store.list_errors(10).await.unwrap();
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|e| e.remote_id.as_str() == "ghost"));
    assert!(log.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}

#[tokio::test]
async fn test_auth_expired_is_flagged_and_not_counted() {
    let root = TempDir::new().unwrap();
    let settings = common::fast_settings(&root);
    let h = common::harness_with(root, settings, Arc::new(ExpiredCredentials)).await;
    let a = h.remote.put("1", "A.bin", &content(8, 0));
    let b = h.remote.put("2", "B.bin", &content(8, 1));

    let report = h.sync(&[a, b]).await;

    assert!(report.auth_expired);
    assert_eq!(report.counts.failed, 2);
    assert!(report
        .failures
        .iter()
        .all(|f| f.kind == ErrorKind::AuthExpired));
    assert_eq!(h.remote.fetch_count(), 0);

    let record = h.store.record("1").await;
    assert_eq!(record.state(), LocalState::Failed);
    assert_eq!(record.failure_count(), 0);
}
