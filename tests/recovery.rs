//! Recovery Integration Tests
//!
//! Startup reconciliation of leftovers from an unclean stop.

mod common;

use arec::spool::{RecoveryScan, SortOrder};
use common::{spool, write_segment};
use tempfile::TempDir;

#[tokio::test]
async fn test_recovers_viable_and_discards_truncated() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    let home = temp.path();

    let viable = write_segment(home, "REC_20240101_060000.opus", 2048, 120);
    let truncated = write_segment(home, "REC_20240101_063000.opus", 500, 60);
    let marker = home.join("REC_20240101_063000.opus.recording");
    std::fs::write(&marker, "2024-01-01 06:30:00 - recording started\n").unwrap();
    std::fs::write(home.join("arec.log"), b"log lines").unwrap();

    let report = RecoveryScan::new(home, &store).run().await.unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.markers_cleared, 1);

    assert!(!viable.exists());
    assert!(!truncated.exists());
    assert!(!marker.exists());
    assert!(home.join("arec.log").exists());

    let queued = store.list(SortOrder::OldestFirst).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].name(), "REC_20240101_060000.opus");
    assert_eq!(queued[0].size, 2048);
}

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    write_segment(temp.path(), "REC_20240101_060000.opus", 4096, 60);

    let scan = RecoveryScan::new(temp.path(), &store);
    assert!(!scan.run().await.unwrap().is_noop());

    let again = scan.run().await.unwrap();
    assert!(again.is_noop());
    assert_eq!(store.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_threshold_is_exclusive() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    let at_threshold = write_segment(temp.path(), "REC_20240101_060000.opus", 1024, 60);

    let report = RecoveryScan::new(temp.path(), &store)
        .with_min_viable_bytes(1024)
        .run()
        .await
        .unwrap();

    assert_eq!(report.discarded, 1);
    assert!(!at_threshold.exists());
    assert!(store.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_spool_contents_are_left_alone() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    // Already queued, even if tiny
    write_segment(store.dir(), "REC_20240101_050000.opus", 10, 600);

    let report = RecoveryScan::new(temp.path(), &store).run().await.unwrap();

    assert!(report.is_noop());
    assert_eq!(store.len().await.unwrap(), 1);
}
