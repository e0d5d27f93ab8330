//! Storage Guard Integration Tests
//!
//! The spool never stays above its budget after enforcement, and the
//! oldest segments are the ones that go.

mod common;

use arec::spool::{SortOrder, StorageGuard};
use common::{spool, write_segment};
use tempfile::TempDir;

const MB: u64 = 1024 * 1024;

#[tokio::test]
async fn test_evicts_oldest_until_within_budget() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    write_segment(store.dir(), "REC_20240101_060000.opus", 10 * MB, 300);
    write_segment(store.dir(), "REC_20240101_063000.opus", 10 * MB, 200);
    write_segment(store.dir(), "REC_20240101_070000.opus", 10 * MB, 100);

    let report = StorageGuard::new(25 * MB).enforce(&store).await.unwrap();

    assert_eq!(report.size_before, 30 * MB);
    assert_eq!(report.size_after, 20 * MB);
    assert_eq!(report.evicted, vec!["REC_20240101_060000.opus"]);
    assert_eq!(report.evicted_bytes(), 10 * MB);

    let left: Vec<String> = store
        .list(SortOrder::OldestFirst)
        .await
        .unwrap()
        .iter()
        .map(|s| s.name())
        .collect();
    assert_eq!(left, vec!["REC_20240101_063000.opus", "REC_20240101_070000.opus"]);
}

#[tokio::test]
async fn test_mtime_decides_not_name() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    // Name sorts first but the file is the newest
    write_segment(store.dir(), "REC_20240101_000000.opus", 4 * MB, 10);
    write_segment(store.dir(), "REC_20240101_120000.opus", 4 * MB, 500);

    let report = StorageGuard::new(5 * MB).enforce(&store).await.unwrap();

    assert_eq!(report.evicted, vec!["REC_20240101_120000.opus"]);
    assert!(store.dir().join("REC_20240101_000000.opus").exists());
}

#[tokio::test]
async fn test_within_budget_is_untouched() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    write_segment(store.dir(), "REC_20240101_060000.opus", 2 * MB, 100);
    write_segment(store.dir(), "REC_20240101_063000.opus", 2 * MB, 50);

    let report = StorageGuard::new(4 * MB).enforce(&store).await.unwrap();

    assert!(report.evicted.is_empty());
    assert_eq!(report.size_after, 4 * MB);
    assert_eq!(store.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_zero_budget_empties_spool() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    for i in 0..4u64 {
        write_segment(store.dir(), &format!("REC_20240101_0{}0000.opus", i), MB, 400 - i * 50);
    }
    // Foreign files do not count and are never evicted
    std::fs::write(store.dir().join("notes.txt"), vec![0u8; 4096]).unwrap();

    let report = StorageGuard::new(0).enforce(&store).await.unwrap();

    assert_eq!(report.evicted.len(), 4);
    assert_eq!(report.size_after, 0);
    assert!(store.is_empty().await.unwrap());
    assert!(store.dir().join("notes.txt").exists());
}

#[tokio::test]
async fn test_quota_holds_after_every_enforcement() {
    let temp = TempDir::new().unwrap();
    let store = spool(&temp).await;
    let guard = StorageGuard::new(7 * MB);

    // Simulate a day of recordings arriving between enforcement runs
    for round in 0..6u64 {
        write_segment(
            store.dir(),
            &format!("REC_20240101_{:02}0000.opus", round + 6),
            3 * MB,
            1000 - round * 100,
        );
        guard.enforce(&store).await.unwrap();
        assert!(store.total_size().await.unwrap() <= guard.budget());
    }

    // Only the two newest fit
    let left = store.list(SortOrder::NewestFirst).await.unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(left[0].name(), "REC_20240101_110000.opus");
}
