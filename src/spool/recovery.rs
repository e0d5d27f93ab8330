//! Startup reconciliation after an unclean stop.
//!
//! Segment files left directly in the working directory belong to a run that
//! never handed them off. Large enough ones are enrolled into the spool,
//! truncated ones are deleted, and every stale `.recording` marker goes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use super::store::SpoolStore;
use crate::domain::SegmentNaming;

/// Default minimum size for a segment to be considered viable
pub const DEFAULT_MIN_VIABLE_BYTES: u64 = 1024;

/// Outcome of a recovery scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Segments moved into the spool
    pub recovered: usize,

    /// Truncated segments deleted
    pub discarded: usize,

    /// Stale in-progress markers deleted
    pub markers_cleared: usize,
}

impl RecoveryReport {
    /// Whether the scan changed anything on disk
    pub fn is_noop(&self) -> bool {
        self.recovered == 0 && self.discarded == 0 && self.markers_cleared == 0
    }
}

/// One-shot scan of the working directory
pub struct RecoveryScan<'a> {
    work_dir: PathBuf,
    store: &'a SpoolStore,
    min_viable_bytes: u64,
}

impl<'a> RecoveryScan<'a> {
    pub fn new(work_dir: impl Into<PathBuf>, store: &'a SpoolStore) -> Self {
        Self {
            work_dir: work_dir.into(),
            store,
            min_viable_bytes: DEFAULT_MIN_VIABLE_BYTES,
        }
    }

    pub fn with_min_viable_bytes(mut self, min_viable_bytes: u64) -> Self {
        self.min_viable_bytes = min_viable_bytes;
        self
    }

    /// Reclassify leftovers into the spool or discard them
    pub async fn run(&self) -> Result<RecoveryReport> {
        tracing::info!("Recovering files after interrupted run in {}", self.work_dir.display());

        let mut report = RecoveryReport::default();
        let naming = self.store.naming();

        for path in segment_files(&self.work_dir, naming).await? {
            let size = match fs::metadata(&path).await {
                Ok(m) => m.len(),
                Err(_) => continue,
            };

            if size > self.min_viable_bytes {
                self.store
                    .enroll(&path)
                    .await
                    .with_context(|| format!("Failed to recover {}", path.display()))?;
                report.recovered += 1;
                tracing::info!("Recovered: {}", file_name(&path));
            } else {
                remove_if_present(&path).await?;
                report.discarded += 1;
                tracing::info!("Deleted incomplete file: {} ({} bytes)", file_name(&path), size);
            }
        }

        report.markers_cleared = clear_markers(&self.work_dir).await?;

        tracing::info!(
            "Recovery complete: +{} recovered, -{} discarded, {} marker(s) cleared",
            report.recovered,
            report.discarded,
            report.markers_cleared
        );

        Ok(report)
    }
}

/// Delete every `.recording` marker in a directory, returning how many went
pub async fn clear_markers(dir: &Path) -> Result<usize> {
    let mut cleared = 0;

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read directory: {}", dir.display()))
        }
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if SegmentNaming::is_marker(&path) && remove_if_present(&path).await? {
            cleared += 1;
        }
    }

    if cleared > 0 {
        tracing::debug!("Cleared {} in-progress marker(s)", cleared);
    }

    Ok(cleared)
}

/// Matching regular files directly inside `dir`
async fn segment_files(dir: &Path, naming: &SegmentNaming) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !naming.matches_path(&path) {
            continue;
        }
        match entry.file_type().await {
            Ok(t) if t.is_file() => files.push(path),
            _ => continue,
        }
    }

    files.sort();
    Ok(files)
}

/// Returns false if the file was already gone
async fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_boundary_size_is_discarded() {
        let temp = TempDir::new().unwrap();
        let store = SpoolStore::open(temp.path().join("pending"), SegmentNaming::new("REC", "opus"))
            .await
            .unwrap();

        // Exactly the threshold is not "above" it
        let path = temp.path().join("REC_20240101_060000.opus");
        tokio::fs::write(&path, vec![0u8; 1024]).await.unwrap();

        let report = RecoveryScan::new(temp.path(), &store).run().await.unwrap();

        assert_eq!(report.discarded, 1);
        assert!(!path.exists());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_unrelated_files_survive() {
        let temp = TempDir::new().unwrap();
        let store = SpoolStore::open(temp.path().join("pending"), SegmentNaming::new("REC", "opus"))
            .await
            .unwrap();

        let log = temp.path().join("arec.log");
        tokio::fs::write(&log, b"log line").await.unwrap();

        let report = RecoveryScan::new(temp.path(), &store).run().await.unwrap();

        assert!(report.is_noop());
        assert!(log.exists());
    }

    #[tokio::test]
    async fn test_clear_markers_missing_dir() {
        let temp = TempDir::new().unwrap();
        assert_eq!(clear_markers(&temp.path().join("nope")).await.unwrap(), 0);
    }
}
