//! Storage budget enforcement.
//!
//! Eviction is destructive: the oldest segments are deleted without backup
//! until the spool fits the budget. It runs on its own timer and never
//! consults connectivity.
//!
//! When a quarantine directory is attached, its segments count against the
//! same budget and are evicted before anything still queued for upload.

use super::store::{SortOrder, SpoolError, SpoolStore};
use crate::domain::Segment;

/// Byte ceiling on the spool
#[derive(Debug, Clone)]
pub struct StorageGuard {
    /// Maximum total size of the spool in bytes
    budget: u64,

    /// Share of the budget (percent) at which usage is reported
    warning_percent: u8,

    /// Segments that exhausted their retries
    quarantine: Option<SpoolStore>,
}

/// Result of one enforcement run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Spool (plus quarantine) size before enforcement
    pub size_before: u64,

    /// Spool (plus quarantine) size after enforcement
    pub size_after: u64,

    /// Names of evicted segments, oldest first
    pub evicted: Vec<String>,
}

impl EvictionReport {
    pub fn evicted_bytes(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }
}

impl StorageGuard {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            warning_percent: 80,
            quarantine: None,
        }
    }

    /// Count quarantined segments against the budget too
    pub fn with_quarantine(mut self, quarantine: SpoolStore) -> Self {
        self.quarantine = Some(quarantine);
        self
    }

    pub fn with_warning_percent(mut self, warning_percent: u8) -> Self {
        self.warning_percent = warning_percent;
        self
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Bytes held by the spool and the quarantine
    pub async fn usage(&self, store: &SpoolStore) -> Result<u64, SpoolError> {
        let mut total = store.total_size().await?;
        if let Some(ref quarantine) = self.quarantine {
            total += quarantine.total_size().await?;
        }
        Ok(total)
    }

    /// Oldest quarantined segment, else the oldest queued one
    async fn next_victim(&self, store: &SpoolStore) -> Result<Option<Segment>, SpoolError> {
        if let Some(ref quarantine) = self.quarantine {
            if let Some(victim) = quarantine.list(SortOrder::OldestFirst).await?.into_iter().next() {
                return Ok(Some(victim));
            }
        }
        Ok(store.list(SortOrder::OldestFirst).await?.into_iter().next())
    }

    /// Evict oldest entries until the spool is within budget or empty
    pub async fn enforce(&self, store: &SpoolStore) -> Result<EvictionReport, SpoolError> {
        let size_before = self.usage(store).await?;
        let mut report = EvictionReport {
            size_before,
            size_after: size_before,
            evicted: Vec::new(),
        };

        if size_before <= self.budget {
            self.warn_if_near_budget(size_before);
            return Ok(report);
        }

        tracing::warn!(
            "Storage budget exceeded ({} > {} bytes), evicting oldest segments",
            size_before,
            self.budget
        );

        loop {
            // Recompute each round: the recorder and uploaders mutate the spool too
            let total = self.usage(store).await?;
            report.size_after = total;
            if total <= self.budget {
                break;
            }

            let Some(victim) = self.next_victim(store).await? else {
                break;
            };

            store.remove(&victim).await?;
            tracing::warn!(
                "Evicted {} ({} bytes) to stay within storage budget",
                victim.name(),
                victim.size
            );
            report.evicted.push(victim.name());
        }

        Ok(report)
    }

    fn warn_if_near_budget(&self, size: u64) {
        if self.budget == 0 {
            return;
        }
        let percent = size.saturating_mul(100) / self.budget;
        if percent >= u64::from(self.warning_percent) {
            tracing::warn!(
                "Spool is at {}% of its storage budget ({} of {} bytes)",
                percent,
                size,
                self.budget
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SegmentNaming;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_under_budget_is_untouched() {
        let temp = TempDir::new().unwrap();
        let store = SpoolStore::open(temp.path().to_path_buf(), SegmentNaming::new("REC", "opus"))
            .await
            .unwrap();
        tokio::fs::write(store.dir().join("REC_20240101_060000.opus"), vec![0u8; 100])
            .await
            .unwrap();

        let report = StorageGuard::new(100).enforce(&store).await.unwrap();

        assert!(report.evicted.is_empty());
        assert_eq!(report.size_after, 100);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_empties_store() {
        let temp = TempDir::new().unwrap();
        let store = SpoolStore::open(temp.path().to_path_buf(), SegmentNaming::new("REC", "opus"))
            .await
            .unwrap();
        for name in ["REC_20240101_060000.opus", "REC_20240101_063000.opus"] {
            tokio::fs::write(store.dir().join(name), vec![0u8; 10]).await.unwrap();
        }

        let report = StorageGuard::new(0).enforce(&store).await.unwrap();

        assert_eq!(report.evicted.len(), 2);
        assert_eq!(report.evicted_bytes(), 20);
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_quarantine_counts_and_goes_first() {
        let temp = TempDir::new().unwrap();
        let naming = SegmentNaming::new("REC", "opus");
        let store = SpoolStore::open(temp.path().join("pending"), naming.clone())
            .await
            .unwrap();
        let failed = SpoolStore::open(temp.path().join("failed"), naming).await.unwrap();

        tokio::fs::write(store.dir().join("REC_20240101_060000.opus"), vec![0u8; 60])
            .await
            .unwrap();
        tokio::fs::write(failed.dir().join("REC_20240101_090000.opus"), vec![0u8; 60])
            .await
            .unwrap();

        let guard = StorageGuard::new(100).with_quarantine(failed.clone());
        assert_eq!(guard.usage(&store).await.unwrap(), 120);

        let report = guard.enforce(&store).await.unwrap();

        // The queued segment survives even though it is older
        assert_eq!(report.evicted, vec!["REC_20240101_090000.opus"]);
        assert_eq!(report.size_after, 60);
        assert!(failed.is_empty().await.unwrap());
        assert_eq!(store.len().await.unwrap(), 1);
    }
}
