//! Upload of spooled segments with a connectivity-dependent retry policy.
//!
//! A queue pass selects the newest unclaimed segments, classifies the link
//! once, and fans the transfers out over a small worker pool. Every worker
//! claims its segment before the first attempt so a pass and a post-recording
//! upload never transfer the same file.
//!
//! All clones of an `Uploader` share one pool of `max_parallel` transfer
//! slots. A transfer on a fast link takes one slot, a transfer on a slow link
//! takes all of them, so at most one slow transfer runs at a time. Only one
//! queue pass runs at a time; a pass started while another is in progress
//! returns immediately.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::connectivity::ConnectivityMonitor;
use crate::adapters::TransferClient;
use crate::domain::{NetworkClass, Segment};
use crate::spool::{SortOrder, SpoolStore};

/// Attempt ceiling and pause between attempts for one network class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    pub max_attempts: u32,

    /// Pause after a failed attempt, in seconds
    pub retry_delay_secs: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay_secs: u64) -> Self {
        Self {
            max_attempts,
            retry_delay_secs,
        }
    }

    /// Policy for fast (or unknown) links: 15 attempts, 5 minutes apart
    pub fn fast() -> Self {
        Self::new(15, 300)
    }

    /// Policy for slow links: 5 attempts, 10 minutes apart
    pub fn slow() -> Self {
        Self::new(5, 600)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fast()
    }
}

/// What happens to a segment whose attempts ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Leave it queued; it is retried on every later pass until evicted
    Retain,

    /// Move it to the quarantine directory, out of the queue
    Quarantine,
}

impl Default for ExhaustedPolicy {
    fn default() -> Self {
        Self::Retain
    }
}

/// Retry, pool and post-upload settings
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub fast: RetryPolicy,
    pub slow: RetryPolicy,
    pub max_parallel: usize,
    pub batch_size: usize,
    pub drain_whole_batch: bool,
    pub delete_after_upload: bool,
    pub on_exhausted: ExhaustedPolicy,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            fast: RetryPolicy::fast(),
            slow: RetryPolicy::slow(),
            max_parallel: 3,
            batch_size: 10,
            drain_whole_batch: false,
            delete_after_upload: true,
            on_exhausted: ExhaustedPolicy::Retain,
        }
    }
}

impl UploadPolicy {
    /// Retry budget for a network class; unknown links get the fast budget
    pub fn retry_for(&self, class: NetworkClass) -> &RetryPolicy {
        if class.is_constrained() {
            &self.slow
        } else {
            &self.fast
        }
    }

    /// Worker pool width for a network class
    pub fn workers_for(&self, class: NetworkClass) -> usize {
        if class.is_constrained() {
            1
        } else {
            self.max_parallel.max(1)
        }
    }

    /// Transfer slots one upload occupies out of `max_parallel`
    pub fn slots_for(&self, class: NetworkClass) -> usize {
        self.max_parallel.max(1) / self.workers_for(class)
    }
}

/// Result of uploading one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Transferred (and deleted, if configured)
    Uploaded,

    /// Every attempt failed; the file is still where it was
    Exhausted { attempts: u32 },

    /// Every attempt failed and the file was moved to quarantine
    Quarantined { attempts: u32 },

    /// Another worker owns the segment
    AlreadyClaimed,

    /// The file disappeared (uploaded elsewhere or evicted)
    Missing,

    /// The remote could not be reached
    Unreachable,

    /// Shutdown interrupted the upload
    Cancelled,
}

/// Summary of one queue pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub reachable: bool,

    /// Queue depth when the pass started
    pub backlog: usize,

    pub class: Option<NetworkClass>,
    pub workers: usize,

    /// Another pass was still running, so this one did nothing
    pub overlapped: bool,

    /// Segments handed to workers
    pub selected: usize,

    pub uploaded: usize,
    pub exhausted: usize,
    pub quarantined: usize,

    /// Claimed elsewhere or already gone
    pub skipped: usize,

    pub cancelled: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded => self.uploaded += 1,
            UploadOutcome::Exhausted { .. } => self.exhausted += 1,
            UploadOutcome::Quarantined { .. } => {
                self.exhausted += 1;
                self.quarantined += 1;
            }
            UploadOutcome::AlreadyClaimed | UploadOutcome::Missing => self.skipped += 1,
            UploadOutcome::Cancelled | UploadOutcome::Unreachable => self.cancelled += 1,
        }
    }
}

/// Drains the spool to the remote target
#[derive(Clone)]
pub struct Uploader {
    store: SpoolStore,
    monitor: Arc<ConnectivityMonitor>,
    transfer: Arc<dyn TransferClient>,
    target: String,
    policy: UploadPolicy,

    /// Destination for exhausted segments under `ExhaustedPolicy::Quarantine`
    quarantine_dir: Option<PathBuf>,

    /// Transfer slots shared by every clone
    slots: Arc<Semaphore>,

    /// Held for the duration of a queue pass
    pass: Arc<Mutex<()>>,

    cancel: CancellationToken,
}

impl Uploader {
    pub fn new(
        store: SpoolStore,
        monitor: Arc<ConnectivityMonitor>,
        transfer: Arc<dyn TransferClient>,
        target: impl Into<String>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            store,
            monitor,
            transfer,
            target: target.into(),
            slots: Arc::new(Semaphore::new(policy.max_parallel.max(1))),
            pass: Arc::new(Mutex::new(())),
            policy,
            quarantine_dir: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_quarantine_dir(mut self, dir: PathBuf) -> Self {
        self.quarantine_dir = Some(dir);
        self
    }

    /// Stop retries and in-flight transfers when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Upload one segment, re-checking its preconditions first
    pub async fn upload_one(&self, segment: &Segment) -> UploadOutcome {
        if tokio::fs::metadata(&segment.path).await.is_err() {
            tracing::error!("File not found: {}", segment.path.display());
            return UploadOutcome::Missing;
        }
        if !self.monitor.check_reachable().await {
            return UploadOutcome::Unreachable;
        }

        let class = self.monitor.classify_speed().await;
        // A failed direct upload falls back to the spool, not to quarantine
        self.transfer_with_retry(segment, class, ExhaustedPolicy::Retain)
            .await
    }

    /// Whether a queue pass is currently running
    pub fn is_pass_running(&self) -> bool {
        self.pass.try_lock().is_err()
    }

    /// Transfer slots not held by any upload
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for this class's share of the transfer slots
    async fn acquire_slots(&self, class: NetworkClass) -> Option<SemaphorePermit<'_>> {
        let wanted = u32::try_from(self.policy.slots_for(class)).unwrap_or(1);
        tokio::select! {
            permit = self.slots.acquire_many(wanted) => permit.ok(),
            _ = self.cancel.cancelled() => None,
        }
    }

    /// Claim the segment and run the attempt loop for `class`
    async fn transfer_with_retry(
        &self,
        segment: &Segment,
        class: NetworkClass,
        on_exhausted: ExhaustedPolicy,
    ) -> UploadOutcome {
        let Some(_claim) = self.store.try_claim(segment) else {
            tracing::debug!("{} is already being uploaded", segment.name());
            return UploadOutcome::AlreadyClaimed;
        };

        // Held across retry pauses: a slot stays busy until the segment is settled
        let Some(_slots) = self.acquire_slots(class).await else {
            return UploadOutcome::Cancelled;
        };

        let retry = self.policy.retry_for(class);

        for attempt in 1..=retry.max_attempts {
            if self.cancel.is_cancelled() {
                return UploadOutcome::Cancelled;
            }

            // Checked under the claim: a previous owner may have finished it
            if tokio::fs::metadata(&segment.path).await.is_err() {
                tracing::debug!("{} is gone, skipping", segment.name());
                return UploadOutcome::Missing;
            }

            let result = tokio::select! {
                result = self.transfer.transfer(&segment.path, &self.target) => result,
                _ = self.cancel.cancelled() => return UploadOutcome::Cancelled,
            };

            match result {
                Ok(()) => {
                    tracing::info!("Uploaded: {}", segment.path.display());
                    if self.policy.delete_after_upload {
                        match self.store.remove(segment).await {
                            Ok(()) => tracing::info!("Deleted after upload: {}", segment.name()),
                            Err(e) => tracing::error!("Failed to delete {}: {}", segment.name(), e),
                        }
                    }
                    return UploadOutcome::Uploaded;
                }
                Err(e) => {
                    tracing::warn!(
                        "Attempt {}/{} failed for {}: {:#}",
                        attempt,
                        retry.max_attempts,
                        segment.name(),
                        e
                    );
                }
            }

            if attempt < retry.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(retry.delay()) => {}
                    _ = self.cancel.cancelled() => return UploadOutcome::Cancelled,
                }
            }
        }

        tracing::error!(
            "Upload failed after {} attempts: {}",
            retry.max_attempts,
            segment.path.display()
        );

        // Still under the claim, so no other worker can pick the file up mid-move
        if on_exhausted == ExhaustedPolicy::Quarantine && self.quarantine(segment).await {
            return UploadOutcome::Quarantined {
                attempts: retry.max_attempts,
            };
        }
        UploadOutcome::Exhausted {
            attempts: retry.max_attempts,
        }
    }

    /// Drain up to one batch of the spool
    pub async fn process_batch(&self) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        let Ok(_pass) = self.pass.try_lock() else {
            tracing::debug!("Previous queue pass still running, skipping");
            report.overlapped = true;
            return Ok(report);
        };

        if !self.monitor.check_reachable().await {
            report.backlog = self.store.len().await?;
            tracing::info!("No connectivity. Files in queue: {}", report.backlog);
            return Ok(report);
        }
        report.reachable = true;

        let queued = self.store.list(SortOrder::NewestFirst).await?;
        report.backlog = queued.len();

        let candidates: Vec<Segment> = queued
            .into_iter()
            .filter(|segment| !self.store.is_claimed(segment))
            .take(self.policy.batch_size)
            .collect();
        if candidates.is_empty() {
            return Ok(report);
        }

        let class = self.monitor.classify_speed().await;
        let width = self.policy.workers_for(class);
        let jobs: Vec<Segment> = if self.policy.drain_whole_batch {
            candidates
        } else {
            candidates.into_iter().take(width).collect()
        };

        report.class = Some(class);
        report.workers = width;
        report.selected = jobs.len();

        tracing::info!(
            "Processing queue ({} files, network: {}, workers: {})",
            jobs.len(),
            class,
            width
        );

        // Concurrency is bounded by the shared transfer slots
        let mut workers = JoinSet::new();
        for segment in jobs {
            let uploader = self.clone();
            let on_exhausted = self.policy.on_exhausted;
            workers.spawn(async move {
                uploader
                    .transfer_with_retry(&segment, class, on_exhausted)
                    .await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => tracing::error!("Upload worker failed: {}", e),
            }
        }

        Ok(report)
    }

    /// Move an exhausted segment out of the queue; returns true if it moved
    async fn quarantine(&self, segment: &Segment) -> bool {
        let Some(ref dir) = self.quarantine_dir else {
            return false;
        };

        match self.store.relocate(segment, dir).await {
            Ok(path) => {
                tracing::warn!("Quarantined after exhausting retries: {}", path.display());
                true
            }
            Err(e) => {
                tracing::error!("Failed to quarantine {}: {}", segment.name(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_budget_by_class() {
        let policy = UploadPolicy::default();

        assert_eq!(policy.retry_for(NetworkClass::Fast), &RetryPolicy::new(15, 300));
        assert_eq!(policy.retry_for(NetworkClass::Unknown), &RetryPolicy::new(15, 300));
        assert_eq!(policy.retry_for(NetworkClass::Slow), &RetryPolicy::new(5, 600));
        assert_eq!(policy.retry_for(NetworkClass::Slow).delay(), Duration::from_secs(600));
    }

    #[test]
    fn test_pool_width_by_class() {
        let policy = UploadPolicy::default();

        assert_eq!(policy.workers_for(NetworkClass::Fast), 3);
        assert_eq!(policy.workers_for(NetworkClass::Unknown), 3);
        assert_eq!(policy.workers_for(NetworkClass::Slow), 1);
    }

    #[test]
    fn test_slow_upload_takes_every_slot() {
        let policy = UploadPolicy::default();

        assert_eq!(policy.slots_for(NetworkClass::Fast), 1);
        assert_eq!(policy.slots_for(NetworkClass::Unknown), 1);
        assert_eq!(policy.slots_for(NetworkClass::Slow), 3);

        let single = UploadPolicy {
            max_parallel: 1,
            ..UploadPolicy::default()
        };
        assert_eq!(single.slots_for(NetworkClass::Slow), 1);
        assert_eq!(single.slots_for(NetworkClass::Fast), 1);
    }

    #[test]
    fn test_partial_retry_tier_yaml() {
        let tier: RetryPolicy = serde_yaml::from_str("max_attempts: 2").unwrap();
        assert_eq!(tier, RetryPolicy::new(2, 300));

        let tier: RetryPolicy = serde_yaml::from_str("retry_delay_secs: 30").unwrap();
        assert_eq!(tier, RetryPolicy::new(15, 30));
    }

    #[test]
    fn test_exhausted_policy_yaml() {
        let policy: ExhaustedPolicy = serde_yaml::from_str("quarantine").unwrap();
        assert_eq!(policy, ExhaustedPolicy::Quarantine);
        assert_eq!(ExhaustedPolicy::default(), ExhaustedPolicy::Retain);
    }

    #[test]
    fn test_report_counts_outcomes() {
        let mut report = BatchReport::default();
        report.record(UploadOutcome::Uploaded);
        report.record(UploadOutcome::Exhausted { attempts: 5 });
        report.record(UploadOutcome::AlreadyClaimed);
        report.record(UploadOutcome::Missing);
        report.record(UploadOutcome::Quarantined { attempts: 5 });
        report.record(UploadOutcome::Cancelled);

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.exhausted, 2);
        assert_eq!(report.quarantined, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.cancelled, 1);
    }
}
