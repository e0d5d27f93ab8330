//! Signal-driven cooperative shutdown.
//!
//! The coordinator owns the root cancellation token. Every long-running
//! operation (recording, retry sleeps, transfers) listens on a clone of it.
//! On shutdown the token fires first, then in-flight tasks get a bounded
//! grace period before they are aborted, which kills their child processes.

use std::path::PathBuf;
use std::time::Duration;

use tokio::signal;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::spool::{clear_markers, SpoolStore};

/// What the shutdown left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Segments still queued for upload
    pub backlog: usize,

    /// Stale in-progress markers removed
    pub markers_cleared: usize,

    /// Tasks that had to be aborted after the grace period
    pub forced: usize,
}

pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
    work_dir: PathBuf,
    store: SpoolStore,
}

impl ShutdownCoordinator {
    pub fn new(work_dir: impl Into<PathBuf>, store: SpoolStore, grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
            work_dir: work_dir.into(),
            store,
        }
    }

    /// Token every cancellable operation should listen on
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve on SIGINT or SIGTERM, returning the signal name
    pub async fn wait_for_signal() -> &'static str {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => "SIGINT",
            _ = terminate => "SIGTERM",
        }
    }

    /// Stop everything in flight and report the remaining backlog
    pub async fn shutdown<R>(
        &self,
        recording: Option<JoinHandle<R>>,
        mut background: JoinSet<()>,
    ) -> ShutdownReport {
        tracing::info!("Shutting down...");
        self.token.cancel();

        let mut report = ShutdownReport::default();

        if let Some(mut handle) = recording {
            if tokio::time::timeout(self.grace, &mut handle).await.is_err() {
                tracing::warn!("Recording did not stop within {:?}, aborting", self.grace);
                handle.abort();
                let _ = handle.await;
                report.forced += 1;
            }
        }

        let drain = async { while background.join_next().await.is_some() {} };
        if tokio::time::timeout(self.grace, drain).await.is_err() {
            report.forced += background.len();
            tracing::warn!("Aborting {} background task(s)", background.len());
            background.shutdown().await;
        }

        report.markers_cleared = match clear_markers(&self.work_dir).await {
            Ok(cleared) => cleared,
            Err(e) => {
                tracing::error!("Failed to clear markers: {:#}", e);
                0
            }
        };

        report.backlog = match self.store.len().await {
            Ok(backlog) => backlog,
            Err(e) => {
                tracing::error!("Failed to count queue: {}", e);
                0
            }
        };
        if report.backlog > 0 {
            tracing::info!("Exiting with {} file(s) in queue", report.backlog);
        }
        tracing::info!("Clean shutdown complete");

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SegmentNaming;
    use tempfile::TempDir;

    async fn coordinator(temp: &TempDir, grace: Duration) -> ShutdownCoordinator {
        let store = SpoolStore::open(temp.path().join("pending"), SegmentNaming::new("REC", "opus"))
            .await
            .unwrap();
        ShutdownCoordinator::new(temp.path(), store, grace)
    }

    #[tokio::test]
    async fn test_cooperative_task_stops_within_grace() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(&temp, Duration::from_secs(5)).await;

        let token = coordinator.token();
        let recording = tokio::spawn(async move { token.cancelled().await });

        let marker = temp.path().join("REC_20240101_060000.opus.recording");
        tokio::fs::write(&marker, b"started").await.unwrap();
        tokio::fs::write(temp.path().join("pending/REC_20240101_050000.opus"), b"queued")
            .await
            .unwrap();

        let report = coordinator.shutdown(Some(recording), JoinSet::new()).await;

        assert!(coordinator.is_shutting_down());
        assert_eq!(report.forced, 0);
        assert_eq!(report.markers_cleared, 1);
        assert_eq!(report.backlog, 1);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_stuck_tasks_are_aborted() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(&temp, Duration::from_millis(50)).await;

        // Ignores the token entirely
        let recording = tokio::spawn(std::future::pending::<()>());
        let mut background = JoinSet::new();
        background.spawn(std::future::pending::<()>());

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.shutdown(Some(recording), background),
        )
        .await
        .expect("shutdown must not hang");

        assert_eq!(report.forced, 2);
    }
}
