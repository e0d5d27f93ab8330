//! Main event dispatcher.
//!
//! A single `select!` loop owns every decision. Timers emit the periodic
//! events (schedule re-check, queue pass, storage enforcement); recordings,
//! hand-offs and queue passes run as tasks whose completion feeds back into
//! the same loop.
//!
//! ```text
//!   schedule tick ──→ gate open? ──→ spawn recording ──→ finished ──→ hand-off task
//!   upload tick   ──→ spawn queue pass unless one is still running
//!   storage tick  ──→ enforce budget (never depends on connectivity)
//!   SIGINT/SIGTERM ─→ shutdown coordinator
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};

use super::capture::{capture_segment, Handoff, HandoffOutcome};
use super::connectivity::ConnectivityMonitor;
use super::schedule::{ScheduleGate, ScheduleWindow};
use super::shutdown::{ShutdownCoordinator, ShutdownReport};
use super::uploader::{ExhaustedPolicy, Uploader};
use crate::adapters::{
    ArecordRecorder, NetworkProbe, PingProbe, RcloneClient, RecordOutcome, RecordRequest,
    Recorder, TransferClient,
};
use crate::config::paths::Layout;
use crate::config::Config;
use crate::spool::{RecoveryReport, RecoveryScan, SpoolStore, StorageGuard};

type RecordingTask = JoinHandle<Result<(PathBuf, RecordOutcome)>>;

/// External programs the daemon drives
#[derive(Clone)]
pub struct Collaborators {
    pub recorder: Arc<dyn Recorder>,
    pub transfer: Arc<dyn TransferClient>,
    pub probe: Arc<dyn NetworkProbe>,
}

impl Collaborators {
    /// The real arecord/ffmpeg, rclone and ping binaries
    pub fn system(config: &Config, layout: &Layout) -> Self {
        let recorder = ArecordRecorder::new(config.capture.clone(), config.segments.format)
            .with_log_file(layout.log_file())
            .with_grace(config.grace_period());
        let transfer = RcloneClient::with_binary_path(&config.cloud.rclone_bin)
            .with_transfer_timeout(Duration::from_secs(config.upload.transfer_timeout_secs));
        let probe = PingProbe::new(&config.network.probe_host)
            .with_binary_path(&config.network.ping_bin);

        Self {
            recorder: Arc::new(recorder),
            transfer: Arc::new(transfer),
            probe: Arc::new(probe),
        }
    }
}

/// The running daemon
pub struct Daemon {
    config: Config,
    layout: Layout,
    store: SpoolStore,
    guard: StorageGuard,
    uploader: Option<Uploader>,
    handoff: Handoff,
    recorder: Arc<dyn Recorder>,
    gate: ScheduleGate,
    shutdown: ShutdownCoordinator,
    recovery: RecoveryReport,
}

impl Daemon {
    /// Prepare directories, check the device and recover leftovers.
    ///
    /// Any error here is a fatal startup failure.
    pub async fn bootstrap(config: Config, collaborators: Collaborators) -> Result<Self> {
        let layout = Layout::from_config(&config);

        for dir in [&layout.home, &layout.pending] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Cannot create directory: {}", dir.display()))?;
            ensure_writable(dir)?;
        }

        tracing::info!("Checking microphone {}...", config.capture.device);
        collaborators
            .recorder
            .probe()
            .await
            .with_context(|| format!("Capture device {} is unusable", config.capture.device))?;
        tracing::info!("Microphone ready: {}", config.capture.device);

        let store = SpoolStore::open(layout.pending.clone(), config.naming()).await?;

        let recovery = RecoveryScan::new(&layout.home, &store)
            .with_min_viable_bytes(config.segments.min_viable_bytes)
            .run()
            .await?;

        let shutdown = ShutdownCoordinator::new(&layout.home, store.clone(), config.grace_period());

        let uploader = config.cloud.target.as_ref().map(|target| {
            let monitor = ConnectivityMonitor::from_config(
                &config,
                collaborators.probe.clone(),
                collaborators.transfer.clone(),
            );
            Uploader::new(
                store.clone(),
                Arc::new(monitor),
                collaborators.transfer.clone(),
                target.clone(),
                config.upload_policy(),
            )
            .with_quarantine_dir(layout.failed.clone())
            .with_cancellation(shutdown.token())
        });

        let handoff = Handoff::new(store.clone(), uploader.clone(), config.segments.min_viable_bytes);
        let guard = storage_guard(&config, &layout);
        let gate = ScheduleGate::new(ScheduleWindow::from(&config.schedule));

        tracing::info!(
            "Recording {} segments, uploading to {}",
            config.segments.format.extension(),
            config.cloud_name()
        );

        Ok(Self {
            config,
            layout,
            store,
            guard,
            uploader,
            handoff,
            recorder: collaborators.recorder,
            gate,
            shutdown,
            recovery,
        })
    }

    pub fn store(&self) -> &SpoolStore {
        &self.store
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// What the startup recovery scan did
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Run until SIGINT/SIGTERM
    pub async fn run(self) -> Result<ShutdownReport> {
        let signal = ShutdownCoordinator::wait_for_signal();
        self.run_until(signal).await
    }

    /// Run until `stop` resolves
    pub async fn run_until<F>(mut self, stop: F) -> Result<ShutdownReport>
    where
        F: std::future::Future,
    {
        let mut schedule_tick = ticker(self.config.schedule.poll_secs);
        let mut upload_tick = ticker(self.config.network.check_interval_secs);
        let mut storage_tick = ticker(self.config.storage.check_interval_secs);

        let mut recording: Option<RecordingTask> = None;
        let mut background: JoinSet<()> = JoinSet::new();

        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::info!("Stop requested");
                    break;
                }
                _ = schedule_tick.tick() => {
                    self.gate.observe_now();
                    if self.gate.is_open() && recording.is_none() {
                        recording = Some(self.start_recording().await);
                    }
                }
                _ = upload_tick.tick(), if self.uploader.is_some() => {
                    if let Some(ref uploader) = self.uploader {
                        if uploader.is_pass_running() {
                            tracing::debug!("Queue pass still running, skipping upload tick");
                            continue;
                        }
                        let uploader = uploader.clone();
                        background.spawn(async move {
                            if let Err(e) = uploader.process_batch().await {
                                tracing::error!("Queue pass failed: {:#}", e);
                            }
                        });
                    }
                }
                _ = storage_tick.tick() => {
                    self.enforce_storage().await;
                }
                finished = wait_recording(&mut recording) => {
                    recording = None;
                    if self.on_recording_finished(finished, &mut background) {
                        self.gate.observe_now();
                        if self.gate.is_open() {
                            recording = Some(self.start_recording().await);
                        }
                    }
                }
                Some(joined) = background.join_next(), if !background.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Background task failed: {}", e);
                    }
                }
            }
        }

        Ok(self.shutdown.shutdown(recording, background).await)
    }

    async fn enforce_storage(&self) {
        if let Err(e) = self.guard.enforce(&self.store).await {
            tracing::error!("Storage enforcement failed: {}", e);
        }
    }

    async fn start_recording(&self) -> RecordingTask {
        // Quota is checked before every new segment, connectivity or not
        self.enforce_storage().await;

        let name = self.config.naming().file_name(Local::now().naive_local());
        let request = RecordRequest {
            output: self.layout.home.join(name),
            duration: Duration::from_secs(self.config.segments.split_seconds),
        };
        tracing::info!("Recording started: {}", request.output.display());

        let recorder = self.recorder.clone();
        let cancel = self.shutdown.token();
        tokio::spawn(async move {
            let outcome = capture_segment(recorder.as_ref(), &request, cancel).await?;
            Ok((request.output, outcome))
        })
    }

    /// Returns true if recording should continue straight away
    fn on_recording_finished(
        &self,
        finished: Result<Result<(PathBuf, RecordOutcome)>, JoinError>,
        background: &mut JoinSet<()>,
    ) -> bool {
        match finished {
            Ok(Ok((path, RecordOutcome::Completed))) => {
                tracing::info!("Recording finished: {}", path.display());
                let handoff = self.handoff.clone();
                background.spawn(async move { hand_off(handoff, &path).await });
                true
            }
            Ok(Ok((path, RecordOutcome::Interrupted))) => {
                tracing::info!("Recording interrupted: {}", path.display());
                false
            }
            Ok(Err(e)) => {
                // Retried on the next schedule tick rather than in a tight loop
                tracing::error!("Recording failed: {:#}", e);
                false
            }
            Err(e) => {
                tracing::error!("Recording task failed: {}", e);
                false
            }
        }
    }
}

async fn hand_off(handoff: Handoff, path: &Path) {
    match handoff.handle_finished(path).await {
        Ok(HandoffOutcome::Uploaded) => tracing::info!("Delivered: {}", path.display()),
        Ok(HandoffOutcome::Queued) | Ok(HandoffOutcome::Discarded) | Ok(HandoffOutcome::Missing) => {}
        Err(e) => tracing::error!("Failed to hand off {}: {:#}", path.display(), e),
    }
}

/// Await the in-flight recording, or never resolve if there is none
async fn wait_recording(
    slot: &mut Option<RecordingTask>,
) -> Result<Result<(PathBuf, RecordOutcome)>, JoinError> {
    match slot {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Storage guard for the configured budget; quarantine counts when it is in use
pub fn storage_guard(config: &Config, layout: &Layout) -> StorageGuard {
    let guard = StorageGuard::new(config.storage_budget())
        .with_warning_percent(config.storage.warning_percent);

    match config.cloud.on_exhausted {
        ExhaustedPolicy::Quarantine => {
            guard.with_quarantine(SpoolStore::new(layout.failed.clone(), config.naming()))
        }
        ExhaustedPolicy::Retain => guard,
    }
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut tick = interval(Duration::from_secs(secs.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

/// Fail unless a file can be created in `dir`
fn ensure_writable(dir: &Path) -> Result<()> {
    tempfile::NamedTempFile::new_in(dir)
        .map(drop)
        .with_context(|| format!("No write permission in {}", dir.display()))
}
