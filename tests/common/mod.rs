//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use arec::adapters::{NetworkProbe, RecordOutcome, RecordRequest, Recorder, TransferClient};
use arec::core::{ConnectivityMonitor, RetryPolicy, UploadPolicy, Uploader};
use arec::domain::SegmentNaming;
use arec::spool::SpoolStore;
use async_trait::async_trait;
use filetime::FileTime;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const TARGET: &str = "test:/Recordings";

/// Transfer client that records every attempt
#[derive(Default)]
pub struct FakeTransfer {
    attempts: Mutex<HashMap<String, u32>>,
    total: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    fail: AtomicBool,
    remote_down: AtomicBool,
    delay: Mutex<Duration>,
}

impl FakeTransfer {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let fake = Self::default();
        fake.fail.store(true, Ordering::SeqCst);
        Arc::new(fake)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_remote_down(&self, down: bool) {
        self.remote_down.store(down, Ordering::SeqCst);
    }

    /// Attempts made for one file name
    pub fn attempts(&self, name: &str) -> u32 {
        self.attempts.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Most transfers ever running at the same time
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Counts a transfer as running until dropped, even if cancelled
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferClient for FakeTransfer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transfer(&self, path: &Path, _target: &str) -> Result<()> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        *self.attempts.lock().unwrap().entry(name).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        let _running = InFlight::enter(&self.in_flight, &self.peak);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("simulated transfer failure");
        }
        Ok(())
    }

    async fn check_remote(&self, _target: &str, _timeout: Duration) -> Result<()> {
        if self.remote_down.load(Ordering::SeqCst) {
            anyhow::bail!("simulated remote outage");
        }
        Ok(())
    }
}

/// Network probe with a fixed answer
pub struct FakeProbe {
    reachable: bool,

    /// `None` makes the speed probe fail
    rtt_ms: Option<f64>,
}

impl FakeProbe {
    pub fn fast() -> Arc<Self> {
        Arc::new(Self {
            reachable: true,
            rtt_ms: Some(20.0),
        })
    }

    pub fn slow() -> Arc<Self> {
        Arc::new(Self {
            reachable: true,
            rtt_ms: Some(450.0),
        })
    }

    pub fn unknown() -> Arc<Self> {
        Arc::new(Self {
            reachable: true,
            rtt_ms: None,
        })
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            reachable: false,
            rtt_ms: None,
        })
    }
}

#[async_trait]
impl NetworkProbe for FakeProbe {
    async fn reach(&self, _timeout: Duration) -> Result<()> {
        anyhow::ensure!(self.reachable, "network unreachable");
        Ok(())
    }

    async fn round_trip(&self, _count: u32, _timeout: Duration) -> Result<f64> {
        self.rtt_ms
            .ok_or_else(|| anyhow::anyhow!("no echo replies"))
    }
}

pub fn naming() -> SegmentNaming {
    SegmentNaming::new("REC", "opus")
}

pub async fn spool(temp: &TempDir) -> SpoolStore {
    SpoolStore::open(temp.path().join("pending"), naming())
        .await
        .unwrap()
}

/// Write a segment of `size` bytes with an mtime `age_secs` in the past
pub fn write_segment(dir: &Path, name: &str, size: u64, age_secs: u64) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    file.set_len(size).unwrap();
    drop(file);

    let mtime = SystemTime::now() - Duration::from_secs(age_secs);
    filetime::set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
    path
}

/// Upload policy with no pauses between attempts
pub fn instant_policy() -> UploadPolicy {
    UploadPolicy {
        fast: RetryPolicy::new(15, 0),
        slow: RetryPolicy::new(5, 0),
        ..UploadPolicy::default()
    }
}

pub fn uploader(
    store: &SpoolStore,
    probe: Arc<FakeProbe>,
    transfer: Arc<FakeTransfer>,
    policy: UploadPolicy,
) -> Uploader {
    let monitor = ConnectivityMonitor::new(probe, transfer.clone(), Some(TARGET.to_string()));
    Uploader::new(store.clone(), Arc::new(monitor), transfer, TARGET, policy)
}

/// Recorder that writes `payload` bytes once the segment duration elapses
pub struct FakeRecorder {
    pub payload: usize,
    pub recordings: AtomicUsize,
    completed: Mutex<Vec<String>>,
    broken: bool,
}

impl FakeRecorder {
    pub fn new(payload: usize) -> Arc<Self> {
        Arc::new(Self {
            payload,
            recordings: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
            broken: false,
        })
    }

    /// A recorder whose device check always fails
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            payload: 0,
            recordings: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
            broken: true,
        })
    }

    pub fn recordings(&self) -> usize {
        self.recordings.load(Ordering::SeqCst)
    }

    /// File names of segments that ran their full duration
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recorder for FakeRecorder {
    fn name(&self) -> &str {
        "fake"
    }

    async fn probe(&self) -> Result<()> {
        anyhow::ensure!(!self.broken, "audio open error: No such device");
        Ok(())
    }

    async fn record(&self, request: &RecordRequest, cancel: CancellationToken) -> Result<RecordOutcome> {
        self.recordings.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(&request.output, vec![0u8; self.payload]).await?;

        tokio::select! {
            _ = tokio::time::sleep(request.duration) => {
                let name = request.output.file_name().unwrap().to_string_lossy().into_owned();
                self.completed.lock().unwrap().push(name);
                Ok(RecordOutcome::Completed)
            }
            _ = cancel.cancelled() => Ok(RecordOutcome::Interrupted),
        }
    }
}
