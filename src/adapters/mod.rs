//! Adapter interfaces for external collaborators.
//!
//! The daemon never talks to audio hardware or the network itself. It drives
//! external programs through these traits:
//! - `Recorder`: produces one finished segment per invocation (arecord + ffmpeg)
//! - `TransferClient`: copies a file to the remote and probes the remote (rclone)
//! - `NetworkProbe`: reachability and round-trip probes (ping)
//!
//! Every process is spawned with an argument array, never through a shell.

pub mod arecord;
pub mod ping;
pub mod rclone;

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

// Re-export the concrete adapters
pub use arecord::ArecordRecorder;
pub use ping::PingProbe;
pub use rclone::RcloneClient;

/// One recording job
#[derive(Debug, Clone)]
pub struct RecordRequest {
    /// Where the finished segment must be written
    pub output: PathBuf,

    /// Length of the segment
    pub duration: Duration,
}

/// How a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Ran for the full duration
    Completed,

    /// Stopped early by cancellation; partial output may exist
    Interrupted,
}

/// Trait for capture backends
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Human-readable recorder name
    fn name(&self) -> &str;

    /// Check that the capture device is usable
    async fn probe(&self) -> Result<()>;

    /// Record one segment, stopping early when `cancel` fires
    async fn record(
        &self,
        request: &RecordRequest,
        cancel: CancellationToken,
    ) -> Result<RecordOutcome>;
}

/// Trait for remote transfer clients
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Human-readable client name
    fn name(&self) -> &str;

    /// Copy one local file to the remote target (safe to repeat)
    async fn transfer(&self, path: &Path, target: &str) -> Result<()>;

    /// Check that the remote behind `target` is reachable and authenticated
    async fn check_remote(&self, target: &str, timeout: Duration) -> Result<()>;
}

/// Trait for network probes
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Succeeds if a single echo request is answered within `timeout`
    async fn reach(&self, timeout: Duration) -> Result<()>;

    /// Average round-trip time in milliseconds over `count` echo requests
    async fn round_trip(&self, count: u32, timeout: Duration) -> Result<f64>;
}

/// Run a command to completion, killing it if `limit` elapses
pub(crate) async fn output_with_timeout(command: &mut Command, limit: Duration) -> Result<Output> {
    let program = command.as_std().get_program().to_string_lossy().to_string();

    command.kill_on_drop(true);
    let output = tokio::time::timeout(limit, command.output())
        .await
        .with_context(|| format!("{} timed out after {:?}", program, limit))?
        .with_context(|| format!("Failed to run {}", program))?;

    Ok(output)
}

/// Fail with the command's stderr unless it exited successfully
pub(crate) fn ensure_success(program: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let exit_code = output.status.code().unwrap_or(-1);
    anyhow::bail!("{} failed with exit code {}: {}", program, exit_code, stderr.trim())
}
