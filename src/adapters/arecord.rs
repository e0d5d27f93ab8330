//! ALSA capture through `arecord`, encoded by `ffmpeg`.
//!
//! The two processes are wired with an OS pipe:
//!
//! ```text
//! arecord -D <dev> -f <fmt> -r <rate> -c 1 -d <secs> --quiet -  →  ffmpeg -y -i - <codec> -ac 1 <out>
//! ```
//!
//! Both write their stderr to the daemon log file when one is configured.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::{ensure_success, output_with_timeout, RecordOutcome, RecordRequest, Recorder};
use crate::config::CaptureConfig;
use crate::domain::AudioFormat;

/// Slack on top of the segment duration before the pipeline is killed
const OVERRUN_SLACK: Duration = Duration::from_secs(10);

/// Recorder spawning `arecord | ffmpeg` per segment
pub struct ArecordRecorder {
    capture: CaptureConfig,
    format: AudioFormat,

    /// Where child stderr goes (discarded if unset)
    log_file: Option<PathBuf>,

    /// How long interrupted children get to exit after SIGTERM
    grace: Duration,
}

impl ArecordRecorder {
    pub fn new(capture: CaptureConfig, format: AudioFormat) -> Self {
        Self {
            capture,
            format,
            log_file: None,
            grace: Duration::from_secs(5),
        }
    }

    pub fn with_log_file(mut self, log_file: PathBuf) -> Self {
        self.log_file = Some(log_file);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Base `arecord` invocation writing raw PCM to stdout
    fn arecord(&self, seconds: u64) -> Command {
        let mut command = Command::new(&self.capture.arecord_bin);
        command
            .arg("-D")
            .arg(&self.capture.device)
            .arg("-f")
            .arg(&self.capture.sample_format)
            .arg("-r")
            .arg(self.capture.sample_rate.to_string())
            .arg("-c")
            .arg("1")
            .arg("-d")
            .arg(seconds.to_string())
            .arg("--quiet")
            .arg("-");
        command
    }

    fn stderr(&self) -> Result<Stdio> {
        match self.log_file {
            Some(ref path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file: {}", path.display()))?;
                Ok(Stdio::from(file))
            }
            None => Ok(Stdio::null()),
        }
    }
}

/// ffmpeg codec arguments for a format and bitrate
pub fn codec_args(format: AudioFormat, bitrate_kbps: u32) -> Vec<String> {
    let bitrate = format!("{}k", bitrate_kbps);
    let args: Vec<&str> = match format {
        AudioFormat::Opus => vec!["-c:a", "libopus", "-b:a", bitrate.as_str(), "-application", "voip"],
        AudioFormat::Aac => vec!["-c:a", "aac", "-b:a", bitrate.as_str()],
        AudioFormat::Mp3 => vec!["-c:a", "libmp3lame", "-b:a", bitrate.as_str(), "-q:a", "5"],
    };
    args.into_iter().map(String::from).collect()
}

/// Ask a child to stop with SIGTERM
fn request_stop(child: &Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!("SIGTERM to {} failed: {}", pid, e);
        }
    }
}

/// SIGTERM both children, escalating to SIGKILL after `grace`
async fn terminate(capture: &mut Child, encoder: &mut Child, grace: Duration) {
    // Capture side first so the encoder sees EOF while finalizing
    request_stop(capture);
    request_stop(encoder);

    let graceful = async {
        let _ = capture.wait().await;
        let _ = encoder.wait().await;
    };
    if tokio::time::timeout(grace, graceful).await.is_ok() {
        return;
    }

    tracing::warn!("Recorder did not stop within {:?}, killing", grace);
    let _ = capture.kill().await;
    let _ = encoder.kill().await;
}

#[async_trait]
impl Recorder for ArecordRecorder {
    fn name(&self) -> &str {
        "arecord"
    }

    async fn probe(&self) -> Result<()> {
        let mut command = self.arecord(1);
        command.stdout(Stdio::null()).stderr(Stdio::piped());

        let output = output_with_timeout(&mut command, OVERRUN_SLACK).await?;
        ensure_success("arecord", &output)
            .with_context(|| format!("Microphone {} is not accessible", self.capture.device))
    }

    async fn record(
        &self,
        request: &RecordRequest,
        cancel: CancellationToken,
    ) -> Result<RecordOutcome> {
        let seconds = request.duration.as_secs().max(1);

        let mut capture = self
            .arecord(seconds)
            .stdout(Stdio::piped())
            .stderr(self.stderr()?)
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn arecord")?;

        let stdout = capture
            .stdout
            .take()
            .context("arecord stdout was not captured")?;
        let pcm = TryInto::<Stdio>::try_into(stdout)
            .context("Failed to hand arecord output to ffmpeg")?;

        let mut encoder = Command::new(&self.capture.ffmpeg_bin)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg("-")
            .args(codec_args(self.format, self.capture.bitrate_kbps))
            .arg("-ac")
            .arg("1")
            .arg(&request.output)
            .stdin(pcm)
            .stdout(Stdio::null())
            .stderr(self.stderr()?)
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn ffmpeg")?;

        let limit = request.duration + OVERRUN_SLACK;

        tokio::select! {
            status = encoder.wait() => {
                let encoder_status = status.context("Failed to wait for ffmpeg")?;
                let capture_status = capture.wait().await.context("Failed to wait for arecord")?;

                if !capture_status.success() {
                    anyhow::bail!("arecord exited with {}", capture_status);
                }
                if !encoder_status.success() {
                    anyhow::bail!("ffmpeg exited with {}", encoder_status);
                }
                Ok(RecordOutcome::Completed)
            }
            _ = cancel.cancelled() => {
                terminate(&mut capture, &mut encoder, self.grace).await;
                Ok(RecordOutcome::Interrupted)
            }
            _ = tokio::time::sleep(limit) => {
                let _ = capture.kill().await;
                let _ = encoder.kill().await;
                anyhow::bail!("Recording exceeded {:?}: {}", limit, request.output.display())
            }
        }
    }
}
