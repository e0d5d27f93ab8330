//! rclone transfer client.
//!
//! `rclone copy <file> <remote:/dir>` is idempotent, so retries are safe.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;

use super::{ensure_success, output_with_timeout, TransferClient};

/// Transfer client backed by the `rclone` binary
pub struct RcloneClient {
    /// Path to the rclone binary (default: "rclone")
    binary_path: String,

    /// Upper bound on a single copy
    transfer_timeout: Duration,
}

impl Default for RcloneClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RcloneClient {
    pub fn new() -> Self {
        Self::with_binary_path("rclone")
    }

    /// Create a client with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            transfer_timeout: Duration::from_secs(3600),
        }
    }

    pub fn with_transfer_timeout(mut self, transfer_timeout: Duration) -> Self {
        self.transfer_timeout = transfer_timeout;
        self
    }
}

/// Remote name of an rclone target (`remote:/dir` → `remote:`)
pub fn remote_of(target: &str) -> String {
    let remote = target.split(':').next().unwrap_or(target);
    format!("{}:", remote)
}

#[async_trait]
impl TransferClient for RcloneClient {
    fn name(&self) -> &str {
        "rclone"
    }

    async fn transfer(&self, path: &Path, target: &str) -> Result<()> {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("copy")
            .arg(path)
            .arg(target)
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let output = output_with_timeout(&mut command, self.transfer_timeout).await?;
        ensure_success("rclone copy", &output)
    }

    async fn check_remote(&self, target: &str, timeout: Duration) -> Result<()> {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("about")
            .arg(remote_of(target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let output = output_with_timeout(&mut command, timeout).await?;
        ensure_success("rclone about", &output)
    }
}
