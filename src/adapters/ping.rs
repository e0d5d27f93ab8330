//! ICMP probes through the system `ping` binary.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::{ensure_success, output_with_timeout, NetworkProbe};

/// Probe a well-known host with `ping`
pub struct PingProbe {
    binary_path: String,
    host: String,
}

impl PingProbe {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            binary_path: "ping".to_string(),
            host: host.into(),
        }
    }

    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    fn command(&self, count: u32, timeout: Duration) -> Command {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-c")
            .arg(count.to_string())
            .arg("-W")
            .arg(timeout.as_secs().max(1).to_string())
            .arg(&self.host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl NetworkProbe for PingProbe {
    async fn reach(&self, timeout: Duration) -> Result<()> {
        let mut command = self.command(1, timeout);
        // -W bounds each reply; the extra second covers process startup
        let output = output_with_timeout(&mut command, timeout + Duration::from_secs(1)).await?;
        ensure_success("ping", &output)
    }

    async fn round_trip(&self, count: u32, timeout: Duration) -> Result<f64> {
        let mut command = self.command(count, timeout);
        let limit = timeout * count.max(1) + Duration::from_secs(1);
        let output = output_with_timeout(&mut command, limit).await?;
        ensure_success("ping", &output)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_average_rtt(&stdout).context("Failed to parse ping summary")
    }
}

/// Extract the average round-trip (ms) from a ping summary line.
///
/// Handles both `rtt min/avg/max/mdev = a/b/c/d ms` (iputils) and
/// `round-trip min/avg/max/stddev = a/b/c/d ms` (BSD, busybox).
pub fn parse_average_rtt(output: &str) -> Option<f64> {
    output
        .lines()
        .filter(|line| line.contains("min/avg/max"))
        .find_map(|line| {
            let values = line.split('=').nth(1)?;
            values.trim().split('/').nth(1)?.trim().parse::<f64>().ok()
        })
}
