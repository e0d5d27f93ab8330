//! Reachability and coarse speed classification of the uplink.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{NetworkProbe, TransferClient};
use crate::config::Config;
use crate::domain::NetworkClass;

/// Tests whether uploads can happen and how hard to try
pub struct ConnectivityMonitor {
    probe: Arc<dyn NetworkProbe>,
    transfer: Arc<dyn TransferClient>,

    /// Remote target; `None` means uploads are disabled
    target: Option<String>,

    timeout: Duration,
    slow_threshold_ms: f64,
    speed_probe_count: u32,
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn NetworkProbe>,
        transfer: Arc<dyn TransferClient>,
        target: Option<String>,
    ) -> Self {
        Self {
            probe,
            transfer,
            target,
            timeout: Duration::from_secs(10),
            slow_threshold_ms: 100.0,
            speed_probe_count: 3,
        }
    }

    /// Build a monitor from the `network` and `cloud` sections
    pub fn from_config(
        config: &Config,
        probe: Arc<dyn NetworkProbe>,
        transfer: Arc<dyn TransferClient>,
    ) -> Self {
        Self::new(probe, transfer, config.cloud.target.clone())
            .with_timeout(config.network_timeout())
            .with_slow_threshold_ms(config.network.slow_threshold_ms)
            .with_speed_probe_count(config.network.speed_probe_count)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_slow_threshold_ms(mut self, slow_threshold_ms: f64) -> Self {
        self.slow_threshold_ms = slow_threshold_ms;
        self
    }

    pub fn with_speed_probe_count(mut self, speed_probe_count: u32) -> Self {
        self.speed_probe_count = speed_probe_count.max(1);
        self
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Both the public internet and the configured remote answer.
    ///
    /// Without a remote there is nothing to reach, so this is `true`.
    pub async fn check_reachable(&self) -> bool {
        let Some(ref target) = self.target else {
            return true;
        };

        if let Err(e) = self.probe.reach(self.timeout).await {
            tracing::debug!("Internet probe failed: {:#}", e);
            return false;
        }

        // Remote listing is slower than an echo request
        if let Err(e) = self.transfer.check_remote(target, self.timeout * 2).await {
            tracing::debug!("Remote probe for {} failed: {:#}", target, e);
            return false;
        }

        true
    }

    /// Classify the link by average round-trip time
    pub async fn classify_speed(&self) -> NetworkClass {
        match self.probe.round_trip(self.speed_probe_count, self.timeout).await {
            Ok(avg_ms) => {
                let class = NetworkClass::from_round_trip(avg_ms, self.slow_threshold_ms);
                tracing::debug!("Average round-trip {:.1} ms: {} network", avg_ms, class);
                class
            }
            Err(e) => {
                tracing::debug!("Speed probe failed: {:#}", e);
                NetworkClass::Unknown
            }
        }
    }
}
