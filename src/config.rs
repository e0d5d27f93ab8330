//! Configuration for the arec daemon.
//!
//! Configuration sources (highest priority first):
//! 1. `--config <path>` on the command line
//! 2. `AREC_CONFIG` environment variable
//! 3. Config file in the user config directory (`<config_dir>/arec/config.yaml`)
//! 4. Built-in defaults
//!
//! `AREC_HOME` overrides `paths.home` regardless of where the file came from.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::uploader::{ExhaustedPolicy, RetryPolicy, UploadPolicy};
use crate::domain::{AudioFormat, SegmentNaming};

/// Environment variable pointing at a config file
pub const CONFIG_ENV: &str = "AREC_CONFIG";

/// Environment variable overriding the working directory
pub const HOME_ENV: &str = "AREC_HOME";

/// Invalid combinations of settings
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Schedule hour out of range (0-23): {0}")]
    HourOutOfRange(u32),

    #[error("Schedule start and end hour are both {0}: the window would never open")]
    EmptySchedule(u32),

    #[error("Segment prefix must not be empty")]
    EmptyPrefix,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Full configuration (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub segments: SegmentConfig,
    pub capture: CaptureConfig,
    pub cloud: CloudConfig,
    pub upload: UploadConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub shutdown: ShutdownConfig,

    /// Path to config file (if one was loaded)
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Working directory: in-progress segments, markers, log file
    pub home: PathBuf,
    /// Spool directory (relative to home unless absolute)
    pub pending: PathBuf,
    /// Quarantine directory for exhausted uploads (relative to home unless absolute)
    pub failed: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("/opt/arec_p"),
            pending: PathBuf::from("pending"),
            failed: PathBuf::from("failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub prefix: String,
    pub format: AudioFormat,
    /// Length of one recording (seconds)
    pub split_seconds: u64,
    /// Smaller files are treated as truncated
    pub min_viable_bytes: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            prefix: "REC".to_string(),
            format: AudioFormat::Opus,
            split_seconds: 1800,
            min_viable_bytes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: String,
    pub sample_format: String,
    pub sample_rate: u32,
    pub bitrate_kbps: u32,
    pub arecord_bin: String,
    pub ffmpeg_bin: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_format: "S24_3LE".to_string(),
            sample_rate: 48000,
            bitrate_kbps: 64,
            arecord_bin: "arecord".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// rclone target (`remote:/dir`); `null` disables uploading
    pub target: Option<String>,
    pub delete_after_upload: bool,
    pub on_exhausted: ExhaustedPolicy,
    pub rclone_bin: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            target: Some("yandex.disk:/Recordings".to_string()),
            delete_after_upload: true,
            on_exhausted: ExhaustedPolicy::Retain,
            rclone_bin: "rclone".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub fast: RetryPolicy,
    pub slow: RetryPolicy,
    pub max_parallel: usize,
    pub batch_size: usize,
    /// Push the whole selected batch through the pool instead of only `width` entries
    pub drain_whole_batch: bool,
    pub transfer_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            fast: RetryPolicy::fast(),
            slow: RetryPolicy::slow(),
            max_parallel: 3,
            batch_size: 10,
            drain_whole_batch: false,
            transfer_timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub probe_host: String,
    pub timeout_secs: u64,
    pub slow_threshold_ms: f64,
    pub speed_probe_count: u32,
    /// How often the upload queue is drained (seconds)
    pub check_interval_secs: u64,
    pub ping_bin: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_host: "8.8.8.8".to_string(),
            timeout_secs: 10,
            slow_threshold_ms: 100.0,
            speed_probe_count: 3,
            check_interval_secs: 180,
            ping_bin: "ping".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub max_mb: u64,
    /// Warn when the spool reaches this share of the budget
    pub warning_percent: u8,
    pub check_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_mb: 40960,
            warning_percent: 80,
            check_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
    pub poll_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: 6,
            end_hour: 22,
            poll_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 5 }
    }
}

impl Config {
    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.config_file = Some(path.to_path_buf());

        Ok(config)
    }

    /// Load configuration from all sources
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_file = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| {
                dirs::config_dir()
                    .map(|dir| dir.join("arec").join("config.yaml"))
                    .filter(|path| path.exists())
            });

        let mut config = match config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(home) = std::env::var(HOME_ENV) {
            config.paths.home = PathBuf::from(home);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segments.prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }

        for hour in [self.schedule.start_hour, self.schedule.end_hour] {
            if hour >= 24 {
                return Err(ConfigError::HourOutOfRange(hour));
            }
        }
        if self.schedule.enabled && self.schedule.start_hour == self.schedule.end_hour {
            return Err(ConfigError::EmptySchedule(self.schedule.start_hour));
        }

        if self.upload.max_parallel == 0 {
            return Err(ConfigError::Zero("upload.max_parallel"));
        }
        if self.upload.batch_size == 0 {
            return Err(ConfigError::Zero("upload.batch_size"));
        }
        if self.upload.fast.max_attempts == 0 || self.upload.slow.max_attempts == 0 {
            return Err(ConfigError::Zero("upload max_attempts"));
        }
        if self.segments.split_seconds == 0 {
            return Err(ConfigError::Zero("segments.split_seconds"));
        }

        Ok(())
    }

    /// Naming rules derived from the segment settings
    pub fn naming(&self) -> SegmentNaming {
        SegmentNaming::new(&self.segments.prefix, self.segments.format.extension())
    }

    /// Storage budget in bytes
    pub fn storage_budget(&self) -> u64 {
        self.storage.max_mb.saturating_mul(1024 * 1024)
    }

    /// Retry and pool settings for the uploader
    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            fast: self.upload.fast.clone(),
            slow: self.upload.slow.clone(),
            max_parallel: self.upload.max_parallel,
            batch_size: self.upload.batch_size,
            drain_whole_batch: self.upload.drain_whole_batch,
            delete_after_upload: self.cloud.delete_after_upload,
            on_exhausted: self.cloud.on_exhausted,
        }
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_secs)
    }

    /// Human-readable name of the upload destination
    pub fn cloud_name(&self) -> String {
        match self.cloud.target {
            Some(ref target) => target.clone(),
            None => "local storage".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_reference_values() {
        let config = Config::default();
        assert_eq!(config.upload.fast.max_attempts, 15);
        assert_eq!(config.upload.fast.retry_delay_secs, 300);
        assert_eq!(config.upload.slow.max_attempts, 5);
        assert_eq!(config.upload.slow.retry_delay_secs, 600);
        assert_eq!(config.upload.max_parallel, 3);
        assert_eq!(config.upload.batch_size, 10);
        assert_eq!(config.storage_budget(), 40960 * 1024 * 1024);
        assert_eq!(config.cloud.on_exhausted, ExhaustedPolicy::Retain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
paths:
  home: /var/lib/arec
segments:
  prefix: MIC
  format: mp3
cloud:
  target: null
  on_exhausted: quarantine
upload:
  slow:
    max_attempts: 2
    retry_delay_secs: 30
schedule:
  enabled: false
"#
        )
        .unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.paths.home, PathBuf::from("/var/lib/arec"));
        assert_eq!(config.paths.pending, PathBuf::from("pending"));
        assert_eq!(config.naming().glob(), "MIC_*.mp3");
        assert!(config.cloud.target.is_none());
        assert_eq!(config.cloud.on_exhausted, ExhaustedPolicy::Quarantine);
        assert_eq!(config.upload.slow.max_attempts, 2);
        // Untouched tier keeps its defaults
        assert_eq!(config.upload.fast.max_attempts, 15);
        assert!(!config.schedule.enabled);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.schedule.end_hour = 24;
        assert_eq!(config.validate(), Err(ConfigError::HourOutOfRange(24)));

        let mut config = Config::default();
        config.schedule.start_hour = 8;
        config.schedule.end_hour = 8;
        assert_eq!(config.validate(), Err(ConfigError::EmptySchedule(8)));

        // Equal hours are fine when the schedule is off
        config.schedule.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.upload.max_parallel = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero(_))));
    }
}
