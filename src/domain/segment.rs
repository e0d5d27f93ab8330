//! Segments and their on-disk naming convention.
//!
//! A segment is named `<prefix>_<YYYYMMDD_HHMMSS>.<ext>`. While the recorder
//! is writing it, a marker file with the extra `.recording` suffix sits next
//! to it.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::NaiveDateTime;
use glob::Pattern;
use serde::{Deserialize, Serialize};

/// Suffix appended to a segment path to mark an in-progress recording
pub const MARKER_SUFFIX: &str = "recording";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Output container/codec of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Opus,
    Aac,
    Mp3,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::Opus
    }
}

impl AudioFormat {
    /// File extension used for segments of this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
        }
    }
}

/// Naming rules shared by the recorder, the spool and the recovery scan
#[derive(Debug, Clone)]
pub struct SegmentNaming {
    prefix: String,
    extension: String,
    pattern: Pattern,
}

impl SegmentNaming {
    /// Create naming rules for a prefix and extension (without the dot)
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let extension = extension.into();
        let glob = format!(
            "{}_*.{}",
            Pattern::escape(&prefix),
            Pattern::escape(&extension)
        );
        // Both parts are escaped, so the pattern is always valid
        let pattern = Pattern::new(&glob).unwrap_or_default();

        Self {
            prefix,
            extension,
            pattern,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Glob pattern matching every segment file name
    pub fn glob(&self) -> &str {
        self.pattern.as_str()
    }

    /// Build the file name for a segment started at `at`
    pub fn file_name(&self, at: NaiveDateTime) -> String {
        format!(
            "{}_{}.{}",
            self.prefix,
            at.format(TIMESTAMP_FORMAT),
            self.extension
        )
    }

    /// Check whether a file name follows the segment pattern
    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern.matches(file_name)
    }

    /// Check whether a path's file name follows the segment pattern
    pub fn matches_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| self.matches(n))
            .unwrap_or(false)
    }

    /// Recover the creation timestamp encoded in a segment name
    pub fn timestamp(&self, file_name: &str) -> Option<NaiveDateTime> {
        let stem = file_name
            .strip_prefix(&self.prefix)?
            .strip_prefix('_')?
            .strip_suffix(&self.extension)?
            .strip_suffix('.')?;

        NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT).ok()
    }

    /// In-progress marker path for a segment path
    pub fn marker_path(segment_path: &Path) -> PathBuf {
        let mut os = segment_path.as_os_str().to_owned();
        os.push(".");
        os.push(MARKER_SUFFIX);
        PathBuf::from(os)
    }

    /// Check whether a path is an in-progress marker
    pub fn is_marker(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == MARKER_SUFFIX)
            .unwrap_or(false)
    }
}

/// A finished segment as observed on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Current location of the file
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,
}

impl Segment {
    /// Stat a file into a segment
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// File name only
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}
