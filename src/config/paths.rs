//! Canonical on-disk layout of the daemon.
//!
//! Single source of truth - import this instead of joining paths by hand.
//!
//! ## Layout
//!
//! | Location | Purpose |
//! |----------|---------|
//! | `<home>/` | Segments being recorded, `.recording` markers, log file |
//! | `<home>/pending/` | Spool of finished segments awaiting upload |
//! | `<home>/failed/` | Quarantined segments (only with `on_exhausted: quarantine`) |
//! | `<home>/arec.log` | Log file (daemon mode) |
//! | `<home>/arec.lock` | Single-instance lock |

use std::path::{Path, PathBuf};

use super::Config;

/// Log file name inside the home directory
pub const LOG_FILE: &str = "arec.log";

/// Lock file name inside the home directory
pub const LOCK_FILE: &str = "arec.lock";

/// Resolved absolute layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub home: PathBuf,
    pub pending: PathBuf,
    pub failed: PathBuf,
}

impl Layout {
    /// Resolve the layout from configuration
    pub fn from_config(config: &Config) -> Self {
        let home = config.paths.home.clone();
        Self {
            pending: resolve(&home, &config.paths.pending),
            failed: resolve(&home, &config.paths.failed),
            home,
        }
    }

    /// Default layout rooted at an arbitrary directory
    pub fn rooted_at(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            pending: home.join("pending"),
            failed: home.join("failed"),
            home,
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.home.join(LOG_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.home.join(LOCK_FILE)
    }
}

/// Resolve a path that may be relative to the home directory
fn resolve(home: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}
