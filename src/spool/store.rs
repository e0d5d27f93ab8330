//! Directory-backed spool of finished segments.
//!
//! The spool has no index: the set of matching files in the queue directory
//! *is* the queue. Listings tolerate files appearing or vanishing mid-scan,
//! since the recorder, the storage guard and upload workers all touch the
//! directory concurrently.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use super::claim::{Claim, ClaimSet};
use crate::domain::{Segment, SegmentNaming};

/// Errors that can occur with the spool
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("Segment no longer exists: {0}")]
    SourceMissing(PathBuf),

    #[error("Not a segment file name: {0}")]
    NotASegment(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpoolError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Listing order by modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

/// Spool of segments awaiting upload
#[derive(Debug, Clone)]
pub struct SpoolStore {
    /// Queue directory
    dir: PathBuf,

    /// Which file names belong to the spool
    naming: SegmentNaming,

    /// Segments currently being transferred
    claims: ClaimSet,
}

impl SpoolStore {
    /// Create a spool over an existing directory
    pub fn new(dir: PathBuf, naming: SegmentNaming) -> Self {
        Self {
            dir,
            naming,
            claims: ClaimSet::new(),
        }
    }

    /// Create the queue directory if needed and open the spool
    pub async fn open(dir: PathBuf, naming: SegmentNaming) -> Result<Self, SpoolError> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SpoolError::io(&dir, e))?;

        Ok(Self::new(dir, naming))
    }

    /// Get the queue directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn naming(&self) -> &SegmentNaming {
        &self.naming
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Move a finished segment into the queue directory
    pub async fn enroll(&self, segment_path: &Path) -> Result<Segment, SpoolError> {
        let file_name = segment_path
            .file_name()
            .filter(|_| self.naming.matches_path(segment_path))
            .ok_or_else(|| SpoolError::NotASegment(segment_path.to_path_buf()))?;

        let target = self.dir.join(file_name);
        if segment_path != target {
            move_file(segment_path, &target).await?;
        }

        let segment = Segment::from_path(&target)
            .await
            .map_err(|e| SpoolError::io(&target, e))?;

        tracing::info!("Queued for upload: {}", target.display());
        Ok(segment)
    }

    /// List matching entries sorted by modification time
    pub async fn list(&self, order: SortOrder) -> Result<Vec<Segment>, SpoolError> {
        let mut segments = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(segments),
            Err(e) => return Err(SpoolError::io(&self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SpoolError::io(&self.dir, e))?
        {
            let path = entry.path();
            if !self.naming.matches_path(&path) {
                continue;
            }

            // Entry may have been removed since read_dir saw it
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };

            segments.push(Segment {
                path,
                size: metadata.len(),
                modified,
            });
        }

        // Name breaks ties so listings are stable for equal mtimes
        segments.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        if order == SortOrder::NewestFirst {
            segments.reverse();
        }

        Ok(segments)
    }

    /// Delete an entry; an already-missing file is not an error
    pub async fn remove(&self, segment: &Segment) -> Result<(), SpoolError> {
        match fs::remove_file(&segment.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SpoolError::io(&segment.path, e)),
        }
    }

    /// Move an entry out of the spool into another directory
    pub async fn relocate(&self, segment: &Segment, dir: &Path) -> Result<PathBuf, SpoolError> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| SpoolError::io(dir, e))?;

        let target = dir.join(segment.name());
        move_file(&segment.path, &target).await?;
        Ok(target)
    }

    /// Sum of sizes of all matching entries
    pub async fn total_size(&self) -> Result<u64, SpoolError> {
        let segments = self.list(SortOrder::OldestFirst).await?;
        Ok(segments.iter().map(|s| s.size).sum())
    }

    /// Number of entries awaiting upload
    pub async fn len(&self) -> Result<usize, SpoolError> {
        Ok(self.list(SortOrder::OldestFirst).await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, SpoolError> {
        Ok(self.len().await? == 0)
    }

    /// Claim a segment for transfer; `None` if another worker owns it
    pub fn try_claim(&self, segment: &Segment) -> Option<Claim> {
        self.claims.try_claim(&segment.name())
    }

    pub fn is_claimed(&self, segment: &Segment) -> bool {
        self.claims.is_claimed(&segment.name())
    }
}

/// Rename a file, falling back to copy + delete across filesystems
async fn move_file(source: &Path, target: &Path) -> Result<(), SpoolError> {
    match fs::rename(source, target).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(SpoolError::SourceMissing(source.to_path_buf()))
        }
        Err(rename_err) => {
            if fs::metadata(source).await.is_err() {
                return Err(SpoolError::SourceMissing(source.to_path_buf()));
            }

            tracing::debug!(
                "Rename {} failed ({}), copying instead",
                source.display(),
                rename_err
            );
            fs::copy(source, target)
                .await
                .map_err(|e| SpoolError::io(target, e))?;
            fs::remove_file(source)
                .await
                .map_err(|e| SpoolError::io(source, e))?;
            Ok(())
        }
    }
}
