//! Recording one segment and handing it off afterwards.
//!
//! While the recorder runs, a `<segment>.recording` marker holding the start
//! time sits next to the output. A finished segment is uploaded right away
//! when the remote is reachable, otherwise it is enrolled into the spool.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::uploader::{UploadOutcome, Uploader};
use crate::adapters::{RecordOutcome, RecordRequest, Recorder};
use crate::domain::{Segment, SegmentNaming};
use crate::spool::SpoolStore;

/// Run the recorder for one segment under an in-progress marker
pub async fn capture_segment(
    recorder: &dyn Recorder,
    request: &RecordRequest,
    cancel: CancellationToken,
) -> Result<RecordOutcome> {
    let marker = SegmentNaming::marker_path(&request.output);
    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    fs::write(&marker, format!("{} - recording started\n", stamp))
        .await
        .with_context(|| format!("Failed to write marker: {}", marker.display()))?;

    let result = recorder.record(request, cancel).await;

    // The marker goes regardless of how the recording ended
    if let Err(e) = fs::remove_file(&marker).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!("Failed to remove marker {}: {}", marker.display(), e);
        }
    }

    result
}

/// What happened to a freshly recorded segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// The file was not there
    Missing,

    /// Too small to be a real recording; deleted
    Discarded,

    /// Uploaded straight away
    Uploaded,

    /// Moved into the spool for a later pass
    Queued,
}

/// Routes finished segments to the uploader or the spool
#[derive(Clone)]
pub struct Handoff {
    store: SpoolStore,

    /// `None` when no remote is configured
    uploader: Option<Uploader>,

    min_viable_bytes: u64,
}

impl Handoff {
    pub fn new(store: SpoolStore, uploader: Option<Uploader>, min_viable_bytes: u64) -> Self {
        Self {
            store,
            uploader,
            min_viable_bytes,
        }
    }

    /// Upload, enroll or discard a segment the recorder just produced
    pub async fn handle_finished(&self, path: &Path) -> Result<HandoffOutcome> {
        let segment = match Segment::from_path(path).await {
            Ok(segment) => segment,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HandoffOutcome::Missing),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", path.display()))
            }
        };

        if segment.size < self.min_viable_bytes {
            self.store.remove(&segment).await?;
            tracing::warn!(
                "File too small ({} bytes), deleted: {}",
                segment.size,
                path.display()
            );
            return Ok(HandoffOutcome::Discarded);
        }

        if let Some(ref uploader) = self.uploader {
            match uploader.upload_one(&segment).await {
                UploadOutcome::Uploaded => return Ok(HandoffOutcome::Uploaded),
                UploadOutcome::Missing => return Ok(HandoffOutcome::Missing),
                outcome => tracing::debug!("Direct upload of {} ended with {:?}", segment.name(), outcome),
            }
        }

        self.store.enroll(path).await?;
        Ok(HandoffOutcome::Queued)
    }
}
