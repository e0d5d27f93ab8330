//! Exclusive in-flight ownership of segments.
//!
//! Two trigger paths (post-recording upload and the periodic queue pass) can
//! select the same segment. A worker must hold a [`Claim`] for a segment before
//! transferring it; the claim is released when the guard is dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Set of segment names currently owned by a worker
#[derive(Debug, Clone, Default)]
pub struct ClaimSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a segment by file name; `None` if another worker holds it
    pub fn try_claim(&self, name: &str) -> Option<Claim> {
        let mut claimed = self.lock();
        if !claimed.insert(name.to_string()) {
            return None;
        }

        Some(Claim {
            name: name.to_string(),
            set: self.clone(),
        })
    }

    pub fn is_claimed(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    /// Number of segments currently claimed
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // A panic while holding the lock cannot leave the set half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ownership of one segment; released on drop
#[derive(Debug)]
pub struct Claim {
    name: String,
    set: ClaimSet,
}

impl Claim {
    /// Name of the claimed segment
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.set.lock().remove(&self.name);
    }
}
