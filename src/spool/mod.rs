//! Durable on-disk spool of segments awaiting upload.
//!
//! 1. **Store**: Directory-backed ordered set of finished segments
//! 2. **Claim**: In-memory exclusive ownership of a segment during transfer
//! 3. **Guard**: Byte-budget enforcement by oldest-first eviction
//! 4. **Recovery**: Startup reconciliation of leftovers from an unclean stop
//!
//! ```text
//! recorder → <home>/REC_*.opus ──enroll──→ <home>/pending/ ──claim──→ uploader
//!                  ↑                              ↓
//!            recovery scan                 storage guard (evict oldest)
//! ```

pub mod claim;
pub mod guard;
pub mod recovery;
pub mod store;

// Re-export key types
pub use claim::{Claim, ClaimSet};
pub use guard::{EvictionReport, StorageGuard};
pub use recovery::{clear_markers, RecoveryReport, RecoveryScan};
pub use store::{SortOrder, SpoolError, SpoolStore};
