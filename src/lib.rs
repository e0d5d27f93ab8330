//! arec - Audio capture daemon with a durable upload spool
//!
//! Records fixed-length audio segments on a schedule and offloads them to an
//! rclone remote, surviving flaky connectivity, small disks and restarts.
//!
//! # Architecture
//!
//! The spool directory is the single source of truth:
//! - Finished segments are uploaded immediately or enrolled into the spool
//! - Queue passes drain the spool with a retry budget set by link quality
//! - A storage guard evicts the oldest segments when the spool outgrows its budget
//! - A recovery scan reconciles leftovers after an unclean stop
//!
//! # Modules
//!
//! - `adapters`: External programs (arecord/ffmpeg, rclone, ping)
//! - `config`: Configuration file and on-disk layout
//! - `core`: Connectivity, uploader, schedule, shutdown, dispatcher
//! - `domain`: Segment naming and network classification
//! - `spool`: Spool store, claims, storage guard, recovery scan
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the daemon
//! arec run
//!
//! # Inspect the queue
//! arec status
//!
//! # Drain one batch by hand
//! arec flush
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod spool;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use core::{ConnectivityMonitor, Daemon, Uploader};
pub use domain::{NetworkClass, Segment, SegmentNaming};
pub use spool::{RecoveryScan, SpoolStore, StorageGuard};
