//! Core daemon logic.
//!
//! This module contains:
//! - Connectivity: Reachability probe and speed classification
//! - Uploader: Retry policy and bounded-parallel queue passes
//! - Capture: Recording under a marker and post-recording hand-off
//! - Schedule: Recording window gate
//! - Shutdown: Signal-driven cooperative stop
//! - Daemon: Timer-driven event dispatcher

pub mod capture;
pub mod connectivity;
pub mod daemon;
pub mod schedule;
pub mod shutdown;
pub mod uploader;

// Re-export commonly used types
pub use capture::{capture_segment, Handoff, HandoffOutcome};
pub use connectivity::ConnectivityMonitor;
pub use daemon::{storage_guard, Collaborators, Daemon};
pub use schedule::{ScheduleGate, ScheduleState, ScheduleWindow, Transition};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use uploader::{
    BatchReport, ExhaustedPolicy, RetryPolicy, UploadOutcome, UploadPolicy, Uploader,
};
