//! Domain types for the arec daemon.
//!
//! This module contains the core data structures:
//! - Segment: A finished audio capture unit and its naming convention
//! - NetworkClass: Coarse link quality bucket driving the retry policy

pub mod network;
pub mod segment;

// Re-export commonly used types
pub use network::NetworkClass;
pub use segment::{AudioFormat, Segment, SegmentNaming, MARKER_SUFFIX};
