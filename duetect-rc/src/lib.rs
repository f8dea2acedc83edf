//! # Duetect Realtime Correlator (duetect-rc)
//!
//! Low-latency corroboration of detection streams from the two stations.
//! Subscribes to the detection event bus, buffers recent detections per
//! species, and emits a corroboration event as soon as both stations report
//! the same species within the matching window.

pub mod buffer;
pub mod cooldown;
pub mod correlator;
pub mod ingest;

pub use correlator::RealtimeCorrelator;
