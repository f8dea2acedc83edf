//! # Duetect Batch Reconciler (duetect-br)
//!
//! Periodic sweep over stored detections that pairs everything the realtime
//! path missed (downtime, cooldown suppression, degraded storage) and can
//! rescore existing corroboration records after model tuning. Safe to run
//! repeatedly; every operation is idempotent at the storage level.

pub mod reconciler;

pub use reconciler::{BatchReconciler, ReconcileSummary, RescoreSummary};
