//! Per-species detection window buffer
//!
//! Holds recent detections grouped by species so the correlator can find a
//! cross-station partner in O(bucket) time. All time arithmetic uses the
//! detection timestamps supplied by the stations, never the local wall clock,
//! so behavior is deterministic under replay.

use chrono::{DateTime, Utc};
use duetect_common::db::models::Detection;
use std::collections::HashMap;

/// Detections from the last window, grouped by scientific name.
///
/// Eviction keeps entries aged exactly `window_secs`, so a pair spaced at
/// precisely the window boundary still matches; one second past it does not.
pub struct DetectionWindowBuffer {
    window_secs: f64,
    by_species: HashMap<String, Vec<Detection>>,
}

impl DetectionWindowBuffer {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            by_species: HashMap::new(),
        }
    }

    fn age_secs(older: DateTime<Utc>, newer: DateTime<Utc>) -> f64 {
        (newer - older).num_milliseconds() as f64 / 1000.0
    }

    /// True if the buffer already holds a detection of this species from the
    /// same station within `burst_window_secs` of `now`. Used to suppress
    /// duplicate events from one station re-detecting an ongoing call.
    pub fn recent_same_station(
        &self,
        species: &str,
        station: &str,
        now: DateTime<Utc>,
        burst_window_secs: f64,
    ) -> bool {
        self.by_species
            .get(species)
            .map(|bucket| {
                bucket.iter().any(|d| {
                    d.station == station && Self::age_secs(d.timestamp, now).abs() < burst_window_secs
                })
            })
            .unwrap_or(false)
    }

    /// Add a detection, evicting entries of the same species older than the
    /// window relative to `now`
    pub fn add(&mut self, detection: Detection, now: DateTime<Utc>) {
        let bucket = self
            .by_species
            .entry(detection.scientific_name.clone())
            .or_default();
        bucket.retain(|d| Self::age_secs(d.timestamp, now) <= self.window_secs);
        bucket.push(detection);
    }

    /// Find the closest-in-time cross-station pair for a species, if one
    /// exists within the window. Returns (station A detection, station B
    /// detection) as clones; the buffer is not modified.
    pub fn check_dual(&self, species: &str) -> Option<(Detection, Detection)> {
        let bucket = self.by_species.get(species)?;

        let mut best: Option<(f64, &Detection, &Detection)> = None;
        for a in bucket.iter().filter(|d| d.station == "A") {
            for b in bucket.iter().filter(|d| d.station == "B") {
                let diff = Self::age_secs(a.timestamp, b.timestamp).abs();
                if diff > self.window_secs {
                    continue;
                }
                if best.map(|(d, _, _)| diff < d).unwrap_or(true) {
                    best = Some((diff, a, b));
                }
            }
        }

        best.map(|(_, a, b)| (a.clone(), b.clone()))
    }

    /// Drop all buffered detections for a species. Called after a pair is
    /// handled (emitted or suppressed); whatever remains would only produce
    /// echoes of the same acoustic event.
    pub fn mark_processed(&mut self, species: &str) {
        self.by_species.remove(species);
    }

    /// Evict stale entries across all species and drop empty buckets
    pub fn cleanup_all(&mut self, now: DateTime<Utc>) {
        for bucket in self.by_species.values_mut() {
            bucket.retain(|d| Self::age_secs(d.timestamp, now) <= self.window_secs);
        }
        self.by_species.retain(|_, bucket| !bucket.is_empty());
    }

    /// Total buffered detections across all species
    pub fn len(&self) -> usize {
        self.by_species.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
