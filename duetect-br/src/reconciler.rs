//! Batch reconciliation
//!
//! Pairs unmatched detections across the two stations using the same window
//! and scoring as the realtime path. Pairing is greedy by ascending time
//! difference within each species: the tightest pair wins, each detection is
//! consumed by at most one pair, and re-runs over the same data insert
//! nothing new.

use duetect_common::db::models::{Detection, DualDetection};
use duetect_common::db::queries;
use duetect_common::events::Station;
use duetect_common::verifier::BayesianVerifier;
use duetect_common::{CorrelatorParams, Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters from one reconciliation sweep
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileSummary {
    /// Unmatched detections examined
    pub candidates: usize,
    /// New corroboration records inserted
    pub pairs_inserted: usize,
    /// Pairs found but already present in storage
    pub skipped_existing: usize,
    /// Detections flagged as corroborated
    pub detections_marked: u64,
}

/// Counters from one rescoring sweep
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RescoreSummary {
    /// Corroboration records examined
    pub examined: usize,
    /// Records whose stored score changed
    pub updated: usize,
}

pub struct BatchReconciler {
    pool: SqlitePool,
    params: CorrelatorParams,
    verifier: Arc<BayesianVerifier>,
    running: AtomicBool,
}

/// Clears the single-flight flag when a sweep exits, on any path
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BatchReconciler {
    pub fn new(
        pool: SqlitePool,
        params: CorrelatorParams,
        verifier: Arc<BayesianVerifier>,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            pool,
            params,
            verifier,
            running: AtomicBool::new(false),
        })
    }

    fn acquire_sweep(&self) -> Result<SweepGuard<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Internal("a sweep is already in progress".into()));
        }
        Ok(SweepGuard(&self.running))
    }

    /// One full reconciliation sweep.
    ///
    /// Only one sweep runs at a time; a concurrent call fails immediately
    /// instead of queueing.
    pub async fn run(&self) -> Result<ReconcileSummary> {
        let _guard = self.acquire_sweep()?;

        let unmatched = queries::fetch_unmatched_detections(&self.pool, self.params.min_confidence)
            .await?;
        let mut summary = ReconcileSummary {
            candidates: unmatched.len(),
            ..Default::default()
        };

        let mut by_species: HashMap<&str, Vec<&Detection>> = HashMap::new();
        for detection in &unmatched {
            by_species
                .entry(detection.scientific_name.as_str())
                .or_default()
                .push(detection);
        }

        for (species, detections) in by_species {
            self.reconcile_species(species, &detections, &mut summary)
                .await?;
        }

        match serde_json::to_string(&summary) {
            Ok(json) => info!("Reconciliation complete: {}", json),
            Err(e) => warn!("Reconciliation complete (summary unserializable: {})", e),
        }
        Ok(summary)
    }

    /// Pair one species' unmatched detections, tightest time difference first
    async fn reconcile_species(
        &self,
        species: &str,
        detections: &[&Detection],
        summary: &mut ReconcileSummary,
    ) -> Result<()> {
        // Parse through the model accessor; a corrupt station value drops
        // the row from pairing instead of mispairing it
        let station_a: Vec<&Detection> = detections
            .iter()
            .copied()
            .filter(|d| d.station() == Some(Station::A))
            .collect();
        let station_b: Vec<&Detection> = detections
            .iter()
            .copied()
            .filter(|d| d.station() == Some(Station::B))
            .collect();
        if station_a.is_empty() || station_b.is_empty() {
            return Ok(());
        }

        // All in-window candidate pairs, ordered by ascending time difference;
        // ties broken by timestamp so re-runs pick the same pairs
        let mut candidates: Vec<(i64, &Detection, &Detection)> = Vec::new();
        for a in &station_a {
            for b in &station_b {
                let diff_ms = (b.timestamp - a.timestamp).num_milliseconds().abs();
                if diff_ms as f64 / 1000.0 <= self.params.window_secs {
                    candidates.push((diff_ms, a, b));
                }
            }
        }
        candidates.sort_by_key(|(diff_ms, a, b)| (*diff_ms, a.timestamp, b.timestamp));

        let mut consumed: HashSet<&str> = HashSet::new();
        for (diff_ms, a, b) in candidates {
            if consumed.contains(a.guid.as_str()) || consumed.contains(b.guid.as_str()) {
                continue;
            }
            consumed.insert(a.guid.as_str());
            consumed.insert(b.guid.as_str());

            let time_diff_seconds = diff_ms as f64 / 1000.0;
            let score = match self.verifier.dual_verification_score(
                species,
                a.confidence,
                b.confidence,
                time_diff_seconds,
            ) {
                Ok(score) => score,
                Err(e) => {
                    warn!(
                        "Verifier degraded for {}: {}; using mean confidence",
                        species, e
                    );
                    ((a.confidence + b.confidence) / 2.0).clamp(0.0, 1.0)
                }
            };

            let record = DualDetection::from_pair(a, b, score, false);
            let inserted = queries::insert_dual_detection(&self.pool, &record).await?;
            if inserted {
                debug!(
                    "Paired {} (dt {:.1}s, score {:.3})",
                    species, time_diff_seconds, score
                );
                summary.pairs_inserted += 1;
            } else {
                debug!("Pair for {} already recorded", species);
                summary.skipped_existing += 1;
            }
            // Flag the members either way; a record may exist from a sweep
            // that died before flagging them
            summary.detections_marked +=
                queries::mark_pair_corroborated(&self.pool, &a.guid, &b.guid).await?;
        }

        Ok(())
    }

    /// Recompute every stored verification score with the current model.
    ///
    /// Run after tuning settings or when enough history has accumulated to
    /// shift the statistics. Pairings are never changed, only scores.
    pub async fn recompute_all(&self) -> Result<RescoreSummary> {
        let _guard = self.acquire_sweep()?;

        let records = queries::fetch_dual_detections(&self.pool).await?;
        let mut summary = RescoreSummary {
            examined: records.len(),
            ..Default::default()
        };

        for record in &records {
            let score = match self.verifier.dual_verification_score(
                &record.scientific_name,
                record.station_a_confidence,
                record.station_b_confidence,
                record.time_diff_seconds,
            ) {
                Ok(score) => score,
                Err(e) => {
                    warn!(
                        "Verifier degraded for {}: {}; keeping stored score",
                        record.scientific_name, e
                    );
                    continue;
                }
            };

            if (score - record.verification_score).abs() > 1e-9 {
                queries::update_verification_score(&self.pool, &record.guid, score).await?;
                summary.updated += 1;
            }
        }

        match serde_json::to_string(&summary) {
            Ok(json) => info!("Rescoring complete: {}", json),
            Err(e) => warn!("Rescoring complete (summary unserializable: {})", e),
        }
        Ok(summary)
    }
}
