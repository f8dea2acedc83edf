//! Realtime correlation engine
//!
//! Consumes detection events from the bus, persists them, and emits a
//! corroboration event as soon as both stations report the same species
//! within the matching window. Storage failures degrade the pipeline (logged,
//! detection still correlated in memory) rather than stopping it; the batch
//! reconciler repairs any resulting gaps.

use crate::buffer::DetectionWindowBuffer;
use crate::cooldown::CooldownTracker;
use chrono::Utc;
use duetect_common::db::models::{Detection, DualDetection};
use duetect_common::db::queries;
use duetect_common::events::{DetectionEvent, DuetectEvent, EventBus};
use duetect_common::verifier::BayesianVerifier;
use duetect_common::{CorrelatorParams, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the correlator did with one inbound detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// Dropped: failed validation
    Invalid,
    /// Dropped: below the minimum display confidence
    BelowThreshold,
    /// Dropped: duplicate of a same-station detection inside the burst window
    BurstSuppressed,
    /// Buffered; no cross-station partner yet
    Buffered,
    /// Pair found but the species is on emission cooldown
    CooldownSuppressed,
    /// Pair found, recorded and emitted
    Corroborated,
    /// Pair found but a corroboration already references one of its members
    AlreadyRecorded,
    /// Pair found but the corroboration record could not be stored
    StoreFailed,
}

pub struct RealtimeCorrelator {
    pool: SqlitePool,
    params: CorrelatorParams,
    verifier: Arc<BayesianVerifier>,
    bus: EventBus,
    buffer: DetectionWindowBuffer,
    cooldowns: CooldownTracker,
    /// Latest detection timestamp seen; housekeeping time base
    stream_time: Option<chrono::DateTime<Utc>>,
}

impl RealtimeCorrelator {
    pub fn new(
        pool: SqlitePool,
        params: CorrelatorParams,
        verifier: Arc<BayesianVerifier>,
        bus: EventBus,
    ) -> Result<Self> {
        params.validate()?;
        let buffer = DetectionWindowBuffer::new(params.window_secs);
        let cooldowns = CooldownTracker::new(params.cooldown_secs);
        Ok(Self {
            pool,
            params,
            verifier,
            bus,
            buffer,
            cooldowns,
            stream_time: None,
        })
    }

    /// Consume detection events until cancelled or the bus closes.
    ///
    /// Housekeeping (buffer eviction, cooldown pruning) runs on its own
    /// interval inside the same loop, so no locking is needed around the
    /// buffer state.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut rx = self.bus.subscribe();
        let mut housekeeping =
            tokio::time::interval(Duration::from_secs(self.params.housekeeping_interval_secs));
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Realtime correlator running (window {}s, min confidence {}, cooldown {}s)",
            self.params.window_secs, self.params.min_confidence, self.params.cooldown_secs
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Realtime correlator shutting down");
                    break;
                }
                result = rx.recv() => match result {
                    Ok(DuetectEvent::Detection { event, .. }) => {
                        self.handle_detection(event).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Correlator lagged behind the event bus, {} events dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event bus closed, correlator stopping");
                        break;
                    }
                },
                _ = housekeeping.tick() => {
                    self.housekeep();
                }
            }
        }
    }

    /// Process one inbound detection end to end.
    ///
    /// Time arithmetic uses the detection timestamp, not the wall clock, so
    /// replayed streams behave identically to live ones.
    pub async fn handle_detection(&mut self, event: DetectionEvent) -> DetectionOutcome {
        if let Err(e) = event.validate() {
            warn!("Dropping malformed detection event: {}", e);
            return DetectionOutcome::Invalid;
        }
        if event.confidence < self.params.min_confidence {
            debug!(
                "Dropping {} at {:.2} (below {:.2})",
                event.scientific_name, event.confidence, self.params.min_confidence
            );
            return DetectionOutcome::BelowThreshold;
        }

        let now = event.timestamp;
        self.stream_time = Some(self.stream_time.map_or(now, |t| t.max(now)));
        let species = event.scientific_name.clone();

        if self.buffer.recent_same_station(
            &species,
            event.station.as_str(),
            now,
            self.params.burst_window_secs,
        ) {
            debug!(
                "Burst-suppressed {} from station {}",
                species, event.station
            );
            return DetectionOutcome::BurstSuppressed;
        }

        let detection = Detection {
            guid: Uuid::new_v4().to_string(),
            station: event.station.as_str().to_string(),
            scientific_name: event.scientific_name.clone(),
            common_name: event.species.clone(),
            timestamp: event.timestamp,
            confidence: event.confidence,
            source_file: event.source_file.clone(),
            corroborated: false,
            corroborated_by_other_station: false,
        };

        if let Err(e) = queries::insert_detection(&self.pool, &detection).await {
            warn!(
                "Failed to persist detection {} ({}): {}",
                detection.guid, species, e
            );
        }

        self.buffer.add(detection, now);

        let Some((a, b)) = self.buffer.check_dual(&species) else {
            return DetectionOutcome::Buffered;
        };

        if self.cooldowns.is_active(&species, now) {
            debug!("Cooldown active for {}, suppressing emission", species);
            // Not emitted now; the batch reconciler records the pair later
            self.buffer.mark_processed(&species);
            return DetectionOutcome::CooldownSuppressed;
        }

        let time_diff_seconds =
            (b.timestamp - a.timestamp).num_milliseconds().abs() as f64 / 1000.0;
        let score = match self.verifier.dual_verification_score(
            &species,
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

        let record = DualDetection::from_pair(&a, &b, score, true);
        let outcome = match queries::insert_dual_detection(&self.pool, &record).await {
            Ok(true) => {
                if let Err(e) = queries::mark_pair_corroborated(&self.pool, &a.guid, &b.guid).await
                {
                    warn!("Failed to flag member detections of {}: {}", record.guid, e);
                }
                info!(
                    "Corroborated {} (dt {:.1}s, score {:.3})",
                    species, time_diff_seconds, score
                );
                self.bus.emit_lossy(DuetectEvent::Corroboration {
                    event: record.to_event(),
                    timestamp: Utc::now(),
                });
                self.cooldowns.mark_emitted(&species, now);
                DetectionOutcome::Corroborated
            }
            Ok(false) => {
                debug!("Pair for {} already recorded", species);
                DetectionOutcome::AlreadyRecorded
            }
            Err(e) => {
                warn!("Failed to store corroboration for {}: {}", species, e);
                DetectionOutcome::StoreFailed
            }
        };

        self.buffer.mark_processed(&species);
        outcome
    }

    /// Evict stale buffer entries and expired cooldowns.
    ///
    /// Ages against stream time (the latest detection timestamp seen), not
    /// the wall clock, so a stream that lags real time (chunked classifiers,
    /// replays) never has in-window detections or active cooldowns expired
    /// early. Before the first detection there is no stream time and nothing
    /// to expire against, so the wall clock stands in.
    pub fn housekeep(&mut self) {
        let now = self.stream_time.unwrap_or_else(Utc::now);
        self.buffer.cleanup_all(now);
        self.cooldowns.prune(now);
        debug!(
            "Housekeeping: {} buffered detections, {} active cooldowns",
            self.buffer.len(),
            self.cooldowns.len()
        );
    }

    /// Number of detections currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
