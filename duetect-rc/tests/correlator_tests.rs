//! End-to-end correlator tests against a real on-disk SQLite database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use duetect_common::db::{init_database, queries};
use duetect_common::events::{DetectionEvent, EventBus, Station};
use duetect_common::stats::SpeciesStatisticsModel;
use duetect_common::verifier::BayesianVerifier;
use duetect_common::{CorrelatorParams, VerifierParams};
use duetect_rc::correlator::{DetectionOutcome, RealtimeCorrelator};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

const OWL: &str = "Strix varia";

async fn setup() -> (TempDir, SqlitePool, RealtimeCorrelator, EventBus) {
    let dir = TempDir::new().expect("create temp dir");
    let pool = init_database(&dir.path().join("duetect.db"))
        .await
        .expect("init database");

    let verifier_params = VerifierParams::default();
    let stats = Arc::new(SpeciesStatisticsModel::new(verifier_params.clone()));
    let verifier = Arc::new(BayesianVerifier::new(verifier_params, stats).unwrap());
    let bus = EventBus::new(64);
    let correlator = RealtimeCorrelator::new(
        pool.clone(),
        CorrelatorParams::default(),
        verifier,
        bus.clone(),
    )
    .unwrap();

    (dir, pool, correlator, bus)
}

fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 4, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

fn event(station: Station, offset_secs: i64, confidence: f64) -> DetectionEvent {
    DetectionEvent {
        species: "Barred Owl".to_string(),
        scientific_name: OWL.to_string(),
        confidence,
        station,
        timestamp: at(offset_secs),
        source_file: format!("station_{}.wav", station),
    }
}

#[tokio::test]
async fn pair_within_window_is_corroborated_and_emitted() {
    let (_dir, pool, mut correlator, bus) = setup().await;
    let mut rx = bus.subscribe();

    assert_eq!(
        correlator.handle_detection(event(Station::A, 0, 0.90)).await,
        DetectionOutcome::Buffered
    );
    assert_eq!(
        correlator.handle_detection(event(Station::B, 4, 0.88)).await,
        DetectionOutcome::Corroborated
    );

    let records = queries::fetch_dual_detections(&pool).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.scientific_name, OWL);
    assert_eq!(record.time_diff_seconds, 4.0);
    assert!(record.realtime);
    assert!((0.0..=1.0).contains(&record.verification_score));

    // Both member detections flagged
    let unmatched = queries::fetch_unmatched_detections(&pool, 0.0).await.unwrap();
    assert!(unmatched.is_empty());

    // Corroboration published on the bus
    let published = rx.try_recv().unwrap();
    assert_eq!(published.event_type(), "Corroboration");

    // The species bucket was cleared
    assert_eq!(correlator.buffered(), 0);
}

#[tokio::test]
async fn pair_at_exact_window_matches_but_past_it_does_not() {
    let (_dir, pool, mut correlator, _bus) = setup().await;

    assert_eq!(
        correlator.handle_detection(event(Station::A, 0, 0.90)).await,
        DetectionOutcome::Buffered
    );
    assert_eq!(
        correlator.handle_detection(event(Station::B, 30, 0.88)).await,
        DetectionOutcome::Corroborated
    );

    // 31 seconds apart: no match
    assert_eq!(
        correlator.handle_detection(event(Station::A, 100, 0.90)).await,
        DetectionOutcome::Buffered
    );
    assert_eq!(
        correlator.handle_detection(event(Station::B, 131, 0.88)).await,
        DetectionOutcome::Buffered
    );

    assert_eq!(queries::count_dual_detections(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn cooldown_suppresses_second_emission_for_same_species() {
    let (_dir, pool, mut correlator, bus) = setup().await;
    let mut rx = bus.subscribe();

    correlator.handle_detection(event(Station::A, 0, 0.90)).await;
    assert_eq!(
        correlator.handle_detection(event(Station::B, 3, 0.88)).await,
        DetectionOutcome::Corroborated
    );

    // Second pair 20s later, well inside the 60s cooldown
    correlator.handle_detection(event(Station::A, 20, 0.85)).await;
    assert_eq!(
        correlator.handle_detection(event(Station::B, 23, 0.86)).await,
        DetectionOutcome::CooldownSuppressed
    );

    // Exactly one emission and one stored record
    assert_eq!(rx.try_recv().unwrap().event_type(), "Corroboration");
    assert!(rx.try_recv().is_err());
    assert_eq!(queries::count_dual_detections(&pool).await.unwrap(), 1);

    // After the cooldown elapses the species is eligible again
    correlator.handle_detection(event(Station::A, 90, 0.90)).await;
    assert_eq!(
        correlator.handle_detection(event(Station::B, 93, 0.91)).await,
        DetectionOutcome::Corroborated
    );
}

#[tokio::test]
async fn low_confidence_and_malformed_events_are_dropped() {
    let (_dir, pool, mut correlator, _bus) = setup().await;

    assert_eq!(
        correlator.handle_detection(event(Station::A, 0, 0.50)).await,
        DetectionOutcome::BelowThreshold
    );

    let mut bad = event(Station::A, 0, 0.90);
    bad.scientific_name = String::new();
    assert_eq!(
        correlator.handle_detection(bad).await,
        DetectionOutcome::Invalid
    );

    let detections = queries::fetch_unmatched_detections(&pool, 0.0).await.unwrap();
    assert!(detections.is_empty());
}

#[tokio::test]
async fn burst_from_one_station_is_suppressed() {
    let (_dir, pool, mut correlator, _bus) = setup().await;

    assert_eq!(
        correlator.handle_detection(event(Station::A, 0, 0.90)).await,
        DetectionOutcome::Buffered
    );
    // Same station, 2s later: a re-detection of the same call
    assert_eq!(
        correlator.handle_detection(event(Station::A, 2, 0.92)).await,
        DetectionOutcome::BurstSuppressed
    );
    // Past the 5s burst window the same station buffers normally
    assert_eq!(
        correlator.handle_detection(event(Station::A, 6, 0.91)).await,
        DetectionOutcome::Buffered
    );

    let detections = queries::fetch_unmatched_detections(&pool, 0.0).await.unwrap();
    assert_eq!(detections.len(), 2);
}

#[tokio::test]
async fn housekeeping_on_a_lagged_stream_preserves_the_cooldown() {
    let (_dir, pool, mut correlator, bus) = setup().await;
    let mut rx = bus.subscribe();

    // Event timestamps are a fixed past date, so the stream lags the wall
    // clock by far more than the cooldown
    correlator.handle_detection(event(Station::A, 0, 0.90)).await;
    assert_eq!(
        correlator.handle_detection(event(Station::B, 3, 0.88)).await,
        DetectionOutcome::Corroborated
    );

    // Housekeeping between the pairs must age against stream time, not the
    // wall clock, or it would erase the active cooldown
    correlator.housekeep();

    correlator.handle_detection(event(Station::A, 20, 0.85)).await;
    assert_eq!(
        correlator.handle_detection(event(Station::B, 23, 0.86)).await,
        DetectionOutcome::CooldownSuppressed
    );

    assert_eq!(rx.try_recv().unwrap().event_type(), "Corroboration");
    assert!(rx.try_recv().is_err());
    assert_eq!(queries::count_dual_detections(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn housekeeping_on_a_lagged_stream_keeps_in_window_detections() {
    let (_dir, _pool, mut correlator, _bus) = setup().await;

    assert_eq!(
        correlator.handle_detection(event(Station::A, 0, 0.90)).await,
        DetectionOutcome::Buffered
    );

    // Wall-clock aging would evict this detection months early
    correlator.housekeep();
    assert_eq!(correlator.buffered(), 1);

    assert_eq!(
        correlator.handle_detection(event(Station::B, 4, 0.88)).await,
        DetectionOutcome::Corroborated
    );

    // Stream-time aging still evicts what is genuinely stale
    correlator.handle_detection(event(Station::A, 100, 0.90)).await;
    correlator.handle_detection(event(Station::A, 140, 0.91)).await;
    correlator.housekeep();
    assert_eq!(correlator.buffered(), 1);
}

#[tokio::test]
async fn cooldown_suppressed_pair_is_left_for_the_reconciler() {
    let (_dir, pool, mut correlator, _bus) = setup().await;

    correlator.handle_detection(event(Station::A, 0, 0.90)).await;
    correlator.handle_detection(event(Station::B, 3, 0.88)).await;

    correlator.handle_detection(event(Station::A, 20, 0.85)).await;
    correlator.handle_detection(event(Station::B, 23, 0.86)).await;

    // The suppressed pair's detections stay unmatched in storage so the
    // batch reconciler can pick them up
    let unmatched = queries::fetch_unmatched_detections(&pool, 0.70).await.unwrap();
    assert_eq!(unmatched.len(), 2);
    assert!(unmatched.iter().all(|d| !d.corroborated));
}
