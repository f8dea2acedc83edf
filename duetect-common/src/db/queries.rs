//! Shared detection and corroboration queries
//!
//! Used by both the realtime path and the batch reconciler so the two paths
//! observe identical storage semantics.

use crate::db::models::{Detection, DualDetection};
use crate::Result;
use sqlx::SqlitePool;

/// Persist a single-station detection
pub async fn insert_detection(pool: &SqlitePool, detection: &Detection) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO detections
            (guid, station, scientific_name, common_name, timestamp, confidence,
             source_file, corroborated, corroborated_by_other_station)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&detection.guid)
    .bind(&detection.station)
    .bind(&detection.scientific_name)
    .bind(&detection.common_name)
    .bind(detection.timestamp)
    .bind(detection.confidence)
    .bind(&detection.source_file)
    .bind(detection.corroborated)
    .bind(detection.corroborated_by_other_station)
    .execute(pool)
    .await?;

    Ok(())
}

/// Detections not yet consumed by any corroboration pair, at or above the
/// minimum confidence, ordered for per-species grouping
pub async fn fetch_unmatched_detections(
    pool: &SqlitePool,
    min_confidence: f64,
) -> Result<Vec<Detection>> {
    let rows = sqlx::query_as::<_, Detection>(
        r#"
        SELECT guid, station, scientific_name, common_name, timestamp, confidence,
               source_file, corroborated, corroborated_by_other_station
        FROM detections
        WHERE corroborated = 0 AND confidence >= ?
        ORDER BY scientific_name, timestamp
        "#,
    )
    .bind(min_confidence)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Insert a corroboration record if no record already references either
/// member detection.
///
/// Returns true if the row was inserted, false if the uniqueness constraints
/// rejected it (the pair, or one of its members, is already recorded).
pub async fn insert_dual_detection(pool: &SqlitePool, record: &DualDetection) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO dual_detections
            (guid, scientific_name, common_name, station_a_detection_id,
             station_b_detection_id, detection_time, time_diff_seconds,
             station_a_confidence, station_b_confidence, confidence_diff,
             avg_confidence, verification_score, realtime)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.guid)
    .bind(&record.scientific_name)
    .bind(&record.common_name)
    .bind(&record.station_a_detection_id)
    .bind(&record.station_b_detection_id)
    .bind(record.detection_time)
    .bind(record.time_diff_seconds)
    .bind(record.station_a_confidence)
    .bind(record.station_b_confidence)
    .bind(record.confidence_diff)
    .bind(record.avg_confidence)
    .bind(record.verification_score)
    .bind(record.realtime)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Flag both member detections of an accepted pair as corroborated
pub async fn mark_pair_corroborated(
    pool: &SqlitePool,
    station_a_guid: &str,
    station_b_guid: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE detections SET corroborated = 1, corroborated_by_other_station = 1 WHERE guid IN (?, ?)",
    )
    .bind(station_a_guid)
    .bind(station_b_guid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// All corroboration records, oldest first
pub async fn fetch_dual_detections(pool: &SqlitePool) -> Result<Vec<DualDetection>> {
    let rows = sqlx::query_as::<_, DualDetection>(
        r#"
        SELECT guid, scientific_name, common_name, station_a_detection_id,
               station_b_detection_id, detection_time, time_diff_seconds,
               station_a_confidence, station_b_confidence, confidence_diff,
               avg_confidence, verification_score, realtime
        FROM dual_detections
        ORDER BY detection_time
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Update a stored verification score in place (post model-tuning rescore)
pub async fn update_verification_score(
    pool: &SqlitePool,
    record_guid: &str,
    verification_score: f64,
) -> Result<bool> {
    let result = sqlx::query("UPDATE dual_detections SET verification_score = ? WHERE guid = ?")
        .bind(verification_score)
        .bind(record_guid)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Number of corroboration records
pub async fn count_dual_detections(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dual_detections")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
