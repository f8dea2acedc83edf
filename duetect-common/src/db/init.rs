//! Database initialization
//!
//! Creates the database automatically on first run with an idempotent schema
//! so that both binaries can start against a fresh root folder. All statements
//! are safe to run repeatedly and safe under concurrent first-run.

use crate::{Result, VerifierParams};
use crate::params::CorrelatorParams;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Initialize the database connection pool and create tables if needed.
///
/// Companion to [`create_schema`]: this function owns path handling and pool
/// construction, while `create_schema` works against an already-open pool
/// (used directly by tests running on in-memory databases).
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc creates the database file if missing.
    // acquire_timeout bounds how long any caller can stall on the pool, so a
    // slow disk never blocks the ingestion path indefinitely.
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables, indexes and default settings on an open pool.
///
/// Idempotent: every statement is CREATE IF NOT EXISTS / INSERT OR IGNORE.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows the batch reconciler to read while the realtime path writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    // Short lock waits; callers retry or log rather than stall ingestion
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_detections_table(pool).await?;
    create_dual_detections_table(pool).await?;
    create_species_stats_table(pool).await?;
    create_settings_table(pool).await?;
    init_default_settings(pool).await?;

    Ok(())
}

async fn create_detections_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detections (
            guid TEXT PRIMARY KEY,
            station TEXT NOT NULL CHECK (station IN ('A', 'B')),
            scientific_name TEXT NOT NULL,
            common_name TEXT NOT NULL,
            timestamp TIMESTAMP NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
            source_file TEXT NOT NULL,
            corroborated INTEGER NOT NULL DEFAULT 0,
            corroborated_by_other_station INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_detections_species_time ON detections(scientific_name, timestamp)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_detections_corroborated ON detections(corroborated)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_dual_detections_table(pool: &SqlitePool) -> Result<()> {
    // A detection is consumed by at most one pair, so each member column
    // carries its own uniqueness constraint. That also makes reconciler
    // re-runs idempotent at the storage level.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dual_detections (
            guid TEXT PRIMARY KEY,
            scientific_name TEXT NOT NULL,
            common_name TEXT NOT NULL,
            station_a_detection_id TEXT NOT NULL UNIQUE REFERENCES detections(guid),
            station_b_detection_id TEXT NOT NULL UNIQUE REFERENCES detections(guid),
            detection_time TIMESTAMP NOT NULL,
            time_diff_seconds REAL NOT NULL CHECK (time_diff_seconds >= 0.0),
            station_a_confidence REAL NOT NULL,
            station_b_confidence REAL NOT NULL,
            confidence_diff REAL NOT NULL,
            avg_confidence REAL NOT NULL,
            verification_score REAL NOT NULL CHECK (verification_score >= 0.0 AND verification_score <= 1.0),
            realtime INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (station_a_detection_id, station_b_detection_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Downstream consumers filter and sort on the score
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dual_detections_score ON dual_detections(verification_score)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dual_detections_species ON dual_detections(scientific_name, detection_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_species_stats_table(pool: &SqlitePool) -> Result<()> {
    // Persisted snapshot of the in-memory statistics model, written on each
    // refresh so operators can inspect drift between refreshes.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS species_stats (
            scientific_name TEXT PRIMARY KEY,
            common_name TEXT NOT NULL,
            total_count INTEGER NOT NULL,
            station_a_count INTEGER NOT NULL,
            station_b_count INTEGER NOT NULL,
            corroborated_count INTEGER NOT NULL,
            corroboration_rate REAL NOT NULL,
            confidence_mean REAL NOT NULL,
            confidence_stddev REAL NOT NULL,
            corroborated_confidence_mean REAL,
            uncorroborated_confidence_mean REAL,
            refreshed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or repair default settings.
///
/// Ensures every tunable model and correlator constant exists with its
/// compiled default, and resets NULL values back to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    let v = VerifierParams::default();
    let c = CorrelatorParams::default();

    // Bayesian model constants
    ensure_setting(pool, "min_prior", &v.min_prior.to_string()).await?;
    ensure_setting(pool, "max_prior", &v.max_prior.to_string()).await?;
    ensure_setting(pool, "rarity_exponent", &v.rarity_exponent.to_string()).await?;
    ensure_setting(pool, "rarity_floor", &v.rarity_floor.to_string()).await?;
    ensure_setting(
        pool,
        "dual_time_half_life_secs",
        &v.dual_time_half_life_secs.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "dual_detection_multiplier",
        &v.dual_detection_multiplier.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "single_station_penalty",
        &v.single_station_penalty.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "corroboration_rate_threshold",
        &v.corroboration_rate_threshold.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "false_positive_base_rate",
        &v.false_positive_base_rate.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "default_confidence_mean",
        &v.default_confidence_mean.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "default_confidence_stddev",
        &v.default_confidence_stddev.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "min_confidence_stddev",
        &v.min_confidence_stddev.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "proximity_half_life_secs",
        &v.proximity_half_life_secs.to_string(),
    )
    .await?;

    // Correlator constants
    ensure_setting(pool, "window_secs", &c.window_secs.to_string()).await?;
    ensure_setting(pool, "min_confidence", &c.min_confidence.to_string()).await?;
    ensure_setting(pool, "cooldown_secs", &c.cooldown_secs.to_string()).await?;
    ensure_setting(pool, "burst_window_secs", &c.burst_window_secs.to_string()).await?;
    ensure_setting(
        pool,
        "housekeeping_interval_secs",
        &c.housekeeping_interval_secs.to_string(),
    )
    .await?;
    ensure_setting(
        pool,
        "event_bus_capacity",
        &c.event_bus_capacity.to_string(),
    )
    .await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value.
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization race conditions
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        warn!(
            "Setting '{}' was NULL, reset to default: {}",
            key, default_value
        );
    }

    Ok(())
}
