//! Species statistics aggregation
//!
//! Holds the historical per-species detection statistics the Bayesian model
//! scores against. The model is an explicitly constructed component owned by
//! the caller: refresh timing is a caller decision, there is no hidden timer
//! and no module-level singleton.

use crate::params::VerifierParams;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

/// Aggregated historical statistics for one species
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesStatistic {
    pub scientific_name: String,
    pub common_name: String,
    pub total_count: i64,
    pub station_a_count: i64,
    pub station_b_count: i64,
    pub corroborated_count: i64,
    /// corroborated / total, 0.0 when never seen
    pub corroboration_rate: f64,
    pub confidence_mean: f64,
    pub confidence_stddev: f64,
    pub corroborated_confidence_mean: Option<f64>,
    pub uncorroborated_confidence_mean: Option<f64>,
}

impl SpeciesStatistic {
    /// Conservative "never seen" record returned for unknown species.
    ///
    /// Unknown species are an ordinary, non-exceptional outcome: zero counts,
    /// zero corroboration rate, and the configured neutral confidence mean.
    pub fn unknown(scientific_name: &str, params: &VerifierParams) -> Self {
        Self {
            scientific_name: scientific_name.to_string(),
            common_name: scientific_name.to_string(),
            total_count: 0,
            station_a_count: 0,
            station_b_count: 0,
            corroborated_count: 0,
            corroboration_rate: 0.0,
            confidence_mean: params.default_confidence_mean,
            confidence_stddev: params.default_confidence_stddev,
            corroborated_confidence_mean: None,
            uncorroborated_confidence_mean: None,
        }
    }

    /// Fraction of this species' detections attributed to the given station
    /// string ("A" or "B"); 0.5 when the species has never been seen
    pub fn station_share(&self, station: &str) -> f64 {
        if self.total_count == 0 {
            return 0.5;
        }
        let count = match station {
            "A" => self.station_a_count,
            _ => self.station_b_count,
        };
        count as f64 / self.total_count as f64
    }
}

#[derive(Default)]
struct Snapshot {
    by_species: HashMap<String, SpeciesStatistic>,
    max_total_count: i64,
    refreshed_at: Option<DateTime<Utc>>,
}

/// In-memory species statistics, rebuilt by explicit [`refresh`] calls.
///
/// `refresh` is an idempotent full replace: the whole snapshot is recomputed
/// from detection history and swapped in atomically, never merged
/// incrementally.
///
/// [`refresh`]: SpeciesStatisticsModel::refresh
pub struct SpeciesStatisticsModel {
    params: VerifierParams,
    snapshot: RwLock<Snapshot>,
}

/// Row shape of the aggregation query
type StatRow = (
    String,         // scientific_name
    String,         // common_name
    i64,            // total
    i64,            // station A count
    i64,            // station B count
    i64,            // corroborated count
    f64,            // mean confidence
    f64,            // mean squared confidence
    Option<f64>,    // mean confidence | corroborated
    Option<f64>,    // mean confidence | uncorroborated
);

impl SpeciesStatisticsModel {
    pub fn new(params: VerifierParams) -> Self {
        Self {
            params,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Recompute all per-species aggregates from the full detection history
    /// and replace the snapshot. Safe to call repeatedly.
    ///
    /// Returns the number of species in the new snapshot.
    pub async fn refresh(&self, pool: &SqlitePool) -> Result<usize> {
        let rows: Vec<StatRow> = sqlx::query_as(
            r#"
            SELECT scientific_name,
                   MAX(common_name) AS common_name,
                   COUNT(*) AS total_count,
                   SUM(CASE WHEN station = 'A' THEN 1 ELSE 0 END) AS station_a_count,
                   SUM(CASE WHEN station = 'B' THEN 1 ELSE 0 END) AS station_b_count,
                   SUM(CASE WHEN corroborated_by_other_station = 1 THEN 1 ELSE 0 END) AS corroborated_count,
                   AVG(confidence) AS confidence_mean,
                   AVG(confidence * confidence) AS confidence_sq_mean,
                   AVG(CASE WHEN corroborated_by_other_station = 1 THEN confidence END) AS corroborated_confidence_mean,
                   AVG(CASE WHEN corroborated_by_other_station = 0 THEN confidence END) AS uncorroborated_confidence_mean
            FROM detections
            GROUP BY scientific_name
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut by_species = HashMap::with_capacity(rows.len());
        let mut max_total_count = 0i64;

        for row in rows {
            let (
                scientific_name,
                common_name,
                total_count,
                station_a_count,
                station_b_count,
                corroborated_count,
                confidence_mean,
                confidence_sq_mean,
                corroborated_confidence_mean,
                uncorroborated_confidence_mean,
            ) = row;

            let variance = (confidence_sq_mean - confidence_mean * confidence_mean).max(0.0);
            let corroboration_rate = if total_count > 0 {
                corroborated_count as f64 / total_count as f64
            } else {
                0.0
            };
            max_total_count = max_total_count.max(total_count);

            by_species.insert(
                scientific_name.clone(),
                SpeciesStatistic {
                    scientific_name,
                    common_name,
                    total_count,
                    station_a_count,
                    station_b_count,
                    corroborated_count,
                    corroboration_rate,
                    confidence_mean,
                    confidence_stddev: variance.sqrt(),
                    corroborated_confidence_mean,
                    uncorroborated_confidence_mean,
                },
            );
        }

        let species_count = by_species.len();
        let refreshed_at = Utc::now();

        self.persist_snapshot(pool, &by_species, refreshed_at).await?;

        // Swap after all awaits so the lock is never held across them
        {
            let mut snapshot = self
                .snapshot
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *snapshot = Snapshot {
                by_species,
                max_total_count,
                refreshed_at: Some(refreshed_at),
            };
        }

        info!("Species statistics refreshed: {} species", species_count);
        Ok(species_count)
    }

    /// Statistics for a species, or the conservative default for unknowns.
    /// Never errors for an unknown species.
    pub fn get(&self, scientific_name: &str) -> SpeciesStatistic {
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        snapshot
            .by_species
            .get(scientific_name)
            .cloned()
            .unwrap_or_else(|| SpeciesStatistic::unknown(scientific_name, &self.params))
    }

    /// Detection count of the most frequently detected species
    pub fn max_total_count(&self) -> i64 {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .max_total_count
    }

    /// When the snapshot was last rebuilt, if ever
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .refreshed_at
    }

    pub fn species_count(&self) -> usize {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .by_species
            .len()
    }

    /// Replace the snapshot directly. Test-support constructor path; the
    /// production path is [`refresh`](Self::refresh).
    pub fn install_snapshot(&self, stats: Vec<SpeciesStatistic>) {
        let max_total_count = stats.iter().map(|s| s.total_count).max().unwrap_or(0);
        let by_species = stats
            .into_iter()
            .map(|s| (s.scientific_name.clone(), s))
            .collect();
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *snapshot = Snapshot {
            by_species,
            max_total_count,
            refreshed_at: Some(Utc::now()),
        };
    }

    /// Write the snapshot to the species_stats table for operator inspection
    async fn persist_snapshot(
        &self,
        pool: &SqlitePool,
        by_species: &HashMap<String, SpeciesStatistic>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM species_stats")
            .execute(&mut *tx)
            .await?;

        for stat in by_species.values() {
            sqlx::query(
                r#"
                INSERT INTO species_stats
                    (scientific_name, common_name, total_count, station_a_count,
                     station_b_count, corroborated_count, corroboration_rate,
                     confidence_mean, confidence_stddev, corroborated_confidence_mean,
                     uncorroborated_confidence_mean, refreshed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&stat.scientific_name)
            .bind(&stat.common_name)
            .bind(stat.total_count)
            .bind(stat.station_a_count)
            .bind(stat.station_b_count)
            .bind(stat.corroborated_count)
            .bind(stat.corroboration_rate)
            .bind(stat.confidence_mean)
            .bind(stat.confidence_stddev)
            .bind(stat.corroborated_confidence_mean)
            .bind(stat.uncorroborated_confidence_mean)
            .bind(refreshed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_species_gets_conservative_defaults() {
        let params = VerifierParams::default();
        let model = SpeciesStatisticsModel::new(params.clone());

        let stat = model.get("Nyctea scandiaca");
        assert_eq!(stat.total_count, 0);
        assert_eq!(stat.corroboration_rate, 0.0);
        assert_eq!(stat.confidence_mean, params.default_confidence_mean);
        assert_eq!(stat.station_share("A"), 0.5);
        assert_eq!(stat.station_share("B"), 0.5);
    }

    #[test]
    fn install_snapshot_replaces_wholesale() {
        let model = SpeciesStatisticsModel::new(VerifierParams::default());
        model.install_snapshot(vec![SpeciesStatistic {
            scientific_name: "Turdus migratorius".into(),
            common_name: "American Robin".into(),
            total_count: 120,
            station_a_count: 70,
            station_b_count: 50,
            corroborated_count: 40,
            corroboration_rate: 40.0 / 120.0,
            confidence_mean: 0.82,
            confidence_stddev: 0.07,
            corroborated_confidence_mean: Some(0.88),
            uncorroborated_confidence_mean: Some(0.79),
        }]);

        assert_eq!(model.species_count(), 1);
        assert_eq!(model.max_total_count(), 120);
        let stat = model.get("Turdus migratorius");
        assert_eq!(stat.station_a_count, 70);
        assert!((stat.station_share("A") - 70.0 / 120.0).abs() < 1e-12);

        // Second install fully replaces the first
        model.install_snapshot(vec![]);
        assert_eq!(model.species_count(), 0);
        assert_eq!(model.max_total_count(), 0);
    }
}
