//! Tunable model and correlator parameters
//!
//! All constants of the Bayesian model and the realtime correlator live here,
//! with compiled defaults mirrored into the `settings` table so operators can
//! tune the model without recompiling. Parameters are loaded once at startup
//! and validated fail-fast; a missing or NULL setting falls back to the
//! compiled default.

use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::warn;

/// Constants of the Bayesian verification model
#[derive(Debug, Clone)]
pub struct VerifierParams {
    /// Lower clamp for the per-station prior
    pub min_prior: f64,
    /// Upper clamp for the per-station prior
    pub max_prior: f64,
    /// Exponent applied to the normalized log-frequency rarity term
    pub rarity_exponent: f64,
    /// Minimum rarity factor; rare species never get zero evidential weight
    pub rarity_floor: f64,
    /// Half-life in seconds of the dual-likelihood time-decay factor
    pub dual_time_half_life_secs: f64,
    /// Fixed multiplier rewarding independent cross-station corroboration
    pub dual_detection_multiplier: f64,
    /// Penalty applied to single-station detections of species that are
    /// normally heard by both stations
    pub single_station_penalty: f64,
    /// Corroboration rate above which the single-station penalty applies
    pub corroboration_rate_threshold: f64,
    /// Base rate of classifier false positives used in the posterior
    pub false_positive_base_rate: f64,
    /// Neutral confidence mean assumed for species with no history
    pub default_confidence_mean: f64,
    /// Confidence stddev assumed for species with no history
    pub default_confidence_stddev: f64,
    /// Floor applied to historical stddev before z-scoring
    pub min_confidence_stddev: f64,
    /// Half-life in seconds of the time-proximity factor in the final score
    pub proximity_half_life_secs: f64,
}

impl Default for VerifierParams {
    fn default() -> Self {
        Self {
            min_prior: 0.05,
            max_prior: 0.95,
            rarity_exponent: 0.5,
            rarity_floor: 0.1,
            dual_time_half_life_secs: 15.0,
            dual_detection_multiplier: 3.0,
            single_station_penalty: 0.7,
            corroboration_rate_threshold: 0.2,
            false_positive_base_rate: 0.1,
            default_confidence_mean: 0.75,
            default_confidence_stddev: 0.15,
            min_confidence_stddev: 0.05,
            proximity_half_life_secs: 30.0,
        }
    }
}

impl VerifierParams {
    /// Validate parameter ranges; startup fails fast on nonsense values
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.min_prior)
            || !(0.0..=1.0).contains(&self.max_prior)
            || self.min_prior >= self.max_prior
        {
            return Err(Error::Config(format!(
                "prior clamp range invalid: [{}, {}]",
                self.min_prior, self.max_prior
            )));
        }
        if self.rarity_exponent <= 0.0 {
            return Err(Error::Config("rarity_exponent must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.rarity_floor) {
            return Err(Error::Config("rarity_floor must be in [0,1]".into()));
        }
        if self.dual_time_half_life_secs <= 0.0 || self.proximity_half_life_secs <= 0.0 {
            return Err(Error::Config("half-life values must be positive".into()));
        }
        if self.dual_detection_multiplier < 1.0 {
            return Err(Error::Config(
                "dual_detection_multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.single_station_penalty)
            || !(0.0..=1.0).contains(&self.corroboration_rate_threshold)
            || !(0.0..=1.0).contains(&self.false_positive_base_rate)
            || !(0.0..=1.0).contains(&self.default_confidence_mean)
        {
            return Err(Error::Config("rate parameters must be in [0,1]".into()));
        }
        if self.default_confidence_stddev <= 0.0 || self.min_confidence_stddev <= 0.0 {
            return Err(Error::Config("stddev parameters must be positive".into()));
        }
        Ok(())
    }

    /// Load from the settings table, falling back to compiled defaults
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let d = Self::default();
        let params = Self {
            min_prior: setting_f64(pool, "min_prior", d.min_prior).await?,
            max_prior: setting_f64(pool, "max_prior", d.max_prior).await?,
            rarity_exponent: setting_f64(pool, "rarity_exponent", d.rarity_exponent).await?,
            rarity_floor: setting_f64(pool, "rarity_floor", d.rarity_floor).await?,
            dual_time_half_life_secs: setting_f64(
                pool,
                "dual_time_half_life_secs",
                d.dual_time_half_life_secs,
            )
            .await?,
            dual_detection_multiplier: setting_f64(
                pool,
                "dual_detection_multiplier",
                d.dual_detection_multiplier,
            )
            .await?,
            single_station_penalty: setting_f64(
                pool,
                "single_station_penalty",
                d.single_station_penalty,
            )
            .await?,
            corroboration_rate_threshold: setting_f64(
                pool,
                "corroboration_rate_threshold",
                d.corroboration_rate_threshold,
            )
            .await?,
            false_positive_base_rate: setting_f64(
                pool,
                "false_positive_base_rate",
                d.false_positive_base_rate,
            )
            .await?,
            default_confidence_mean: setting_f64(
                pool,
                "default_confidence_mean",
                d.default_confidence_mean,
            )
            .await?,
            default_confidence_stddev: setting_f64(
                pool,
                "default_confidence_stddev",
                d.default_confidence_stddev,
            )
            .await?,
            min_confidence_stddev: setting_f64(
                pool,
                "min_confidence_stddev",
                d.min_confidence_stddev,
            )
            .await?,
            proximity_half_life_secs: setting_f64(
                pool,
                "proximity_half_life_secs",
                d.proximity_half_life_secs,
            )
            .await?,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Constants of the realtime correlator and the batch reconciler
#[derive(Debug, Clone)]
pub struct CorrelatorParams {
    /// Matching window in seconds; pairs at exactly this spacing still match
    pub window_secs: f64,
    /// Minimum display confidence; events below it are dropped
    pub min_confidence: f64,
    /// Per-species cooldown between emitted corroborations, in seconds
    pub cooldown_secs: f64,
    /// Sub-window suppressing duplicate single-station events, in seconds
    pub burst_window_secs: f64,
    /// Cadence of buffer/cooldown housekeeping, in seconds
    pub housekeeping_interval_secs: u64,
    /// Capacity of the broadcast event bus
    pub event_bus_capacity: usize,
}

impl Default for CorrelatorParams {
    fn default() -> Self {
        Self {
            window_secs: 30.0,
            min_confidence: 0.70,
            cooldown_secs: 60.0,
            burst_window_secs: 5.0,
            housekeeping_interval_secs: 30,
            event_bus_capacity: 1000,
        }
    }
}

impl CorrelatorParams {
    pub fn validate(&self) -> Result<()> {
        if self.window_secs <= 0.0 {
            return Err(Error::Config("window_secs must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config("min_confidence must be in [0,1]".into()));
        }
        if self.cooldown_secs < 0.0 || self.burst_window_secs < 0.0 {
            return Err(Error::Config("cooldown/burst windows must be >= 0".into()));
        }
        if self.housekeeping_interval_secs == 0 {
            return Err(Error::Config(
                "housekeeping_interval_secs must be positive".into(),
            ));
        }
        if self.event_bus_capacity == 0 {
            return Err(Error::Config("event_bus_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Load from the settings table, falling back to compiled defaults
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let d = Self::default();
        let params = Self {
            window_secs: setting_f64(pool, "window_secs", d.window_secs).await?,
            min_confidence: setting_f64(pool, "min_confidence", d.min_confidence).await?,
            cooldown_secs: setting_f64(pool, "cooldown_secs", d.cooldown_secs).await?,
            burst_window_secs: setting_f64(pool, "burst_window_secs", d.burst_window_secs).await?,
            housekeeping_interval_secs: setting_f64(
                pool,
                "housekeeping_interval_secs",
                d.housekeeping_interval_secs as f64,
            )
            .await? as u64,
            event_bus_capacity: setting_f64(
                pool,
                "event_bus_capacity",
                d.event_bus_capacity as f64,
            )
            .await? as usize,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Read a numeric setting, falling back to the compiled default on a missing
/// row, NULL value, or unparseable text
async fn setting_f64(pool: &SqlitePool, key: &str, default: f64) -> Result<f64> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value.flatten() {
        Some(text) => match text.parse::<f64>() {
            Ok(v) => Ok(v),
            Err(_) => {
                warn!(
                    "Setting '{}' has unparseable value '{}', using default {}",
                    key, text, default
                );
                Ok(default)
            }
        },
        None => Ok(default),
    }
}
