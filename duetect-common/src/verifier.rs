//! Bayesian verification scoring
//!
//! Turns raw detection evidence into a calibrated posterior probability that
//! a detection (or a cross-station pair) is a true event rather than
//! classifier noise. All outputs are pure functions of the inputs and the
//! current statistics snapshot; nothing here mutates hidden state.
//!
//! Evidence combined per detection:
//! - species frequency (log-compressed against the most frequent species)
//! - the station's historical share of that species' detections
//! - the species' historical corroboration rate
//! - timing proximity and confidence agreement for dual candidates
//! - the detection confidence z-scored against species history

use crate::events::Station;
use crate::params::VerifierParams;
use crate::stats::SpeciesStatisticsModel;
use crate::{Error, Result};
use std::f64::consts::LN_2;
use std::sync::Arc;

/// Evidence from a candidate partner detection at the other station
#[derive(Debug, Clone, Copy)]
pub struct PairEvidence {
    /// Absolute spacing between the two detections, in seconds
    pub time_diff_seconds: f64,
    /// Confidence reported by the other station
    pub paired_confidence: f64,
}

/// A posterior with its component values, kept for explainability
#[derive(Debug, Clone, Copy)]
pub struct Posterior {
    pub prior: f64,
    pub rarity_factor: f64,
    pub dual_likelihood: f64,
    pub confidence_likelihood: f64,
    pub posterior: f64,
}

/// Bayesian verifier shared by the realtime and batch paths.
///
/// Both paths score through the same instance so verification scores are
/// consistent regardless of which path produced a record.
pub struct BayesianVerifier {
    params: VerifierParams,
    stats: Arc<SpeciesStatisticsModel>,
}

impl BayesianVerifier {
    pub fn new(params: VerifierParams, stats: Arc<SpeciesStatisticsModel>) -> Result<Self> {
        params.validate()?;
        Ok(Self { params, stats })
    }

    pub fn params(&self) -> &VerifierParams {
        &self.params
    }

    /// Pre-evidence probability that a detection of `species` at `station`
    /// is correct.
    ///
    /// Combines log-compressed detection frequency, the station's historical
    /// share, a corroboration-rate boost, and the species' mean confidence.
    /// Clamped so no species is ever a-priori certain or impossible.
    pub fn prior(&self, species: &str, station: Station) -> f64 {
        let stat = self.stats.get(species);
        let max_count = self.stats.max_total_count().max(stat.total_count);

        // ln(1+n)/ln(1+max) maps counts spanning orders of magnitude into
        // [0,1]; the affine rescale compresses both extremes toward the middle
        let frequency = if max_count > 0 {
            (1.0 + stat.total_count as f64).ln() / (1.0 + max_count as f64).ln()
        } else {
            0.0
        };
        let frequency_term = 0.3 + 0.4 * frequency;

        let station_term = stat.station_share(station.as_str());
        let corroboration_boost = 1.0 + 0.5 * stat.corroboration_rate;

        (frequency_term * station_term * corroboration_boost * stat.confidence_mean)
            .clamp(self.params.min_prior, self.params.max_prior)
    }

    /// Dampening factor for species with little historical data.
    ///
    /// `(ln(1+count)/ln(1+max_count))^exponent`, floored so legitimately rare
    /// species never lose all evidential weight.
    pub fn rarity_factor(&self, species: &str) -> f64 {
        let stat = self.stats.get(species);
        let max_count = self.stats.max_total_count().max(stat.total_count);
        if max_count <= 0 {
            return self.params.rarity_floor;
        }

        let normalized =
            ((1.0 + stat.total_count as f64).ln() / (1.0 + max_count as f64).ln()).clamp(0.0, 1.0);
        normalized
            .powf(self.params.rarity_exponent)
            .max(self.params.rarity_floor)
    }

    /// Likelihood factor for the presence or absence of a cross-station
    /// partner.
    ///
    /// Without a partner: species that are normally heard by both stations
    /// take a fixed penalty (a partner should have occurred); species that
    /// are structurally single-station stay neutral.
    ///
    /// With a partner: exponential time decay, confidence agreement, an
    /// average-confidence bonus capped at 1.2x, and the fixed dual multiplier.
    pub fn dual_likelihood(
        &self,
        species: &str,
        confidence: f64,
        pair: Option<PairEvidence>,
    ) -> f64 {
        let stat = self.stats.get(species);

        match pair {
            None => {
                if stat.corroboration_rate > self.params.corroboration_rate_threshold {
                    self.params.single_station_penalty
                } else {
                    1.0
                }
            }
            Some(evidence) => {
                let time_diff = evidence.time_diff_seconds.abs();
                let time_decay =
                    (-time_diff / self.params.dual_time_half_life_secs * LN_2).exp();
                let agreement =
                    1.0 - 0.5 * (confidence - evidence.paired_confidence).abs();
                let avg_confidence = (confidence + evidence.paired_confidence) / 2.0;
                let avg_bonus = (1.0 + 0.2 * avg_confidence).min(1.2);

                time_decay * agreement * avg_bonus * self.params.dual_detection_multiplier
            }
        }
    }

    /// Likelihood factor for how the reported confidence compares to the
    /// species' historical confidence distribution.
    ///
    /// Z-score through a logistic squash, rescaled into [0.5, 1.5] to bound
    /// the multiplier in both directions.
    pub fn confidence_likelihood(&self, confidence: f64, species: &str) -> f64 {
        let stat = self.stats.get(species);
        let stddev = stat
            .confidence_stddev
            .max(self.params.min_confidence_stddev);
        let z = (confidence - stat.confidence_mean) / stddev;
        let squashed = 1.0 / (1.0 + (-z).exp());
        0.5 + squashed
    }

    /// Evidence-adjusted probability that a detection is correct, with its
    /// component values for explainability.
    ///
    /// `posterior = n / (n + fp_rate * (1 - prior))` where
    /// `n = prior * rarity * dual_likelihood * confidence_likelihood`.
    /// A zero denominator yields 0.5 (fully uncertain).
    pub fn posterior(
        &self,
        species: &str,
        station: Station,
        confidence: f64,
        pair: Option<PairEvidence>,
    ) -> Posterior {
        let prior = self.prior(species, station);
        let rarity_factor = self.rarity_factor(species);
        let dual_likelihood = self.dual_likelihood(species, confidence, pair);
        let confidence_likelihood = self.confidence_likelihood(confidence, species);

        let numerator = prior * rarity_factor * dual_likelihood * confidence_likelihood;
        let denominator =
            numerator + self.params.false_positive_base_rate * (1.0 - prior);

        let posterior = if denominator == 0.0 {
            0.5
        } else {
            (numerator / denominator).clamp(0.0, 1.0)
        };

        Posterior {
            prior,
            rarity_factor,
            dual_likelihood,
            confidence_likelihood,
            posterior,
        }
    }

    /// Verification score for a corroborated pair; the single public entry
    /// point used by both the realtime and batch paths.
    ///
    /// Computes the posterior independently from each station's perspective
    /// (priors differ because historical detection shares differ), combines
    /// them by geometric mean, then weighs in confidence agreement and time
    /// proximity. Always in [0,1]; never errors for an unseen species.
    pub fn dual_verification_score(
        &self,
        species: &str,
        confidence_a: f64,
        confidence_b: f64,
        time_diff_seconds: f64,
    ) -> Result<f64> {
        let time_diff = time_diff_seconds.abs();

        let from_a = self.posterior(
            species,
            Station::A,
            confidence_a,
            Some(PairEvidence {
                time_diff_seconds: time_diff,
                paired_confidence: confidence_b,
            }),
        );
        let from_b = self.posterior(
            species,
            Station::B,
            confidence_b,
            Some(PairEvidence {
                time_diff_seconds: time_diff,
                paired_confidence: confidence_a,
            }),
        );

        let combined = (from_a.posterior * from_b.posterior).sqrt();
        let agreement = 1.0 - 0.5 * (confidence_a - confidence_b).abs();
        let proximity = (-time_diff / self.params.proximity_half_life_secs * LN_2).exp();

        let score = (combined * agreement * (0.7 + 0.3 * proximity)).clamp(0.0, 1.0);

        if score.is_finite() {
            Ok(score)
        } else {
            Err(Error::Verifier(format!(
                "non-finite verification score for {} (a={}, b={}, dt={})",
                species, confidence_a, confidence_b, time_diff_seconds
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::SpeciesStatistic;

    const COMMON: &str = "Cardinalis cardinalis";
    const ONE_SIDED: &str = "Antrostomus vociferus";
    const SPARSE: &str = "Tyto alba";

    fn seeded_verifier() -> BayesianVerifier {
        let params = VerifierParams::default();
        let stats = Arc::new(SpeciesStatisticsModel::new(params.clone()));
        stats.install_snapshot(vec![
            SpeciesStatistic {
                scientific_name: COMMON.into(),
                common_name: "Northern Cardinal".into(),
                total_count: 500,
                station_a_count: 260,
                station_b_count: 240,
                corroborated_count: 200,
                corroboration_rate: 0.4,
                confidence_mean: 0.84,
                confidence_stddev: 0.08,
                corroborated_confidence_mean: Some(0.89),
                uncorroborated_confidence_mean: Some(0.80),
            },
            SpeciesStatistic {
                scientific_name: ONE_SIDED.into(),
                common_name: "Eastern Whip-poor-will".into(),
                total_count: 80,
                station_a_count: 78,
                station_b_count: 2,
                corroborated_count: 2,
                corroboration_rate: 0.025,
                confidence_mean: 0.77,
                confidence_stddev: 0.10,
                corroborated_confidence_mean: Some(0.85),
                uncorroborated_confidence_mean: Some(0.76),
            },
            SpeciesStatistic {
                scientific_name: SPARSE.into(),
                common_name: "Barn Owl".into(),
                total_count: 3,
                station_a_count: 2,
                station_b_count: 1,
                corroborated_count: 0,
                corroboration_rate: 0.0,
                confidence_mean: 0.72,
                confidence_stddev: 0.05,
                corroborated_confidence_mean: None,
                uncorroborated_confidence_mean: Some(0.72),
            },
        ]);
        BayesianVerifier::new(params, stats).unwrap()
    }

    #[test]
    fn score_stays_in_unit_interval_across_input_grid() {
        let verifier = seeded_verifier();
        for species in [COMMON, ONE_SIDED, SPARSE, "Unknown species"] {
            for a in [0.0, 0.25, 0.5, 0.7, 0.9, 1.0] {
                for b in [0.0, 0.25, 0.5, 0.7, 0.9, 1.0] {
                    for dt in [0.0, 1.0, 5.0, 15.0, 30.0, 120.0, 3600.0] {
                        let score = verifier
                            .dual_verification_score(species, a, b, dt)
                            .unwrap();
                        assert!(
                            (0.0..=1.0).contains(&score),
                            "score {} out of range for {} a={} b={} dt={}",
                            score,
                            species,
                            a,
                            b,
                            dt
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn time_decay_is_monotonic_in_time_diff() {
        let verifier = seeded_verifier();
        let mut previous = f64::INFINITY;
        for dt in [0.0, 1.0, 3.0, 7.5, 15.0, 29.0, 30.0, 60.0] {
            let likelihood = verifier.dual_likelihood(
                COMMON,
                0.9,
                Some(PairEvidence {
                    time_diff_seconds: dt,
                    paired_confidence: 0.9,
                }),
            );
            assert!(
                likelihood <= previous,
                "likelihood increased from {} to {} at dt={}",
                previous,
                likelihood,
                dt
            );
            previous = likelihood;
        }

        // Same monotonicity must hold for the final score
        let near = verifier.dual_verification_score(COMMON, 0.9, 0.9, 2.0).unwrap();
        let far = verifier.dual_verification_score(COMMON, 0.9, 0.9, 28.0).unwrap();
        assert!(near > far);
    }

    #[test]
    fn unknown_species_uses_conservative_defaults_without_error() {
        let verifier = seeded_verifier();
        let species = "Grus americana";

        let prior = verifier.prior(species, Station::A);
        let params = VerifierParams::default();
        assert!(prior >= params.min_prior && prior <= params.max_prior);

        let posterior = verifier.posterior(species, Station::A, 0.95, None);
        assert!(posterior.posterior.is_finite());
        assert!((0.0..=1.0).contains(&posterior.posterior));
        // No history means low evidential weight, not a high posterior
        assert!(posterior.rarity_factor <= params.rarity_floor + 1e-12);

        let score = verifier
            .dual_verification_score(species, 0.95, 0.93, 4.0)
            .unwrap();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn prior_is_clamped_to_configured_range() {
        let verifier = seeded_verifier();
        let params = VerifierParams::default();
        for species in [COMMON, ONE_SIDED, SPARSE, "Never seen"] {
            for station in [Station::A, Station::B] {
                let prior = verifier.prior(species, station);
                assert!(prior >= params.min_prior && prior <= params.max_prior);
            }
        }
    }

    #[test]
    fn station_shares_shift_the_prior() {
        let verifier = seeded_verifier();
        // Whip-poor-will history is almost entirely station A
        let prior_a = verifier.prior(ONE_SIDED, Station::A);
        let prior_b = verifier.prior(ONE_SIDED, Station::B);
        assert!(prior_a > prior_b);
    }

    #[test]
    fn single_station_penalty_only_for_normally_dual_species() {
        let verifier = seeded_verifier();
        let params = VerifierParams::default();

        // Cardinal corroboration rate 0.4 > 0.2 threshold: penalized
        let penalized = verifier.dual_likelihood(COMMON, 0.85, None);
        assert!((penalized - params.single_station_penalty).abs() < 1e-12);

        // Whip-poor-will is structurally single-station: neutral
        let neutral = verifier.dual_likelihood(ONE_SIDED, 0.85, None);
        assert_eq!(neutral, 1.0);
    }

    #[test]
    fn confidence_likelihood_bounded_and_ordered() {
        let verifier = seeded_verifier();
        for confidence in [0.0, 0.3, 0.6, 0.84, 0.95, 1.0] {
            let likelihood = verifier.confidence_likelihood(confidence, COMMON);
            assert!((0.5..=1.5).contains(&likelihood));
        }
        // Above-average confidence rewarded, below-average penalized
        let above = verifier.confidence_likelihood(0.95, COMMON);
        let at_mean = verifier.confidence_likelihood(0.84, COMMON);
        let below = verifier.confidence_likelihood(0.70, COMMON);
        assert!(above > at_mean);
        assert!(at_mean > below);
    }

    #[test]
    fn rarity_factor_floors_for_sparse_species() {
        let verifier = seeded_verifier();
        let params = VerifierParams::default();

        let common = verifier.rarity_factor(COMMON);
        let sparse = verifier.rarity_factor(SPARSE);
        assert!(common > sparse);
        assert!(sparse >= params.rarity_floor);
        assert!((verifier.rarity_factor(COMMON) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tight_pair_scores_materially_above_single_station_posterior() {
        // Common species, station A 0.90 at t=0, station B 0.88 at t=+3s
        let verifier = seeded_verifier();

        let single_a = verifier.posterior(COMMON, Station::A, 0.90, None).posterior;
        let single_b = verifier.posterior(COMMON, Station::B, 0.88, None).posterior;
        let dual = verifier
            .dual_verification_score(COMMON, 0.90, 0.88, 3.0)
            .unwrap();

        assert!(dual > single_a + 0.05, "dual {} vs single A {}", dual, single_a);
        assert!(dual > single_b + 0.05, "dual {} vs single B {}", dual, single_b);
    }

    #[test]
    fn zero_denominator_yields_full_uncertainty() {
        // fp rate 0 and an impossible numerator can zero the denominator
        let params = VerifierParams {
            false_positive_base_rate: 0.0,
            rarity_floor: 0.0,
            ..Default::default()
        };
        let stats = Arc::new(SpeciesStatisticsModel::new(params.clone()));
        let verifier = BayesianVerifier::new(params, stats).unwrap();

        // Unknown species with empty history: rarity factor is the floor (0),
        // so numerator = 0 and denominator = 0 + 0*(1-prior) = 0
        let posterior = verifier.posterior("Anything", Station::A, 0.9, None);
        assert_eq!(posterior.posterior, 0.5);
    }

    #[test]
    fn nan_confidence_is_reported_as_verifier_error() {
        let verifier = seeded_verifier();
        let result = verifier.dual_verification_score(COMMON, f64::NAN, 0.9, 3.0);
        assert!(matches!(result, Err(Error::Verifier(_))));
    }
}
