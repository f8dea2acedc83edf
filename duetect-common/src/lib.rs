//! # Duetect Common Library
//!
//! Shared code for the Duetect correlation-and-verification engine:
//! - Database schema, models and queries
//! - Event types (DuetectEvent enum) and the EventBus
//! - Species statistics aggregation
//! - Bayesian verification scoring
//! - Configuration loading and tunable parameters

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod params;
pub mod stats;
pub mod verifier;

pub use error::{Error, Result};
pub use params::{CorrelatorParams, VerifierParams};
pub use verifier::{BayesianVerifier, PairEvidence, Posterior};
