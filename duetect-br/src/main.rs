//! duetect-br (Batch Reconciler) - exhaustive pairing and rescoring sweeps
//!
//! Intended to run from a scheduler (cron or similar). `run` pairs everything
//! the realtime path missed; `recompute-scores` rescores stored records with
//! the current model. The process exits non-zero only when the store itself
//! fails.

use anyhow::Result;
use clap::{Parser, Subcommand};
use duetect_common::config;
use duetect_common::db::init_database;
use duetect_common::stats::SpeciesStatisticsModel;
use duetect_common::verifier::BayesianVerifier;
use duetect_common::{CorrelatorParams, VerifierParams};
use duetect_br::BatchReconciler;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "duetect-br", version, about)]
struct Args {
    /// Root folder holding duetect.db (overrides env and config file)
    #[arg(long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Pair unmatched detections (the default)
    Run,
    /// Recompute all stored verification scores with the current model
    RecomputeScores,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting Duetect Batch Reconciler (duetect-br) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();
    let root_folder = config::resolve_root_folder(args.root_folder.as_deref())?;
    config::ensure_root_folder(&root_folder)?;
    let db_path = config::database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = match init_database(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return Err(e.into());
        }
    };

    let verifier_params = VerifierParams::load(&pool).await?;
    let correlator_params = CorrelatorParams::load(&pool).await?;

    // Statistics come from history as it stood before this sweep
    let stats = Arc::new(SpeciesStatisticsModel::new(verifier_params.clone()));
    let species_count = stats.refresh(&pool).await?;
    info!("Species statistics loaded: {} species", species_count);

    let verifier = Arc::new(BayesianVerifier::new(verifier_params, stats)?);
    let reconciler = BatchReconciler::new(pool.clone(), correlator_params, verifier)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => match reconciler.run().await {
            Ok(summary) => info!(
                "Sweep finished: {} candidates, {} pairs inserted",
                summary.candidates, summary.pairs_inserted
            ),
            Err(e) => {
                report_sweep_failure(&e);
                return Err(e.into());
            }
        },
        Command::RecomputeScores => match reconciler.recompute_all().await {
            Ok(summary) => info!(
                "Rescore finished: {} examined, {} updated",
                summary.examined, summary.updated
            ),
            Err(e) => {
                report_sweep_failure(&e);
                return Err(e.into());
            }
        },
    }

    pool.close().await;
    Ok(())
}

/// Tell the scheduler whether a failed sweep is worth rerunning as-is
fn report_sweep_failure(e: &duetect_common::Error) {
    if e.is_transient_store() {
        error!("Sweep failed on a transient store error, rerun it: {}", e);
    } else {
        error!("Sweep failed: {}", e);
    }
}
