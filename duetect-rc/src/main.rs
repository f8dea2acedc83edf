//! duetect-rc (Realtime Correlator) - low-latency cross-station corroboration
//!
//! Reads the classifier detection stream, correlates the two stations in
//! realtime, and publishes verified corroboration events. Corroboration
//! records land in duetect.db alongside the raw detections.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use duetect_common::config;
use duetect_common::db::init_database;
use duetect_common::events::{DuetectEvent, EventBus};
use duetect_common::stats::SpeciesStatisticsModel;
use duetect_common::verifier::BayesianVerifier;
use duetect_common::{CorrelatorParams, VerifierParams};
use duetect_rc::{ingest, RealtimeCorrelator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "duetect-rc", version, about)]
struct Args {
    /// Root folder holding duetect.db (overrides env and config file)
    #[arg(long)]
    root_folder: Option<PathBuf>,
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
        "Starting Duetect Realtime Correlator (duetect-rc) v{}",
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

    let stats = Arc::new(SpeciesStatisticsModel::new(verifier_params.clone()));
    let species_count = stats.refresh(&pool).await?;
    info!("Species statistics loaded: {} species", species_count);

    let bus = EventBus::new(correlator_params.event_bus_capacity);
    bus.emit_lossy(DuetectEvent::StatisticsRefreshed {
        species_count,
        timestamp: Utc::now(),
    });

    let verifier = Arc::new(BayesianVerifier::new(verifier_params, stats)?);
    let correlator =
        RealtimeCorrelator::new(pool.clone(), correlator_params, verifier, bus.clone())?;

    let cancel = CancellationToken::new();
    let correlator_task = tokio::spawn(correlator.run(cancel.clone()));
    let mut ingest_task = tokio::spawn(ingest::run_stdin(bus.clone(), cancel.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = &mut ingest_task => {
            info!("Detection stream ended");
        }
    }

    cancel.cancel();
    let _ = correlator_task.await;
    pool.close().await;
    info!("Duetect Realtime Correlator stopped");

    Ok(())
}
