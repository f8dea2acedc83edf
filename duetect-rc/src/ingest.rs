//! Detection stream ingestion
//!
//! Bridges the external classifier transport onto the internal event bus.
//! The transport is newline-delimited JSON on stdin: each line is one
//! [`DetectionEvent`]. Malformed lines are logged and skipped; the stream
//! keeps flowing.

use chrono::Utc;
use duetect_common::events::{DetectionEvent, DuetectEvent, EventBus};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read detection events from stdin and publish them to the bus until EOF or
/// cancellation
pub async fn run_stdin(bus: EventBus, cancel: CancellationToken) {
    let reader = BufReader::new(tokio::io::stdin());
    run(reader, bus, cancel).await;
}

/// Transport loop over any line-oriented source. Split from [`run_stdin`] so
/// tests can drive it with an in-memory reader.
pub async fn run<R>(reader: R, bus: EventBus, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_number = 0u64;
    let mut published = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Ingestion stopping ({} events published)", published);
                return;
            }
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                line_number += 1;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<DetectionEvent>(trimmed) {
                    Ok(event) => {
                        debug!(
                            "Ingested {} from station {} at {:.2}",
                            event.scientific_name, event.station, event.confidence
                        );
                        bus.emit_lossy(DuetectEvent::Detection {
                            event,
                            timestamp: Utc::now(),
                        });
                        published += 1;
                    }
                    Err(e) => {
                        warn!("Skipping malformed line {}: {}", line_number, e);
                    }
                }
            }
            Ok(None) => {
                info!(
                    "Detection stream ended ({} events published)",
                    published
                );
                return;
            }
            Err(e) => {
                warn!("Detection stream read error: {}", e);
                return;
            }
        }
    }
}
