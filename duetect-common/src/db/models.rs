//! Database models

use crate::events::{CorroborationEvent, Station};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single-station detection as persisted by the ingestion path.
///
/// Created by the external classifier; read-only to this core except for the
/// two corroboration flags.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Detection {
    pub guid: String,
    /// Station identifier, "A" or "B"
    pub station: String,
    pub scientific_name: String,
    pub common_name: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    /// Opaque reference to the source audio file
    pub source_file: String,
    pub corroborated: bool,
    pub corroborated_by_other_station: bool,
}

impl Detection {
    /// Parsed station identifier; None if the row is corrupt
    pub fn station(&self) -> Option<Station> {
        Station::parse(&self.station)
    }
}

/// A corroborated cross-station pair ("dual detection").
///
/// Immutable after insertion except for `verification_score`, which may be
/// recomputed after model tuning.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DualDetection {
    pub guid: String,
    pub scientific_name: String,
    pub common_name: String,
    pub station_a_detection_id: String,
    pub station_b_detection_id: String,
    /// Event time: the earlier of the two detection timestamps
    pub detection_time: DateTime<Utc>,
    pub time_diff_seconds: f64,
    pub station_a_confidence: f64,
    pub station_b_confidence: f64,
    pub confidence_diff: f64,
    pub avg_confidence: f64,
    pub verification_score: f64,
    /// True if produced by the low-latency path
    pub realtime: bool,
}

impl DualDetection {
    /// Build a record from the two member detections.
    ///
    /// `a` must come from station A and `b` from station B; the caller is
    /// responsible for that pairing.
    pub fn from_pair(a: &Detection, b: &Detection, verification_score: f64, realtime: bool) -> Self {
        let time_diff_seconds =
            (b.timestamp - a.timestamp).num_milliseconds().abs() as f64 / 1000.0;
        Self {
            guid: Uuid::new_v4().to_string(),
            scientific_name: a.scientific_name.clone(),
            common_name: a.common_name.clone(),
            station_a_detection_id: a.guid.clone(),
            station_b_detection_id: b.guid.clone(),
            detection_time: a.timestamp.min(b.timestamp),
            time_diff_seconds,
            station_a_confidence: a.confidence,
            station_b_confidence: b.confidence,
            confidence_diff: (a.confidence - b.confidence).abs(),
            avg_confidence: (a.confidence + b.confidence) / 2.0,
            verification_score,
            realtime,
        }
    }

    /// Outbound event form for the downstream alerting consumer
    pub fn to_event(&self) -> CorroborationEvent {
        CorroborationEvent {
            species: self.scientific_name.clone(),
            common_name: self.common_name.clone(),
            detection_time: self.detection_time,
            time_diff_seconds: self.time_diff_seconds,
            station_a_confidence: self.station_a_confidence,
            station_b_confidence: self.station_b_confidence,
            avg_confidence: self.avg_confidence,
            verification_score: self.verification_score,
            realtime: self.realtime,
        }
    }
}
