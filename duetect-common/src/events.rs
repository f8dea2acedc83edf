//! Event types for the Duetect event system
//!
//! Provides the shared event definitions and the EventBus connecting the
//! external classifier publisher to the realtime correlator and downstream
//! alerting consumers.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// One of the two fixed sensor stations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Station {
    A,
    B,
}

impl Station {
    pub fn as_str(&self) -> &'static str {
        match self {
            Station::A => "A",
            Station::B => "B",
        }
    }

    /// The opposite station
    pub fn other(&self) -> Station {
        match self {
            Station::A => Station::B,
            Station::B => Station::A,
        }
    }

    pub fn parse(s: &str) -> Option<Station> {
        match s {
            "A" => Some(Station::A),
            "B" => Some(Station::B),
            _ => None,
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound species-detection event from the external classifier
///
/// `species` carries the display/common name; `scientific_name` is the stable
/// key used everywhere inside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Display/common name
    pub species: String,
    /// Stable scientific-name key
    pub scientific_name: String,
    /// Classifier confidence, 0.0-1.0
    pub confidence: f64,
    /// Originating station
    pub station: Station,
    /// When the detection occurred
    pub timestamp: DateTime<Utc>,
    /// Opaque reference to the source audio file
    pub source_file: String,
}

impl DetectionEvent {
    /// Validate required fields and confidence range.
    ///
    /// Invalid events are dropped with a log entry by the consumer; this
    /// never propagates as an error to the publisher.
    pub fn validate(&self) -> Result<()> {
        if self.scientific_name.trim().is_empty() {
            return Err(Error::MalformedEvent("empty scientific_name".into()));
        }
        if self.species.trim().is_empty() {
            return Err(Error::MalformedEvent("empty species name".into()));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::MalformedEvent(format!(
                "confidence out of range: {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Outbound corroboration event for the downstream alerting/display system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorroborationEvent {
    /// Stable scientific-name key
    pub species: String,
    /// Display/common name
    pub common_name: String,
    /// Event time: the earlier of the two detection timestamps
    pub detection_time: DateTime<Utc>,
    /// Absolute spacing between the two detections, in seconds
    pub time_diff_seconds: f64,
    pub station_a_confidence: f64,
    pub station_b_confidence: f64,
    pub avg_confidence: f64,
    /// Calibrated confidence that this pair is a true corroborated event
    pub verification_score: f64,
    /// True on the low-latency path, false for batch reconciliation
    pub realtime: bool,
}

/// Duetect event types
///
/// Events are broadcast via the EventBus and can be serialized for transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DuetectEvent {
    /// Single-station detection published by the classifier
    Detection {
        event: DetectionEvent,
        /// When the event entered the bus
        timestamp: DateTime<Utc>,
    },

    /// Cross-station corroboration emitted by the correlator or reconciler
    Corroboration {
        event: CorroborationEvent,
        /// When the corroboration was emitted
        timestamp: DateTime<Utc>,
    },

    /// Species statistics snapshot was rebuilt
    StatisticsRefreshed {
        /// Number of species in the new snapshot
        species_count: usize,
        /// When the refresh completed
        timestamp: DateTime<Utc>,
    },
}

impl DuetectEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            DuetectEvent::Detection { .. } => "Detection",
            DuetectEvent::Corroboration { .. } => "Corroboration",
            DuetectEvent::StatisticsRefreshed { .. } => "StatisticsRefreshed",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DuetectEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DuetectEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: DuetectEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<DuetectEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DuetectEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> DetectionEvent {
        DetectionEvent {
            species: "Common Loon".to_string(),
            scientific_name: "Gavia immer".to_string(),
            confidence: 0.91,
            station: Station::A,
            timestamp: Utc::now(),
            source_file: "station_a/2026-08-30-0412.wav".to_string(),
        }
    }

    #[test]
    fn valid_event_passes_validation() {
        assert!(sample_event().validate().is_ok());
    }

    #[test]
    fn out_of_range_confidence_rejected() {
        let mut event = sample_event();
        event.confidence = 1.5;
        assert!(matches!(
            event.validate(),
            Err(Error::MalformedEvent(_))
        ));

        event.confidence = f64::NAN;
        assert!(event.validate().is_err());
    }

    #[test]
    fn missing_species_key_rejected() {
        let mut event = sample_event();
        event.scientific_name = "  ".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn station_round_trips_through_str() {
        assert_eq!(Station::parse("A"), Some(Station::A));
        assert_eq!(Station::parse("B"), Some(Station::B));
        assert_eq!(Station::parse("C"), None);
        assert_eq!(Station::A.other(), Station::B);
    }

    #[test]
    fn event_bus_delivers_to_all_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(DuetectEvent::Detection {
            event: sample_event(),
            timestamp: Utc::now(),
        })
        .expect("emit should succeed");

        assert_eq!(rx1.try_recv().unwrap().event_type(), "Detection");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "Detection");
    }

    #[test]
    fn emit_lossy_tolerates_no_subscribers() {
        let bus = EventBus::new(2);
        bus.emit_lossy(DuetectEvent::StatisticsRefreshed {
            species_count: 0,
            timestamp: Utc::now(),
        });
        assert_eq!(bus.capacity(), 2);
    }

    #[test]
    fn detection_event_serializes_with_type_tag() {
        let event = DuetectEvent::Detection {
            event: sample_event(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Detection\""));

        let back: DuetectEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "Detection");
    }
}
