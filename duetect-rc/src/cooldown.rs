//! Per-species emission cooldown
//!
//! A chorus of calls produces many valid pairs in quick succession; the
//! downstream alerting consumer only wants one. The tracker records the last
//! emitted corroboration per species and suppresses further emissions until
//! the cooldown elapses.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub struct CooldownTracker {
    cooldown_secs: f64,
    last_emitted: HashMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(cooldown_secs: f64) -> Self {
        Self {
            cooldown_secs,
            last_emitted: HashMap::new(),
        }
    }

    /// True if an emission for this species is still inside the cooldown.
    /// At exactly the cooldown boundary the species is eligible again.
    pub fn is_active(&self, species: &str, now: DateTime<Utc>) -> bool {
        self.last_emitted
            .get(species)
            .map(|last| (now - *last).num_milliseconds() as f64 / 1000.0 < self.cooldown_secs)
            .unwrap_or(false)
    }

    pub fn mark_emitted(&mut self, species: &str, now: DateTime<Utc>) {
        self.last_emitted.insert(species.to_string(), now);
    }

    /// Drop expired entries so the map does not grow with the species list
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cooldown_secs = self.cooldown_secs;
        self.last_emitted.retain(|_, last| {
            (now - *last).num_milliseconds() as f64 / 1000.0 < cooldown_secs
        });
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }
}
