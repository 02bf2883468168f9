// THEORY:
// A `TrackedCluster` is the fused view of one physical object. Where an
// `Observation` is one sensor's opinion, a cluster holds the most recent opinion
// of every sensor that has reported the object and reduces them to a consensus.
//
// Key architectural principles:
// 1.  **One Reading Per Sensor**: The cluster retains at most one reading per
//     sensor id. A sensor that reports again replaces its earlier reading in
//     place, so a single chatty sensor can never confirm an object alone.
// 2.  **Consensus Is Derived**: Position, level and confidence are recomputed
//     from the retained readings after every mutation. They are never nudged
//     incrementally, so they cannot drift from the readings they summarize.
// 3.  **Sticky Confirmation**: Once enough distinct sensors agree, the cluster is
//     confirmed for the rest of its life. There is no demotion path.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core_modules::observation::Observation;
use crate::core_modules::world::WorldBounds;

/// Cluster identifiers are assigned monotonically and never reused.
pub type ClusterId = u64;

/// The published record for a confirmed cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedThreat {
    pub id: ClusterId,
    pub x: f64,
    pub y: f64,
    pub level: i32,
    pub confidence: f64,
    pub sensor_count: usize,
}

/// The fused, multi-sensor state of one tracked object.
#[derive(Debug, Clone)]
pub struct TrackedCluster {
    pub id: ClusterId,
    /// Consensus position (circular mean of the retained readings).
    pub x: f64,
    pub y: f64,
    /// Truncated integer mean of the retained levels.
    pub level: i32,
    /// Arithmetic mean of the retained confidences.
    pub confidence: f64,
    /// Number of distinct sensors currently retained.
    pub sensor_count: usize,
    /// When the consensus was last recomputed. Drives expiry.
    pub last_update: Instant,
    /// Set the first time `sensor_count` reaches the confirmation threshold.
    pub confirmed: bool,
    readings: Vec<Observation>,
}

impl TrackedCluster {
    /// Opens a cluster seeded with a single observation.
    pub(crate) fn new(id: ClusterId, observation: Observation, world: &WorldBounds, now: Instant) -> Self {
        let (x, y) = world.normalize(observation.position());
        Self {
            id,
            x,
            y,
            level: observation.level,
            confidence: observation.confidence,
            sensor_count: 1,
            last_update: now,
            confirmed: false,
            readings: vec![observation],
        }
    }

    /// Folds an observation into the cluster and recomputes the consensus.
    pub(crate) fn absorb(&mut self, observation: Observation, world: &WorldBounds, now: Instant) {
        match self
            .readings
            .iter_mut()
            .find(|r| r.sensor_id == observation.sensor_id)
        {
            Some(existing) => {
                existing.x = observation.x;
                existing.y = observation.y;
                existing.level = observation.level;
                existing.confidence = observation.confidence;
                existing.timestamp = observation.timestamp;
            }
            None => {
                self.readings.push(observation);
                self.sensor_count = self.readings.len();
            }
        }
        self.recalculate(world, now);
    }

    /// Marks the cluster confirmed if it has reached `min_sensors`.
    /// Returns true only on the transition.
    pub(crate) fn check_confirmation(&mut self, min_sensors: usize) -> bool {
        if !self.confirmed && self.sensor_count >= min_sensors {
            self.confirmed = true;
            return true;
        }
        false
    }

    fn recalculate(&mut self, world: &WorldBounds, now: Instant) {
        if let Some((x, y)) = world.circular_mean(
            self.readings
                .iter()
                .map(|r| (r.x, r.y, r.confidence)),
        ) {
            self.x = x;
            self.y = y;
        }

        let count = self.readings.len().max(1);
        let level_sum: i64 = self.readings.iter().map(|r| i64::from(r.level)).sum();
        let confidence_sum: f64 = self.readings.iter().map(|r| r.confidence).sum();
        self.level = (level_sum / count as i64) as i32;
        self.confidence = confidence_sum / count as f64;
        self.last_update = now;
    }

    /// The retained readings, one per contributing sensor.
    pub fn readings(&self) -> &[Observation] {
        &self.readings
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn is_stale(&self, now: Instant, expiration: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_update) > expiration
    }

    pub fn to_view(&self) -> ConfirmedThreat {
        ConfirmedThreat {
            id: self.id,
            x: self.x,
            y: self.y,
            level: self.level,
            confidence: self.confidence,
            sensor_count: self.sensor_count,
        }
    }
}
