// THEORY:
// The `observation` module is the entry point of the fusion layers. It defines
// the two shapes a single sensor report takes on its way into the engine:
//
// 1.  **Wire Record**: `SensorReading` is exactly what a sensor connection
//     delivers. Nothing about it is trusted. Any field may be missing or
//     nonsensical, and the claimed threat id is the sensor's own guess.
// 2.  **Validated Observation**: `Observation` is a reading that passed the
//     boundary checks. Only an `Observation` can reach the association engine,
//     so every layer below can assume a non-empty sensor id, a finite position
//     and a confidence in `[0, 1]`.
// 3.  **Dumb Data Container**: An `Observation` has no memory. It describes
//     one object, seen by one sensor, at one instant.

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};

/// One reading as delivered by a sensor connection, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorReading {
    pub sensor_id: Option<String>,
    /// The sensor's own id for the object. `-1` marks a sensor false positive.
    pub threat_id: i32,
    pub x: f64,
    pub y: f64,
    pub level: i32,
    pub confidence: f64,
    /// Unix timestamp in nanoseconds, as stamped by the sensor.
    pub timestamp: i64,
}

/// A validated report of one object by one sensor at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// The reporting sensor. Retained readings on a cluster are keyed by this.
    pub sensor_id: String,
    /// Informational only; association never trusts it.
    pub claimed_threat_id: i32,
    pub x: f64,
    pub y: f64,
    /// Integer severity.
    pub level: i32,
    /// Sensor confidence in `[0, 1]`, used as the consensus weight.
    pub confidence: f64,
    pub timestamp: i64,
}

impl Observation {
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl TryFrom<SensorReading> for Observation {
    type Error = FusionError;

    fn try_from(reading: SensorReading) -> Result<Self> {
        let sensor_id = match reading.sensor_id {
            Some(id) if !id.trim().is_empty() => id,
            Some(_) => return Err(FusionError::malformed("sensor id is empty")),
            None => return Err(FusionError::malformed("sensor id is missing")),
        };
        if !reading.x.is_finite() || !reading.y.is_finite() {
            return Err(FusionError::malformed(format!(
                "position ({}, {}) is not finite",
                reading.x, reading.y
            )));
        }
        if !(0.0..=1.0).contains(&reading.confidence) {
            return Err(FusionError::malformed(format!(
                "confidence {} is outside [0, 1]",
                reading.confidence
            )));
        }

        Ok(Self {
            sensor_id,
            claimed_threat_id: reading.threat_id,
            x: reading.x,
            y: reading.y,
            level: reading.level,
            confidence: reading.confidence,
            timestamp: reading.timestamp,
        })
    }
}
