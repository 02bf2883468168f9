//! Shared helpers for the fusion integration tests.

#![allow(dead_code)]

use std::collections::HashSet;

use threat_fusion::{FusionCoordinator, SensorReading};

pub type ReadingResult = Result<SensorReading, String>;

pub fn reading(sensor: &str, x: f64, y: f64, confidence: f64) -> SensorReading {
    SensorReading {
        sensor_id: Some(sensor.to_owned()),
        threat_id: 0,
        x,
        y,
        level: 5,
        confidence,
        timestamp: 0,
    }
}

/// A deterministic jitter in `[-2, 2]` so repeated runs see identical input.
pub fn jitter(step: usize, sensor: usize) -> f64 {
    ((step * 7 + sensor * 3) % 5) as f64 - 2.0
}

/// Readings from one sensor hovering around `(x, y)`.
pub fn hovering_track(sensor: &str, index: usize, x: f64, y: f64, steps: usize) -> Vec<ReadingResult> {
    (0..steps)
        .map(|step| {
            Ok(reading(
                sensor,
                x + jitter(step, index),
                y + jitter(step + 1, index),
                0.7 + 0.3 * ((step % 3) as f64 / 2.0),
            ))
        })
        .collect()
}

/// Every live cluster retains exactly one reading per contributing sensor.
pub fn assert_cluster_invariants(coordinator: &FusionCoordinator) {
    coordinator.inspect(|engine| {
        for cluster in engine.clusters() {
            let distinct: HashSet<&str> = cluster
                .readings()
                .iter()
                .map(|r| r.sensor_id.as_str())
                .collect();
            assert_eq!(cluster.sensor_count, distinct.len(), "cluster {}", cluster.id);
            assert_eq!(cluster.readings().len(), distinct.len(), "cluster {}", cluster.id);
        }
    });
}
