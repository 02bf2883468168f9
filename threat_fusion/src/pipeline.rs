// THEORY:
// The `pipeline` module is the top-level API of the fusion engine. The
// `FusionCoordinator` owns every piece of shared mutable state (the association
// engine and the per-cluster estimators) and is the only way to reach it.
//
// Per observation it runs three stages:
// 1.  **Association**: the engine folds the observation into a cluster.
// 2.  **Smoothing**: if that cluster is confirmed, its estimator (created on first
//     confirmation) predicts one nominal step and corrects with the consensus.
// 3.  **Publication**: the smoothed view goes onto a bounded queue with
//     `try_send`. A full queue drops the event and bumps a counter. The caller
//     never waits on the consumer.
//
// Stages 1 and 2 run under one write lock, so each observation is applied
// atomically. Snapshot readers share a read lock. The lock is never held across
// an await point or I/O, and publication happens after it is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::FusionConfig;
use crate::core_modules::fusion_engine::FusionEngine;
use crate::core_modules::observation::{Observation, SensorReading};
use crate::core_modules::state_estimator::{EstimatorState, StateEstimator};
use crate::core_modules::world::WorldBounds;
use crate::error::Result;

// Re-export key data structures for the public API.
pub use crate::core_modules::cluster::{ClusterId, ConfirmedThreat};

/// Monotonic counters describing the coordinator's traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Observations admitted into the engine.
    pub ingested: u64,
    /// Readings rejected at the boundary.
    pub rejected: u64,
    /// Confirmed views accepted by the output queue.
    pub published: u64,
    /// Confirmed views dropped because the queue was full or closed.
    pub dropped: u64,
    /// Clusters removed by expiry sweeps.
    pub expired: u64,
}

/// Diagnostic view of one cluster's estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackEstimate {
    pub state: EstimatorState,
    pub uncertainty: f64,
}

/// Everything behind the coordinator's lock.
struct FusionState {
    engine: FusionEngine,
    estimators: HashMap<ClusterId, StateEstimator>,
}

#[derive(Default)]
struct Counters {
    ingested: AtomicU64,
    rejected: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    expired: AtomicU64,
}

/// Owns the fusion state and serializes access to it.
pub struct FusionCoordinator {
    config: FusionConfig,
    world: WorldBounds,
    state: RwLock<FusionState>,
    output: mpsc::Sender<ConfirmedThreat>,
    counters: Counters,
}

impl FusionCoordinator {
    /// Builds a coordinator and returns it with the receiving end of its
    /// confirmed-detection queue.
    pub fn new(config: FusionConfig) -> Result<(Self, mpsc::Receiver<ConfirmedThreat>)> {
        config.validate()?;
        let (output, receiver) = mpsc::channel(config.output_capacity);
        let engine = FusionEngine::new(
            config.cluster_radius,
            config.min_sensors,
            config.expiration(),
            config.world(),
        );
        let coordinator = Self {
            world: config.world(),
            config,
            state: RwLock::new(FusionState {
                engine,
                estimators: HashMap::new(),
            }),
            output,
            counters: Counters::default(),
        };
        Ok((coordinator, receiver))
    }

    /// Validates a raw reading and ingests it. A rejected reading never
    /// touches cluster state.
    pub fn ingest_reading(&self, reading: SensorReading) -> Result<Option<ConfirmedThreat>> {
        match Observation::try_from(reading) {
            Ok(observation) => Ok(self.ingest(observation)),
            Err(err) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Fuses one observation. Returns the smoothed view that was offered to the
    /// output queue, whether or not the queue accepted it.
    pub fn ingest(&self, observation: Observation) -> Option<ConfirmedThreat> {
        debug!(
            sensor = %observation.sensor_id,
            threat = observation.claimed_threat_id,
            x = observation.x,
            y = observation.y,
            "received reading"
        );
        self.counters.ingested.fetch_add(1, Ordering::Relaxed);

        let smoothed = {
            let mut guard = self.state.write();
            let FusionState { engine, estimators } = &mut *guard;
            let mut view = engine.process_observation(observation, Instant::now())?;

            let estimator = estimators.entry(view.id).or_insert_with(|| {
                StateEstimator::new(self.config.process_noise, self.config.measurement_noise)
            });
            estimator.predict(self.config.nominal_dt);
            // Present the measurement on the estimator's side of any world edge.
            let (measured_x, measured_y) = if estimator.is_initialized() {
                let state = estimator.state();
                self.world.unwrap_near((state.x, state.y), (view.x, view.y))
            } else {
                (view.x, view.y)
            };
            estimator.update(measured_x, measured_y);
            (view.x, view.y) = self.smoothed_position(estimator);
            view
        };

        self.publish(smoothed.clone());
        Some(smoothed)
    }

    fn publish(&self, view: ConfirmedThreat) {
        match self.output.try_send(view) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(view)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(cluster_id = view.id, "output queue full, dropping confirmed view");
            }
            Err(TrySendError::Closed(view)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(cluster_id = view.id, "output queue closed, dropping confirmed view");
            }
        }
    }

    /// Snapshot of every confirmed cluster, with the smoothed position for
    /// clusters that have an estimator.
    pub fn confirmed_clusters(&self) -> Vec<ConfirmedThreat> {
        let guard = self.state.read();
        guard
            .engine
            .confirmed_clusters()
            .into_iter()
            .map(|mut view| {
                if let Some(estimator) = guard.estimators.get(&view.id) {
                    (view.x, view.y) = self.smoothed_position(estimator);
                }
                view
            })
            .collect()
    }

    /// Removes stale clusters and, if configured, their estimators. Returns the
    /// number of clusters removed.
    pub fn sweep_expired(&self) -> usize {
        let removed = {
            let mut guard = self.state.write();
            let removed = guard.engine.cleanup(Instant::now());
            if self.config.prune_estimators_on_expiry {
                for id in &removed {
                    guard.estimators.remove(id);
                }
            }
            removed
        };

        if !removed.is_empty() {
            self.counters
                .expired
                .fetch_add(removed.len() as u64, Ordering::Relaxed);
            debug!(removed = removed.len(), ids = ?removed, "expired stale clusters");
        }
        removed.len()
    }

    /// The estimator's state for a cluster, with the position mapped back
    /// into the world.
    pub fn estimate(&self, id: ClusterId) -> Option<TrackEstimate> {
        let guard = self.state.read();
        guard.estimators.get(&id).map(|estimator| {
            let mut state = estimator.state();
            (state.x, state.y) = self.smoothed_position(estimator);
            TrackEstimate {
                state,
                uncertainty: estimator.uncertainty(),
            }
        })
    }

    /// The estimator follows objects across edges without wrapping, so its
    /// position is normalized on the way out.
    fn smoothed_position(&self, estimator: &StateEstimator) -> (f64, f64) {
        let state = estimator.state();
        self.world.normalize((state.x, state.y))
    }

    /// Number of live clusters, confirmed or not.
    pub fn cluster_count(&self) -> usize {
        self.state.read().engine.len()
    }

    pub fn estimator_count(&self) -> usize {
        self.state.read().estimators.len()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Runs `f` against the live clusters under the read lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&FusionEngine) -> R) -> R {
        f(&self.state.read().engine)
    }
}

impl std::fmt::Debug for FusionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionCoordinator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn obs(sensor: &str, x: f64, y: f64) -> Observation {
        Observation {
            sensor_id: sensor.to_owned(),
            claimed_threat_id: 0,
            x,
            y,
            level: 6,
            confidence: 1.0,
            timestamp: 0,
        }
    }

    fn coordinator(config: FusionConfig) -> (FusionCoordinator, mpsc::Receiver<ConfirmedThreat>) {
        FusionCoordinator::new(config).unwrap()
    }

    #[tokio::test]
    async fn confirmed_update_is_smoothed_and_published() {
        let (coordinator, mut rx) = coordinator(FusionConfig::default());

        assert!(coordinator.ingest(obs("a", 10.0, 10.0)).is_none());
        let view = coordinator.ingest(obs("b", 12.0, 11.0)).unwrap();
        // First estimator update seeds from the consensus itself.
        assert!((view.x - 11.0).abs() < 1e-9);
        assert!((view.y - 10.5).abs() < 1e-9);
        assert_eq!(view.sensor_count, 2);
        assert_eq!(view.level, 6);

        assert_eq!(rx.recv().await.unwrap(), view);
        assert!(coordinator.ingest(obs("c", 90.0, 90.0)).is_none());
        assert_eq!(coordinator.cluster_count(), 2);
        assert_eq!(coordinator.estimator_count(), 1);
    }

    #[tokio::test]
    async fn later_updates_lag_behind_the_raw_consensus() {
        let (coordinator, _rx) = coordinator(FusionConfig::default());
        coordinator.ingest(obs("a", 10.0, 10.0));
        coordinator.ingest(obs("b", 10.0, 10.0));
        let view = coordinator.ingest(obs("b", 14.0, 10.0)).unwrap();
        // Raw consensus x is 12; the estimator only moves part of the way.
        assert!(view.x > 10.0 && view.x < 12.0, "x = {}", view.x);

        let estimate = coordinator.estimate(view.id).unwrap();
        assert_eq!(estimate.state.x, view.x);
        assert!(estimate.state.vx > 0.0);
    }

    #[tokio::test]
    async fn smoothing_follows_an_object_across_the_edge() {
        let config = FusionConfig {
            min_sensors: 1,
            ..Default::default()
        };
        let (coordinator, _rx) = coordinator(config);
        for x in [99.0, 0.5, 1.5, 2.0] {
            let view = coordinator.ingest(obs("a", x, 50.0)).unwrap();
            assert_eq!(view.id, 1);
            assert!(view.x.min(100.0 - view.x) < 2.5, "reported x = {} for input {x}", view.x);
            assert!((0.0..100.0).contains(&view.x));
        }
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let config = FusionConfig {
            min_sensors: 1,
            output_capacity: 2,
            ..Default::default()
        };
        let (coordinator, mut rx) = coordinator(config);

        for i in 0..3 {
            let view = coordinator.ingest(obs("a", 10.0 + i as f64, 10.0));
            assert!(view.is_some());
        }
        let stats = coordinator.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.dropped, 1);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_counts_as_a_drop() {
        let config = FusionConfig {
            min_sensors: 1,
            ..Default::default()
        };
        let (coordinator, rx) = coordinator(config);
        drop(rx);
        assert!(coordinator.ingest(obs("a", 10.0, 10.0)).is_some());
        assert_eq!(coordinator.stats().dropped, 1);
    }

    #[tokio::test]
    async fn malformed_reading_is_rejected_before_the_engine() {
        let (coordinator, _rx) = coordinator(FusionConfig::default());
        let reading = SensorReading {
            sensor_id: None,
            x: 10.0,
            y: 10.0,
            confidence: 1.0,
            ..Default::default()
        };
        assert!(coordinator.ingest_reading(reading).is_err());
        assert_eq!(coordinator.cluster_count(), 0);
        assert_eq!(coordinator.stats().rejected, 1);
        assert_eq!(coordinator.stats().ingested, 0);
    }

    #[tokio::test]
    async fn snapshot_reflects_smoothed_positions() {
        let (coordinator, _rx) = coordinator(FusionConfig::default());
        coordinator.ingest(obs("a", 10.0, 10.0));
        coordinator.ingest(obs("b", 10.0, 10.0));
        let view = coordinator.ingest(obs("b", 14.0, 10.0)).unwrap();

        let snapshot = coordinator.confirmed_clusters();
        assert_eq!(snapshot, vec![view]);
        let raw_x = coordinator.inspect(|engine| engine.cluster(1).unwrap().x);
        assert!((raw_x - 12.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_stale_clusters_and_their_estimators() {
        let config = FusionConfig {
            min_sensors: 1,
            ..Default::default()
        };
        let (coordinator, _rx) = coordinator(config);
        coordinator.ingest(obs("a", 10.0, 10.0));
        tokio::time::advance(Duration::from_millis(1500)).await;
        coordinator.ingest(obs("a", 60.0, 60.0));
        tokio::time::advance(Duration::from_millis(1000)).await;

        assert_eq!(coordinator.sweep_expired(), 1);
        let ids: Vec<_> = coordinator.confirmed_clusters().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2]);
        assert!(coordinator.estimate(1).is_none());
        assert!(coordinator.estimate(2).is_some());
        assert_eq!(coordinator.stats().expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn estimators_can_outlive_their_clusters() {
        let config = FusionConfig {
            min_sensors: 1,
            prune_estimators_on_expiry: false,
            ..Default::default()
        };
        let (coordinator, _rx) = coordinator(config);
        coordinator.ingest(obs("a", 10.0, 10.0));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(coordinator.sweep_expired(), 1);
        assert_eq!(coordinator.cluster_count(), 0);
        assert_eq!(coordinator.estimator_count(), 1);
    }
}
