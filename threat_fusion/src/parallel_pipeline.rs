// THEORY:
// The `parallel_pipeline` module is the concurrent runtime around the
// coordinator. Every moving part is its own tokio task:
//
// - one ingestion task per connected sensor, draining that sensor's stream in
//   arrival order and feeding the shared coordinator;
// - one expiry sweeper on a fixed interval;
// - one relay task draining the confirmed-detection queue into a sink.
//
// Ingestion tasks only ever wait on their own stream. A stream that errors or
// ends stops its own task and nothing else; the shared cluster state is
// unaffected because every mutation completes inside the coordinator's lock
// before the task awaits again.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::FusionConfig;
use crate::core_modules::observation::SensorReading;
use crate::error::Result;
use crate::pipeline::{ConfirmedThreat, FusionCoordinator};

/// Destination for confirmed detections drained from the output queue.
pub trait DetectionSink: Send + 'static {
    fn deliver(&mut self, threat: ConfirmedThreat);
}

impl<F> DetectionSink for F
where
    F: FnMut(ConfirmedThreat) + Send + 'static,
{
    fn deliver(&mut self, threat: ConfirmedThreat) {
        (*self)(threat)
    }
}

/// Outcome of one sensor's ingestion task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub label: String,
    pub accepted: u64,
    pub rejected: u64,
    /// The stream error that ended the task, if it did not end cleanly.
    pub error: Option<String>,
}

/// Spawns and wires the tasks that drive a shared `FusionCoordinator`.
#[derive(Debug, Clone)]
pub struct FusionService {
    coordinator: Arc<FusionCoordinator>,
}

impl FusionService {
    /// Builds the coordinator. The returned receiver is the confirmed-detection
    /// queue; hand it to `spawn_relay` or drain it directly.
    pub fn new(config: FusionConfig) -> Result<(Self, mpsc::Receiver<ConfirmedThreat>)> {
        let (coordinator, receiver) = FusionCoordinator::new(config)?;
        Ok((
            Self {
                coordinator: Arc::new(coordinator),
            },
            receiver,
        ))
    }

    pub fn coordinator(&self) -> &Arc<FusionCoordinator> {
        &self.coordinator
    }

    /// Ingests one sensor's stream until it ends or yields an error.
    /// Malformed readings are rejected and skipped.
    pub fn spawn_sensor_stream<S, E>(&self, label: impl Into<String>, stream: S) -> JoinHandle<IngestSummary>
    where
        S: Stream<Item = std::result::Result<SensorReading, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        let label = label.into();
        tokio::spawn(async move {
            let mut summary = IngestSummary {
                label,
                accepted: 0,
                rejected: 0,
                error: None,
            };
            let mut stream = std::pin::pin!(stream);

            while let Some(item) = stream.next().await {
                match item {
                    Ok(reading) => match coordinator.ingest_reading(reading) {
                        Ok(_) => summary.accepted += 1,
                        Err(err) => {
                            summary.rejected += 1;
                            warn!(sensor = %summary.label, error = %err, "rejected reading");
                        }
                    },
                    Err(err) => {
                        warn!(sensor = %summary.label, error = %err, "sensor stream failed");
                        summary.error = Some(err.to_string());
                        break;
                    }
                }
            }

            info!(
                sensor = %summary.label,
                accepted = summary.accepted,
                rejected = summary.rejected,
                "sensor stream ended"
            );
            summary
        })
    }

    /// Sweeps stale clusters every `sweep_interval_ms` for the life of the task.
    pub fn spawn_expiry_sweeper(&self) -> JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let period = coordinator.config().sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                coordinator.sweep_expired();
            }
        })
    }

    /// Drains the confirmed-detection queue into `sink` until every sender is
    /// gone. Returns the number of detections delivered.
    pub fn spawn_relay<K>(mut receiver: mpsc::Receiver<ConfirmedThreat>, mut sink: K) -> JoinHandle<u64>
    where
        K: DetectionSink,
    {
        tokio::spawn(async move {
            let mut delivered = 0;
            while let Some(threat) = receiver.recv().await {
                sink.deliver(threat);
                delivered += 1;
            }
            delivered
        })
    }
}
