// THEORY:
// This file is the main entry point for the `threat_fusion` library crate.
// It exports the `FusionCoordinator` and `FusionService` as the high-level
// interface: observations go in from any number of sensor streams, confirmed
// and smoothed detections come out of a bounded queue.
//
// The algorithmic layers (`core_modules`) hold no locks and know nothing about
// tasks or queues. All shared state and concurrency live in `pipeline` and
// `parallel_pipeline`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::FusionConfig;
pub use core_modules::observation::{Observation, SensorReading};
pub use error::{FusionError, Result};
pub use parallel_pipeline::{DetectionSink, FusionService, IngestSummary};
pub use pipeline::{ClusterId, ConfirmedThreat, CoordinatorStats, FusionCoordinator, TrackEstimate};
