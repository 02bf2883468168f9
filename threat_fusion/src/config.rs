//! Tunable behavior of the fusion pipeline.
//!
//! Values come from three layers, each overriding the last: built-in
//! defaults, an optional JSON file named by `TF_CONFIG`, and individual
//! `TF_*` environment variables.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core_modules::world::WorldBounds;
use crate::error::{FusionError, Result};

/// Configuration for the `FusionCoordinator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Max wraparound distance (world units) for an observation to join a cluster.
    pub cluster_radius: f64,
    /// Distinct sensors required before a cluster is confirmed.
    pub min_sensors: usize,
    pub world_width: f64,
    pub world_height: f64,
    /// A cluster not updated for longer than this is removed by the sweeper.
    pub expiration_ms: u64,
    /// Period of the expiry sweeper.
    pub sweep_interval_ms: u64,
    /// Capacity of the confirmed-detection queue. Publishes beyond it are dropped.
    pub output_capacity: usize,
    /// Interval passed to `predict` before each estimator update.
    pub nominal_dt: f64,
    pub process_noise: f64,
    pub measurement_noise: f64,
    /// Drop a cluster's estimator when the cluster itself expires.
    pub prune_estimators_on_expiry: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            cluster_radius: 10.0,
            min_sensors: 2,
            world_width: 100.0,
            world_height: 100.0,
            expiration_ms: 2_000,
            sweep_interval_ms: 1_000,
            output_capacity: 100,
            nominal_dt: 0.1, // 100ms between confirmed updates
            process_noise: 0.1,
            measurement_noise: 1.0,
            prune_estimators_on_expiry: true,
        }
    }
}

impl FusionConfig {
    /// Defaults, then the `TF_CONFIG` file if set, then `TF_*` overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("TF_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_json_file(path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document. Absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_field(&lookup, "TF_CLUSTER_RADIUS", "cluster_radius", &mut self.cluster_radius)?;
        override_field(&lookup, "TF_MIN_SENSORS", "min_sensors", &mut self.min_sensors)?;
        override_field(&lookup, "TF_WORLD_WIDTH", "world_width", &mut self.world_width)?;
        override_field(&lookup, "TF_WORLD_HEIGHT", "world_height", &mut self.world_height)?;
        override_field(&lookup, "TF_EXPIRATION_MS", "expiration_ms", &mut self.expiration_ms)?;
        override_field(&lookup, "TF_SWEEP_INTERVAL_MS", "sweep_interval_ms", &mut self.sweep_interval_ms)?;
        override_field(&lookup, "TF_OUTPUT_CAPACITY", "output_capacity", &mut self.output_capacity)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.cluster_radius.is_finite() && self.cluster_radius > 0.0) {
            return Err(FusionError::invalid_config("cluster_radius", "must be a positive number"));
        }
        if self.min_sensors == 0 {
            return Err(FusionError::invalid_config("min_sensors", "must be at least 1"));
        }
        for (field, size) in [("world_width", self.world_width), ("world_height", self.world_height)] {
            if !(size.is_finite() && size > 0.0) {
                return Err(FusionError::invalid_config(field, "must be a positive number"));
            }
        }
        if self.expiration_ms == 0 {
            return Err(FusionError::invalid_config("expiration_ms", "must be non-zero"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(FusionError::invalid_config("sweep_interval_ms", "must be non-zero"));
        }
        if self.output_capacity == 0 {
            return Err(FusionError::invalid_config("output_capacity", "must be at least 1"));
        }
        if !(self.nominal_dt.is_finite() && self.nominal_dt >= 0.0) {
            return Err(FusionError::invalid_config("nominal_dt", "must be a non-negative number"));
        }
        if !(self.process_noise.is_finite() && self.process_noise >= 0.0) {
            return Err(FusionError::invalid_config("process_noise", "must be a non-negative number"));
        }
        if !(self.measurement_noise.is_finite() && self.measurement_noise > 0.0) {
            return Err(FusionError::invalid_config("measurement_noise", "must be a positive number"));
        }
        Ok(())
    }

    pub fn world(&self) -> WorldBounds {
        WorldBounds::new(self.world_width, self.world_height)
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_millis(self.expiration_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn override_field<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &'static str,
    target: &mut T,
) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| FusionError::invalid_config(field, format!("{key}={raw:?}: {e}")))?;
    }
    Ok(())
}
