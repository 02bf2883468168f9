//! Error types for the fusion engine.
//!
//! Only the boundaries can fail: a reading that cannot be admitted into
//! cluster state, or a configuration that cannot be loaded. Queue saturation
//! and lock contention are not errors and never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FusionError {
    /// A sensor reading failed validation and was not admitted.
    #[error("malformed observation: {reason}")]
    MalformedObservation { reason: String },

    /// A configuration value is out of range or unparseable.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl FusionError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedObservation {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;
