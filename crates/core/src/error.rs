//! Error types for configuration, aggregation and rounds.

use pulse_chain::SourceId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::aggregation::Outlier;
use crate::events::RoundFailure;

/// Rejected configuration. The previously active configuration stays in effect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("quorum {quorum} must be between 1 and the {enabled} enabled sources")]
    InvalidQuorum { quorum: usize, enabled: usize },

    #[error("source {source_id}: weight {weight} must be finite and non-negative")]
    InvalidWeight { source_id: SourceId, weight: f64 },

    #[error("source {source_id}: timeout must be positive")]
    InvalidTimeout { source_id: SourceId },

    #[error("source {source_id}: {reason}")]
    InvalidTarget { source_id: SourceId, reason: String },

    #[error("source {source_id}: endpoint is empty")]
    MissingEndpoint { source_id: SourceId },

    #[error("source identifier must not be empty")]
    EmptySourceId,

    #[error("duplicate source identifier {0}")]
    DuplicateSource(SourceId),

    #[error("round interval must be positive")]
    InvalidInterval,

    #[error("round deadline {deadline_ms}ms must be positive and not exceed the {interval_ms}ms interval")]
    InvalidDeadline { deadline_ms: u64, interval_ms: u64 },

    #[error("outlier tolerance {0} must be finite and positive")]
    InvalidTolerance(f64),

    #[error("staleness bound must be positive")]
    InvalidStaleness,

    #[error("health thresholds invalid: degraded after {degraded_after}, unreachable after {unreachable_after}")]
    InvalidHealthThresholds {
        degraded_after: u32,
        unreachable_after: u32,
    },

    #[error("event channel capacity must be positive")]
    InvalidEventCapacity,

    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Failure of the combination step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("no readings to aggregate")]
    NoReadings,

    #[error(
        "quorum lost after outlier rejection: {} of {} required ({} outliers)",
        .survivors,
        .required,
        .outliers.len()
    )]
    QuorumLost {
        required: usize,
        survivors: usize,
        outliers: Vec<Outlier>,
    },
}

/// Round stage at which quorum was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumStage {
    /// Too few sources returned a valid reading in time
    Fetch,
    /// Enough readings arrived but too many were rejected as outliers
    OutlierRejection,
}

impl std::fmt::Display for QuorumStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::OutlierRejection => write!(f, "outlier rejection"),
        }
    }
}

/// Round-level failure. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RoundError {
    #[error("quorum lost at {stage}: {available} of {required} required")]
    QuorumLost {
        stage: QuorumStage,
        required: usize,
        available: usize,
    },
}

/// Errors from aggregator lifecycle operations.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("aggregator is already running")]
    AlreadyRunning,

    #[error("round cancelled by stop")]
    Cancelled,

    #[error("round {} failed: {}", .0.round, .0.error)]
    RoundFailed(Arc<RoundFailure>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_error_display() {
        let err = RoundError::QuorumLost {
            stage: QuorumStage::OutlierRejection,
            required: 3,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "quorum lost at outlier rejection: 2 of 3 required"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidQuorum {
            quorum: 4,
            enabled: 3,
        };
        assert_eq!(
            err.to_string(),
            "quorum 4 must be between 1 and the 3 enabled sources"
        );

        let err: AggregatorError = ConfigError::InvalidStaleness.into();
        assert_eq!(err.to_string(), "staleness bound must be positive");
    }
}
