//! Pulse oracle aggregation core.
//!
//! This crate provides the multi-source aggregation engine:
//! - Aggregator settings with profiles and source-set validation
//! - Weighted-median aggregation with outlier rejection
//! - Per-source health tracking (healthy / degraded / unreachable)
//! - Round orchestration with deadlines, quorum and publish/subscribe
//!
//! Sources are read through the `ChainClient` seam of `pulse-chain`, so the
//! engine runs unchanged against EVM, Solana or test transports.

mod aggregation;
mod aggregator;
pub mod config;
mod error;
mod events;
mod status;

pub use aggregation::{AggregateValue, AggregationAlgorithm, Outlier};
pub use aggregator::OracleAggregator;
pub use config::{
    validate, AggregatorSettings, ConfigSource, FileConfigSource, OracleFile, StaticConfigSource,
};
pub use error::{AggregationError, AggregatorError, ConfigError, QuorumStage, RoundError};
pub use events::{AggregatedPulseData, AggregatorState, RoundEvent, RoundFailure, SourceReading};
pub use status::{FailureReason, HealthThresholds, NodeHealth, NodeStatusTracker, QuantumNodeStatus};
