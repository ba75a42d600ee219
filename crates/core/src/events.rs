//! Round results and lifecycle state.

use alloy::primitives::B256;
use pulse_chain::{FetchError, PulseData, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RoundError;

/// One contributing source's reading as published in a round result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReading {
    pub value: f64,
    pub pulse_id: u64,
    pub data_hash: B256,
    /// Source-reported timestamp (unix seconds)
    pub reported_at: u64,
    pub latency_ms: u64,
}

impl From<&PulseData> for SourceReading {
    fn from(pulse: &PulseData) -> Self {
        Self {
            value: pulse.value,
            pulse_id: pulse.pulse_id,
            data_hash: pulse.data_hash,
            reported_at: pulse.reported_at,
            latency_ms: pulse.latency.as_millis() as u64,
        }
    }
}

/// Result of a successful round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPulseData {
    /// Monotonic round number
    pub round: u64,
    /// Combined value
    pub value: f64,
    /// Sources whose readings contributed
    pub contributors: Vec<SourceId>,
    /// Contributing readings by source
    pub readings: BTreeMap<SourceId, SourceReading>,
    /// Sources that failed to deliver a reading
    pub failures: BTreeMap<SourceId, FetchError>,
    /// Sources whose readings were rejected as outliers
    pub outliers: Vec<SourceId>,
    /// Round start (unix ms)
    pub timestamp_ms: u64,
    /// Quorum the round was evaluated against
    pub quorum: usize,
    /// Agreement indicator in `[0, 1]`
    pub confidence: f64,
    /// Value reached the consensus threshold (always true without one)
    pub consensus_reached: bool,
}

/// Result of a round that lost quorum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundFailure {
    pub round: u64,
    pub error: RoundError,
    /// Readings that did arrive
    pub readings: Vec<PulseData>,
    pub failures: BTreeMap<SourceId, FetchError>,
    pub outliers: Vec<SourceId>,
    /// Round start (unix ms)
    pub timestamp_ms: u64,
}

/// Round outcome delivered to subscribers.
#[derive(Debug, Clone)]
pub enum RoundEvent {
    Published(Arc<AggregatedPulseData>),
    Failed(Arc<RoundFailure>),
}

impl RoundEvent {
    pub fn round(&self) -> u64 {
        match self {
            Self::Published(data) => data.round,
            Self::Failed(failure) => failure.round,
        }
    }
}

/// Aggregator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorState {
    /// No round in progress and no scheduler armed
    Idle,
    /// Fetches in flight
    Polling,
    /// Combining readings and updating node status
    Aggregating,
    /// Last round's outcome delivered
    Published,
}

impl std::fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Polling => write!(f, "polling"),
            Self::Aggregating => write!(f, "aggregating"),
            Self::Published => write!(f, "published"),
        }
    }
}
