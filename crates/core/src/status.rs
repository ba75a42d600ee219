//! Per-source health tracking.

use parking_lot::RwLock;
use pulse_chain::{ChainConfig, FetchError, PulseData, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Derived health of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Healthy,
    Degraded,
    Unreachable,
}

impl std::fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Why a source did not contribute to a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The fetch itself failed
    Fetch(FetchError),
    /// The reading arrived but was rejected as an outlier
    Outlier { value: f64, median: f64 },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "{}", e),
            Self::Outlier { value, median } => {
                write!(f, "outlier: {} deviates from median {}", value, median)
            }
        }
    }
}

/// Consecutive-failure thresholds for health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Failures at which a source becomes degraded
    pub degraded_after: u32,
    /// Failures beyond which a source becomes unreachable
    pub unreachable_after: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_after: 1,
            unreachable_after: 3,
        }
    }
}

impl HealthThresholds {
    /// Classify a consecutive-failure count.
    pub fn classify(&self, consecutive_failures: u32) -> NodeHealth {
        if consecutive_failures > self.unreachable_after {
            NodeHealth::Unreachable
        } else if consecutive_failures >= self.degraded_after {
            NodeHealth::Degraded
        } else {
            NodeHealth::Healthy
        }
    }
}

/// Rolling health record of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumNodeStatus {
    pub source: SourceId,
    pub enabled: bool,
    pub health: NodeHealth,
    pub consecutive_failures: u32,
    /// Local time of the last success (unix ms)
    pub last_success_ms: Option<u64>,
    pub last_failure: Option<FailureReason>,
    pub last_latency: Option<Duration>,
    /// Last accepted value
    pub last_value: Option<f64>,
    pub last_pulse_id: Option<u64>,
    /// Source-reported timestamp of the last accepted reading (unix seconds)
    pub last_reported_at: Option<u64>,
}

impl QuantumNodeStatus {
    fn new(config: &ChainConfig) -> Self {
        Self {
            source: config.id.clone(),
            enabled: config.enabled,
            health: NodeHealth::Healthy,
            consecutive_failures: 0,
            last_success_ms: None,
            last_failure: None,
            last_latency: None,
            last_value: None,
            last_pulse_id: None,
            last_reported_at: None,
        }
    }

    /// Milliseconds since the last accepted reading was produced at the source.
    pub fn staleness_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_reported_at
            .map(|ts| now_ms.saturating_sub(ts.saturating_mul(1000)))
    }
}

/// Holds exactly one [`QuantumNodeStatus`] per configured source.
#[derive(Debug)]
pub struct NodeStatusTracker {
    thresholds: HealthThresholds,
    records: RwLock<BTreeMap<SourceId, QuantumNodeStatus>>,
}

impl NodeStatusTracker {
    /// Create a tracker with a healthy record for every source.
    pub fn new(sources: &[ChainConfig], thresholds: HealthThresholds) -> Self {
        let records = sources
            .iter()
            .map(|s| (s.id.clone(), QuantumNodeStatus::new(s)))
            .collect();

        Self {
            thresholds,
            records: RwLock::new(records),
        }
    }

    /// Record a successful read.
    pub fn record_success(&self, source: &str, latency: Duration, timestamp_ms: u64) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(source) else {
            debug!(source = source, "Ignoring success for unknown source");
            return;
        };

        Self::apply_success(record, latency, timestamp_ms);
    }

    /// Record an accepted reading, keeping its value for dashboards.
    pub fn record_reading(&self, reading: &PulseData, timestamp_ms: u64) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(&reading.source) else {
            debug!(source = %reading.source, "Ignoring reading for unknown source");
            return;
        };

        Self::apply_success(record, reading.latency, timestamp_ms);
        record.last_value = Some(reading.value);
        record.last_pulse_id = Some(reading.pulse_id);
        record.last_reported_at = Some(reading.reported_at);
    }

    fn apply_success(record: &mut QuantumNodeStatus, latency: Duration, timestamp_ms: u64) {
        if record.health != NodeHealth::Healthy {
            info!(
                source = %record.source,
                previous = %record.health,
                failures = record.consecutive_failures,
                "Source recovered"
            );
        }

        record.consecutive_failures = 0;
        record.health = NodeHealth::Healthy;
        record.last_success_ms = Some(timestamp_ms);
        record.last_latency = Some(latency);
    }

    /// Record a failed or rejected read.
    pub fn record_failure(&self, source: &str, reason: FailureReason) {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(source) else {
            debug!(source = source, "Ignoring failure for unknown source");
            return;
        };

        if let FailureReason::Fetch(FetchError::Timeout { after }) = &reason {
            record.last_latency = Some(*after);
        }

        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        let health = self.thresholds.classify(record.consecutive_failures);

        if health != record.health {
            warn!(
                source = source,
                from = %record.health,
                to = %health,
                failures = record.consecutive_failures,
                reason = %reason,
                "Source health changed"
            );
        }

        record.health = health;
        record.last_failure = Some(reason);
    }

    /// Consistent point-in-time copy of every record.
    pub fn snapshot(&self) -> BTreeMap<SourceId, QuantumNodeStatus> {
        self.records.read().clone()
    }

    /// Current record of one source.
    pub fn get(&self, source: &str) -> Option<QuantumNodeStatus> {
        self.records.read().get(source).cloned()
    }

    /// Align records with a new source set: surviving ids keep their history,
    /// new ids start healthy, dropped ids are removed.
    pub fn resync(&self, sources: &[ChainConfig]) {
        let mut records = self.records.write();
        let before = records.len();

        records.retain(|id, _| sources.iter().any(|s| &s.id == id));
        let removed = before - records.len();

        let mut added = 0;
        for source in sources {
            match records.get_mut(&source.id) {
                Some(record) => record.enabled = source.enabled,
                None => {
                    records.insert(source.id.clone(), QuantumNodeStatus::new(source));
                    added += 1;
                }
            }
        }

        debug!(added = added, removed = removed, total = records.len(), "Resynced node status");
    }
}
