//! Aggregator settings with profile support.
//!
//! Provides round timing, quorum, outlier tolerance and health thresholds
//! with named profiles (default, testnet, mainnet).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::status::HealthThresholds;

/// Runtime settings of one aggregator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorSettings {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Round interval (milliseconds)
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Round deadline, measured from round start (milliseconds)
    #[serde(default = "default_deadline")]
    pub deadline_ms: u64,

    /// Minimum number of contributing sources
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Maximum relative deviation from the weighted median
    #[serde(default = "default_tolerance")]
    pub outlier_tolerance: f64,

    /// Maximum age of a source-reported timestamp (milliseconds)
    #[serde(default = "default_staleness")]
    pub staleness_ms: u64,

    /// Consecutive failures before a source is degraded
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,

    /// Consecutive failures beyond which a source is unreachable
    #[serde(default = "default_unreachable_after")]
    pub unreachable_after: u32,

    /// Aggregate at or above which consensus is reached
    #[serde(default)]
    pub consensus_threshold: Option<f64>,

    /// Upper bound for reported values
    #[serde(default)]
    pub max_value: Option<f64>,

    /// Round event channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_profile_name() -> String {
    "default".to_string()
}
fn default_interval() -> u64 {
    10_000
}
fn default_deadline() -> u64 {
    5_000
}
fn default_quorum() -> usize {
    1
}
fn default_tolerance() -> f64 {
    0.10
}
fn default_staleness() -> u64 {
    60_000
}
fn default_degraded_after() -> u32 {
    1
}
fn default_unreachable_after() -> u32 {
    3
}
fn default_event_capacity() -> usize {
    64
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            interval_ms: default_interval(),
            deadline_ms: default_deadline(),
            quorum: default_quorum(),
            outlier_tolerance: default_tolerance(),
            staleness_ms: default_staleness(),
            degraded_after: default_degraded_after(),
            unreachable_after: default_unreachable_after(),
            consensus_threshold: None,
            max_value: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl AggregatorSettings {
    /// Testnet profile: 9s pulse cadence, fidelity scores out of 100,
    /// consensus at 80.
    pub fn testnet() -> Self {
        Self {
            profile: "testnet".to_string(),
            interval_ms: 9_000,
            deadline_ms: 6_000,
            quorum: 1,
            outlier_tolerance: 0.15,
            staleness_ms: 120_000,
            consensus_threshold: Some(80.0),
            max_value: Some(100.0),
            ..Default::default()
        }
    }

    /// Mainnet profile with tighter tolerance and a two-source quorum.
    pub fn mainnet() -> Self {
        Self {
            profile: "mainnet".to_string(),
            interval_ms: 9_000,
            deadline_ms: 5_000,
            quorum: 2,
            outlier_tolerance: 0.05,
            staleness_ms: 30_000,
            consensus_threshold: Some(80.0),
            max_value: Some(100.0),
            ..Default::default()
        }
    }

    /// Get profile from environment variable PULSE_PROFILE, or default.
    /// Supported values: testnet, mainnet
    pub fn from_env() -> Self {
        let profile = std::env::var("PULSE_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    /// Resolve a profile by name, falling back to the default profile.
    pub fn from_profile(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "testnet" | "test" => Self::testnet(),
            "mainnet" | "main" | "prod" => Self::mainnet(),
            _ => Self::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn staleness_bound(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }

    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            degraded_after: self.degraded_after,
            unreachable_after: self.unreachable_after,
        }
    }

    /// Log the current settings.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Aggregator settings loaded");
        tracing::info!(
            interval_ms = self.interval_ms,
            deadline_ms = self.deadline_ms,
            staleness_ms = self.staleness_ms,
            "Round timing"
        );
        tracing::info!(
            quorum = self.quorum,
            tolerance = self.outlier_tolerance,
            consensus_threshold = ?self.consensus_threshold,
            max_value = ?self.max_value,
            "Aggregation parameters"
        );
        tracing::info!(
            degraded_after = self.degraded_after,
            unreachable_after = self.unreachable_after,
            "Health thresholds"
        );
    }
}
