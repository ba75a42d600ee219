//! Source configuration.

use super::{SourceId, SourceKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chain identifier as published by the network (numeric for EVM, named for Solana clusters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainId {
    Numeric(u64),
    Named(String),
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{}", id),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Immutable description of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Unique source identifier
    pub id: SourceId,
    /// Ledger family
    #[serde(default)]
    pub kind: SourceKind,
    /// RPC endpoint (opaque to the aggregator)
    pub endpoint: String,
    /// Oracle contract address or program account
    pub target: String,
    /// Per-source fetch timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Relative weight in the weighted median
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Whether the source is polled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// Network chain ID
    #[serde(default)]
    pub chain_id: Option<ChainId>,
    /// Explorer URL for dashboards
    #[serde(default)]
    pub explorer: Option<String>,
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

impl ChainConfig {
    /// Create an enabled source with default timeout and weight.
    pub fn new(
        id: impl Into<SourceId>,
        kind: SourceKind,
        endpoint: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            endpoint: endpoint.into(),
            target: target.into(),
            timeout_ms: default_timeout_ms(),
            weight: default_weight(),
            enabled: default_enabled(),
            name: None,
            chain_id: None,
            explorer: None,
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the per-source timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the human-readable name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the chain ID.
    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Mark the source as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Get timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Name for display, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
