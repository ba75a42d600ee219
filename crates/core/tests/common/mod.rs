//! Scripted transport and fixtures shared by the aggregator tests.

#![allow(dead_code)]

use alloy::primitives::B256;
use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_chain::{ChainClient, ChainConfig, FetchError, ManualClock, RawPulse, SourceKind};
use pulse_core::{AggregatorSettings, OracleAggregator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const NOW_MS: u64 = 1_700_000_000_000;

/// What a scripted source does on its next read.
#[derive(Debug, Clone)]
pub enum Script {
    Value { value: f64, delay: Duration },
    Fail(FetchError),
    Invalid,
}

impl Script {
    pub fn value(value: f64) -> Self {
        Self::Value {
            value,
            delay: Duration::from_millis(20),
        }
    }

    pub fn slow(value: f64, delay: Duration) -> Self {
        Self::Value { value, delay }
    }

    pub fn unreachable() -> Self {
        Self::Fail(FetchError::Unreachable("connection refused".to_string()))
    }
}

/// Transport whose per-source behaviour can be changed between rounds.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, source: &str, script: Script) {
        self.scripts.lock().insert(source.to_string(), script);
    }

    pub fn calls(&self, source: &str) -> usize {
        self.calls.lock().get(source).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChainClient for ScriptedClient {
    async fn latest_pulse(&self, config: &ChainConfig) -> Result<RawPulse, FetchError> {
        *self.calls.lock().entry(config.id.clone()).or_default() += 1;

        let script = self
            .scripts
            .lock()
            .get(&config.id)
            .cloned()
            .unwrap_or_else(Script::unreachable);

        match script {
            Script::Value { value, delay } => {
                tokio::time::sleep(delay).await;
                Ok(RawPulse {
                    pulse_id: 7,
                    timestamp: NOW_MS / 1000,
                    data_hash: B256::repeat_byte(0x42),
                    value,
                    is_valid: true,
                })
            }
            Script::Invalid => Ok(RawPulse {
                pulse_id: 7,
                timestamp: NOW_MS / 1000,
                data_hash: B256::ZERO,
                value: 0.0,
                is_valid: false,
            }),
            Script::Fail(e) => Err(e),
        }
    }

    async fn probe(&self, _config: &ChainConfig) -> Result<u64, FetchError> {
        Ok(1)
    }
}

pub fn source(id: &str) -> ChainConfig {
    ChainConfig::new(
        id,
        SourceKind::Evm,
        "http://localhost:8545",
        "0x1234567890123456789012345678901234567890",
    )
    .with_timeout(Duration::from_secs(1))
}

pub fn settings(quorum: usize) -> AggregatorSettings {
    AggregatorSettings {
        quorum,
        interval_ms: 5_000,
        deadline_ms: 2_000,
        outlier_tolerance: 0.05,
        ..Default::default()
    }
}

pub fn aggregator(
    settings: AggregatorSettings,
    sources: Vec<ChainConfig>,
    client: Arc<ScriptedClient>,
) -> OracleAggregator {
    OracleAggregator::new(settings, sources, client, Arc::new(ManualClock::new(NOW_MS)))
        .expect("valid configuration")
}
