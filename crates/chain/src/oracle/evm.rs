//! EVM pulse oracle client.

use super::{ChainClient, ChainConfig, RawPulse};
use crate::error::FetchError;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

sol! {
    /// Pulse record stored by the oracle contract
    #[derive(Debug)]
    struct Pulse {
        uint256 timestamp;
        bytes32 dataHash;
        uint256 fidelityScore;
        bool isValid;
    }

    /// Pulse oracle contract interface
    #[sol(rpc)]
    interface IPulseOracle {
        function getLatestPulse() external view returns (Pulse memory);

        function pulseCount() external view returns (uint256);
    }
}

/// Reads pulses from the oracle contract over HTTP JSON-RPC.
///
/// Keeps one provider per endpoint so connections are reused across rounds.
#[derive(Default)]
pub struct EvmChainClient {
    providers: RwLock<HashMap<String, DynProvider>>,
}

impl std::fmt::Debug for EvmChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmChainClient")
            .field("providers", &self.providers.read().len())
            .finish()
    }
}

impl EvmChainClient {
    /// Create a new EVM client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider for the source's endpoint, built on first use.
    fn provider(&self, config: &ChainConfig) -> Result<DynProvider, FetchError> {
        if let Some(provider) = self.providers.read().get(&config.endpoint) {
            return Ok(provider.clone());
        }

        let url = Self::parse_endpoint(config)?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        debug!(source = %config.id, endpoint = %config.endpoint, "Created EVM provider");

        Ok(self
            .providers
            .write()
            .entry(config.endpoint.clone())
            .or_insert(provider)
            .clone())
    }

    #[cfg(test)]
    fn cached_providers(&self) -> usize {
        self.providers.read().len()
    }

    fn parse_endpoint(config: &ChainConfig) -> Result<Url, FetchError> {
        config.endpoint.parse().map_err(|e| {
            FetchError::Unreachable(format!("invalid endpoint '{}': {}", config.endpoint, e))
        })
    }

    fn parse_target(config: &ChainConfig) -> Result<Address, FetchError> {
        config.target.parse().map_err(|e| {
            FetchError::InvalidResponse(format!("invalid oracle address '{}': {}", config.target, e))
        })
    }
}

/// Convert a U256 to f64.
fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(f64::NAN)
}

/// Map contract call errors onto the fetch error taxonomy.
///
/// JSON-RPC error responses (reverts, missing method) mean the node answered
/// with something unusable; every other transport error means it never answered.
fn classify(error: alloy::contract::Error) -> FetchError {
    match error {
        alloy::contract::Error::TransportError(e) if e.as_error_resp().is_some() => {
            FetchError::InvalidResponse(e.to_string())
        }
        alloy::contract::Error::TransportError(e) => FetchError::Unreachable(e.to_string()),
        other => FetchError::InvalidResponse(other.to_string()),
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn latest_pulse(&self, config: &ChainConfig) -> Result<RawPulse, FetchError> {
        let target = Self::parse_target(config)?;
        let provider = self.provider(config)?;
        let contract = IPulseOracle::new(target, &provider);

        let latest_call = contract.getLatestPulse();
        let count_call = contract.pulseCount();

        let (latest, count) = tokio::join!(latest_call.call(), count_call.call());

        let pulse = latest.map_err(classify)?;
        let count = count.map_err(classify)?;

        debug!(
            source = %config.id,
            pulse_count = %count,
            fidelity = %pulse.fidelityScore,
            "Read EVM pulse"
        );

        Ok(RawPulse {
            pulse_id: count.saturating_to::<u64>(),
            timestamp: pulse.timestamp.saturating_to::<u64>(),
            data_hash: pulse.dataHash,
            value: u256_to_f64(pulse.fidelityScore),
            is_valid: pulse.isValid,
        })
    }

    async fn probe(&self, config: &ChainConfig) -> Result<u64, FetchError> {
        let provider = self.provider(config)?;

        let block = provider
            .get_block_number()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        debug!(source = %config.id, block = block, "EVM probe");
        Ok(block)
    }
}
