//! Transport routing by source kind.

use super::{ChainClient, ChainConfig, EvmChainClient, RawPulse, SolanaChainClient, SourceKind};
use crate::error::FetchError;
use async_trait::async_trait;
use std::sync::Arc;

/// Chain client that dispatches each read to the transport for the
/// source's [`SourceKind`].
#[derive(Debug, Clone)]
pub struct MultiChainClient {
    evm: Arc<dyn ChainClient>,
    solana: Arc<dyn ChainClient>,
}

impl Default for MultiChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiChainClient {
    /// Create a router over the default EVM and Solana transports.
    pub fn new() -> Self {
        Self {
            evm: Arc::new(EvmChainClient::new()),
            solana: Arc::new(SolanaChainClient::new()),
        }
    }

    /// Create a router over custom transports.
    pub fn with_transports(evm: Arc<dyn ChainClient>, solana: Arc<dyn ChainClient>) -> Self {
        Self { evm, solana }
    }

    fn route(&self, kind: SourceKind) -> &Arc<dyn ChainClient> {
        match kind {
            SourceKind::Evm => &self.evm,
            SourceKind::Solana => &self.solana,
        }
    }
}

#[async_trait]
impl ChainClient for MultiChainClient {
    async fn latest_pulse(&self, config: &ChainConfig) -> Result<RawPulse, FetchError> {
        self.route(config.kind).latest_pulse(config).await
    }

    async fn probe(&self, config: &ChainConfig) -> Result<u64, FetchError> {
        self.route(config.kind).probe(config).await
    }
}
