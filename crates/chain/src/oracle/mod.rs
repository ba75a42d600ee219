//! Pulse oracle source layer.
//!
//! This module provides traits and implementations for reading pulses from
//! the oracle deployed on each ledger in a unified way.
//!
//! # Architecture
//!
//! - [`ChainClient`]: transport seam, performs one raw read against a source
//! - [`PulseFetcher`]: applies the call deadline, measures latency and
//!   validates the raw read into a [`PulseData`]
//! - [`MultiChainClient`]: routes each source to the transport of its kind
//!
//! # Supported Sources
//!
//! - **EVM**: `getLatestPulse()` / `pulseCount()` on the pulse oracle contract
//! - **Solana**: pulse oracle program account read via `getAccountInfo`
//!
//! # Example
//!
//! ```rust,ignore
//! use pulse_chain::oracle::{ChainConfig, MultiChainClient, PulseFetcher, ReadingGuard, SourceKind};
//!
//! let fetcher = PulseFetcher::new(
//!     Arc::new(MultiChainClient::new()),
//!     Arc::new(SystemClock),
//!     ReadingGuard::new(Duration::from_secs(60)),
//! );
//!
//! let source = ChainConfig::new("ethereum-sepolia", SourceKind::Evm, rpc_url, oracle_address);
//! let pulse = fetcher.fetch(&source, Duration::from_secs(3)).await?;
//! ```

mod config;
mod evm;
mod fetcher;
mod router;
mod solana;
mod types;

pub use config::{ChainConfig, ChainId};
pub use evm::EvmChainClient;
pub use fetcher::{PulseFetcher, ReadingGuard};
pub use router::MultiChainClient;
pub use solana::{decode_pulse_account, SolanaChainClient, PULSE_ACCOUNT_LEN};
pub use types::{PulseData, RawPulse, SourceId, SourceKind};

use crate::error::FetchError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Transport for reading pulses from configured sources.
///
/// Implementations perform exactly one read per call and never retry; the
/// caller owns deadlines and retry policy.
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    /// Read the latest pulse from the source's query target.
    async fn latest_pulse(&self, config: &ChainConfig) -> Result<RawPulse, FetchError>;

    /// Liveness probe. Returns the current block number or slot.
    async fn probe(&self, config: &ChainConfig) -> Result<u64, FetchError>;
}
