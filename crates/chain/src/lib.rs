//! Pulse oracle chain interaction layer.
//!
//! This crate provides:
//! - Source configuration for EVM and Solana pulse oracles
//! - Contract bindings for the EVM pulse oracle
//! - Solana oracle account decoding over JSON-RPC
//! - Deadline-bounded, validated pulse fetching
//! - Clock abstraction for staleness checks
//!
//! The aggregation engine in `pulse-core` depends only on the
//! [`oracle::ChainClient`] seam exposed here.

pub mod clock;
pub mod error;
pub mod oracle;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::FetchError;
pub use oracle::{
    decode_pulse_account, ChainClient, ChainConfig, ChainId, EvmChainClient, MultiChainClient,
    PulseData, PulseFetcher, RawPulse, ReadingGuard, SolanaChainClient, SourceId, SourceKind,
    PULSE_ACCOUNT_LEN,
};
