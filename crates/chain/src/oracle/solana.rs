//! Solana pulse oracle client.
//!
//! The oracle program stores the latest pulse in a fixed-layout account:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 32 | data hash |
//! | 32 | 8 | pulse id (u64 LE) |
//! | 40 | 8 | timestamp (i64 LE, unix seconds) |
//! | 48 | 8 | fidelity score (u64 LE) |
//! | 56 | 1 | valid flag |

use super::{ChainClient, ChainConfig, RawPulse};
use crate::error::FetchError;
use alloy::primitives::B256;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Minimum account data length holding a pulse record.
pub const PULSE_ACCOUNT_LEN: usize = 57;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResult {
    value: Option<AccountValue>,
}

#[derive(Debug, Deserialize)]
struct AccountValue {
    /// `[payload, encoding]`
    data: (String, String),
}

/// Decode a pulse record from raw account data.
pub fn decode_pulse_account(data: &[u8]) -> Result<RawPulse, FetchError> {
    if data.len() < PULSE_ACCOUNT_LEN {
        return Err(FetchError::InvalidResponse(format!(
            "account data too short: {} bytes, need {}",
            data.len(),
            PULSE_ACCOUNT_LEN
        )));
    }

    let word = |offset: usize| -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&data[offset..offset + 8]);
        buf
    };

    let data_hash = B256::from_slice(&data[0..32]);
    let pulse_id = u64::from_le_bytes(word(32));
    let timestamp = i64::from_le_bytes(word(40));
    let fidelity = u64::from_le_bytes(word(48));
    let is_valid = data[56] != 0;

    if timestamp < 0 {
        return Err(FetchError::InvalidResponse(format!(
            "negative timestamp {}",
            timestamp
        )));
    }

    Ok(RawPulse {
        pulse_id,
        timestamp: timestamp as u64,
        data_hash,
        value: fidelity as f64,
        is_valid,
    })
}

/// Reads pulses from the oracle program account over Solana JSON-RPC.
#[derive(Clone)]
pub struct SolanaChainClient {
    client: reqwest::Client,
    commitment: String,
}

impl std::fmt::Debug for SolanaChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaChainClient")
            .field("commitment", &self.commitment)
            .finish()
    }
}

impl Default for SolanaChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SolanaChainClient {
    /// Create a new Solana client with `confirmed` commitment.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            commitment: "confirmed".to_string(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, FetchError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!("HTTP {}", status)));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidResponse(format!("malformed {} response: {}", method, e)))?;

        if let Some(error) = parsed.error {
            return Err(FetchError::InvalidResponse(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }

        parsed
            .result
            .ok_or_else(|| FetchError::InvalidResponse(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl ChainClient for SolanaChainClient {
    async fn latest_pulse(&self, config: &ChainConfig) -> Result<RawPulse, FetchError> {
        let params = json!([
            config.target,
            { "encoding": "base64", "commitment": self.commitment }
        ]);

        let info: AccountInfoResult = self
            .call(&config.endpoint, "getAccountInfo", params)
            .await?;

        let account = info.value.ok_or_else(|| {
            FetchError::InvalidResponse(format!("oracle account {} not found", config.target))
        })?;

        let (payload, encoding) = account.data;
        if encoding != "base64" {
            return Err(FetchError::InvalidResponse(format!(
                "unexpected account encoding '{}'",
                encoding
            )));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| FetchError::InvalidResponse(format!("bad base64 account data: {}", e)))?;

        let pulse = decode_pulse_account(&bytes)?;

        debug!(
            source = %config.id,
            pulse_id = pulse.pulse_id,
            fidelity = pulse.value,
            "Read Solana pulse"
        );

        Ok(pulse)
    }

    async fn probe(&self, config: &ChainConfig) -> Result<u64, FetchError> {
        let params = json!([{ "commitment": self.commitment }]);
        let slot: u64 = self.call(&config.endpoint, "getSlot", params).await?;

        debug!(source = %config.id, slot = slot, "Solana probe");
        Ok(slot)
    }
}
