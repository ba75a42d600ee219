//! Pulse reading types.

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of one configured source (unique within a source set).
pub type SourceId = String;

/// Ledger family a source lives on. Selects the transport used to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// EVM chain exposing the pulse oracle contract
    #[default]
    Evm,
    /// Solana cluster exposing the pulse oracle program account
    Solana,
}

impl SourceKind {
    /// Parse source kind from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "evm" | "ethereum" | "polygon" => Some(Self::Evm),
            "solana" | "sol" => Some(Self::Solana),
            _ => None,
        }
    }

    /// Check that a query target is well formed for this kind of source.
    ///
    /// EVM targets are 20-byte hex contract addresses, Solana targets are
    /// base58 program/account keys.
    pub fn validate_target(&self, target: &str) -> Result<(), String> {
        match self {
            Self::Evm => target
                .parse::<alloy::primitives::Address>()
                .map(|_| ())
                .map_err(|e| format!("invalid contract address '{}': {}", target, e)),
            Self::Solana => {
                const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
                let len_ok = (32..=44).contains(&target.len());
                if len_ok && target.chars().all(|c| BASE58.contains(c)) {
                    Ok(())
                } else {
                    Err(format!("invalid program key '{}'", target))
                }
            }
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
            Self::Solana => write!(f, "solana"),
        }
    }
}

/// Raw pulse as read from a source, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPulse {
    /// Pulse counter reported by the oracle
    pub pulse_id: u64,
    /// Source-reported timestamp (unix seconds)
    pub timestamp: u64,
    /// Digest of the pulse payload
    pub data_hash: B256,
    /// Reported value (fidelity score)
    pub value: f64,
    /// Validity flag reported by the oracle itself
    pub is_valid: bool,
}

/// One source's validated reading for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseData {
    /// Source identifier
    pub source: SourceId,
    /// Reported value
    pub value: f64,
    /// Pulse counter
    pub pulse_id: u64,
    /// Digest of the pulse payload
    pub data_hash: B256,
    /// Source-reported timestamp (unix seconds)
    pub reported_at: u64,
    /// Time spent fetching the reading
    pub latency: Duration,
}

impl PulseData {
    /// Age of the reading in milliseconds relative to `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.reported_at.saturating_mul(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!(SourceKind::from_str("EVM"), Some(SourceKind::Evm));
        assert_eq!(SourceKind::from_str("polygon"), Some(SourceKind::Evm));
        assert_eq!(SourceKind::from_str("solana"), Some(SourceKind::Solana));
        assert_eq!(SourceKind::from_str("cosmos"), None);
    }

    #[test]
    fn test_target_validation() {
        assert!(SourceKind::Evm
            .validate_target("0x1234567890123456789012345678901234567890")
            .is_ok());
        assert!(SourceKind::Evm.validate_target("0x1234").is_err());

        assert!(SourceKind::Solana
            .validate_target("Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS")
            .is_ok());
        // '0' is not part of the base58 alphabet
        assert!(SourceKind::Solana
            .validate_target("0g6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS")
            .is_err());
    }

    #[test]
    fn test_pulse_age() {
        let pulse = PulseData {
            source: "ethereum-sepolia".to_string(),
            value: 94.0,
            pulse_id: 7,
            data_hash: B256::ZERO,
            reported_at: 1_700_000_000,
            latency: Duration::from_millis(40),
        };

        assert_eq!(pulse.age_ms(1_700_000_009_000), 9_000);
        // Clock behind the source never underflows
        assert_eq!(pulse.age_ms(1_000), 0);
    }
}
