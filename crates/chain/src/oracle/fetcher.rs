//! Deadline-bounded, validated pulse fetching.

use super::{ChainClient, ChainConfig, PulseData, RawPulse};
use crate::clock::Clock;
use crate::error::FetchError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Structural and freshness checks applied to every raw pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingGuard {
    /// Maximum age of the source-reported timestamp
    pub staleness_bound: Duration,
    /// Upper bound for reported values (None = unbounded)
    pub max_value: Option<f64>,
}

impl ReadingGuard {
    /// Create a guard with the given staleness bound.
    pub fn new(staleness_bound: Duration) -> Self {
        Self {
            staleness_bound,
            max_value: None,
        }
    }

    /// Set the maximum accepted value.
    pub fn with_max_value(mut self, max_value: f64) -> Self {
        self.max_value = Some(max_value);
        self
    }

    /// Validate a raw pulse against the current time.
    pub fn check(&self, raw: &RawPulse, now_ms: u64) -> Result<(), FetchError> {
        if !raw.is_valid {
            return Err(FetchError::InvalidResponse(
                "pulse flagged invalid by oracle".to_string(),
            ));
        }

        if !raw.value.is_finite() {
            return Err(FetchError::InvalidResponse(format!(
                "non-numeric value {}",
                raw.value
            )));
        }

        if let Some(max) = self.max_value {
            if raw.value > max {
                return Err(FetchError::InvalidResponse(format!(
                    "value {} above maximum {}",
                    raw.value, max
                )));
            }
        }

        if raw.timestamp == 0 {
            return Err(FetchError::InvalidResponse("missing timestamp".to_string()));
        }

        let age_ms = now_ms.saturating_sub(raw.timestamp.saturating_mul(1000));
        if age_ms > self.staleness_bound.as_millis() as u64 {
            return Err(FetchError::InvalidResponse(format!(
                "stale pulse: {}ms old, bound {}ms",
                age_ms,
                self.staleness_bound.as_millis()
            )));
        }

        Ok(())
    }
}

/// Fetches one validated pulse from one source within a deadline.
#[derive(Clone)]
pub struct PulseFetcher {
    client: Arc<dyn ChainClient>,
    clock: Arc<dyn Clock>,
    guard: ReadingGuard,
}

impl std::fmt::Debug for PulseFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseFetcher")
            .field("client", &self.client)
            .field("guard", &self.guard)
            .finish()
    }
}

impl PulseFetcher {
    /// Create a new fetcher.
    pub fn new(client: Arc<dyn ChainClient>, clock: Arc<dyn Clock>, guard: ReadingGuard) -> Self {
        Self {
            client,
            clock,
            guard,
        }
    }

    /// Fetch one pulse from `config`, giving up after `deadline`.
    ///
    /// Disabled sources are rejected as unreachable and a zero deadline
    /// times out immediately without touching the network.
    pub async fn fetch(
        &self,
        config: &ChainConfig,
        deadline: Duration,
    ) -> Result<PulseData, FetchError> {
        if !config.enabled {
            return Err(FetchError::Unreachable(format!(
                "source {} is disabled",
                config.id
            )));
        }

        if deadline.is_zero() {
            return Err(FetchError::Timeout { after: deadline });
        }

        let started = Instant::now();
        let raw = match tokio::time::timeout(deadline, self.client.latest_pulse(config)).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout { after: deadline }),
        };
        let latency = started.elapsed();

        self.guard.check(&raw, self.clock.now_ms())?;

        debug!(
            source = %config.id,
            value = raw.value,
            pulse_id = raw.pulse_id,
            latency_ms = latency.as_millis() as u64,
            "Fetched pulse"
        );

        Ok(PulseData {
            source: config.id.clone(),
            value: raw.value,
            pulse_id: raw.pulse_id,
            data_hash: raw.data_hash,
            reported_at: raw.timestamp,
            latency,
        })
    }

    /// Run the liveness probe for `config` within `deadline`.
    ///
    /// A node reporting height zero is not serving the chain.
    pub async fn probe(&self, config: &ChainConfig, deadline: Duration) -> Result<u64, FetchError> {
        let height = match tokio::time::timeout(deadline, self.client.probe(config)).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout { after: deadline }),
        };

        if height == 0 {
            return Err(FetchError::InvalidResponse(
                "node reports height 0".to_string(),
            ));
        }

        Ok(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::oracle::SourceKind;
    use alloy::primitives::B256;
    use async_trait::async_trait;

    const NOW_MS: u64 = 1_700_000_100_000;

    #[derive(Debug)]
    struct StaticClient {
        pulse: RawPulse,
        delay: Duration,
    }

    #[async_trait]
    impl ChainClient for StaticClient {
        async fn latest_pulse(&self, _config: &ChainConfig) -> Result<RawPulse, FetchError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.pulse.clone())
        }

        async fn probe(&self, _config: &ChainConfig) -> Result<u64, FetchError> {
            Ok(42)
        }
    }

    fn raw(value: f64, timestamp: u64) -> RawPulse {
        RawPulse {
            pulse_id: 3,
            timestamp,
            data_hash: B256::repeat_byte(0xab),
            value,
            is_valid: true,
        }
    }

    fn fetcher(pulse: RawPulse, delay: Duration) -> PulseFetcher {
        PulseFetcher::new(
            Arc::new(StaticClient { pulse, delay }),
            Arc::new(ManualClock::new(NOW_MS)),
            ReadingGuard::new(Duration::from_secs(60)),
        )
    }

    fn source() -> ChainConfig {
        ChainConfig::new(
            "ethereum-sepolia",
            SourceKind::Evm,
            "http://localhost:8545",
            "0x1234567890123456789012345678901234567890",
        )
    }

    #[test]
    fn test_guard_rejects_invalid_flag() {
        let guard = ReadingGuard::new(Duration::from_secs(60));
        let mut pulse = raw(90.0, NOW_MS / 1000);
        pulse.is_valid = false;

        assert!(matches!(
            guard.check(&pulse, NOW_MS),
            Err(FetchError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_guard_rejects_nan_and_bounds() {
        let guard = ReadingGuard::new(Duration::from_secs(60)).with_max_value(94.0);

        assert!(guard.check(&raw(f64::NAN, NOW_MS / 1000), NOW_MS).is_err());
        assert!(guard.check(&raw(95.0, NOW_MS / 1000), NOW_MS).is_err());
        assert!(guard.check(&raw(94.0, NOW_MS / 1000), NOW_MS).is_ok());
    }

    #[test]
    fn test_guard_staleness() {
        let guard = ReadingGuard::new(Duration::from_secs(60));
        let now_secs = NOW_MS / 1000;

        assert!(guard.check(&raw(90.0, now_secs - 60), NOW_MS).is_ok());
        assert!(guard.check(&raw(90.0, now_secs - 61), NOW_MS).is_err());
        assert!(guard.check(&raw(90.0, 0), NOW_MS).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_success() {
        let fetcher = fetcher(raw(92.0, NOW_MS / 1000 - 5), Duration::from_millis(120));

        let pulse = fetcher.fetch(&source(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(pulse.source, "ethereum-sepolia");
        assert_eq!(pulse.value, 92.0);
        assert_eq!(pulse.pulse_id, 3);
        assert_eq!(pulse.reported_at, NOW_MS / 1000 - 5);
        assert!(pulse.latency >= Duration::from_millis(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let fetcher = fetcher(raw(92.0, NOW_MS / 1000), Duration::from_secs(5));

        let err = fetcher
            .fetch(&source(), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Timeout {
                after: Duration::from_millis(500)
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_preconditions() {
        let fetcher = fetcher(raw(92.0, NOW_MS / 1000), Duration::ZERO);

        let err = fetcher
            .fetch(&source().disabled(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)));

        let err = fetcher.fetch(&source(), Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_probe() {
        let fetcher = fetcher(raw(92.0, NOW_MS / 1000), Duration::ZERO);
        assert_eq!(fetcher.probe(&source(), Duration::from_secs(1)).await, Ok(42));
    }
}
