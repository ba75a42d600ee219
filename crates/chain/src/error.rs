//! Per-source fetch errors.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single source read. Recovered locally by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FetchError {
    /// No response before the call deadline
    #[error("no response within {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// Transport-level failure (connection refused, DNS, HTTP status)
    #[error("source unreachable: {0}")]
    Unreachable(String),

    /// Response arrived but is malformed, flagged invalid, or stale
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    /// Short label for structured logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unreachable(_) => "unreachable",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = FetchError::Timeout {
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "no response within 1500ms");
        assert_eq!(err.label(), "timeout");

        let err = FetchError::InvalidResponse("stale".to_string());
        assert_eq!(err.to_string(), "invalid response: stale");
    }
}
