//! Configuration validation.

use pulse_chain::ChainConfig;
use std::collections::HashSet;

use super::AggregatorSettings;
use crate::error::ConfigError;

/// Validate settings on their own.
pub fn validate_settings(settings: &AggregatorSettings) -> Result<(), ConfigError> {
    if settings.interval_ms == 0 {
        return Err(ConfigError::InvalidInterval);
    }

    if settings.deadline_ms == 0 || settings.deadline_ms > settings.interval_ms {
        return Err(ConfigError::InvalidDeadline {
            deadline_ms: settings.deadline_ms,
            interval_ms: settings.interval_ms,
        });
    }

    if !settings.outlier_tolerance.is_finite() || settings.outlier_tolerance <= 0.0 {
        return Err(ConfigError::InvalidTolerance(settings.outlier_tolerance));
    }

    if settings.staleness_ms == 0 {
        return Err(ConfigError::InvalidStaleness);
    }

    if settings.degraded_after == 0 || settings.unreachable_after < settings.degraded_after {
        return Err(ConfigError::InvalidHealthThresholds {
            degraded_after: settings.degraded_after,
            unreachable_after: settings.unreachable_after,
        });
    }

    if settings.event_capacity == 0 {
        return Err(ConfigError::InvalidEventCapacity);
    }

    Ok(())
}

/// Validate a source set against the settings it will run under.
pub fn validate_sources(
    settings: &AggregatorSettings,
    sources: &[ChainConfig],
) -> Result<(), ConfigError> {
    let mut seen = HashSet::with_capacity(sources.len());

    for source in sources {
        if source.id.trim().is_empty() {
            return Err(ConfigError::EmptySourceId);
        }

        if !seen.insert(source.id.as_str()) {
            return Err(ConfigError::DuplicateSource(source.id.clone()));
        }

        if source.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint {
                source_id: source.id.clone(),
            });
        }

        if source.timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                source_id: source.id.clone(),
            });
        }

        if !source.weight.is_finite() || source.weight < 0.0 {
            return Err(ConfigError::InvalidWeight {
                source_id: source.id.clone(),
                weight: source.weight,
            });
        }

        source
            .kind
            .validate_target(&source.target)
            .map_err(|reason| ConfigError::InvalidTarget {
                source_id: source.id.clone(),
                reason,
            })?;
    }

    let enabled = sources.iter().filter(|s| s.enabled).count();
    if settings.quorum == 0 || settings.quorum > enabled {
        return Err(ConfigError::InvalidQuorum {
            quorum: settings.quorum,
            enabled,
        });
    }

    Ok(())
}

/// Validate settings and sources together.
pub fn validate(settings: &AggregatorSettings, sources: &[ChainConfig]) -> Result<(), ConfigError> {
    validate_settings(settings)?;
    validate_sources(settings, sources)
}
