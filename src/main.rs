//! Pulse Oracle Aggregator
//!
//! Polls the pulse oracle on every configured chain and publishes one
//! aggregated pulse per round.
//! Features:
//! - EVM (contract) and Solana (program account) sources
//! - Weighted median with outlier rejection and quorum
//! - Per-source health tracking
//! - Source-set reload on SIGHUP

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulse_chain::{MultiChainClient, SystemClock};
use pulse_core::{
    AggregatorSettings, FileConfigSource, NodeHealth, OracleAggregator, OracleFile, RoundEvent,
};

/// Environment variable names.
mod env {
    pub const PULSE_CONFIG: &str = "PULSE_CONFIG";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

const DEFAULT_CONFIG_PATH: &str = "config/oracles.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config_path =
        std::env::var(env::PULSE_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let file = OracleFile::from_file(&config_path)?;

    // PULSE_PROFILE applies when the file carries no [settings] table
    let settings: AggregatorSettings = file.resolve_settings();
    settings.log_config();

    info!("Starting Pulse Oracle Aggregator");
    for source in &file.sources {
        info!(
            source = %source.id,
            name = source.display_name(),
            kind = %source.kind,
            chain_id = ?source.chain_id,
            enabled = source.enabled,
            weight = source.weight,
            "Configured source"
        );
    }

    let aggregator = Arc::new(
        OracleAggregator::new(
            settings,
            file.sources,
            Arc::new(MultiChainClient::new()),
            Arc::new(SystemClock),
        )
        .context("Invalid oracle configuration")?,
    );

    for (source, result) in aggregator.probe_sources().await {
        match result {
            Ok(height) => info!(source = %source, height = height, "Source reachable"),
            Err(e) => warn!(source = %source, error = %e, "Source probe failed"),
        }
    }

    let reporter = tokio::spawn(report_rounds(Arc::clone(&aggregator)));
    let reloader = spawn_reload_handler(Arc::clone(&aggregator), config_path);

    aggregator.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down...");
    aggregator.stop();
    reporter.abort();
    if let Some(reloader) = reloader {
        reloader.abort();
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pulse_core=debug,pulse_chain=debug"));

    let json = std::env::var(env::LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Log every round outcome and a health summary.
async fn report_rounds(aggregator: Arc<OracleAggregator>) {
    let mut events = aggregator.subscribe();

    loop {
        match events.recv().await {
            Ok(RoundEvent::Published(data)) => {
                let published_at = chrono::DateTime::from_timestamp_millis(data.timestamp_ms as i64)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();

                info!(
                    round = data.round,
                    value = data.value,
                    confidence = data.confidence,
                    consensus = data.consensus_reached,
                    contributors = ?data.contributors,
                    at = %published_at,
                    "Pulse"
                );
            }
            Ok(RoundEvent::Failed(failure)) => {
                warn!(
                    round = failure.round,
                    error = %failure.error,
                    failed = ?failure.failures.keys().collect::<Vec<_>>(),
                    outliers = ?failure.outliers,
                    "No pulse this round"
                );
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Round reporter lagging");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }

        let status = aggregator.status();
        let unhealthy: Vec<_> = status
            .values()
            .filter(|s| s.enabled && s.health != NodeHealth::Healthy)
            .map(|s| format!("{}={}", s.source, s.health))
            .collect();
        if !unhealthy.is_empty() {
            warn!(sources = ?unhealthy, "Unhealthy sources");
        }
    }
}

/// Reload the source set from the config file on SIGHUP.
#[cfg(unix)]
fn spawn_reload_handler(
    aggregator: Arc<OracleAggregator>,
    config_path: String,
) -> Option<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable, reload disabled");
            return None;
        }
    };

    let source = FileConfigSource::new(config_path);
    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!(path = %source.path().display(), "Reloading source set");
            match aggregator.reload(&source).await {
                Ok(()) => info!("Source set reloaded"),
                Err(e) => warn!(error = %e, "Reload rejected, keeping previous source set"),
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_reload_handler(
    _aggregator: Arc<OracleAggregator>,
    _config_path: String,
) -> Option<tokio::task::JoinHandle<()>> {
    None
}
