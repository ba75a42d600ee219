//! Oracle configuration file loading.
//!
//! File layout:
//!
//! ```toml
//! [settings]
//! quorum = 2
//! interval_ms = 9000
//!
//! [[sources]]
//! id = "ethereum-sepolia"
//! kind = "evm"
//! endpoint = "${ETHEREUM_SEPOLIA_RPC}"
//! target = "0x1234567890123456789012345678901234567890"
//! chain_id = 11155111
//! ```
//!
//! `${VAR}` patterns in endpoints and targets are expanded from the
//! environment. The `[settings]` table is optional; when absent the profile
//! selected by `PULSE_PROFILE` is used.

use anyhow::{Context, Result};
use async_trait::async_trait;
use pulse_chain::ChainConfig;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::AggregatorSettings;
use crate::error::ConfigError;

/// Contents of an oracle configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleFile {
    /// Aggregator settings (profile from environment when absent)
    #[serde(default)]
    pub settings: Option<AggregatorSettings>,

    /// Ordered source list
    #[serde(default)]
    pub sources: Vec<ChainConfig>,
}

impl OracleFile {
    /// Load an oracle file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read oracle config {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse oracle config {:?}", path))
    }

    /// Parse an oracle file and expand environment variables.
    pub fn parse(content: &str) -> Result<Self> {
        let mut file: OracleFile = toml::from_str(content)?;
        file.expand_env_vars();
        Ok(file)
    }

    /// Expand environment variables in source endpoints and targets.
    pub fn expand_env_vars(&mut self) {
        for source in &mut self.sources {
            source.endpoint = expand_env(&source.endpoint);
            source.target = expand_env(&source.target);
        }
    }

    /// Settings from the file, or the environment-selected profile.
    pub fn resolve_settings(&self) -> AggregatorSettings {
        self.settings
            .clone()
            .unwrap_or_else(AggregatorSettings::from_env)
    }
}

fn env_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").ok())
        .as_ref()
}

/// Expand ${VAR_NAME} patterns with environment variable values.
///
/// Unset variables are left in place.
pub(crate) fn expand_env(s: &str) -> String {
    let Some(re) = env_pattern() else {
        return s.to_string();
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            let var_name = var_match.as_str();
            match std::env::var(var_name) {
                Ok(value) => result = result.replace(full_match.as_str(), &value),
                Err(_) => warn!(var = var_name, "Environment variable not set"),
            }
        }
    }

    result
}

/// Supplier of a fresh source set for reconfiguration.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Load the full source set.
    async fn load(&self) -> Result<Vec<ChainConfig>, ConfigError>;
}

/// Source set read from an oracle configuration file on every load.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<Vec<ChainConfig>, ConfigError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", self.path.display(), e)))?;

        let file = OracleFile::parse(&content)
            .map_err(|e| ConfigError::Load(format!("{}: {:#}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), sources = file.sources.len(), "Loaded source set");
        Ok(file.sources)
    }
}

/// Fixed in-memory source set.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    sources: Vec<ChainConfig>,
}

impl StaticConfigSource {
    pub fn new(sources: Vec<ChainConfig>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<Vec<ChainConfig>, ConfigError> {
        Ok(self.sources.clone())
    }
}
