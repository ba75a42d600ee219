//! Configuration system for the pulse aggregator.
//!
//! This module provides:
//! - Aggregator settings (profiles, round timing, quorum, tolerances)
//! - Validation of settings and source sets
//! - Oracle file loading (TOML with environment expansion)
//! - `ConfigSource` for reloading the source set at runtime

mod loader;
mod settings;
mod validate;

pub use loader::{ConfigSource, FileConfigSource, OracleFile, StaticConfigSource};
pub use settings::AggregatorSettings;
pub use validate::{validate, validate_settings, validate_sources};
