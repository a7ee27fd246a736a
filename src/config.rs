//! Configuration for a migration run.
//!
//! A run is configured by a TOML file naming the store to open, plus an
//! optional batch size that the command line can override.
//!
//! ```toml
//! [store]
//! path = "repository.redb"
//! create_if_missing = false
//!
//! [migration]
//! batch_size = 500
//! ```
//!
//! # Examples
//!
//! ```
//! use bitemporal_migrate::config::{MigratorConfig, StoreConfig};
//!
//! let config = MigratorConfig::builder()
//!     .store(StoreConfig::new("/data/repository.redb"))
//!     .build();
//! assert_eq!(config.migration.batch_size, 500);
//! assert!(!config.store.create_if_missing);
//! ```

use crate::error::{MigrationError, MigrationResult};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use typed_builder::TypedBuilder;

/// Batch size used when neither the command line nor the config file sets one.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Location and open options of the store to migrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(doc)]
pub struct StoreConfig {
    /// Path to the store file
    #[builder(setter(into))]
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist
    #[serde(default)]
    #[builder(default = false)]
    pub create_if_missing: bool,
}

impl StoreConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            create_if_missing: false,
        }
    }
}

/// Tuning for the migration engine itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(doc)]
pub struct MigrationSettings {
    /// Maximum number of writes per transaction
    #[serde(default = "default_batch_size")]
    #[builder(default = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Complete configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(doc)]
pub struct MigratorConfig {
    pub store: StoreConfig,

    #[serde(default)]
    #[builder(default)]
    pub migration: MigrationSettings,
}

impl MigratorConfig {
    /// Read and parse a configuration file.
    ///
    /// Any failure here is a configuration error: the store has not been
    /// touched yet.
    pub fn load<P: AsRef<Path>>(path: P) -> MigrationResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&raw).map_err(|e| match e {
            MigrationError::Configuration(msg) => {
                MigrationError::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn parse(raw: &str) -> MigrationResult<Self> {
        let config: MigratorConfig =
            toml::from_str(raw).map_err(|e| MigrationError::Configuration(e.to_string()))?;
        if config.migration.batch_size == 0 {
            return Err(MigrationError::Configuration(
                "migration.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Resolve the effective batch size from an optional command-line argument.
///
/// An argument that is not a positive integer falls back to `configured`
/// with a warning instead of failing the run.
pub fn resolve_batch_size(arg: Option<&str>, configured: usize) -> usize {
    match arg {
        None => configured,
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(size) if size > 0 => size,
            _ => {
                warn!("Ignoring invalid batch size {raw:?}, using {configured}");
                configured
            }
        },
    }
}
