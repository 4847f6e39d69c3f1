//! Boot configuration.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Relative paths are resolved against the directory holding the file.
//!
//! # Example YAML
//!
//! ```yaml
//! database: app.db
//! migrations_dir: migrations
//! seed_dir: data/seeds
//! busy_timeout_ms: 5000
//! retry:
//!   max_attempts: 10
//!   backoff_ms: 250
//! legacy_checks:
//!   - migration: 0004_cross_reference_perspective.sql
//!     table: cross_references
//!     column: perspective
//! datasets: [cross_references, parallel_passages, places]
//! ```

use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use schema_boot_seed::{DatasetSpec, builtin_dataset, builtin_datasets};

use crate::error::{EngineError, Result};
use crate::executor::{LegacyCheck, default_legacy_checks};
use crate::retry::RetryPolicy;

/// Settings for one boot.
///
/// # Examples
///
/// ```
/// use schema_boot_engine::EngineConfig;
///
/// let config = EngineConfig::from_yaml_str("busy_timeout_ms: 0\nretry: { max_attempts: 3 }").unwrap();
/// assert_eq!(config.busy_timeout_ms, 0);
/// assert_eq!(config.retry.max_attempts, 3);
/// assert_eq!(config.retry.backoff_ms, 250);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Database file. Only the CLI reads this.
    pub database: PathBuf,
    pub migrations_dir: PathBuf,
    pub seed_dir: PathBuf,
    /// How long the embedded store waits on a held lock before reporting busy.
    pub busy_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub legacy_checks: Vec<LegacyCheck>,
    /// Datasets to reconcile, in order.
    pub datasets: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("app.db"),
            migrations_dir: PathBuf::from(crate::DEFAULT_MIGRATIONS_DIR),
            seed_dir: PathBuf::from("data/seeds"),
            busy_timeout_ms: 5000,
            retry: RetryPolicy::default(),
            legacy_checks: default_legacy_checks(),
            datasets: builtin_datasets().into_iter().map(|d| d.name).collect(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file and resolves its relative paths
    /// against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](EngineError::IoError) if the file cannot be read,
    /// [`YamlError`](EngineError::YamlError) if parsing fails, or
    /// [`ConfigError`](EngineError::ConfigError) if a dataset is unknown.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let config: Option<Self> = serde_yaml::from_reader(BufReader::new(file))?;
        let config = config.unwrap_or_default();
        config.validate()?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.with_base_dir(base))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Option<Self> = serde_yaml::from_str(yaml)?;
        let config = config.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Makes relative paths relative to `base`.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        for path in [
            &mut self.database,
            &mut self.migrations_dir,
            &mut self.seed_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Resolves the configured dataset names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](EngineError::ConfigError) naming the first
    /// unknown dataset.
    pub fn datasets(&self) -> Result<Vec<DatasetSpec>> {
        self.datasets
            .iter()
            .map(|name| {
                builtin_dataset(name)
                    .ok_or_else(|| EngineError::ConfigError(format!("unknown dataset '{name}'")))
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        self.datasets()?;
        if self.retry.max_attempts == 0 {
            return Err(EngineError::ConfigError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
