//! Error types for the migration engine.
//!
//! Only fatal conditions surface as [`EngineError`]. Dialect skips, exhausted
//! lock retries and per-dataset reconciliation failures are reported as
//! outcomes instead.

use schema_boot_core::{ErrorClass, StoreError, classify_error};
use schema_boot_seed::SeedError;
use thiserror::Error;

/// Errors that abort a boot.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Store operation failure outside of a migration statement.
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// Seed data could not be loaded.
    #[error("seed error: {0}")]
    SeedError(#[from] SeedError),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON parsing or serialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A migration statement failed and could not be repaired.
    #[error("migration {filename} failed at `{statement}`: {source}")]
    MigrationFailed {
        filename: String,
        statement: String,
        source: StoreError,
    },

    /// Schema repair was attempted and did not succeed.
    #[error("schema repair of {target} failed: {reason}")]
    RepairFailed { target: String, reason: String },

    /// A procedural migration has no registered handler.
    #[error("no handler registered for procedural migration {0}")]
    MissingProcedure(String),

    /// A procedural migration handler returned an error.
    #[error("procedural migration {filename} failed: {source}")]
    ProcedureFailed {
        filename: String,
        source: StoreError,
    },

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl EngineError {
    /// Returns true when the underlying store error is lock contention.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            EngineError::StoreError(e)
            | EngineError::MigrationFailed { source: e, .. }
            | EngineError::ProcedureFailed { source: e, .. } => {
                classify_error(e) == ErrorClass::LockContention
            }
            _ => false,
        }
    }
}

/// Convenience alias for results with [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_contention_detection() {
        assert!(EngineError::from(StoreError::Busy("locked".into())).is_lock_contention());
        assert!(
            EngineError::from(StoreError::Statement("database is locked".into()))
                .is_lock_contention()
        );
        assert!(!EngineError::from(StoreError::Statement("syntax error".into())).is_lock_contention());
        assert!(!EngineError::ConfigError("x".into()).is_lock_contention());
    }

    #[test]
    fn test_migration_failed_message() {
        let err = EngineError::MigrationFailed {
            filename: "0002_cross_references.sql".into(),
            statement: "CREATE TABLE".into(),
            source: StoreError::Statement("near \"TABLE\": syntax error".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("0002_cross_references.sql"));
        assert!(msg.contains("syntax error"));
    }
}
