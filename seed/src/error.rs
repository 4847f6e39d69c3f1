//! Error types for seed loading and record derivation.

use thiserror::Error;

/// Errors that can occur while loading or interpreting seed data.
#[derive(Debug, Error)]
pub enum SeedError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML parsing failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// The document is neither a list of entries nor a map of entries.
    #[error("invalid seed document {origin}: {reason}")]
    InvalidShape { origin: String, reason: String },

    /// One entry could not be turned into a record.
    #[error("invalid seed entry {origin}: {reason}")]
    InvalidEntry { origin: String, reason: String },
}

/// Convenience alias for results with [`SeedError`].
pub type Result<T> = std::result::Result<T, SeedError>;
