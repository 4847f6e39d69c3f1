//! Error types for opening SQLite stores.
//!
//! Once a store is open, failures surface through
//! [`StoreError`](schema_boot_core::StoreError) instead; see
//! [`store_error`](crate::store_error).

use thiserror::Error;

/// Errors that can occur while opening a SQLite store.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// The database path cannot hold a database file.
    #[error("invalid database path '{0}'")]
    InvalidPath(String),
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;
