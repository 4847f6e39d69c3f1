//! SQLite store backend for the schema-boot engine.
//!
//! [`SqliteStore`] implements [`Store`](schema_boot_core::Store) over a
//! single database file. It reports the embedded dialect, so the engine
//! skips server-only migrations and reads columns through
//! `PRAGMA table_info`.
//!
//! # Lock contention
//!
//! [`Session::begin`](schema_boot_core::Session::begin) issues
//! `BEGIN IMMEDIATE`. When another process holds the write lock past the
//! busy timeout, the error comes back as
//! [`StoreError::Busy`](schema_boot_core::StoreError::Busy) and the engine's
//! retry wrapper takes over.
//!
//! # Quick start
//!
//! ```no_run
//! use schema_boot_core::Store;
//! use schema_boot_sqlite::SqliteStore;
//!
//! let store = SqliteStore::open("app.db").unwrap();
//! let mut session = store.session().unwrap();
//! let rows = session.query("SELECT name FROM sqlite_master", &[]).unwrap();
//! println!("{} objects", rows.len());
//! ```

mod convert;
mod error;
mod store;

pub use convert::store_error;
pub use error::{Result, SqliteError};
pub use store::{DEFAULT_BUSY_TIMEOUT, SqliteSession, SqliteStore};
