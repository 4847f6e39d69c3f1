//! Core types and pure SQL helpers for the boot-time schema engine.
//!
//! This crate has no I/O of its own. It defines:
//!
//! - [`Store`] / [`Session`]: the only capability the engine needs from a
//!   relational store, plus [`StoreError`].
//! - [`Dialect`], [`SqlValue`] and [`Row`]: the value model shared by every
//!   backend.
//! - [`split_statements`]: quote, comment and dollar-quote aware script
//!   splitting.
//! - [`should_skip`] / [`requires_autocommit`]: dialect capability checks.
//! - [`classify_error`]: maps driver error text to an [`ErrorClass`].
//! - [`Catalog`] / [`TableDef`]: canonical table definitions compiled to DDL
//!   on demand.
//!
//! # Example
//!
//! ```
//! use schema_boot_core::*;
//!
//! let script = "-- add weights\n\
//!               ALTER TABLE cross_references ADD COLUMN weight REAL;\n\
//!               CREATE INDEX CONCURRENTLY idx_w ON cross_references (weight);";
//!
//! let statements = split_statements(script);
//! assert_eq!(statements.len(), 2);
//! assert!(requires_autocommit(&statements[1]));
//! assert!(should_skip(script, Dialect::Embedded));
//!
//! let err = StoreError::Statement("no such table: cross_references".into());
//! assert_eq!(
//!     classify_error(&err),
//!     ErrorClass::MissingTable { table: "cross_references".into() }
//! );
//! ```

mod catalog;
mod classify;
mod dialect;
mod split;
mod store;
mod types;

pub use catalog::{Catalog, CatalogError, ColumnDef, ColumnType, TableDef, validate_identifier};
pub use classify::{
    ErrorClass, classify_error, classify_message, is_duplicate_column, statement_target_table,
};
pub use dialect::{DialectMarker, requires_autocommit, should_skip, unsupported_markers};
pub use split::{is_comment_only, split_statements, strip_comments};
pub use store::{Session, Store, StoreError, StoreResult};
pub use types::*;
