//! Value and dialect types shared by every layer of the engine.
//!
//! The engine asks a relational store for two things only: run this
//! statement with these scalar parameters, and give these rows back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The relational engine flavor a store speaks.
///
/// # Examples
///
/// ```
/// use schema_boot_core::Dialect;
///
/// assert_eq!(Dialect::Embedded.placeholder(1), "?1");
/// assert_eq!(Dialect::Server.placeholder(2), "$2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Single-file embedded engine (SQLite). One writer at a time.
    Embedded,
    /// Full-featured server engine (PostgreSQL-compatible).
    Server,
}

impl Dialect {
    /// Returns the positional parameter placeholder for 1-based index `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Embedded => format!("?{n}"),
            Dialect::Server => format!("${n}"),
        }
    }

    /// Returns a comma-separated placeholder list for `count` parameters,
    /// starting at index `start`.
    pub fn placeholders(self, start: usize, count: usize) -> String {
        (start..start + count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Embedded => f.write_str("embedded"),
            Dialect::Server => f.write_str("server"),
        }
    }
}

/// A scalar SQL value passed as a parameter or read back from a row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Returns the text content if this is a [`SqlValue::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content if this is a [`SqlValue::Integer`].
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One result row, in select-list order.
pub type Row = Vec<SqlValue>;

/// How a migration file is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    /// A SQL script split into statements.
    Script,
    /// A handler registered in code, bound to the file by name.
    Procedural,
}

/// A migration discovered on disk. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File name, e.g. `0003_cross_reference_indexes.sql`. Unique and sortable.
    pub name: String,
    pub kind: MigrationKind,
    pub body: String,
}

impl MigrationFile {
    pub fn script(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MigrationKind::Script,
            body: body.into(),
        }
    }

    pub fn procedural(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MigrationKind::Procedural,
            body: String::new(),
        }
    }

    /// File name without its extension; procedural handlers are looked up by
    /// this stem.
    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.name)
    }
}
