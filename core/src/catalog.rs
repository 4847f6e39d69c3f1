//! Canonical table definitions.
//!
//! Schema repair needs to know what a table *should* look like, independent
//! of whatever migration last touched it. A [`Catalog`] holds those
//! definitions and compiles them into dialect-specific DDL.
//!
//! # Example
//!
//! ```
//! use schema_boot_core::{Catalog, ColumnDef, ColumnType, Dialect, TableDef};
//!
//! let places = TableDef::new("places")
//!     .column(ColumnDef::new("id", ColumnType::Text).primary_key())
//!     .column(ColumnDef::new("kind", ColumnType::Text).not_null().default_sql("'settlement'"))
//!     .reseedable();
//! let catalog = Catalog::new().with_table(places).unwrap();
//!
//! let table = catalog.table("places").unwrap();
//! let kind = table.find_column("kind").unwrap();
//! assert_eq!(
//!     table.add_column_sql(kind, Dialect::Embedded),
//!     "ALTER TABLE places ADD COLUMN kind TEXT NOT NULL DEFAULT 'settlement'"
//! );
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::Dialect;

/// Errors raised while building a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Table or column name contains characters other than ASCII
    /// alphanumerics and underscores.
    #[error("invalid identifier '{0}': must contain only alphanumeric characters and underscores")]
    InvalidIdentifier(String),

    /// Two definitions for the same table.
    #[error("duplicate table definition: {0}")]
    DuplicateTable(String),
}

/// Validates that an identifier is safe to splice into DDL unquoted.
pub fn validate_identifier(name: &str) -> Result<(), CatalogError> {
    if name.is_empty()
        || name.starts_with(|c: char| c.is_ascii_digit())
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(CatalogError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    pub fn sql(self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (ColumnType::Text, _) => "TEXT",
            (ColumnType::Integer, Dialect::Embedded) => "INTEGER",
            (ColumnType::Integer, Dialect::Server) => "BIGINT",
            (ColumnType::Real, Dialect::Embedded) => "REAL",
            (ColumnType::Real, Dialect::Server) => "DOUBLE PRECISION",
        }
    }
}

/// Canonical definition of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    /// Default as a SQL literal, e.g. `'neutral'` or `1.0`.
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            primary_key: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn default_sql(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }

    /// Whether `ALTER TABLE ... ADD COLUMN` can add this column to a table
    /// that already holds rows.
    pub fn is_addable(&self) -> bool {
        !self.primary_key && (self.nullable || self.default.is_some())
    }

    fn definition_sql(&self, dialect: Dialect) -> String {
        let mut sql = format!("{} {}", self.name, self.ty.sql(dialect));
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Canonical definition of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// The table's full content can be re-derived from reference data, so it
    /// may be dropped and recreated by schema repair.
    pub reseedable: bool,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            reseedable: false,
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn reseedable(mut self) -> Self {
        self.reseedable = true;
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn validate(&self) -> Result<(), CatalogError> {
        validate_identifier(&self.name)?;
        for column in &self.columns {
            validate_identifier(&column.name)?;
        }
        Ok(())
    }

    pub fn create_sql(&self, dialect: Dialect) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("    {}", c.definition_sql(dialect)))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.name,
            columns.join(",\n")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.name)
    }

    pub fn add_column_sql(&self, column: &ColumnDef, dialect: Dialect) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.name,
            column.definition_sql(dialect)
        )
    }
}

/// A set of canonical table definitions keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, TableDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table definition after validating every identifier in it.
    pub fn with_table(mut self, table: TableDef) -> Result<Self, CatalogError> {
        self.insert(table)?;
        Ok(self)
    }

    pub fn insert(&mut self, table: TableDef) -> Result<(), CatalogError> {
        table.validate()?;
        let key = table.name.to_ascii_lowercase();
        if self.tables.contains_key(&key) {
            return Err(CatalogError::DuplicateTable(table.name));
        }
        self.tables.insert(key, table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
