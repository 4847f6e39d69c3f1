//! The migration ledger.
//!
//! Applied migrations are recorded in the application's key/value settings
//! table under `migration:<filename>`. The value is a small JSON document;
//! entries written by older versions that hold plain text are still read as
//! applied.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use schema_boot_core::{ColumnDef, ColumnType, Dialect, Session, SqlValue, TableDef};

use crate::error::Result;

pub const LEDGER_TABLE: &str = "app_settings";
pub const KEY_PREFIX: &str = "migration:";

/// Canonical definition of the settings table holding the ledger.
pub fn ledger_table() -> TableDef {
    TableDef::new(LEDGER_TABLE)
        .column(ColumnDef::new("key", ColumnType::Text).primary_key())
        .column(ColumnDef::new("value", ColumnType::Text).not_null())
        .column(ColumnDef::new("created_at", ColumnType::Text).not_null())
        .column(ColumnDef::new("updated_at", ColumnType::Text).not_null())
}

/// How a ledger entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Applied,
    Skipped,
}

/// One recorded migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub filename: String,
    pub applied_at: String,
    pub status: LedgerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl LedgerEntry {
    pub fn applied(filename: &str, body: &str) -> Self {
        Self {
            filename: filename.to_string(),
            applied_at: Utc::now().to_rfc3339(),
            status: LedgerStatus::Applied,
            reason: None,
            checksum: Some(checksum(body)),
        }
    }

    pub fn skipped(filename: &str, body: &str, reason: impl Into<String>) -> Self {
        Self {
            status: LedgerStatus::Skipped,
            reason: Some(reason.into()),
            ..Self::applied(filename, body)
        }
    }

    /// The key names the file, whatever the stored value says.
    fn from_stored(filename: &str, value: &str) -> Self {
        match serde_json::from_str::<Self>(value) {
            Ok(entry) => Self {
                filename: filename.to_string(),
                ..entry
            },
            Err(_) => Self {
                filename: filename.to_string(),
                applied_at: value.to_string(),
                status: LedgerStatus::Applied,
                reason: None,
                checksum: None,
            },
        }
    }
}

/// SHA-256 of a migration body, hex encoded.
pub fn checksum(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

/// Reads and writes ledger entries through a caller-supplied session, so
/// writes join whatever transaction the caller has open.
#[derive(Debug, Clone, Copy)]
pub struct Ledger {
    dialect: Dialect,
}

impl Ledger {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn key(filename: &str) -> String {
        format!("{KEY_PREFIX}{filename}")
    }

    /// Creates the settings table if needed.
    pub fn ensure(&self, session: &mut dyn Session) -> Result<()> {
        session.execute_raw(&ledger_table().create_sql(self.dialect))?;
        Ok(())
    }

    pub fn get(&self, session: &mut dyn Session, filename: &str) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT value FROM {LEDGER_TABLE} WHERE key = {}",
            self.dialect.placeholder(1)
        );
        let rows = session.query(&sql, &[Self::key(filename).into()])?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_text)
            .map(|value| LedgerEntry::from_stored(filename, value)))
    }

    /// Upserts an entry.
    pub fn record(&self, session: &mut dyn Session, entry: &LedgerEntry) -> Result<()> {
        let p = |n| self.dialect.placeholder(n);
        let sql = format!(
            "INSERT INTO {LEDGER_TABLE} (key, value, created_at, updated_at) \
             VALUES ({}, {}, {}, {}) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            p(1),
            p(2),
            p(3),
            p(3)
        );
        let value = serde_json::to_string(entry)?;
        session.execute(
            &sql,
            &[
                Self::key(&entry.filename).into(),
                value.into(),
                Utc::now().to_rfc3339().into(),
            ],
        )?;
        Ok(())
    }

    /// Deletes an entry so its migration runs again.
    pub fn forget(&self, session: &mut dyn Session, filename: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {LEDGER_TABLE} WHERE key = {}",
            self.dialect.placeholder(1)
        );
        session.execute(&sql, &[Self::key(filename).into()])?;
        Ok(())
    }

    /// Lists every migration entry ordered by file name.
    pub fn entries(&self, session: &mut dyn Session) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT key, value FROM {LEDGER_TABLE} WHERE key LIKE {} ORDER BY key",
            self.dialect.placeholder(1)
        );
        let rows = session.query(&sql, &[format!("{KEY_PREFIX}%").into()])?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let key = row.first()?.as_text()?;
                let value = row.get(1)?.as_text()?;
                let filename = key.strip_prefix(KEY_PREFIX)?;
                Some(LedgerEntry::from_stored(filename, value))
            })
            .collect())
    }
}
