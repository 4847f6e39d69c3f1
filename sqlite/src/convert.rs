//! Conversion between engine values and SQLite values.
//!
//! Parameters go in as [`rusqlite::types::Value`]; rows come back through
//! [`ValueRef`] and are copied into owned [`SqlValue`]s. Blobs are not part
//! of the engine's value model and are read back as lossy UTF-8 text.

use rusqlite::types::{Value, ValueRef};
use rusqlite::{ErrorCode, Rows};

use schema_boot_core::{Row, SqlValue, StoreError};

pub(crate) fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(r) => Value::Real(*r),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

pub(crate) fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Drains a result set into owned rows.
pub(crate) fn collect_rows(mut rows: Rows<'_>, width: usize) -> rusqlite::Result<Vec<Row>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(from_sqlite(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok(out)
}

/// Maps a driver error onto the engine's error kinds, keeping SQLite's own
/// message text.
///
/// # Examples
///
/// ```
/// use rusqlite::ffi;
/// use schema_boot_core::StoreError;
/// use schema_boot_sqlite::store_error;
///
/// let busy = rusqlite::Error::SqliteFailure(
///     ffi::Error::new(ffi::SQLITE_BUSY),
///     Some("database is locked".into()),
/// );
/// assert!(matches!(store_error(busy), StoreError::Busy(_)));
/// ```
pub fn store_error(err: rusqlite::Error) -> StoreError {
    let message = err.to_string();
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Busy(message),
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::PermissionDenied) => {
            StoreError::Connection(message)
        }
        _ => StoreError::Statement(message),
    }
}
