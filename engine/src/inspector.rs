//! Table and column existence checks.
//!
//! The inspector never fails: a catalog query that errors is logged at debug
//! level and answered as "absent". On the embedded dialect it asks
//! `PRAGMA table_info` on the caller's own session, so it sees uncommitted
//! DDL. On the server dialect it reads `information_schema.columns` and
//! memoises answers until [`SchemaInspector::invalidate`] is called.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use schema_boot_core::{Dialect, Session, SqlValue, validate_identifier};
use tracing::debug;

const SERVER_COLUMNS_SQL: &str = "SELECT column_name FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1 \
     ORDER BY ordinal_position";

/// Answers schema existence questions across dialects.
#[derive(Debug, Default)]
pub struct SchemaInspector {
    cache: Mutex<HashMap<String, Option<Vec<String>>>>,
}

impl SchemaInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table's column names, or `None` if the table does not
    /// exist or cannot be inspected.
    pub fn columns(&self, session: &mut dyn Session, table: &str) -> Option<Vec<String>> {
        if validate_identifier(table).is_err() {
            debug!(table, "refusing to inspect invalid table name");
            return None;
        }

        match session.dialect() {
            Dialect::Embedded => embedded_columns(session, table),
            Dialect::Server => {
                let key = table.to_ascii_lowercase();
                if let Some(cached) = self.lock().get(&key) {
                    return cached.clone();
                }
                let rows = session.query(SERVER_COLUMNS_SQL, &[SqlValue::from(key.as_str())]);
                let answer = match rows {
                    Ok(rows) => column_names(rows, 0),
                    Err(e) => {
                        debug!(table, error = %e, "column lookup failed");
                        // Errors are not cached; the next call asks again.
                        return None;
                    }
                };
                self.lock().insert(key, answer.clone());
                answer
            }
        }
    }

    pub fn has_table(&self, session: &mut dyn Session, table: &str) -> bool {
        self.columns(session, table).is_some()
    }

    pub fn has_column(&self, session: &mut dyn Session, table: &str, column: &str) -> bool {
        self.columns(session, table)
            .is_some_and(|cols| cols.iter().any(|c| c.eq_ignore_ascii_case(column)))
    }

    /// Returns the entries of `required` the table lacks. Every column is
    /// missing when the table itself is.
    pub fn missing_columns(
        &self,
        session: &mut dyn Session,
        table: &str,
        required: &[&str],
    ) -> Vec<String> {
        let present = self.columns(session, table).unwrap_or_default();
        required
            .iter()
            .filter(|column| !present.iter().any(|c| c.eq_ignore_ascii_case(column)))
            .map(|column| column.to_string())
            .collect()
    }

    /// Forgets every memoised answer.
    pub fn invalidate(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<Vec<String>>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn embedded_columns(session: &mut dyn Session, table: &str) -> Option<Vec<String>> {
    match session.query(&format!("PRAGMA table_info(\"{table}\")"), &[]) {
        Ok(rows) => column_names(rows, 1),
        Err(e) => {
            debug!(table, error = %e, "table_info failed");
            None
        }
    }
}

fn column_names(rows: Vec<Vec<SqlValue>>, index: usize) -> Option<Vec<String>> {
    let names: Vec<String> = rows
        .iter()
        .filter_map(|row| row.get(index).and_then(SqlValue::as_text))
        .map(String::from)
        .collect();
    (!names.is_empty()).then_some(names)
}
