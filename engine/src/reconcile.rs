//! Reference data reconciliation.
//!
//! Every pass makes a dataset's table hold exactly the records derived from
//! its seed files: new ids are inserted, changed rows are updated column by
//! column, and rows no seed entry produced are deleted. A dataset pass is one
//! transaction run under [`Retry`], so a concurrent writer holding the lock
//! only delays or skips that dataset.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::Utc;
use tracing::{info, warn};

use schema_boot_core::{Session, SqlValue, Store};
use schema_boot_seed::{DatasetSpec, SeedRecord, SeedSource, builtin_datasets};

use crate::error::Result;
use crate::inspector::SchemaInspector;
use crate::repair::Reseed;
use crate::retry::{Retry, RetryOutcome};

const REAL_TOLERANCE: f64 = 1e-9;

/// What happened to one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetOutcome {
    Reconciled {
        inserted: usize,
        updated: usize,
        deleted: usize,
        unchanged: usize,
    },
    /// The table lacks columns the dataset writes; nothing was touched.
    SkippedMissingColumns { columns: Vec<String> },
    /// Every attempt hit lock contention.
    SkippedContention { attempts: u32 },
    /// Seed files could not be read or the pass hit a non-contention error.
    Failed { error: String },
}

impl DatasetOutcome {
    pub fn is_reconciled(&self) -> bool {
        matches!(self, DatasetOutcome::Reconciled { .. })
    }
}

impl fmt::Display for DatasetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetOutcome::Reconciled {
                inserted,
                updated,
                deleted,
                unchanged,
            } => write!(
                f,
                "reconciled ({inserted} inserted, {updated} updated, {deleted} deleted, {unchanged} unchanged)"
            ),
            DatasetOutcome::SkippedMissingColumns { columns } => {
                write!(f, "skipped, missing columns: {}", columns.join(", "))
            }
            DatasetOutcome::SkippedContention { attempts } => {
                write!(f, "skipped, store busy after {attempts} attempts")
            }
            DatasetOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Result of one transaction attempt.
enum Pass {
    Done(DatasetOutcome),
    MissingColumns(Vec<String>),
}

/// Reconciles datasets from a seed source.
///
/// # Examples
///
/// ```no_run
/// use schema_boot_engine::Reconciler;
/// use schema_boot_seed::FileSeedSource;
/// # fn demo(store: &dyn schema_boot_core::Store) {
/// let seeds = FileSeedSource::new("data/seeds");
/// for outcome in Reconciler::new(&seeds).reconcile(store) {
///     println!("{outcome}");
/// }
/// # }
/// ```
pub struct Reconciler<'a> {
    source: &'a dyn SeedSource,
    datasets: Vec<DatasetSpec>,
    retry: Retry,
    inspector: SchemaInspector,
}

impl<'a> Reconciler<'a> {
    /// A reconciler over the bundled datasets in declared order.
    pub fn new(source: &'a dyn SeedSource) -> Self {
        Self {
            source,
            datasets: builtin_datasets(),
            retry: Retry::default(),
            inspector: SchemaInspector::new(),
        }
    }

    pub fn with_datasets(mut self, datasets: Vec<DatasetSpec>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    pub fn datasets(&self) -> &[DatasetSpec] {
        &self.datasets
    }

    /// Reconciles every dataset independently. Never fails as a whole.
    pub fn reconcile(&self, store: &dyn Store) -> Vec<DatasetOutcome> {
        self.datasets
            .iter()
            .map(|dataset| self.reconcile_dataset(store, dataset))
            .collect()
    }

    pub fn reconcile_dataset(&self, store: &dyn Store, dataset: &DatasetSpec) -> DatasetOutcome {
        let records = match self.load_records(dataset) {
            Ok(records) => records,
            Err(e) => {
                warn!(dataset = %dataset.name, error = %e, "seed data could not be loaded");
                return DatasetOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let outcome = self.retry.run(store, &dataset.name, |session| {
            self.inspector.invalidate();
            apply_pass(session, &self.inspector, dataset, &records)
        });

        let outcome = match outcome {
            Ok(RetryOutcome::Completed(Pass::Done(outcome))) => outcome,
            Ok(RetryOutcome::Completed(Pass::MissingColumns(columns))) => {
                warn!(
                    dataset = %dataset.name,
                    columns = %columns.join(", "),
                    "dataset skipped, table is missing columns"
                );
                return DatasetOutcome::SkippedMissingColumns { columns };
            }
            Ok(RetryOutcome::Exhausted { attempts }) => {
                return DatasetOutcome::SkippedContention { attempts };
            }
            Err(e) => {
                warn!(dataset = %dataset.name, error = %e, "reconciliation failed");
                return DatasetOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        if let DatasetOutcome::Reconciled {
            inserted,
            updated,
            deleted,
            unchanged,
        } = &outcome
        {
            info!(
                dataset = %dataset.name,
                inserted,
                updated,
                deleted,
                unchanged,
                "dataset reconciled"
            );
        }
        outcome
    }

    /// Loads and derives every entry. Invalid entries are dropped with a
    /// warning; a later entry with the same id replaces an earlier one.
    fn load_records(&self, dataset: &DatasetSpec) -> Result<Vec<SeedRecord>> {
        let entries = self.source.load_entries(dataset)?;
        let mut records: Vec<SeedRecord> = Vec::with_capacity(entries.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for entry in &entries {
            let record = match dataset.derive(entry) {
                Ok(record) => record,
                Err(e) => {
                    warn!(dataset = %dataset.name, error = %e, "dropping seed entry");
                    continue;
                }
            };
            match positions.get(&record.id) {
                Some(&index) => records[index] = record,
                None => {
                    positions.insert(record.id.clone(), records.len());
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

impl Reseed for Reconciler<'_> {
    fn reseed_table(&self, store: &dyn Store, table: &str) -> Option<DatasetOutcome> {
        let dataset = self
            .datasets
            .iter()
            .find(|d| d.table.name.eq_ignore_ascii_case(table))?;
        Some(self.reconcile_dataset(store, dataset))
    }
}

fn apply_pass(
    session: &mut dyn Session,
    inspector: &SchemaInspector,
    dataset: &DatasetSpec,
    records: &[SeedRecord],
) -> Result<Pass> {
    session.begin()?;

    let table = &dataset.table.name;
    let missing = inspector.missing_columns(session, table, &dataset.required_columns());
    if !missing.is_empty() {
        session.rollback()?;
        return Ok(Pass::MissingColumns(missing));
    }

    let dialect = session.dialect();
    let columns = dataset.value_columns();
    let rows = session.query(
        &format!("SELECT id, {} FROM {table}", columns.join(", ")),
        &[],
    )?;
    let mut existing: HashMap<String, Vec<SqlValue>> = HashMap::with_capacity(rows.len());
    // Ids no seed record can produce; always deleted.
    let mut foreign: Vec<SqlValue> = Vec::new();
    for mut row in rows {
        if row.is_empty() {
            continue;
        }
        let values = row.split_off(1);
        match row.pop() {
            Some(SqlValue::Text(id)) => {
                existing.insert(id, values);
            }
            Some(other) => foreign.push(other),
            None => {}
        }
    }

    let now = Utc::now().to_rfc3339();
    let mut touched: HashSet<&str> = HashSet::with_capacity(records.len());
    let (mut inserted, mut updated, mut unchanged) = (0, 0, 0);

    for record in records {
        touched.insert(record.id.as_str());
        let Some(current) = existing.get(&record.id) else {
            let sql = format!(
                "INSERT INTO {table} (id, {}, created_at, updated_at) VALUES ({})",
                columns.join(", "),
                dialect.placeholders(1, columns.len() + 3)
            );
            let mut params = Vec::with_capacity(columns.len() + 3);
            params.push(SqlValue::from(record.id.as_str()));
            params.extend(record.values.iter().cloned());
            params.push(SqlValue::from(now.as_str()));
            params.push(SqlValue::from(now.as_str()));
            session.execute(&sql, &params)?;
            inserted += 1;
            continue;
        };

        let changed: Vec<usize> = (0..columns.len())
            .filter(|&i| !values_match(current.get(i), &record.values[i]))
            .collect();
        if changed.is_empty() {
            unchanged += 1;
            continue;
        }

        let mut assignments = Vec::with_capacity(changed.len() + 1);
        let mut params = Vec::with_capacity(changed.len() + 2);
        for (n, &i) in changed.iter().enumerate() {
            assignments.push(format!("{} = {}", columns[i], dialect.placeholder(n + 1)));
            params.push(record.values[i].clone());
        }
        assignments.push(format!("updated_at = {}", dialect.placeholder(changed.len() + 1)));
        params.push(SqlValue::from(now.as_str()));
        params.push(SqlValue::from(record.id.as_str()));
        let sql = format!(
            "UPDATE {table} SET {} WHERE id = {}",
            assignments.join(", "),
            dialect.placeholder(changed.len() + 2)
        );
        session.execute(&sql, &params)?;
        updated += 1;
    }

    let mut deleted = 0;
    let delete_sql = format!("DELETE FROM {table} WHERE id = {}", dialect.placeholder(1));
    for id in existing.keys().filter(|id| !touched.contains(id.as_str())) {
        session.execute(&delete_sql, &[SqlValue::from(id.as_str())])?;
        deleted += 1;
    }

    if !foreign.is_empty() {
        warn!(
            dataset = %dataset.name,
            rows = foreign.len(),
            "deleting rows whose id is not text"
        );
        for id in foreign {
            deleted += match id {
                SqlValue::Null => {
                    session.execute(&format!("DELETE FROM {table} WHERE id IS NULL"), &[])?
                }
                id => session.execute(&delete_sql, &[id])?,
            };
        }
    }

    session.commit()?;
    Ok(Pass::Done(DatasetOutcome::Reconciled {
        inserted,
        updated,
        deleted,
        unchanged,
    }))
}

/// Compares a stored value with a derived one. Integer and real storage of
/// the same number count as equal.
fn values_match(stored: Option<&SqlValue>, wanted: &SqlValue) -> bool {
    let stored = stored.unwrap_or(&SqlValue::Null);
    match (stored, wanted) {
        (SqlValue::Real(a), SqlValue::Real(b)) => (a - b).abs() <= REAL_TOLERANCE,
        (SqlValue::Integer(a), SqlValue::Real(b)) | (SqlValue::Real(b), SqlValue::Integer(a)) => {
            (*a as f64 - b).abs() <= REAL_TOLERANCE
        }
        (a, b) => a == b,
    }
}
