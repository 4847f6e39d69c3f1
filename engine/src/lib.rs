//! Boot-time schema migration and reference data reconciliation.
//!
//! This crate drives a [`Store`] to the current schema and then makes the
//! reference data tables match their seed files:
//!
//! - **Executor** ([`MigrationExecutor`]): applies pending `.sql` and `.proc`
//!   files in name order, recording each in the ledger.
//! - **Repair** ([`SchemaRepair`]): fixes missing columns or tables when a
//!   migration trips over drift, then the migration is re-run.
//! - **Reconciler** ([`Reconciler`]): inserts, updates and deletes dataset
//!   rows so each table equals its seed files.
//! - **Retry** ([`Retry`]): re-runs a unit of work while the store is locked
//!   by someone else.
//!
//! # Example
//!
//! ```no_run
//! use schema_boot_engine::{EngineConfig, boot};
//! # fn demo(store: &dyn schema_boot_core::Store) -> schema_boot_engine::Result<()> {
//! let config = EngineConfig::from_file("boot.yaml")?;
//! let report = boot(store, &config)?;
//! for (dataset, outcome) in &report.datasets {
//!     println!("{dataset}: {outcome}");
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod discover;
mod error;
mod executor;
mod inspector;
mod ledger;
mod procedure;
mod reconcile;
mod repair;
mod retry;

use std::path::Path;

use tracing::{info, warn};

use schema_boot_core::{Catalog, Store};
use schema_boot_seed::{FileSeedSource, SeedSource, builtin_datasets};

pub use config::EngineConfig;
pub use discover::{PROCEDURAL_EXTENSION, SCRIPT_EXTENSION, discover_migrations};
pub use error::{EngineError, Result};
pub use executor::{
    LegacyCheck, MigrationExecutor, MigrationReport, MigrationState, MigrationStatus,
    default_legacy_checks,
};
pub use inspector::SchemaInspector;
pub use ledger::{KEY_PREFIX, LEDGER_TABLE, Ledger, LedgerEntry, LedgerStatus, checksum, ledger_table};
pub use procedure::{Procedure, ProcedureFn, ProcedureRegistry, refresh_statistics};
pub use reconcile::{DatasetOutcome, Reconciler};
pub use repair::{RepairAction, Reseed, SchemaRepair};
pub use retry::{Retry, RetryOutcome, RetryPolicy, Sleeper, ThreadSleeper};

/// Where migrations are looked for when no directory is given.
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Canonical definitions of every table the engine may repair: the ledger
/// table and one table per bundled dataset.
pub fn builtin_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    let tables =
        std::iter::once(ledger_table()).chain(builtin_datasets().into_iter().map(|d| d.table));
    for table in tables {
        if let Err(e) = catalog.insert(table) {
            warn!(error = %e, "skipping catalog entry");
        }
    }
    catalog
}

/// Applies pending migrations and returns the names of the files executed.
///
/// Safe to call on every boot; a second call applies nothing. A table that
/// repair had to recreate is refilled from `seeds` straight away.
///
/// # Errors
///
/// Returns the first fatal migration error.
pub fn run_migrations(
    store: &dyn Store,
    dir: Option<&Path>,
    force: bool,
    seeds: &dyn SeedSource,
) -> Result<Vec<String>> {
    let dir = dir.unwrap_or_else(|| Path::new(DEFAULT_MIGRATIONS_DIR));
    let reconciler = Reconciler::new(seeds);
    let report = MigrationExecutor::new(store)
        .force(force)
        .with_reseed(&reconciler)
        .run_dir(dir)?;
    Ok(report.applied)
}

/// Reconciles every bundled dataset. Failures are reported per dataset.
pub fn reconcile_reference_data(store: &dyn Store, source: &dyn SeedSource) -> Vec<DatasetOutcome> {
    Reconciler::new(source).reconcile(store)
}

/// Lists every discovered migration with its ledger state.
pub fn migration_status(store: &dyn Store, dir: &Path) -> Result<Vec<MigrationStatus>> {
    let files = discover_migrations(dir)?;
    MigrationExecutor::new(store).status(&files)
}

/// Everything one boot did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    pub migrations: MigrationReport,
    /// Outcome per dataset, in reconciliation order.
    pub datasets: Vec<(String, DatasetOutcome)>,
}

/// Runs migrations and then reconciles reference data, as configured.
///
/// A table recreated by repair is reseeded straight away from the
/// configured seed directory.
///
/// # Errors
///
/// Returns configuration errors and fatal migration errors. Dataset
/// failures are reported in [`BootReport::datasets`].
pub fn boot(store: &dyn Store, config: &EngineConfig) -> Result<BootReport> {
    let datasets = config.datasets()?;
    let seeds = FileSeedSource::new(&config.seed_dir);
    let reconciler = Reconciler::new(&seeds)
        .with_datasets(datasets)
        .with_retry(Retry::new(config.retry));

    let migrations = MigrationExecutor::new(store)
        .with_legacy_checks(config.legacy_checks.clone())
        .with_reseed(&reconciler)
        .run_dir(&config.migrations_dir)?;
    info!(
        applied = migrations.applied.len(),
        skipped = migrations.skipped.len(),
        repaired = migrations.repaired.len(),
        "migrations complete"
    );

    let outcomes = reconciler.reconcile(store);
    let datasets = reconciler
        .datasets()
        .iter()
        .map(|d| d.name.clone())
        .zip(outcomes)
        .collect();

    Ok(BootReport {
        migrations,
        datasets,
    })
}
