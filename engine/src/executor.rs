//! Applying pending migrations.
//!
//! Each discovered file moves through a small state machine:
//!
//! ```text
//! Pending ──► Applying ──► Applied
//!                 │
//!                 └──────► Skipped   (empty body, or dialect veto)
//! Applied ──► Pending                (legacy entry contradicted by live schema)
//! ```
//!
//! Script statements run in one transaction together with the ledger write.
//! Statements that cannot run inside a transaction go to a dedicated
//! autocommit session, after the work before them is committed. A statement
//! failing on a missing column or table triggers [`SchemaRepair`] and a
//! re-run of the file from its first uncommitted statement; every other
//! failure is fatal.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use schema_boot_core::{
    Catalog, ErrorClass, MigrationFile, MigrationKind, Session, Store, StoreError,
    classify_error, is_comment_only, is_duplicate_column, requires_autocommit, split_statements,
    unsupported_markers,
};

use crate::discover::discover_migrations;
use crate::error::{EngineError, Result};
use crate::inspector::SchemaInspector;
use crate::ledger::{Ledger, LedgerEntry, LedgerStatus, checksum};
use crate::procedure::{Procedure, ProcedureRegistry};
use crate::repair::{Reseed, SchemaRepair};

/// A migration whose effect is checked against the live schema on every
/// run, because older deployments may have recorded it without applying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCheck {
    pub migration: String,
    pub table: String,
    pub column: String,
}

impl LegacyCheck {
    pub fn new(migration: &str, table: &str, column: &str) -> Self {
        Self {
            migration: migration.to_string(),
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

pub fn default_legacy_checks() -> Vec<LegacyCheck> {
    vec![LegacyCheck::new(
        "0004_cross_reference_perspective.sql",
        "cross_references",
        "perspective",
    )]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Pending,
    Applying,
    Applied,
    Skipped,
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationState::Pending => "pending",
            MigrationState::Applying => "applying",
            MigrationState::Applied => "applied",
            MigrationState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// What one executor run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Files executed this run.
    pub applied: Vec<String>,
    /// Files recorded as skipped this run.
    pub skipped: Vec<String>,
    /// Files whose ledger entry was dropped because the schema contradicted it.
    pub healed: Vec<String>,
    /// Repairs performed, as `file: action`.
    pub repaired: Vec<String>,
}

/// Ledger state of one discovered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub state: MigrationState,
    pub applied_at: Option<String>,
    pub reason: Option<String>,
}

/// A statement that failed and may be repairable.
#[derive(Debug)]
struct StatementFailure {
    statement: String,
    error: StoreError,
}

impl StatementFailure {
    fn into_error(self, filename: &str) -> EngineError {
        EngineError::MigrationFailed {
            filename: filename.to_string(),
            statement: self.statement,
            source: self.error,
        }
    }
}

/// Applies migration files against a store.
///
/// # Examples
///
/// ```no_run
/// use schema_boot_engine::MigrationExecutor;
/// # fn demo(store: &dyn schema_boot_core::Store) -> schema_boot_engine::Result<()> {
/// let report = MigrationExecutor::new(store).run_dir("migrations".as_ref())?;
/// println!("applied {:?}", report.applied);
/// # Ok(())
/// # }
/// ```
pub struct MigrationExecutor<'a> {
    store: &'a dyn Store,
    catalog: Catalog,
    inspector: SchemaInspector,
    procedures: ProcedureRegistry,
    legacy_checks: Vec<LegacyCheck>,
    reseed: Option<&'a dyn Reseed>,
    force: bool,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            catalog: crate::builtin_catalog(),
            inspector: SchemaInspector::new(),
            procedures: ProcedureRegistry::with_builtins(),
            legacy_checks: default_legacy_checks(),
            reseed: None,
            force: false,
        }
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_procedures(mut self, procedures: ProcedureRegistry) -> Self {
        self.procedures = procedures;
        self
    }

    pub fn with_legacy_checks(mut self, checks: Vec<LegacyCheck>) -> Self {
        self.legacy_checks = checks;
        self
    }

    /// Sets who repopulates a table that repair had to recreate.
    pub fn with_reseed(mut self, reseed: &'a dyn Reseed) -> Self {
        self.reseed = Some(reseed);
        self
    }

    /// Treats every file as pending regardless of the ledger.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Discovers and runs the migrations in `dir`.
    pub fn run_dir(&self, dir: &Path) -> Result<MigrationReport> {
        let files = discover_migrations(dir)?;
        self.run(&files)
    }

    /// Runs `files` in the order given.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error. Files applied before it stay applied.
    pub fn run(&self, files: &[MigrationFile]) -> Result<MigrationReport> {
        let ledger = Ledger::new(self.store.dialect());
        let mut report = MigrationReport::default();

        {
            let mut session = self.store.session()?;
            ledger.ensure(session.as_mut())?;
            self.heal_legacy_entries(session.as_mut(), &ledger, files, &mut report)?;
        }

        for file in files {
            if self.state_of(&ledger, file)? != MigrationState::Pending {
                continue;
            }
            debug!(migration = %file.name, state = %MigrationState::Applying, "applying migration");

            match self.apply(&ledger, file, &mut report)? {
                MigrationState::Applied => {
                    info!(migration = %file.name, "migration applied");
                    report.applied.push(file.name.clone());
                }
                MigrationState::Skipped => report.skipped.push(file.name.clone()),
                MigrationState::Pending | MigrationState::Applying => {}
            }
            self.inspector.invalidate();
        }

        Ok(report)
    }

    /// Reports the ledger state of every file without running anything.
    pub fn status(&self, files: &[MigrationFile]) -> Result<Vec<MigrationStatus>> {
        let ledger = Ledger::new(self.store.dialect());
        let mut session = self.store.session()?;
        ledger.ensure(session.as_mut())?;
        let mut entries: HashMap<String, LedgerEntry> = ledger
            .entries(session.as_mut())?
            .into_iter()
            .map(|entry| (entry.filename.clone(), entry))
            .collect();

        let statuses = files
            .iter()
            .map(|file| match entries.remove(&file.name) {
                Some(entry) => MigrationStatus {
                    name: file.name.clone(),
                    state: match entry.status {
                        LedgerStatus::Applied => MigrationState::Applied,
                        LedgerStatus::Skipped => MigrationState::Skipped,
                    },
                    applied_at: Some(entry.applied_at),
                    reason: entry.reason,
                },
                None => MigrationStatus {
                    name: file.name.clone(),
                    state: MigrationState::Pending,
                    applied_at: None,
                    reason: None,
                },
            })
            .collect();
        Ok(statuses)
    }

    fn heal_legacy_entries(
        &self,
        session: &mut dyn Session,
        ledger: &Ledger,
        files: &[MigrationFile],
        report: &mut MigrationReport,
    ) -> Result<()> {
        for check in &self.legacy_checks {
            if !files.iter().any(|f| f.name == check.migration) {
                continue;
            }
            let applied = ledger
                .get(session, &check.migration)?
                .is_some_and(|entry| entry.status == LedgerStatus::Applied);
            if !applied || self.inspector.has_column(session, &check.table, &check.column) {
                continue;
            }

            warn!(
                migration = %check.migration,
                table = %check.table,
                column = %check.column,
                "ledger says applied but column is missing, re-running migration"
            );
            ledger.forget(session, &check.migration)?;
            report.healed.push(check.migration.clone());
        }
        Ok(())
    }

    fn state_of(&self, ledger: &Ledger, file: &MigrationFile) -> Result<MigrationState> {
        if self.force {
            return Ok(MigrationState::Pending);
        }
        let mut session = self.store.session()?;
        let Some(entry) = ledger.get(session.as_mut(), &file.name)? else {
            return Ok(MigrationState::Pending);
        };

        if file.kind == MigrationKind::Script {
            if let Some(recorded) = &entry.checksum {
                if *recorded != checksum(&file.body) {
                    warn!(migration = %file.name, "migration changed after it was recorded");
                }
            }
        }
        Ok(match entry.status {
            LedgerStatus::Applied => MigrationState::Applied,
            LedgerStatus::Skipped => MigrationState::Skipped,
        })
    }

    fn apply(
        &self,
        ledger: &Ledger,
        file: &MigrationFile,
        report: &mut MigrationReport,
    ) -> Result<MigrationState> {
        match file.kind {
            MigrationKind::Script => self.apply_script(ledger, file, report),
            MigrationKind::Procedural => self.apply_procedural(ledger, file),
        }
    }

    fn apply_script(
        &self,
        ledger: &Ledger,
        file: &MigrationFile,
        report: &mut MigrationReport,
    ) -> Result<MigrationState> {
        if is_comment_only(&file.body) {
            return self.skip(ledger, file, "empty migration");
        }

        let dialect = self.store.dialect();
        let markers = unsupported_markers(&file.body, dialect);
        if !markers.is_empty() {
            let names: Vec<&str> = markers.iter().map(|m| m.name).collect();
            return self.skip(
                ledger,
                file,
                &format!("unsupported on {dialect}: {}", names.join(", ")),
            );
        }

        let statements: Vec<String> = split_statements(&file.body)
            .into_iter()
            .filter(|s| !is_comment_only(s))
            .collect();
        let repair = SchemaRepair::new(self.store, &self.catalog, &self.inspector)
            .with_reseed(self.reseed);
        let mut repaired: HashSet<ErrorClass> = HashSet::new();
        let mut committed = 0;

        loop {
            let failure = match self.execute_script(ledger, file, &statements, &mut committed)? {
                Ok(()) => return Ok(MigrationState::Applied),
                Err(failure) => failure,
            };

            let class = classify_error(&failure.error);
            let drift = matches!(
                class,
                ErrorClass::MissingColumn { .. } | ErrorClass::MissingTable { .. }
            );
            if !drift {
                return Err(failure.into_error(&file.name));
            }
            if repaired.contains(&class) {
                warn!(migration = %file.name, class = ?class, "schema drift persisted after repair");
                return Err(failure.into_error(&file.name));
            }

            let action = repair.repair(&class, &failure.statement)?;
            report.repaired.push(format!("{}: {action}", file.name));
            repaired.insert(class);
            debug!(migration = %file.name, "re-running migration after repair");
        }
    }

    /// Runs the statements from `*committed` onwards, with the ledger write
    /// in the last transaction.
    ///
    /// A statement that cannot run inside a transaction splits the script:
    /// the open transaction is committed first and a new one begins after
    /// it. `*committed` advances past every committed segment so a re-run
    /// after repair resumes there. The outer result carries fatal errors;
    /// the inner one a statement failure that repair may fix.
    fn execute_script(
        &self,
        ledger: &Ledger,
        file: &MigrationFile,
        statements: &[String],
        committed: &mut usize,
    ) -> Result<std::result::Result<(), StatementFailure>> {
        let mut session = self.store.session()?;
        session.begin()?;

        for (index, statement) in statements.iter().enumerate().skip(*committed) {
            let autocommit = requires_autocommit(statement);
            let result = if autocommit {
                // The autocommit statement must see, and not wait on, the
                // work before it.
                session.commit()?;
                *committed = index;
                debug!(migration = %file.name, statement = %statement, "running outside transaction");
                let result = self.execute_autocommit(statement);
                session.begin()?;
                result
            } else {
                session.execute_raw(statement)
            };

            match result {
                Ok(()) => {}
                Err(e) if is_duplicate_column(&e) => {
                    debug!(migration = %file.name, error = %e, "column already present");
                }
                Err(error) => {
                    rollback_quietly(session.as_mut());
                    return Ok(Err(StatementFailure {
                        statement: statement.clone(),
                        error,
                    }));
                }
            }
            if autocommit {
                *committed = index + 1;
            }
        }

        ledger.record(session.as_mut(), &LedgerEntry::applied(&file.name, &file.body))?;
        session.commit()?;
        Ok(Ok(()))
    }

    fn execute_autocommit(&self, sql: &str) -> std::result::Result<(), StoreError> {
        let mut conn = self.store.autocommit_session()?;
        let result = conn.execute_raw(sql);
        conn.dispose();
        result
    }

    fn apply_procedural(&self, ledger: &Ledger, file: &MigrationFile) -> Result<MigrationState> {
        let procedure = self
            .procedures
            .get(file.stem())
            .ok_or_else(|| EngineError::MissingProcedure(file.name.clone()))?;
        let entry = LedgerEntry::applied(&file.name, &file.body);
        let failed = |source| EngineError::ProcedureFailed {
            filename: file.name.clone(),
            source,
        };

        match procedure {
            Procedure::Session(handler) => {
                let mut session = self.store.session()?;
                session.begin()?;
                if let Err(e) = handler(session.as_mut()) {
                    rollback_quietly(session.as_mut());
                    return Err(failed(e));
                }
                ledger.record(session.as_mut(), &entry)?;
                session.commit()?;
            }
            Procedure::Connection(handler) => {
                let mut conn = self.store.autocommit_session()?;
                let result = handler(conn.as_mut());
                conn.dispose();
                result.map_err(failed)?;

                let mut session = self.store.session()?;
                ledger.record(session.as_mut(), &entry)?;
            }
        }
        Ok(MigrationState::Applied)
    }

    fn skip(&self, ledger: &Ledger, file: &MigrationFile, reason: &str) -> Result<MigrationState> {
        info!(migration = %file.name, reason, "migration skipped");
        let mut session = self.store.session()?;
        ledger.record(
            session.as_mut(),
            &LedgerEntry::skipped(&file.name, &file.body, reason),
        )?;
        Ok(MigrationState::Skipped)
    }
}

fn rollback_quietly(session: &mut dyn Session) {
    if let Err(e) = session.rollback() {
        debug!(error = %e, "rollback failed");
    }
}
