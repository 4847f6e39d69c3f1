//! Schema repair after drift.
//!
//! When a migration statement fails because a column or table is missing,
//! the executor asks [`SchemaRepair`] to bring the table in line with its
//! canonical [`TableDef`] before re-running the migration. Two strategies
//! are tried in order:
//!
//! 1. **Add column in place**, when the table exists and the canonical
//!    column can be added to a populated table.
//! 2. **Recreate from definition**: create a missing table, or drop and
//!    recreate an existing one. Dropping is only allowed for tables marked
//!    reseedable, and is followed by a reseed.

use tracing::{info, warn};

use schema_boot_core::{
    Catalog, ErrorClass, Session, Store, TableDef, is_duplicate_column, statement_target_table,
    validate_identifier,
};

use crate::error::{EngineError, Result};
use crate::inspector::SchemaInspector;
use crate::reconcile::DatasetOutcome;

/// Repopulates a table after it was recreated empty.
pub trait Reseed {
    /// Reconciles the dataset that owns `table`. Returns `None` when no
    /// dataset owns it.
    fn reseed_table(&self, store: &dyn Store, table: &str) -> Option<DatasetOutcome>;
}

/// What a repair did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    AddedColumn { table: String, column: String },
    CreatedTable { table: String },
    RecreatedTable { table: String },
}

impl std::fmt::Display for RepairAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairAction::AddedColumn { table, column } => write!(f, "added {table}.{column}"),
            RepairAction::CreatedTable { table } => write!(f, "created {table}"),
            RepairAction::RecreatedTable { table } => write!(f, "recreated {table}"),
        }
    }
}

/// Applies repair strategies against a store.
pub struct SchemaRepair<'a> {
    store: &'a dyn Store,
    catalog: &'a Catalog,
    inspector: &'a SchemaInspector,
    reseed: Option<&'a dyn Reseed>,
}

impl<'a> SchemaRepair<'a> {
    pub fn new(store: &'a dyn Store, catalog: &'a Catalog, inspector: &'a SchemaInspector) -> Self {
        Self {
            store,
            catalog,
            inspector,
            reseed: None,
        }
    }

    pub fn with_reseed(mut self, reseed: Option<&'a dyn Reseed>) -> Self {
        self.reseed = reseed;
        self
    }

    /// Repairs the drift described by `class`, raised while running
    /// `statement`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RepairFailed`] when the table cannot be
    /// resolved, is not in the catalog, cannot be altered safely, or the
    /// repair DDL itself fails.
    pub fn repair(&self, class: &ErrorClass, statement: &str) -> Result<RepairAction> {
        let (table, column) = match class {
            ErrorClass::MissingColumn { table, column } => (
                table.clone().or_else(|| statement_target_table(statement)),
                Some(column.as_str()),
            ),
            ErrorClass::MissingTable { table } => (Some(table.clone()), None),
            other => {
                return Err(failed("schema", format!("{other:?} is not schema drift")));
            }
        };
        let Some(table) = table else {
            let target = column.unwrap_or("column").to_string();
            return Err(failed(&target, "cannot determine the owning table".into()));
        };

        validate_identifier(&table).map_err(|e| failed(&table, e.to_string()))?;
        if let Some(column) = column {
            validate_identifier(column).map_err(|e| failed(&table, e.to_string()))?;
        }
        let def = self
            .catalog
            .table(&table)
            .ok_or_else(|| failed(&table, "table is not in the canonical catalog".into()))?;

        self.inspector.invalidate();
        let mut session = self
            .store
            .autocommit_session()
            .map_err(|e| failed(&table, e.to_string()))?;
        let result = self.apply(session.as_mut(), def, column);
        session.dispose();

        self.inspector.invalidate();
        self.store.release_connections();

        let action = result?;
        warn!(table = %def.name, action = %action, "schema repaired");

        if let RepairAction::RecreatedTable { table } = &action {
            self.reseed(table);
        }
        Ok(action)
    }

    fn apply(
        &self,
        session: &mut dyn Session,
        def: &TableDef,
        column: Option<&str>,
    ) -> Result<RepairAction> {
        let dialect = self.store.dialect();
        let exists = self.inspector.has_table(session, &def.name);

        if !exists {
            session
                .execute_raw(&def.create_sql(dialect))
                .map_err(|e| failed(&def.name, e.to_string()))?;
            return Ok(RepairAction::CreatedTable {
                table: def.name.clone(),
            });
        }

        let Some(column) = column else {
            return Err(failed(&def.name, "table reported missing but exists".into()));
        };
        let target = format!("{}.{column}", def.name);
        let canonical = def
            .find_column(column)
            .ok_or_else(|| failed(&target, "column is not in the canonical definition".into()))?;

        if canonical.is_addable() {
            return match session.execute_raw(&def.add_column_sql(canonical, dialect)) {
                Ok(()) => Ok(RepairAction::AddedColumn {
                    table: def.name.clone(),
                    column: canonical.name.clone(),
                }),
                Err(e) if is_duplicate_column(&e) => Ok(RepairAction::AddedColumn {
                    table: def.name.clone(),
                    column: canonical.name.clone(),
                }),
                Err(e) => Err(failed(&target, e.to_string())),
            };
        }

        if !def.reseedable {
            return Err(failed(
                &target,
                "column cannot be added in place and the table is not reseedable".into(),
            ));
        }

        for sql in [def.drop_sql(), def.create_sql(dialect)] {
            session
                .execute_raw(&sql)
                .map_err(|e| failed(&def.name, e.to_string()))?;
        }
        Ok(RepairAction::RecreatedTable {
            table: def.name.clone(),
        })
    }

    fn reseed(&self, table: &str) {
        let Some(reseed) = self.reseed else {
            warn!(table, "table recreated empty; it is refilled by the next reconciliation");
            return;
        };
        match reseed.reseed_table(self.store, table) {
            Some(outcome) => info!(table, outcome = %outcome, "table reseeded"),
            None => warn!(table, "no dataset owns the recreated table"),
        }
    }
}

fn failed(target: &str, reason: String) -> EngineError {
    EngineError::RepairFailed {
        target: target.to_string(),
        reason,
    }
}


#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use schema_boot_core::{ColumnDef, ColumnType, Dialect, Row, SqlValue, StoreError, StoreResult};

    use super::*;
    use crate::ledger::ledger_table;

    #[derive(Default)]
    struct State {
        tables: HashMap<String, Vec<String>>,
        executed: Vec<String>,
        fail_on: Option<(String, StoreError)>,
    }

    /// An embedded store whose schema is a fixed map of table to columns.
    #[derive(Clone, Default)]
    struct FakeStore {
        state: Rc<RefCell<State>>,
    }

    impl FakeStore {
        fn with_table(self, table: &str, columns: &[&str]) -> Self {
            self.state.borrow_mut().tables.insert(
                table.to_string(),
                columns.iter().map(|c| c.to_string()).collect(),
            );
            self
        }

        fn fail_on(self, fragment: &str, error: StoreError) -> Self {
            self.state.borrow_mut().fail_on = Some((fragment.to_string(), error));
            self
        }

        fn executed(&self) -> Vec<String> {
            self.state.borrow().executed.clone()
        }
    }

    struct FakeSession {
        state: Rc<RefCell<State>>,
    }

    impl Session for FakeSession {
        fn dialect(&self) -> Dialect {
            Dialect::Embedded
        }

        fn execute_raw(&mut self, sql: &str) -> StoreResult<()> {
            let mut state = self.state.borrow_mut();
            if let Some((fragment, error)) = &state.fail_on {
                if sql.contains(fragment.as_str()) {
                    return Err(error.clone());
                }
            }
            state.executed.push(sql.to_string());
            Ok(())
        }

        fn execute(&mut self, sql: &str, _params: &[SqlValue]) -> StoreResult<usize> {
            self.execute_raw(sql).map(|()| 0)
        }

        fn query(&mut self, sql: &str, _params: &[SqlValue]) -> StoreResult<Vec<Row>> {
            let state = self.state.borrow();
            let columns = state
                .tables
                .iter()
                .find(|(table, _)| sql == format!("PRAGMA table_info(\"{table}\")"))
                .map(|(_, columns)| columns.clone())
                .unwrap_or_default();
            Ok(columns
                .iter()
                .enumerate()
                .map(|(i, c)| vec![SqlValue::Integer(i as i64), SqlValue::from(c.as_str())])
                .collect())
        }

        fn begin(&mut self) -> StoreResult<()> {
            Ok(())
        }

        fn commit(&mut self) -> StoreResult<()> {
            Ok(())
        }

        fn rollback(&mut self) -> StoreResult<()> {
            Ok(())
        }

        fn dispose(self: Box<Self>) {}
    }

    impl Store for FakeStore {
        fn dialect(&self) -> Dialect {
            Dialect::Embedded
        }

        fn session(&self) -> StoreResult<Box<dyn Session>> {
            Ok(Box::new(FakeSession {
                state: self.state.clone(),
            }))
        }

        fn autocommit_session(&self) -> StoreResult<Box<dyn Session>> {
            self.session()
        }

        fn release_connections(&self) {}
    }

    /// Remembers which tables it was asked to refill.
    #[derive(Default)]
    struct RecordingReseed {
        tables: RefCell<Vec<String>>,
    }

    impl Reseed for RecordingReseed {
        fn reseed_table(&self, _store: &dyn Store, table: &str) -> Option<DatasetOutcome> {
            self.tables.borrow_mut().push(table.to_string());
            None
        }
    }

    fn notes(reseedable: bool) -> Catalog {
        let table = TableDef::new("notes")
            .column(ColumnDef::new("id", ColumnType::Text).primary_key())
            .column(ColumnDef::new("body", ColumnType::Text))
            .column(ColumnDef::new("title", ColumnType::Text).not_null());
        let table = if reseedable { table.reseedable() } else { table };
        Catalog::new().with_table(table).unwrap()
    }

    fn missing_column(table: &str, column: &str) -> ErrorClass {
        ErrorClass::MissingColumn {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Add column in place
    // -----------------------------------------------------------------------

    #[test]
    fn test_addable_column_added_in_place() {
        let store = FakeStore::default().with_table("notes", &["id", "title"]);
        let catalog = notes(false);
        let inspector = SchemaInspector::new();

        let action = SchemaRepair::new(&store, &catalog, &inspector)
            .repair(&missing_column("notes", "body"), "UPDATE notes SET body = ''")
            .unwrap();
        assert_eq!(
            action,
            RepairAction::AddedColumn {
                table: "notes".into(),
                column: "body".into()
            }
        );
        assert_eq!(store.executed(), vec!["ALTER TABLE notes ADD COLUMN body TEXT"]);
    }

    #[test]
    fn test_duplicate_column_counts_as_added() {
        let store = FakeStore::default().with_table("notes", &["id", "title"]).fail_on(
            "ADD COLUMN body",
            StoreError::Statement("duplicate column name: body".into()),
        );
        let catalog = notes(false);
        let inspector = SchemaInspector::new();

        let action = SchemaRepair::new(&store, &catalog, &inspector)
            .repair(&missing_column("notes", "body"), "UPDATE notes SET body = ''")
            .unwrap();
        assert_eq!(
            action,
            RepairAction::AddedColumn {
                table: "notes".into(),
                column: "body".into()
            }
        );
    }

    #[test]
    fn test_failed_add_column_is_repair_failure() {
        let store = FakeStore::default()
            .with_table("notes", &["id", "title"])
            .fail_on("ADD COLUMN body", StoreError::Statement("disk I/O error".into()));
        let catalog = notes(false);
        let inspector = SchemaInspector::new();

        let err = SchemaRepair::new(&store, &catalog, &inspector)
            .repair(&missing_column("notes", "body"), "UPDATE notes SET body = ''")
            .unwrap_err();
        assert!(
            matches!(err, EngineError::RepairFailed { ref target, .. } if target == "notes.body"),
            "{err}"
        );
    }

    // -----------------------------------------------------------------------
    // Recreate from definition
    // -----------------------------------------------------------------------

    #[test]
    fn test_ledger_table_is_never_recreated() {
        let store =
            FakeStore::default().with_table("app_settings", &["key", "created_at", "updated_at"]);
        let catalog = Catalog::new().with_table(ledger_table()).unwrap();
        let inspector = SchemaInspector::new();
        let reseed = RecordingReseed::default();

        let err = SchemaRepair::new(&store, &catalog, &inspector)
            .with_reseed(Some(&reseed))
            .repair(
                &missing_column("app_settings", "value"),
                "SELECT value FROM app_settings",
            )
            .unwrap_err();
        match err {
            EngineError::RepairFailed { target, reason } => {
                assert_eq!(target, "app_settings.value");
                assert!(reason.contains("not reseedable"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.executed().is_empty());
        assert!(reseed.tables.borrow().is_empty());
    }

    #[test]
    fn test_reseedable_table_recreated_and_reseeded() {
        let store = FakeStore::default().with_table("notes", &["id", "body"]);
        let catalog = notes(true);
        let inspector = SchemaInspector::new();
        let reseed = RecordingReseed::default();

        let action = SchemaRepair::new(&store, &catalog, &inspector)
            .with_reseed(Some(&reseed))
            .repair(&missing_column("notes", "title"), "UPDATE notes SET title = 'x'")
            .unwrap();
        assert_eq!(
            action,
            RepairAction::RecreatedTable {
                table: "notes".into()
            }
        );
        let executed = store.executed();
        assert_eq!(executed[0], "DROP TABLE IF EXISTS notes");
        assert!(executed[1].starts_with("CREATE TABLE IF NOT EXISTS notes"));
        assert_eq!(*reseed.tables.borrow(), vec!["notes"]);
    }

    #[test]
    fn test_missing_table_created() {
        let store = FakeStore::default();
        let catalog = notes(false);
        let inspector = SchemaInspector::new();

        let action = SchemaRepair::new(&store, &catalog, &inspector)
            .repair(
                &ErrorClass::MissingTable {
                    table: "notes".into(),
                },
                "INSERT INTO notes (id) VALUES ('a')",
            )
            .unwrap();
        assert_eq!(
            action,
            RepairAction::CreatedTable {
                table: "notes".into()
            }
        );
    }

    #[test]
    fn test_non_drift_class_is_refused() {
        let store = FakeStore::default();
        let catalog = notes(true);
        let inspector = SchemaInspector::new();

        let err = SchemaRepair::new(&store, &catalog, &inspector)
            .repair(&ErrorClass::LockContention, "VACUUM")
            .unwrap_err();
        assert!(matches!(err, EngineError::RepairFailed { .. }));
        assert!(store.executed().is_empty());
    }
}
