//! Integration tests for the schema-boot-engine crate against real SQLite
//! databases.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use schema_boot_core::{Dialect, Row, SqlValue, Store};
use schema_boot_engine::{
    DatasetOutcome, EngineConfig, EngineError, Ledger, LedgerStatus, MigrationExecutor,
    MigrationState, Reconciler, Retry, RetryPolicy, boot, migration_status,
    reconcile_reference_data, run_migrations,
};
use schema_boot_seed::{
    CROSS_REFERENCES_NAMESPACE, FileSeedSource, StaticSeedSource, cross_references, places,
};
use schema_boot_sqlite::SqliteStore;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

fn bundled_migrations() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../migrations")
}

fn bundled_seeds() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../data/seeds")
}

fn bundled_source() -> FileSeedSource {
    FileSeedSource::new(bundled_seeds())
}

fn open_store(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(dir.path().join("app.db")).unwrap()
}

/// Copies the named bundled migrations into a fresh directory.
fn migrations_subset(dir: &TempDir, names: &[&str]) -> PathBuf {
    let target = dir.path().join("migrations");
    fs::create_dir_all(&target).unwrap();
    for name in names {
        fs::copy(bundled_migrations().join(name), target.join(name)).unwrap();
    }
    target
}

fn query(store: &dyn Store, sql: &str) -> Vec<Row> {
    store.session().unwrap().query(sql, &[]).unwrap()
}

fn exec(store: &dyn Store, sql: &str) {
    store.session().unwrap().execute_raw(sql).unwrap();
}

fn columns(store: &dyn Store, table: &str) -> Vec<String> {
    query(store, &format!("PRAGMA table_info(\"{table}\")"))
        .iter()
        .filter_map(|row| row[1].as_text().map(String::from))
        .collect()
}

fn ids(store: &dyn Store, table: &str) -> Vec<String> {
    query(store, &format!("SELECT id FROM {table} ORDER BY id"))
        .iter()
        .filter_map(|row| row[0].as_text().map(String::from))
        .collect()
}

fn count(store: &dyn Store, table: &str) -> i64 {
    query(store, &format!("SELECT COUNT(*) FROM {table}"))[0][0]
        .as_integer()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Migration executor
// ---------------------------------------------------------------------------

#[test]
fn test_bundled_migrations_apply_once() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let applied =
        run_migrations(&store, Some(&bundled_migrations()), false, &bundled_source()).unwrap();
    assert_eq!(
        applied,
        vec![
            "0001_app_settings.sql",
            "0002_cross_references.sql",
            "0003_cross_reference_indexes.sql",
            "0004_cross_reference_perspective.sql",
            "0005_parallel_passages.sql",
            "0006_places.sql",
            "0008_parallel_passage_relation_index.sql",
            "0009_refresh_statistics.proc",
        ]
    );
    assert!(columns(&store, "cross_references").contains(&"perspective".to_string()));

    let again =
        run_migrations(&store, Some(&bundled_migrations()), false, &bundled_source()).unwrap();
    assert!(again.is_empty());
}

#[test]
fn test_server_only_migration_skipped_and_recorded() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    run_migrations(&store, Some(&bundled_migrations()), false, &bundled_source()).unwrap();

    assert!(!columns(&store, "places").contains(&"search".to_string()));

    let mut session = store.session().unwrap();
    let entry = Ledger::new(Dialect::Embedded)
        .get(session.as_mut(), "0007_places_search.sql")
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, LedgerStatus::Skipped);
    assert!(entry.reason.unwrap().contains("tsvector"));

    let statuses = migration_status(&store, &bundled_migrations()).unwrap();
    assert_eq!(statuses.len(), 9);
    assert_eq!(statuses[6].state, MigrationState::Skipped);
    assert!(
        statuses
            .iter()
            .filter(|s| s.name != "0007_places_search.sql")
            .all(|s| s.state == MigrationState::Applied)
    );
}

#[test]
fn test_forced_run_reapplies_everything() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    run_migrations(&store, Some(&bundled_migrations()), false, &bundled_source()).unwrap();

    // 0004 meets its own column again; that counts as already applied.
    let applied =
        run_migrations(&store, Some(&bundled_migrations()), true, &bundled_source()).unwrap();
    assert_eq!(applied.len(), 8);
}

#[test]
fn test_missing_directory_applies_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let applied =
        run_migrations(&store, Some(&dir.path().join("nope")), false, &bundled_source()).unwrap();
    assert!(applied.is_empty());
}

#[test]
fn test_legacy_entry_without_column_is_healed() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    run_migrations(&store, Some(&bundled_migrations()), false, &bundled_source()).unwrap();

    // An older install: ledger says applied, column never added.
    exec(&store, "DROP INDEX idx_cross_references_perspective");
    exec(&store, "ALTER TABLE cross_references DROP COLUMN perspective");
    assert!(!columns(&store, "cross_references").contains(&"perspective".to_string()));

    let report = MigrationExecutor::new(&store)
        .run_dir(&bundled_migrations())
        .unwrap();
    assert_eq!(report.healed, vec!["0004_cross_reference_perspective.sql"]);
    assert_eq!(report.applied, vec!["0004_cross_reference_perspective.sql"]);
    assert!(columns(&store, "cross_references").contains(&"perspective".to_string()));

    let report = MigrationExecutor::new(&store)
        .run_dir(&bundled_migrations())
        .unwrap();
    assert!(report.healed.is_empty());
    assert!(report.applied.is_empty());
}

#[test]
fn test_missing_column_added_in_place() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let migrations = migrations_subset(&dir, &["0001_app_settings.sql", "0005_parallel_passages.sql"]);
    run_migrations(&store, Some(&migrations), false, &bundled_source()).unwrap();

    exec(&store, "ALTER TABLE parallel_passages DROP COLUMN relation");
    fs::copy(
        bundled_migrations().join("0008_parallel_passage_relation_index.sql"),
        migrations.join("0008_parallel_passage_relation_index.sql"),
    )
    .unwrap();

    let report = MigrationExecutor::new(&store).run_dir(&migrations).unwrap();
    assert_eq!(report.applied, vec!["0008_parallel_passage_relation_index.sql"]);
    assert_eq!(
        report.repaired,
        vec!["0008_parallel_passage_relation_index.sql: added parallel_passages.relation"]
    );
    assert!(columns(&store, "parallel_passages").contains(&"relation".to_string()));
}

#[test]
fn test_missing_table_created_from_definition() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let migrations = migrations_subset(
        &dir,
        &["0001_app_settings.sql", "0008_parallel_passage_relation_index.sql"],
    );

    let report = MigrationExecutor::new(&store).run_dir(&migrations).unwrap();
    assert_eq!(
        report.repaired,
        vec!["0008_parallel_passage_relation_index.sql: created parallel_passages"]
    );
    assert_eq!(report.applied.len(), 2);
    assert!(columns(&store, "parallel_passages").contains(&"passage_start".to_string()));
}

#[test]
fn test_unaddable_column_recreates_and_reseeds() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let migrations = migrations_subset(&dir, &["0001_app_settings.sql"]);

    // A hand-made table missing a NOT NULL column, holding a stale row.
    exec(
        &store,
        "CREATE TABLE cross_references (id TEXT PRIMARY KEY, to_ref TEXT, created_at TEXT, updated_at TEXT)",
    );
    exec(
        &store,
        "INSERT INTO cross_references VALUES ('stale', 'Gen.1.1', 'x', 'x')",
    );
    fs::write(
        migrations.join("0010_cross_reference_from_index.sql"),
        "CREATE INDEX IF NOT EXISTS idx_cross_references_from_ref ON cross_references (from_ref);",
    )
    .unwrap();

    let seeds = StaticSeedSource::new().with_document(
        "cross_references",
        json!([
            {"a": "Gen.1.1", "b": "John.1.1", "source": "tsk"},
            {"a": "Exod.3.14", "b": "John.8.58", "source": "tsk", "weight": 0.8}
        ]),
    );
    let reconciler = Reconciler::new(&seeds).with_datasets(vec![cross_references()]);

    let report = MigrationExecutor::new(&store)
        .with_reseed(&reconciler)
        .run_dir(&migrations)
        .unwrap();
    assert_eq!(
        report.repaired,
        vec!["0010_cross_reference_from_index.sql: recreated cross_references"]
    );
    assert!(report.applied.contains(&"0010_cross_reference_from_index.sql".to_string()));
    assert_eq!(count(&store, "cross_references"), 2);
    assert!(!ids(&store, "cross_references").contains(&"stale".to_string()));
}

#[test]
fn test_run_migrations_reseeds_recreated_table() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let migrations = migrations_subset(&dir, &["0001_app_settings.sql"]);

    exec(
        &store,
        "CREATE TABLE cross_references (id TEXT PRIMARY KEY, to_ref TEXT, created_at TEXT, updated_at TEXT)",
    );
    exec(
        &store,
        "INSERT INTO cross_references VALUES ('stale', 'Gen.1.1', 'x', 'x')",
    );
    fs::write(
        migrations.join("0010_idx.sql"),
        "CREATE INDEX idx_cross_references_from ON cross_references (from_ref);",
    )
    .unwrap();
    let seeds = StaticSeedSource::new().with_document(
        "cross_references",
        json!([{"a": "Gen.1.1", "b": "John.1.1", "source": "tsk"}]),
    );

    let applied = run_migrations(&store, Some(&migrations), false, &seeds).unwrap();
    assert_eq!(applied, vec!["0001_app_settings.sql", "0010_idx.sql"]);
    assert_eq!(count(&store, "cross_references"), 1);
    assert!(!ids(&store, "cross_references").contains(&"stale".to_string()));
    assert!(columns(&store, "cross_references").contains(&"from_ref".to_string()));
}

#[test]
fn test_uncataloged_drift_is_fatal() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let migrations = migrations_subset(&dir, &["0001_app_settings.sql"]);
    fs::write(
        migrations.join("0002_mystery.sql"),
        "CREATE INDEX idx_mystery ON mystery (x);",
    )
    .unwrap();

    let err = run_migrations(&store, Some(&migrations), false, &bundled_source()).unwrap_err();
    assert!(matches!(err, EngineError::RepairFailed { ref target, .. } if target == "mystery"), "{err}");

    let statuses = migration_status(&store, &migrations).unwrap();
    assert_eq!(statuses[0].state, MigrationState::Applied);
    assert_eq!(statuses[1].state, MigrationState::Pending);
}

#[test]
fn test_failed_script_rolls_back_whole_file() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let migrations = dir.path().join("migrations");
    fs::create_dir_all(&migrations).unwrap();
    fs::write(
        migrations.join("0001_notes.sql"),
        "CREATE TABLE notes (id TEXT PRIMARY KEY);\nCREATE TABEL broken (id TEXT);",
    )
    .unwrap();

    let err = run_migrations(&store, Some(&migrations), false, &bundled_source()).unwrap_err();
    match err {
        EngineError::MigrationFailed {
            filename,
            statement,
            ..
        } => {
            assert_eq!(filename, "0001_notes.sql");
            assert!(statement.starts_with("CREATE TABEL"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(columns(&store, "notes").is_empty());
}

#[test]
fn test_vacuum_runs_after_earlier_statements_commit() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).with_busy_timeout(Duration::from_millis(200));
    let migrations = migrations_subset(&dir, &["0001_app_settings.sql"]);
    fs::write(
        migrations.join("0002_compact.sql"),
        "CREATE TABLE t (id TEXT);\nVACUUM;\nCREATE TABLE u (id TEXT);",
    )
    .unwrap();

    let applied = run_migrations(&store, Some(&migrations), false, &bundled_source()).unwrap();
    assert_eq!(applied, vec!["0001_app_settings.sql", "0002_compact.sql"]);
    assert_eq!(columns(&store, "t"), vec!["id"]);
    assert_eq!(columns(&store, "u"), vec!["id"]);

    let statuses = migration_status(&store, &migrations).unwrap();
    assert!(statuses.iter().all(|s| s.state == MigrationState::Applied));
}

// ---------------------------------------------------------------------------
// Reference data reconciler
// ---------------------------------------------------------------------------

fn migrated_store(dir: &TempDir) -> SqliteStore {
    let store = open_store(dir);
    run_migrations(&store, Some(&bundled_migrations()), false, &bundled_source()).unwrap();
    store
}

#[test]
fn test_bundled_seeds_reconcile_and_settle() {
    let dir = TempDir::new().unwrap();
    let store = migrated_store(&dir);
    let seeds = FileSeedSource::new(bundled_seeds());

    let first = reconcile_reference_data(&store, &seeds);
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(DatasetOutcome::is_reconciled), "{first:?}");
    assert_eq!(count(&store, "cross_references"), 8);
    assert_eq!(count(&store, "parallel_passages"), 5);
    assert_eq!(count(&store, "places"), 5);

    let second = reconcile_reference_data(&store, &seeds);
    for outcome in second {
        match outcome {
            DatasetOutcome::Reconciled {
                inserted,
                updated,
                deleted,
                unchanged,
            } => {
                assert_eq!((inserted, updated, deleted), (0, 0, 0));
                assert!(unchanged > 0);
            }
            other => panic!("unexpected outcome: {other}"),
        }
    }
}

#[test]
fn test_concrete_insert_then_delete() {
    let dir = TempDir::new().unwrap();
    let store = migrated_store(&dir);
    let expected = Uuid::new_v5(&CROSS_REFERENCES_NAMESPACE, b"gen.1.1|gen.1.2|t|neutral").to_string();

    let mut seeds = StaticSeedSource::new().with_document(
        "cross_references",
        json!([{"a": "Gen.1.1", "b": "Gen.1.2", "source": "t", "weight": 1.0}]),
    );
    let outcome = Reconciler::new(&seeds)
        .with_datasets(vec![cross_references()])
        .reconcile(&store);
    assert_eq!(
        outcome,
        vec![DatasetOutcome::Reconciled {
            inserted: 1,
            updated: 0,
            deleted: 0,
            unchanged: 0
        }]
    );
    assert_eq!(ids(&store, "cross_references"), vec![expected.clone()]);

    let row = &query(
        &store,
        "SELECT from_start, from_end, to_start, perspective FROM cross_references",
    )[0];
    assert_eq!(row[0], SqlValue::Integer(1_001_001));
    assert_eq!(row[1], SqlValue::Integer(1_001_001));
    assert_eq!(row[2], SqlValue::Integer(1_001_002));
    assert_eq!(row[3], SqlValue::from("neutral"));

    seeds.set_documents("cross_references", vec![json!([])]);
    let outcome = Reconciler::new(&seeds)
        .with_datasets(vec![cross_references()])
        .reconcile(&store);
    assert_eq!(
        outcome,
        vec![DatasetOutcome::Reconciled {
            inserted: 0,
            updated: 0,
            deleted: 1,
            unchanged: 0
        }]
    );
    assert!(ids(&store, "cross_references").is_empty());
}

#[test]
fn test_update_in_place_and_delete_untouched() {
    let dir = TempDir::new().unwrap();
    let store = migrated_store(&dir);
    let datasets = || vec![places()];

    let mut seeds = StaticSeedSource::new().with_document(
        "places",
        json!({
            "Bethel": {"latitude": 31.93, "longitude": 35.22},
            "Jericho": {"kind": "city", "latitude": 31.87},
            "Sinai": {"kind": "mountain"}
        }),
    );
    Reconciler::new(&seeds).with_datasets(datasets()).reconcile(&store);
    let before = query(&store, "SELECT id, created_at FROM places WHERE name = 'Jericho'");

    seeds.set_documents(
        "places",
        vec![json!({
            "Bethel": {"latitude": 31.93, "longitude": 35.22},
            "Jericho": {"kind": "city", "latitude": 31.8712}
        })],
    );
    let outcome = Reconciler::new(&seeds).with_datasets(datasets()).reconcile(&store);
    assert_eq!(
        outcome,
        vec![DatasetOutcome::Reconciled {
            inserted: 0,
            updated: 1,
            deleted: 1,
            unchanged: 1
        }]
    );

    let after = query(
        &store,
        "SELECT id, created_at, latitude FROM places WHERE name = 'Jericho'",
    );
    assert_eq!(after[0][0], before[0][0]);
    assert_eq!(after[0][1], before[0][1]);
    assert_eq!(after[0][2], SqlValue::Real(31.8712));

    let names: Vec<Row> = query(&store, "SELECT name FROM places ORDER BY name");
    assert_eq!(
        names,
        vec![vec![SqlValue::from("Bethel")], vec![SqlValue::from("Jericho")]]
    );
}

#[test]
fn test_missing_columns_skip_dataset_only() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let migrations = migrations_subset(
        &dir,
        &[
            "0001_app_settings.sql",
            "0002_cross_references.sql",
            "0006_places.sql",
        ],
    );
    run_migrations(&store, Some(&migrations), false, &bundled_source()).unwrap();

    let outcomes = reconcile_reference_data(&store, &FileSeedSource::new(bundled_seeds()));
    assert_eq!(
        outcomes[0],
        DatasetOutcome::SkippedMissingColumns {
            columns: vec!["perspective".into()]
        }
    );
    assert!(matches!(
        &outcomes[1],
        DatasetOutcome::SkippedMissingColumns { columns } if columns.len() == 12
    ));
    assert!(outcomes[2].is_reconciled());
    assert_eq!(count(&store, "cross_references"), 0);
}

#[test]
fn test_malformed_seed_file_fails_that_dataset() {
    let dir = TempDir::new().unwrap();
    let store = migrated_store(&dir);
    let seeds_dir = dir.path().join("seeds");
    fs::create_dir_all(&seeds_dir).unwrap();
    fs::write(seeds_dir.join("cross_references.json"), "[{\"a\": ").unwrap();
    fs::write(seeds_dir.join("places.yaml"), "Bethel: {}\n").unwrap();

    let outcomes = reconcile_reference_data(&store, &FileSeedSource::new(&seeds_dir));
    assert!(matches!(outcomes[0], DatasetOutcome::Failed { .. }));
    assert!(outcomes[1].is_reconciled());
    assert!(outcomes[2].is_reconciled());
    assert_eq!(count(&store, "places"), 1);
}

#[test]
fn test_held_lock_skips_then_recovers() {
    let dir = TempDir::new().unwrap();
    let store = migrated_store(&dir).with_busy_timeout(Duration::ZERO);
    let seeds = StaticSeedSource::new().with_document(
        "places",
        json!([{"name": "Capernaum", "kind": "town"}]),
    );
    let reconciler = Reconciler::new(&seeds)
        .with_datasets(vec![places()])
        .with_retry(Retry::new(RetryPolicy {
            max_attempts: 2,
            backoff_ms: 1,
        }));

    let holder = SqliteStore::open(dir.path().join("app.db")).unwrap();
    let mut lock = holder.autocommit_session().unwrap();
    lock.execute_raw("BEGIN EXCLUSIVE").unwrap();

    assert_eq!(
        reconciler.reconcile(&store),
        vec![DatasetOutcome::SkippedContention { attempts: 2 }]
    );

    lock.dispose();
    assert_eq!(
        reconciler.reconcile(&store),
        vec![DatasetOutcome::Reconciled {
            inserted: 1,
            updated: 0,
            deleted: 0,
            unchanged: 0
        }]
    );
}

#[test]
fn test_rows_with_non_text_ids_are_deleted() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    // An untyped id column keeps integers as integers.
    exec(
        &store,
        "CREATE TABLE places (id, name TEXT NOT NULL, kind TEXT NOT NULL DEFAULT 'settlement', \
         latitude REAL, longitude REAL, scripture_refs TEXT, created_at TEXT NOT NULL, updated_at TEXT NOT NULL)",
    );
    exec(
        &store,
        "INSERT INTO places (id, name, created_at, updated_at) VALUES \
         (7, 'Numbered', 'x', 'x'), (NULL, 'Nameless', 'x', 'x'), (NULL, 'Unnamed', 'x', 'x')",
    );
    let seeds = StaticSeedSource::new().with_document(
        "places",
        json!([{"name": "Capernaum", "kind": "town"}]),
    );

    let outcomes = Reconciler::new(&seeds)
        .with_datasets(vec![places()])
        .reconcile(&store);
    assert_eq!(
        outcomes,
        vec![DatasetOutcome::Reconciled {
            inserted: 1,
            updated: 0,
            deleted: 3,
            unchanged: 0
        }]
    );
    assert_eq!(count(&store, "places"), 1);
}

// ---------------------------------------------------------------------------
// Boot
// ---------------------------------------------------------------------------

#[test]
fn test_boot_from_config_file() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("boot.yaml");
    fs::write(
        &config_path,
        format!(
            "migrations_dir: {}\nseed_dir: {}\ndatasets: [places, cross_references]\n",
            bundled_migrations().display(),
            bundled_seeds().display()
        ),
    )
    .unwrap();
    let config = EngineConfig::from_file(&config_path).unwrap();
    assert_eq!(config.database, dir.path().join("app.db"));

    let store = SqliteStore::open(&config.database).unwrap();
    let report = boot(&store, &config).unwrap();
    assert_eq!(report.migrations.applied.len(), 8);
    assert_eq!(report.migrations.skipped, vec!["0007_places_search.sql"]);
    let names: Vec<&str> = report.datasets.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["places", "cross_references"]);
    assert!(report.datasets.iter().all(|(_, o)| o.is_reconciled()));

    let again = boot(&store, &config).unwrap();
    assert!(again.migrations.applied.is_empty());
    assert_eq!(count(&store, "parallel_passages"), 0);
}
