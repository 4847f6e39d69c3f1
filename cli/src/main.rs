use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use schema_boot_engine::{
    DEFAULT_MIGRATIONS_DIR, DatasetOutcome, EngineConfig, MigrationExecutor, MigrationState,
    Reconciler, boot, migration_status, reconcile_reference_data,
};
use schema_boot_seed::FileSeedSource;
use schema_boot_sqlite::SqliteStore;
use tracing_subscriber::EnvFilter;

const DEFAULT_SEED_DIR: &str = "data/seeds";

#[derive(Debug, Parser)]
#[command(name = "schema-boot")]
#[command(about = "Boot-time schema migrations and reference data reconciliation")]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations.
    Migrate(MigrateArgs),
    /// Make reference data tables match their seed files.
    Reconcile(ReconcileArgs),
    /// Run migrations and reconciliation as configured in a YAML file.
    Boot(BootArgs),
    /// Show the ledger state of every migration.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// Database file path.
    #[arg(long)]
    db: PathBuf,
    /// Milliseconds to wait on a locked database before retrying.
    #[arg(long)]
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Directory holding .sql and .proc migrations.
    #[arg(long, default_value = DEFAULT_MIGRATIONS_DIR)]
    migrations: PathBuf,
    /// Re-run every migration regardless of the ledger.
    #[arg(long)]
    force: bool,
    /// Seed files used to refill a table that repair recreated.
    #[arg(long, default_value = DEFAULT_SEED_DIR)]
    seeds: PathBuf,
}

#[derive(Debug, Args)]
struct ReconcileArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Directory holding the seed files.
    #[arg(long, default_value = DEFAULT_SEED_DIR)]
    seeds: PathBuf,
}

#[derive(Debug, Args)]
struct BootArgs {
    /// YAML configuration file.
    #[arg(long)]
    config: PathBuf,
    /// Database file path, overriding the configuration.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Directory holding .sql and .proc migrations.
    #[arg(long, default_value = DEFAULT_MIGRATIONS_DIR)]
    migrations: PathBuf,
    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Migrate(args) => run_migrate(args),
        Command::Reconcile(args) => run_reconcile(args),
        Command::Boot(args) => run_boot(args),
        Command::Status(args) => run_status(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(path: &Path, busy_timeout_ms: Option<u64>) -> Result<SqliteStore, String> {
    let store = SqliteStore::open(path)
        .map_err(|e| format!("Failed to open database '{}': {e}", path.display()))?;
    Ok(match busy_timeout_ms {
        Some(ms) => store.with_busy_timeout(Duration::from_millis(ms)),
        None => store,
    })
}

// ---------------------------------------------------------------------------
// migrate / status
// ---------------------------------------------------------------------------

fn run_migrate(args: MigrateArgs) -> Result<(), String> {
    let store = open_store(&args.store.db, args.store.busy_timeout_ms)?;
    let seeds = FileSeedSource::new(&args.seeds);
    let reconciler = Reconciler::new(&seeds);
    let report = MigrationExecutor::new(&store)
        .force(args.force)
        .with_reseed(&reconciler)
        .run_dir(&args.migrations)
        .map_err(|e| format!("Migration failed: {e}"))?;

    for name in &report.healed {
        println!("  healed   {name}");
    }
    for repair in &report.repaired {
        println!("  repaired {repair}");
    }
    for name in &report.applied {
        println!("  applied  {name}");
    }
    for name in &report.skipped {
        println!("  skipped  {name}");
    }
    println!(
        "Migrations complete: {} applied, {} skipped.",
        report.applied.len(),
        report.skipped.len()
    );
    Ok(())
}

fn run_status(args: StatusArgs) -> Result<(), String> {
    let store = open_store(&args.store.db, args.store.busy_timeout_ms)?;
    let statuses = migration_status(&store, &args.migrations)
        .map_err(|e| format!("Failed to read migration status: {e}"))?;

    if args.json {
        let json = serde_json::to_string_pretty(&statuses)
            .map_err(|e| format!("Failed to serialize status: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    println!("Migration Status:");
    for status in &statuses {
        let detail = match (&status.state, &status.reason, &status.applied_at) {
            (MigrationState::Skipped, Some(reason), _) => reason.clone(),
            (_, _, Some(at)) => at.clone(),
            _ => String::new(),
        };
        println!("  {:<8} {:<45} {detail}", status.state.to_string(), status.name);
    }
    let pending = statuses
        .iter()
        .filter(|s| s.state == MigrationState::Pending)
        .count();
    println!("  {} migrations, {pending} pending", statuses.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// reconcile / boot
// ---------------------------------------------------------------------------

fn run_reconcile(args: ReconcileArgs) -> Result<(), String> {
    let store = open_store(&args.store.db, args.store.busy_timeout_ms)?;
    let seeds = FileSeedSource::new(&args.seeds);
    let outcomes = reconcile_reference_data(&store, &seeds);

    println!("Reconciliation:");
    let names = schema_boot_seed::builtin_datasets()
        .into_iter()
        .map(|d| d.name);
    for (name, outcome) in names.zip(&outcomes) {
        print_outcome(&name, outcome);
    }
    Ok(())
}

fn run_boot(args: BootArgs) -> Result<(), String> {
    let config = EngineConfig::from_file(&args.config)
        .map_err(|e| format!("Failed to load config '{}': {e}", args.config.display()))?;
    let db = args.db.unwrap_or_else(|| config.database.clone());
    let store = open_store(&db, Some(config.busy_timeout_ms))?;

    let report = boot(&store, &config).map_err(|e| format!("Boot failed: {e}"))?;
    println!(
        "Migrations: {} applied, {} skipped, {} repaired.",
        report.migrations.applied.len(),
        report.migrations.skipped.len(),
        report.migrations.repaired.len()
    );
    println!("Reconciliation:");
    for (name, outcome) in &report.datasets {
        print_outcome(name, outcome);
    }
    Ok(())
}

fn print_outcome(name: &str, outcome: &DatasetOutcome) {
    println!("  {name:<20} {outcome}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["schema-boot", "-vv", "status", "--db", "x.db"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Status(args) => {
                assert_eq!(args.migrations, PathBuf::from(DEFAULT_MIGRATIONS_DIR));
                assert!(!args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_migrate_requires_db() {
        assert!(Cli::try_parse_from(["schema-boot", "migrate"]).is_err());
    }
}
