//! A file-backed [`Store`] over rusqlite connections.
//!
//! Pooled sessions share a small idle pool; autocommit sessions get a
//! connection of their own that is closed when dropped. Every connection is
//! opened against the same file with the store's busy timeout and
//! `PRAGMA foreign_keys = ON`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, params_from_iter};
use tracing::debug;

use schema_boot_core::{Dialect, Row, Session, SqlValue, Store, StoreError, StoreResult};

use crate::convert::{collect_rows, store_error, to_sqlite};
use crate::error::{Result, SqliteError};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Pool = Arc<Mutex<Vec<Connection>>>;

/// SQLite database file shared by every session.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use schema_boot_core::Store;
/// use schema_boot_sqlite::SqliteStore;
///
/// let store = SqliteStore::open("app.db")
///     .unwrap()
///     .with_busy_timeout(Duration::from_millis(500));
/// let mut session = store.session().unwrap();
/// session.execute_raw("CREATE TABLE IF NOT EXISTS t (id TEXT)").unwrap();
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    pool: Pool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::InvalidPath`] if `path` is a directory, or
    /// [`SqliteError::DatabaseError`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() || path.is_dir() {
            return Err(SqliteError::InvalidPath(path.display().to_string()));
        }
        let store = Self {
            path: path.to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            pool: Arc::default(),
        };
        let conn = store.connect()?;
        store.lock().push(conn);
        Ok(store)
    }

    /// Sets how long a connection waits on a held lock before reporting busy.
    /// Applies to connections opened from now on.
    pub fn with_busy_timeout(self, timeout: Duration) -> Self {
        self.release_connections();
        Self {
            busy_timeout: timeout,
            ..self
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Number of idle pooled connections.
    pub fn idle_connections(&self) -> usize {
        self.lock().len()
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Embedded
    }

    fn session(&self) -> StoreResult<Box<dyn Session>> {
        let pooled = self.lock().pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.connect().map_err(store_error)?,
        };
        Ok(Box::new(SqliteSession {
            conn: Some(conn),
            pool: Some(Arc::clone(&self.pool)),
        }))
    }

    fn autocommit_session(&self) -> StoreResult<Box<dyn Session>> {
        let conn = self.connect().map_err(store_error)?;
        Ok(Box::new(SqliteSession {
            conn: Some(conn),
            pool: None,
        }))
    }

    fn release_connections(&self) {
        let released = std::mem::take(&mut *self.lock());
        if !released.is_empty() {
            debug!(count = released.len(), "closing idle connections");
        }
    }
}

/// One connection checked out of a [`SqliteStore`].
///
/// Dropping a pooled session rolls back any open transaction and returns
/// the connection to the pool.
pub struct SqliteSession {
    conn: Option<Connection>,
    pool: Option<Pool>,
}

impl SqliteSession {
    fn conn(&self) -> StoreResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::Connection("session already disposed".into()))
    }
}

impl Session for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Embedded
    }

    fn execute_raw(&mut self, sql: &str) -> StoreResult<()> {
        self.conn()?.execute_batch(sql).map_err(store_error)
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<usize> {
        self.conn()?
            .execute(sql, params_from_iter(params.iter().map(to_sqlite)))
            .map_err(store_error)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(store_error)?;
        let width = stmt.column_count();
        let rows = stmt
            .query(params_from_iter(params.iter().map(to_sqlite)))
            .map_err(store_error)?;
        collect_rows(rows, width).map_err(store_error)
    }

    fn begin(&mut self) -> StoreResult<()> {
        // IMMEDIATE takes the write lock up front, so contention shows up
        // here rather than halfway through the unit of work.
        self.execute_raw("BEGIN IMMEDIATE")
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.execute_raw("COMMIT")
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if self.conn()?.is_autocommit() {
            return Ok(());
        }
        self.execute_raw("ROLLBACK")
    }

    fn dispose(mut self: Box<Self>) {
        self.conn.take();
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        let (Some(conn), Some(pool)) = (self.conn.take(), self.pool.as_ref()) else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                debug!(error = %e, "dropping connection left mid-transaction");
                return;
            }
        }
        pool.lock().unwrap_or_else(PoisonError::into_inner).push(conn);
    }
}
