//! Procedural migrations.
//!
//! A `.proc` file carries no SQL; its stem names a handler registered here.
//! A handler declares which handle it needs: the migration's own session
//! (inside the migration transaction) or a dedicated autocommit connection.

use std::collections::BTreeMap;
use std::fmt;

use schema_boot_core::{Session, StoreResult};

pub type ProcedureFn = Box<dyn Fn(&mut dyn Session) -> StoreResult<()>>;

/// A registered handler and the handle it runs on.
pub enum Procedure {
    /// Runs inside the migration transaction; rolled back with it.
    Session(ProcedureFn),
    /// Runs on a dedicated autocommit connection.
    Connection(ProcedureFn),
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Session(_) => f.write_str("Procedure::Session"),
            Procedure::Connection(_) => f.write_str("Procedure::Connection"),
        }
    }
}

/// Handlers keyed by migration file stem.
#[derive(Debug, Default)]
pub struct ProcedureRegistry {
    handlers: BTreeMap<String, Procedure>,
}

impl ProcedureRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the bundled handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "0009_refresh_statistics",
            Procedure::Connection(Box::new(refresh_statistics)),
        );
        registry
    }

    pub fn register(&mut self, stem: impl Into<String>, procedure: Procedure) {
        self.handlers.insert(stem.into(), procedure);
    }

    pub fn get(&self, stem: &str) -> Option<&Procedure> {
        self.handlers.get(stem)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Refreshes planner statistics. `ANALYZE` means the same thing on both
/// dialects.
pub fn refresh_statistics(session: &mut dyn Session) -> StoreResult<()> {
    session.execute_raw("ANALYZE")
}
