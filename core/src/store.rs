//! The store capability the engine runs against.
//!
//! A [`Store`] hands out [`Session`]s. The engine never learns anything about
//! the wire protocol behind them; backends (such as the SQLite crate in this
//! workspace) implement these two traits and nothing else.

use thiserror::Error;

use crate::types::{Dialect, Row, SqlValue};

/// Errors surfaced by a store backend.
///
/// Backends keep the driver's own message text intact: the error classifier
/// reads it to recognize schema drift.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store's write lock is held elsewhere.
    #[error("database busy: {0}")]
    Busy(String),

    /// A statement was rejected by the engine.
    #[error("{0}")]
    Statement(String),

    /// A handle could not be opened or has gone away.
    #[error("connection error: {0}")]
    Connection(String),
}

impl StoreError {
    /// Returns the driver message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            StoreError::Busy(msg) | StoreError::Statement(msg) | StoreError::Connection(msg) => {
                msg
            }
        }
    }
}

/// Convenience alias for results with [`StoreError`].
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One live handle to the store.
///
/// Sessions start in autocommit mode; [`begin`](Session::begin) opens an
/// explicit transaction that must be closed with
/// [`commit`](Session::commit) or [`rollback`](Session::rollback).
pub trait Session {
    fn dialect(&self) -> Dialect;

    /// Executes one unparameterised statement, discarding any rows it returns.
    fn execute_raw(&mut self, sql: &str) -> StoreResult<()>;

    /// Executes one parameterised statement and returns the affected row count.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<usize>;

    /// Runs a query and collects every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Row>>;

    fn begin(&mut self) -> StoreResult<()>;

    fn commit(&mut self) -> StoreResult<()>;

    fn rollback(&mut self) -> StoreResult<()>;

    /// Drops the handle without returning it to any pool.
    fn dispose(self: Box<Self>);
}

/// A handle factory bound to one database.
pub trait Store {
    fn dialect(&self) -> Dialect;

    /// Returns a (possibly pooled) session for transactional work.
    fn session(&self) -> StoreResult<Box<dyn Session>>;

    /// Returns a dedicated session that is never pooled and never wrapped in
    /// a transaction by the engine.
    fn autocommit_session(&self) -> StoreResult<Box<dyn Session>>;

    /// Drops every idle pooled handle so the next session sees fresh catalog
    /// state.
    fn release_connections(&self);
}
