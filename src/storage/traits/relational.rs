//! Relational query contract.
//!
//! Implemented by [`crate::storage::PostgresManager`] and by the in-memory
//! stand-in, so callers holding the primary never need to special-case
//! "no database".

use super::Backend;
use crate::Result;
use async_trait::async_trait;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Statement execution against a relational store.
#[async_trait]
pub trait RelationalStore: Backend {
    /// Runs a statement and returns its rows.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Query`] with a redacted statement preview,
    /// or [`crate::Error::Timeout`] when the acquire or statement timeout
    /// elapses.
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Same as [`RelationalStore::query`].
    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64>;
}
