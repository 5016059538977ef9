//! In-memory stand-in for the relational primary.
//!
//! Used in test mode when no relational backend is reachable. It accepts
//! every statement and stores nothing: queries return no rows and
//! statements affect none.

use super::{Backend, BackendHealth, BackendId, ConnectionState, ConnectionStatus, RelationalStore};
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// No-op relational store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    statements: AtomicU64,
}

impl InMemoryStore {
    /// Creates the stand-in.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            statements: AtomicU64::new(0),
        }
    }

    /// Statements received so far.
    #[must_use]
    pub fn statements_seen(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Backend for InMemoryStore {
    fn id(&self) -> BackendId {
        BackendId::Memory
    }

    fn state(&self) -> ConnectionState {
        let mut state = ConnectionState::new(BackendId::Memory);
        state.status = ConnectionStatus::Connected;
        state
    }

    async fn health_check(&self) -> BackendHealth {
        BackendHealth::healthy(BackendId::Memory, 0, None)
    }

    async fn close(&self) {}
}

#[async_trait]
impl RelationalStore for InMemoryStore {
    async fn query(&self, sql: &str, _params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        self.statements.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(statement = %crate::security::statement_preview(sql), "In-memory query ignored");
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, _params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        self.statements.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(statement = %crate::security::statement_preview(sql), "In-memory statement ignored");
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_op_semantics() {
        let store = InMemoryStore::new();
        let rows = store.query("SELECT * FROM tickets", &[]).await;
        assert!(rows.is_ok_and(|r| r.is_empty()));
        let affected = store.execute("DELETE FROM tickets", &[]).await;
        assert_eq!(affected.ok(), Some(0));
        assert_eq!(store.statements_seen(), 2);
    }

    #[tokio::test]
    async fn test_always_healthy() {
        let store = InMemoryStore::new();
        assert!(store.is_connected());
        assert!(store.health_check().await.is_healthy());
        store.close().await;
        assert!(store.is_connected());
        assert_eq!(store.id(), BackendId::Memory);
    }
}
