//! Migration ledger access.

use super::{MigrationFile, MigrationRecord};
use crate::storage::{PostgresManager, RelationalStore};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

/// Ledger table name.
pub const LEDGER_TABLE: &str = "schema_migrations";

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version VARCHAR(255) PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    execution_time_ms BIGINT NOT NULL,
    checksum VARCHAR(64) NOT NULL
)";

const SELECT_APPLIED: &str = "SELECT version, name, executed_at, execution_time_ms, checksum \
     FROM schema_migrations ORDER BY version";

const INSERT_RECORD: &str = "INSERT INTO schema_migrations (version, name, execution_time_ms, checksum) \
     VALUES ($1, $2, $3, $4) RETURNING executed_at";

const DELETE_RECORD: &str = "DELETE FROM schema_migrations WHERE version = $1";

/// Storage for applied migrations.
///
/// `apply` and `revert` are atomic: the SQL and the ledger change either
/// both take effect or neither does.
#[async_trait]
pub trait MigrationLedger: Send + Sync {
    /// Creates the ledger if it does not exist.
    async fn ensure_ledger(&self) -> Result<()>;

    /// Applied migrations, ordered by version.
    async fn applied(&self) -> Result<Vec<MigrationRecord>>;

    /// Runs `sql` and records `file` in one transaction.
    async fn apply(&self, file: &MigrationFile, sql: &str, checksum: &str)
    -> Result<MigrationRecord>;

    /// Runs rollback `sql` and removes `record` in one transaction.
    async fn revert(&self, record: &MigrationRecord, sql: &str) -> Result<()>;

    /// Runs a script outside the ledger (seeds).
    async fn execute_script(&self, sql: &str) -> Result<()>;
}

/// Ledger stored in the relational primary.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    manager: Arc<PostgresManager>,
}

impl PostgresLedger {
    /// Creates a ledger on `manager`.
    #[must_use]
    pub const fn new(manager: Arc<PostgresManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl MigrationLedger for PostgresLedger {
    async fn ensure_ledger(&self) -> Result<()> {
        self.manager.execute(CREATE_LEDGER, &[]).await.map(|_| ())
    }

    async fn applied(&self) -> Result<Vec<MigrationRecord>> {
        let rows = self.manager.query(SELECT_APPLIED, &[]).await?;
        rows.iter()
            .map(|row| {
                Ok(MigrationRecord {
                    version: row.try_get(0).map_err(row_error)?,
                    name: row.try_get(1).map_err(row_error)?,
                    executed_at: row.try_get(2).map_err(row_error)?,
                    execution_time_ms: row.try_get(3).map_err(row_error)?,
                    checksum: row.try_get(4).map_err(row_error)?,
                })
            })
            .collect()
    }

    async fn apply(
        &self,
        file: &MigrationFile,
        sql: &str,
        checksum: &str,
    ) -> Result<MigrationRecord> {
        let db = Arc::clone(&self.manager);
        let sql = sql.to_string();
        let version = file.version.clone();
        let name = file.name.clone();
        let checksum = checksum.to_string();

        self.manager
            .transaction(move |tx| {
                Box::pin(async move {
                    let started = Instant::now();
                    db.batch_in(tx, &sql).await?;
                    let execution_time_ms =
                        i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

                    let rows = db
                        .query_in(
                            tx,
                            INSERT_RECORD,
                            &[&version, &name, &execution_time_ms, &checksum],
                        )
                        .await?;
                    let executed_at: DateTime<Utc> = match rows.first() {
                        Some(row) => row.try_get(0).map_err(row_error)?,
                        None => Utc::now(),
                    };

                    Ok(MigrationRecord {
                        version,
                        name,
                        executed_at,
                        execution_time_ms,
                        checksum,
                    })
                })
            })
            .await
    }

    async fn revert(&self, record: &MigrationRecord, sql: &str) -> Result<()> {
        let db = Arc::clone(&self.manager);
        let sql = sql.to_string();
        let version = record.version.clone();

        self.manager
            .transaction(move |tx| {
                Box::pin(async move {
                    db.batch_in(tx, &sql).await?;
                    db.execute_in(tx, DELETE_RECORD, &[&version]).await?;
                    Ok(())
                })
            })
            .await
    }

    async fn execute_script(&self, sql: &str) -> Result<()> {
        let db = Arc::clone(&self.manager);
        let sql = sql.to_string();
        self.manager
            .transaction(move |tx| Box::pin(async move { db.batch_in(tx, &sql).await }))
            .await
    }
}

fn row_error(e: tokio_postgres::Error) -> Error {
    Error::OperationFailed {
        operation: "read_ledger_row".to_string(),
        cause: e.to_string(),
    }
}
