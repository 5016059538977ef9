//! Migration runner.

use super::{
    MigrationFile, MigrationLedger, MigrationRecord, MigrationState, MigrationStatus, checksum,
    discover, rollback_path, sql_files,
};
use crate::config::MigrationSettings;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Outcome of [`MigrationManager::run_migrations`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationRunReport {
    /// Records written by this run, in order.
    pub applied: Vec<MigrationRecord>,
    /// Migrations that were already in the ledger.
    pub already_applied: usize,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

/// Outcome of [`MigrationManager::run_seeds`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Seed files executed, in order.
    pub executed: Vec<String>,
}

/// Applies, reverts and reports on migrations.
#[derive(Debug)]
pub struct MigrationManager<L> {
    ledger: L,
    migrations_dir: PathBuf,
    seeds_dir: PathBuf,
}

impl<L: MigrationLedger> MigrationManager<L> {
    /// Creates a manager over `ledger` using the configured directories.
    #[must_use]
    pub fn new(ledger: L, settings: &MigrationSettings) -> Self {
        Self {
            ledger,
            migrations_dir: settings.migrations_dir.clone(),
            seeds_dir: settings.seeds_dir.clone(),
        }
    }

    /// Migrations directory.
    #[must_use]
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Ledger in use.
    #[must_use]
    pub const fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Lists migration files on disk.
    ///
    /// # Errors
    ///
    /// See [`super::discover`].
    pub fn discover(&self) -> Result<Vec<MigrationFile>> {
        discover(&self.migrations_dir)
    }

    /// Applies every pending migration in order.
    ///
    /// The first failure aborts the run; later files are not attempted and
    /// the failing file leaves no ledger row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Migration`] naming the failing file.
    pub async fn run_migrations(&self) -> Result<MigrationRunReport> {
        let started = Instant::now();
        self.ledger.ensure_ledger().await?;

        let files = self.discover()?;
        let applied = self.ledger.applied().await?;
        let applied_versions: Vec<&str> = applied.iter().map(|r| r.version.as_str()).collect();

        let pending: Vec<&MigrationFile> = files
            .iter()
            .filter(|f| !applied_versions.contains(&f.version.as_str()))
            .collect();

        tracing::info!(
            total = files.len(),
            already_applied = files.len() - pending.len(),
            pending = pending.len(),
            "Running migrations"
        );

        let mut report = MigrationRunReport {
            already_applied: files.len() - pending.len(),
            ..MigrationRunReport::default()
        };
        for file in pending {
            let record = self.run_migration(file).await?;
            report.applied.push(record);
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            applied = report.applied.len(),
            duration_ms = report.duration_ms,
            "Migrations complete"
        );
        Ok(report)
    }

    /// Applies one migration and records it atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Migration`] if the file cannot be read or the SQL
    /// fails; nothing is recorded in that case.
    pub async fn run_migration(&self, file: &MigrationFile) -> Result<MigrationRecord> {
        let sql = file.read()?;
        let digest = checksum(&sql);
        tracing::info!(
            version = %file.version,
            name = %file.name,
            state = ?MigrationState::Applying,
            "Applying migration"
        );

        match self.ledger.apply(file, &sql, &digest).await {
            Ok(record) => {
                tracing::info!(
                    version = %record.version,
                    duration_ms = record.execution_time_ms,
                    state = ?MigrationState::Applied,
                    "Applied migration"
                );
                Ok(record)
            },
            Err(e) => {
                tracing::error!(
                    version = %file.version,
                    file = %file.file_name(),
                    error = %e,
                    state = ?MigrationState::Failed,
                    "Migration failed"
                );
                Err(migration_error(&file.version, &file.file_name(), e))
            },
        }
    }

    /// Reverts the most recently applied migration.
    ///
    /// Returns the reverted record, or `None` when nothing is applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Migration`] if `<version>_rollback.sql` is missing
    /// (manual intervention required) or fails.
    pub async fn rollback_last_migration(&self) -> Result<Option<MigrationRecord>> {
        self.ledger.ensure_ledger().await?;
        let applied = self.ledger.applied().await?;
        let Some(last) = applied.into_iter().max_by(|a, b| a.version.cmp(&b.version)) else {
            tracing::info!("No migrations to roll back");
            return Ok(None);
        };

        let path = rollback_path(&self.migrations_dir, &last.version);
        let file_name = display_name(&path);
        let sql = match std::fs::read_to_string(&path) {
            Ok(sql) => sql,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Migration {
                    version: last.version.clone(),
                    file: file_name,
                    cause: "rollback file not found; manual intervention required".to_string(),
                });
            },
            Err(e) => return Err(migration_error(&last.version, &file_name, io_error(&e))),
        };

        self.ledger
            .revert(&last, &sql)
            .await
            .map_err(|e| migration_error(&last.version, &file_name, e))?;
        tracing::info!(version = %last.version, name = %last.name, "Rolled back migration");
        Ok(Some(last))
    }

    /// Executes every seed file in filename order.
    ///
    /// Seeds are not recorded and run on every call; they should be
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Migration`] naming the first failing seed.
    pub async fn run_seeds(&self) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        for path in sql_files(&self.seeds_dir)? {
            let name = display_name(&path);
            let sql = std::fs::read_to_string(&path)
                .map_err(|e| migration_error("seed", &name, io_error(&e)))?;
            self.ledger
                .execute_script(&sql)
                .await
                .map_err(|e| migration_error("seed", &name, e))?;
            tracing::info!(seed = %name, "Executed seed");
            report.executed.push(name);
        }
        Ok(report)
    }

    /// Compares disk with the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or ledger cannot be read.
    pub async fn get_status(&self) -> Result<MigrationStatus> {
        self.ledger.ensure_ledger().await?;
        let files = self.discover()?;
        let applied = self.ledger.applied().await?;

        let mut checksums = BTreeMap::new();
        for file in &files {
            match std::fs::read_to_string(&file.path) {
                Ok(content) => {
                    checksums.insert(file.version.clone(), checksum(&content));
                },
                Err(e) => {
                    tracing::warn!(file = %file.file_name(), error = %e, "Cannot read migration for drift check");
                },
            }
        }

        let status = MigrationStatus::compute(&files, &applied, &checksums);
        if status.has_drift() {
            tracing::warn!("Applied migrations changed on disk since they ran");
        }
        if !status.orphaned.is_empty() {
            tracing::warn!(orphaned = status.orphaned.len(), "Ledger rows without migration files");
        }
        Ok(status)
    }
}

/// Wraps a failure as [`Error::Migration`], keeping an existing one intact.
fn migration_error(version: &str, file: &str, error: Error) -> Error {
    match error {
        e @ Error::Migration { .. } => e,
        other => Error::Migration {
            version: version.to_string(),
            file: file.to_string(),
            cause: other.to_string(),
        },
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string())
}

fn io_error(e: &std::io::Error) -> Error {
    Error::OperationFailed {
        operation: "read_sql_file".to_string(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::fs;
    use std::sync::{Mutex, PoisonError};

    /// Ledger kept in memory; SQL containing `FAIL` is rejected.
    #[derive(Default)]
    struct FakeLedger {
        rows: Mutex<Vec<MigrationRecord>>,
        scripts: Mutex<Vec<String>>,
    }

    impl FakeLedger {
        fn rows(&self) -> Vec<MigrationRecord> {
            self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        fn preload(&self, version: &str, name: &str, sql: &str) {
            self.rows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(MigrationRecord {
                    version: version.to_string(),
                    name: name.to_string(),
                    executed_at: Utc::now(),
                    execution_time_ms: 0,
                    checksum: checksum(sql),
                });
        }

        fn scripts(&self) -> Vec<String> {
            self.scripts.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        fn run(&self, sql: &str) -> Result<()> {
            if sql.contains("FAIL") {
                return Err(Error::Query {
                    operation: "core_db.batch".to_string(),
                    statement: "FAIL".to_string(),
                    cause: "syntax error".to_string(),
                });
            }
            self.scripts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(sql.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl MigrationLedger for FakeLedger {
        async fn ensure_ledger(&self) -> Result<()> {
            Ok(())
        }

        async fn applied(&self) -> Result<Vec<MigrationRecord>> {
            Ok(self.rows())
        }

        async fn apply(
            &self,
            file: &MigrationFile,
            sql: &str,
            checksum: &str,
        ) -> Result<MigrationRecord> {
            self.run(sql)?;
            let record = MigrationRecord {
                version: file.version.clone(),
                name: file.name.clone(),
                executed_at: Utc::now(),
                execution_time_ms: 0,
                checksum: checksum.to_string(),
            };
            self.rows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.clone());
            Ok(record)
        }

        async fn revert(&self, record: &MigrationRecord, sql: &str) -> Result<()> {
            self.run(sql)?;
            self.rows
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|r| r.version != record.version);
            Ok(())
        }

        async fn execute_script(&self, sql: &str) -> Result<()> {
            self.run(sql)
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        manager: MigrationManager<FakeLedger>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("{e}"));
            let settings = MigrationSettings {
                migrations_dir: dir.path().join("migrations"),
                seeds_dir: dir.path().join("seeds"),
                run_seeds: false,
            };
            fs::create_dir_all(&settings.migrations_dir).unwrap_or_else(|e| unreachable!("{e}"));
            fs::create_dir_all(&settings.seeds_dir).unwrap_or_else(|e| unreachable!("{e}"));
            let manager = MigrationManager::new(FakeLedger::default(), &settings);
            Self { dir, manager }
        }

        fn migration(&self, name: &str, sql: &str) {
            fs::write(self.dir.path().join("migrations").join(name), sql)
                .unwrap_or_else(|e| unreachable!("{e}"));
        }

        fn seed(&self, name: &str, sql: &str) {
            fs::write(self.dir.path().join("seeds").join(name), sql)
                .unwrap_or_else(|e| unreachable!("{e}"));
        }
    }

    #[tokio::test]
    async fn test_fresh_database_applies_in_order() {
        let fx = Fixture::new();
        fx.migration("002_add_assets.sql", "CREATE TABLE assets ();");
        fx.migration("001_create_tickets.sql", "CREATE TABLE tickets ();");

        let report = fx.manager.run_migrations().await.unwrap_or_else(|e| unreachable!("{e}"));
        let versions: Vec<&str> = report.applied.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002"]);
        assert_eq!(
            fx.manager.ledger().scripts(),
            vec!["CREATE TABLE tickets ();", "CREATE TABLE assets ();"]
        );
        assert_eq!(
            report.applied[0].checksum,
            checksum("CREATE TABLE tickets ();")
        );
    }

    #[tokio::test]
    async fn test_three_files_give_three_rows_in_order() {
        let fx = Fixture::new();
        fx.migration("003_add_logs.sql", "CREATE TABLE logs ();");
        fx.migration("001_create_tickets.sql", "CREATE TABLE tickets ();");
        fx.migration("002_add_assets.sql", "CREATE TABLE assets ();");

        fx.manager.run_migrations().await.unwrap_or_else(|e| unreachable!("{e}"));
        let rows = fx.manager.ledger().rows();
        let versions: Vec<&str> = rows.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002", "003"]);
        assert!(rows.windows(2).all(|w| w[0].executed_at <= w[1].executed_at));
    }

    #[tokio::test]
    async fn test_only_pending_tail_is_applied() {
        let fx = Fixture::new();
        fx.migration("001_create_tickets.sql", "CREATE TABLE tickets ();");
        fx.migration("002_add_assets.sql", "CREATE TABLE assets ();");
        fx.migration("003_add_logs.sql", "CREATE TABLE logs ();");
        fx.manager
            .ledger()
            .preload("001", "create_tickets", "CREATE TABLE tickets ();");
        fx.manager
            .ledger()
            .preload("002", "add_assets", "CREATE TABLE assets ();");

        let report = fx.manager.run_migrations().await.unwrap_or_else(|e| unreachable!("{e}"));
        let versions: Vec<&str> = report.applied.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["003"]);
        assert_eq!(report.already_applied, 2);
        assert_eq!(fx.manager.ledger().scripts(), vec!["CREATE TABLE logs ();"]);
        assert_eq!(fx.manager.ledger().rows().len(), 3);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let fx = Fixture::new();
        fx.migration("001_create_tickets.sql", "CREATE TABLE tickets ();");

        let first = fx.manager.run_migrations().await.unwrap_or_else(|e| unreachable!("{e}"));
        let second = fx.manager.run_migrations().await.unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(first.applied.len(), 1);
        assert!(second.applied.is_empty());
        assert_eq!(second.already_applied, 1);
        assert_eq!(fx.manager.ledger().rows().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_stops_run_without_ledger_row() {
        let fx = Fixture::new();
        fx.migration("001_ok.sql", "CREATE TABLE a ();");
        fx.migration("002_broken.sql", "FAIL");
        fx.migration("003_later.sql", "CREATE TABLE c ();");

        let result = fx.manager.run_migrations().await;
        match result {
            Err(Error::Migration { version, file, cause }) => {
                assert_eq!(version, "002");
                assert_eq!(file, "002_broken.sql");
                assert!(cause.contains("syntax error"));
            },
            other => unreachable!("expected migration error, got {other:?}"),
        }
        let rows = fx.manager.ledger().rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, "001");
        assert!(!fx.manager.ledger().scripts().iter().any(|s| s.contains("TABLE c")));
    }

    #[tokio::test]
    async fn test_rollback_last() {
        let fx = Fixture::new();
        fx.migration("001_a.sql", "CREATE TABLE a ();");
        fx.migration("002_b.sql", "CREATE TABLE b ();");
        fx.migration("002_rollback.sql", "DROP TABLE b;");
        fx.manager.run_migrations().await.unwrap_or_else(|e| unreachable!("{e}"));

        let reverted = fx
            .manager
            .rollback_last_migration()
            .await
            .unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(reverted.map(|r| r.version), Some("002".to_string()));
        assert_eq!(fx.manager.ledger().rows().len(), 1);
        assert!(fx.manager.ledger().scripts().contains(&"DROP TABLE b;".to_string()));
    }

    #[tokio::test]
    async fn test_rollback_without_file_requires_manual_intervention() {
        let fx = Fixture::new();
        fx.migration("001_a.sql", "CREATE TABLE a ();");
        fx.manager.run_migrations().await.unwrap_or_else(|e| unreachable!("{e}"));

        let result = fx.manager.rollback_last_migration().await;
        assert!(matches!(
            result,
            Err(Error::Migration { ref cause, .. }) if cause.contains("manual intervention")
        ));
        assert_eq!(fx.manager.ledger().rows().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_with_empty_ledger() {
        let fx = Fixture::new();
        let result = fx.manager.rollback_last_migration().await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_seeds_run_every_time_in_order() {
        let fx = Fixture::new();
        fx.seed("02_users.sql", "INSERT INTO users VALUES (1);");
        fx.seed("01_roles.sql", "INSERT INTO roles VALUES (1);");

        let first = fx.manager.run_seeds().await.unwrap_or_else(|e| unreachable!("{e}"));
        fx.manager.run_seeds().await.unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(first.executed, vec!["01_roles.sql", "02_users.sql"]);
        assert_eq!(fx.manager.ledger().scripts().len(), 4);
        assert!(fx.manager.ledger().rows().is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_pending_and_drift() {
        let fx = Fixture::new();
        fx.migration("001_a.sql", "CREATE TABLE a ();");
        fx.manager.run_migrations().await.unwrap_or_else(|e| unreachable!("{e}"));
        fx.migration("001_a.sql", "CREATE TABLE a (id INT);");
        fx.migration("002_b.sql", "CREATE TABLE b ();");

        let status = fx.manager.get_status().await.unwrap_or_else(|e| unreachable!("{e}"));
        assert_eq!(status.total, 2);
        assert_eq!(status.executed, 1);
        assert_eq!(status.pending, 1);
        assert!(status.migrations[0].drifted);
        assert!(status.orphaned.is_empty());
    }
}
