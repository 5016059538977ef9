//! File-based schema migrations.
//!
//! Migrations are SQL files named `<version>_<name>.sql` in the migrations
//! directory, applied in ascending filename order. An optional companion
//! `<version>_rollback.sql` reverts a migration. Applied migrations are
//! recorded in the `schema_migrations` ledger together with a SHA-256
//! checksum of the file content.
//!
//! # Lifecycle
//!
//! ```text
//! Discovered ──> Pending ──> Applying ──> Applied
//!                                  └────> Failed
//! ```
//!
//! Seeds are plain `*.sql` files in the seeds directory, executed in
//! filename order on every run and never recorded in the ledger.

mod ledger;
mod runner;

pub use ledger::{LEDGER_TABLE, MigrationLedger, PostgresLedger};
pub use runner::{MigrationManager, MigrationRunReport, SeedReport};

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Suffix of rollback companion files.
const ROLLBACK_SUFFIX: &str = "_rollback.sql";

/// A migration file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFile {
    /// Version prefix, e.g. `001`.
    pub version: String,
    /// Descriptive name, e.g. `create_tickets`.
    pub name: String,
    /// Location on disk.
    pub path: PathBuf,
}

impl MigrationFile {
    /// Parses a path named `<version>_<name>.sql`.
    ///
    /// Returns `None` for rollback companions and non-matching names.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        if file_name.ends_with(ROLLBACK_SUFFIX) {
            return None;
        }
        let stem = file_name.strip_suffix(".sql")?;
        let (version, name) = stem.split_once('_')?;
        if version.is_empty() || name.is_empty() || !version.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self {
            version: version.to_string(),
            name: name.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// File name, e.g. `001_create_tickets.sql`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}_{}.sql", self.version, self.name)
    }

    /// Path of the rollback companion, whether or not it exists.
    #[must_use]
    pub fn rollback_path(&self) -> PathBuf {
        rollback_path(
            self.path.parent().unwrap_or_else(|| Path::new(".")),
            &self.version,
        )
    }

    /// Reads the SQL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Migration`] if the file cannot be read.
    pub fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|e| Error::Migration {
            version: self.version.clone(),
            file: self.file_name(),
            cause: e.to_string(),
        })
    }
}

/// Path of `<version>_rollback.sql` in `dir`.
#[must_use]
pub fn rollback_path(dir: &Path, version: &str) -> PathBuf {
    dir.join(format!("{version}{ROLLBACK_SUFFIX}"))
}

/// Lists migrations in `dir`, sorted by filename.
///
/// A missing directory yields an empty list.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if two files share a version, or
/// [`Error::OperationFailed`] if the directory cannot be read.
pub fn discover(dir: &Path) -> Result<Vec<MigrationFile>> {
    let mut files: Vec<MigrationFile> = sql_files(dir)?
        .iter()
        .filter_map(|path| {
            let parsed = MigrationFile::from_path(path);
            if parsed.is_none() && !is_rollback(path) {
                tracing::warn!(path = %path.display(), "Ignoring file without <version>_<name>.sql name");
            }
            parsed
        })
        .collect();
    files.sort_by_key(MigrationFile::file_name);

    let mut seen = BTreeMap::new();
    for file in &files {
        if let Some(previous) = seen.insert(file.version.as_str(), file.file_name()) {
            return Err(Error::Configuration(format!(
                "duplicate migration version {}: {previous} and {}",
                file.version,
                file.file_name()
            )));
        }
    }
    Ok(files)
}

/// Every `*.sql` file in `dir`, sorted by filename. Missing dir is empty.
pub(crate) fn sql_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "SQL directory does not exist");
            return Ok(Vec::new());
        },
        Err(e) => {
            return Err(Error::OperationFailed {
                operation: format!("read_dir {}", dir.display()),
                cause: e.to_string(),
            });
        },
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

fn is_rollback(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(ROLLBACK_SUFFIX))
}

/// SHA-256 of migration content, lowercase hex.
#[must_use]
pub fn checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// A row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    /// Version of the applied file.
    pub version: String,
    /// Name of the applied file.
    pub name: String,
    /// When it was applied.
    pub executed_at: DateTime<Utc>,
    /// How long the SQL took.
    pub execution_time_ms: i64,
    /// Checksum of the content at apply time.
    pub checksum: String,
}

/// Per-migration lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Found on disk, ledger not yet consulted.
    Discovered,
    /// Not in the ledger.
    Pending,
    /// Being applied.
    Applying,
    /// Recorded in the ledger.
    Applied,
    /// Application failed; nothing was recorded.
    Failed,
}

/// Status of one discovered migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationEntry {
    /// Version.
    pub version: String,
    /// Name.
    pub name: String,
    /// File name.
    pub file: String,
    /// `Applied` or `Pending`.
    pub state: MigrationState,
    /// When it was applied.
    pub executed_at: Option<DateTime<Utc>>,
    /// True when the file changed since it was applied.
    pub drifted: bool,
    /// True when a rollback companion exists.
    pub has_rollback: bool,
}

/// Summary of ledger versus disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Migrations on disk.
    pub total: usize,
    /// Migrations on disk that are in the ledger.
    pub executed: usize,
    /// Migrations on disk that are not in the ledger.
    pub pending: usize,
    /// Per-file detail, in apply order.
    pub migrations: Vec<MigrationEntry>,
    /// Ledger rows whose file no longer exists.
    pub orphaned: Vec<MigrationRecord>,
}

impl MigrationStatus {
    /// Builds the status from disk and ledger contents.
    ///
    /// `checksums` maps versions to the checksum of their current content;
    /// versions missing from it are not checked for drift.
    #[must_use]
    pub fn compute(
        files: &[MigrationFile],
        applied: &[MigrationRecord],
        checksums: &BTreeMap<String, String>,
    ) -> Self {
        let by_version: BTreeMap<&str, &MigrationRecord> =
            applied.iter().map(|r| (r.version.as_str(), r)).collect();

        let migrations: Vec<MigrationEntry> = files
            .iter()
            .map(|file| {
                let record = by_version.get(file.version.as_str());
                let drifted = record.is_some_and(|r| {
                    checksums
                        .get(&file.version)
                        .is_some_and(|current| *current != r.checksum)
                });
                MigrationEntry {
                    version: file.version.clone(),
                    name: file.name.clone(),
                    file: file.file_name(),
                    state: if record.is_some() {
                        MigrationState::Applied
                    } else {
                        MigrationState::Pending
                    },
                    executed_at: record.map(|r| r.executed_at),
                    drifted,
                    has_rollback: file.rollback_path().is_file(),
                }
            })
            .collect();

        let orphaned = applied
            .iter()
            .filter(|r| !files.iter().any(|f| f.version == r.version))
            .cloned()
            .collect();

        let executed = migrations
            .iter()
            .filter(|m| m.state == MigrationState::Applied)
            .count();
        Self {
            total: files.len(),
            executed,
            pending: files.len() - executed,
            migrations,
            orphaned,
        }
    }

    /// Returns true when any applied file changed on disk.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.migrations.iter().any(|m| m.drifted)
    }
}
