//! # Deskstore
//!
//! Multi-backend persistence orchestration for the service desk platform.
//!
//! Deskstore owns the connections to every store the platform talks to and
//! keeps the rest of the application agnostic to which one is actually
//! backing a request.
//!
//! ## Features
//!
//! - Pooled PostgreSQL access with liveness probing, slow-query logging and
//!   scoped transactions
//! - Redis-backed document collections for audit and session data
//! - Elasticsearch-compatible search with graceful degradation
//! - File-based schema migrations with a checksummed ledger
//! - A startup orchestrator that computes availability and picks a primary
//!
//! ## Example
//!
//! ```rust,ignore
//! use deskstore::{DatabaseFactory, StoreConfig};
//!
//! let config = StoreConfig::load_default().with_env_overrides();
//! let stores = DatabaseFactory::startup(config).await?;
//! let rows = stores.get_primary_database()?.query("SELECT 1", &[]).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod migrations;
pub mod observability;
pub mod search;
pub mod security;
pub mod services;
pub mod storage;

pub use config::{
    DocumentConfig, LoggingSettings, MigrationSettings, RelationalConfig, SearchConfig,
    StoreConfig, TlsMode,
};
pub use migrations::{MigrationFile, MigrationManager, MigrationRecord, MigrationStatus};
pub use search::{SearchIndexManager, SearchQuery, SearchResults};
pub use services::{DatabaseFactory, HealthReport};
pub use storage::{
    AvailabilitySet, Backend, BackendHealth, BackendId, BestEffort, ConnectionState,
    ConnectionStatus, DocumentManager, InMemoryStore, PostgresManager, RelationalStore,
};

/// Error type for deskstore operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Configuration` | Missing or invalid settings, primary requested before startup |
/// | `Connection` | A backend could not be reached within its retry budget |
/// | `Query` | A single statement or search request failed |
/// | `Transaction` | `BEGIN`/`COMMIT`/`ROLLBACK` failed |
/// | `Migration` | A migration, rollback or seed file failed |
/// | `Timeout` | A connect, acquire or statement timeout elapsed |
/// | `InvalidInput` | Caller supplied unusable arguments |
/// | `OperationFailed` | Anything else (I/O, serialization) |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Missing or invalid configuration.
    ///
    /// Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A backend could not be reached.
    ///
    /// Raised after the initialization retry budget is exhausted.
    #[error("connection to {backend} failed after {attempts} attempt(s): {cause}")]
    Connection {
        /// The backend that failed.
        backend: storage::BackendId,
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying cause.
        cause: String,
    },

    /// A statement failed.
    ///
    /// `statement` is a redacted, truncated preview and never carries
    /// literal values or credentials.
    #[error("query '{operation}' failed: {cause} [statement: {statement}]")]
    Query {
        /// The operation that issued the statement.
        operation: String,
        /// Redacted statement preview.
        statement: String,
        /// The underlying cause.
        cause: String,
    },

    /// Transaction control failed.
    #[error("transaction '{operation}' failed: {cause}")]
    Transaction {
        /// `begin`, `commit` or `rollback`.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A migration failed.
    ///
    /// Aborts the migration run; no later migration is attempted.
    #[error("migration {version} ({file}) failed: {cause}")]
    Migration {
        /// Version of the failing migration.
        version: String,
        /// File that failed.
        file: String,
        /// The underlying cause.
        cause: String,
    },

    /// A timeout elapsed.
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns true for errors that indicate the backend itself is unreachable.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Result type alias for deskstore operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Configuration("missing DESKSTORE_DATABASE_URL".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: missing DESKSTORE_DATABASE_URL"
        );

        let err = Error::Connection {
            backend: storage::BackendId::CoreDb,
            attempts: 5,
            cause: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "connection to core_db failed after 5 attempt(s): connection refused"
        );

        let err = Error::Migration {
            version: "002".to_string(),
            file: "002_add_assets.sql".to_string(),
            cause: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "migration 002 (002_add_assets.sql) failed: syntax error"
        );
    }

    #[test]
    fn test_connectivity_classification() {
        let timeout = Error::Timeout {
            operation: "pool_acquire".to_string(),
            timeout_ms: 5000,
        };
        assert!(timeout.is_connectivity());

        let query = Error::Query {
            operation: "query".to_string(),
            statement: "SELECT ?".to_string(),
            cause: "syntax error".to_string(),
        };
        assert!(!query.is_connectivity());
    }
}
