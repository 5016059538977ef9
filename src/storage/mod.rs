//! Storage backends.
//!
//! Every store the platform talks to is wrapped in a connection manager that
//! owns its pool or client, tracks a [`ConnectionState`], and reports health:
//!
//! - [`PostgresManager`]: pooled relational access (`core_db`, `auth_db`)
//! - [`DocumentManager`]: Redis-backed JSON collections (`audit_db`)
//! - [`InMemoryStore`]: no-op relational stand-in for test mode
//!
//! The search backend lives in [`crate::search`] but implements the same
//! [`Backend`] trait.

// Pool counters are small; lossy float conversion for histograms is fine.
#![allow(clippy::cast_precision_loss)]
// Connection handles are cloned out of their locks before any await.
#![allow(clippy::significant_drop_tightening)]

pub mod document;
pub mod memory;
pub mod postgres;
pub mod resilience;
pub mod state;
pub mod traits;

pub use document::{AUDIT_COLLECTION, DECLARED_COLLECTIONS, DocumentCollection, DocumentManager};
pub use memory::InMemoryStore;
pub use postgres::{PostgresManager, Transaction, TxFuture};
pub use resilience::{RetryPolicy, retry_connection};
pub use state::{
    AvailabilitySet, BackendHealth, BackendId, BestEffort, ConnectionState, ConnectionStatus,
    HealthStatus, PoolStats,
};
pub use traits::{Backend, RelationalStore};
