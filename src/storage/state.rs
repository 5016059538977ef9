//! Connection state, availability and health types shared by all backends.
//!
//! # Connection State Machine
//!
//! ```text
//! +--------------+  initialize()  +------------+  probe ok  +-----------+
//! | Disconnected | -------------> | Connecting | ---------> | Connected |
//! +--------------+                +------------+            +-----------+
//!        ^                              |                     |      ^
//!        |       retries exhausted      |      operation or   |      | probe ok
//!        +------------------------------+      probe failure  v      |
//!        |                                                  +----------+
//!        +------------------- close() --------------------- | Degraded |
//!                                                           +----------+
//! ```
//!
//! Transitions are driven by the results of operations and probes. Nothing
//! re-initializes a backend behind the caller's back.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Closed set of backend identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// Relational primary.
    CoreDb,
    /// Relational secondary holding identity data.
    AuthDb,
    /// Document store holding audit and session data.
    AuditDb,
    /// Full-text search engine.
    Search,
    /// In-memory stand-in used in test mode.
    Memory,
}

impl BackendId {
    /// Returns the identifier as used in reports and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CoreDb => "core_db",
            Self::AuthDb => "auth_db",
            Self::AuditDb => "audit_db",
            Self::Search => "search",
            Self::Memory => "memory",
        }
    }

    /// Returns true for relational backends.
    #[must_use]
    pub const fn is_relational(self) -> bool {
        matches!(self, Self::CoreDb | Self::AuthDb)
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected (initial, closed, or retries exhausted).
    #[default]
    Disconnected,
    /// Initialization in progress.
    Connecting,
    /// Liveness probe succeeded.
    Connected,
    /// Was connected; the last operation or probe failed.
    Degraded,
}

/// Pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    /// Open connections.
    pub total: usize,
    /// Connections ready for checkout.
    pub idle: usize,
    /// Callers waiting for a connection.
    pub waiting: usize,
}

/// Snapshot of a backend's connection state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionState {
    /// Backend the state belongs to.
    pub backend: BackendId,
    /// Lifecycle status.
    pub status: ConnectionStatus,
    /// Initialization attempts made by the last `initialize()` call.
    pub attempt: u32,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
    /// Pool occupancy at the last observation.
    pub pool: PoolStats,
}

impl ConnectionState {
    /// Creates a disconnected state.
    #[must_use]
    pub const fn new(backend: BackendId) -> Self {
        Self {
            backend,
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            last_error: None,
            pool: PoolStats {
                total: 0,
                idle: 0,
                waiting: 0,
            },
        }
    }

    /// Returns true when the backend is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Interior-mutable holder for a manager's [`ConnectionState`].
///
/// The lock is only held while copying or mutating the snapshot, never
/// across an await point.
#[derive(Debug)]
pub struct StateCell {
    inner: Mutex<ConnectionState>,
}

impl StateCell {
    /// Creates a cell in the disconnected state.
    #[must_use]
    pub const fn new(backend: BackendId) -> Self {
        Self {
            inner: Mutex::new(ConnectionState::new(backend)),
        }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> ConnectionState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutates the state in place.
    pub fn update(&self, f: impl FnOnce(&mut ConnectionState)) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Marks the start of an initialization attempt.
    pub fn connecting(&self, attempt: u32) {
        self.update(|s| {
            s.status = ConnectionStatus::Connecting;
            s.attempt = attempt;
        });
    }

    /// Marks a successful probe.
    pub fn connected(&self) {
        self.update(|s| {
            if s.status != ConnectionStatus::Connected {
                tracing::info!(backend = %s.backend, "Backend connected");
            }
            s.status = ConnectionStatus::Connected;
            s.last_error = None;
        });
    }

    /// Records a failure observed while connected.
    ///
    /// A backend that never connected stays `Disconnected`.
    pub fn degraded(&self, error: &str) {
        self.update(|s| {
            if s.status == ConnectionStatus::Connected {
                tracing::warn!(backend = %s.backend, error, "Backend degraded");
                s.status = ConnectionStatus::Degraded;
            }
            s.last_error = Some(error.to_string());
        });
    }

    /// Records that initialization gave up or the backend was closed.
    pub fn disconnected(&self, error: Option<&str>) {
        self.update(|s| {
            s.status = ConnectionStatus::Disconnected;
            if let Some(error) = error {
                s.last_error = Some(error.to_string());
            }
        });
    }

    /// Records pool occupancy.
    pub fn pool(&self, pool: PoolStats) {
        self.update(|s| s.pool = pool);
    }
}

/// Set of backends that are currently usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvailabilitySet(BTreeSet<BackendId>);

impl AvailabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Records a backend's connectivity; membership mirrors `connected`.
    pub fn record(&mut self, backend: BackendId, connected: bool) {
        if connected {
            self.0.insert(backend);
        } else {
            self.0.remove(&backend);
        }
    }

    /// Returns true if the backend is available.
    #[must_use]
    pub fn contains(&self, backend: BackendId) -> bool {
        self.0.contains(&backend)
    }

    /// Number of available backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when nothing is available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if any relational backend is available.
    #[must_use]
    pub fn has_relational(&self) -> bool {
        self.0.iter().any(|b| b.is_relational())
    }

    /// Iterates in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = BackendId> + '_ {
        self.0.iter().copied()
    }

    /// Collects the members.
    #[must_use]
    pub fn to_vec(&self) -> Vec<BackendId> {
        self.iter().collect()
    }
}

/// Result of a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Probe succeeded.
    Healthy,
    /// Probe failed or the backend is not connected.
    Unhealthy,
    /// The probe itself could not run (panicked or timed out).
    Error,
}

/// Health record for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    /// Backend probed.
    pub backend: BackendId,
    /// Outcome.
    pub status: HealthStatus,
    /// Probe round-trip.
    pub latency_ms: Option<u64>,
    /// Pool occupancy, when the backend has a pool.
    pub pool: Option<PoolStats>,
    /// Failure detail.
    pub error: Option<String>,
}

impl BackendHealth {
    /// Healthy record.
    #[must_use]
    pub const fn healthy(backend: BackendId, latency_ms: u64, pool: Option<PoolStats>) -> Self {
        Self {
            backend,
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            pool,
            error: None,
        }
    }

    /// Unhealthy record.
    #[must_use]
    pub fn unhealthy(backend: BackendId, error: impl Into<String>, pool: Option<PoolStats>) -> Self {
        Self {
            backend,
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            pool,
            error: Some(error.into()),
        }
    }

    /// Record for a probe that could not complete.
    #[must_use]
    pub fn errored(backend: BackendId, error: impl Into<String>) -> Self {
        Self {
            backend,
            status: HealthStatus::Error,
            latency_ms: None,
            pool: None,
            error: Some(error.into()),
        }
    }

    /// Returns true if healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Outcome of a best-effort write.
///
/// Best-effort writes (search indexing, audit trail) may fail without
/// affecting the caller; failures are logged and counted, never raised.
/// Writes to the source-of-truth store return [`crate::Result`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum BestEffort {
    /// The write reached the backend.
    Applied,
    /// The write was dropped.
    Dropped {
        /// Why it was dropped.
        reason: String,
    },
}

impl BestEffort {
    /// Converts a result, logging and counting the failure.
    pub fn from_result<T>(backend: BackendId, operation: &'static str, result: crate::Result<T>) -> Self {
        match result {
            Ok(_) => Self::Applied,
            Err(e) => Self::dropped(backend, operation, e.to_string()),
        }
    }

    /// Records a dropped write.
    pub fn dropped(backend: BackendId, operation: &'static str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(backend = %backend, operation, reason = %reason, "Best-effort write dropped");
        metrics::counter!(
            "deskstore_best_effort_dropped_total",
            "backend" => backend.as_str(),
            "operation" => operation
        )
        .increment(1);
        Self::Dropped { reason }
    }

    /// Returns true if the write was applied.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_id_names() {
        assert_eq!(BackendId::CoreDb.to_string(), "core_db");
        assert_eq!(BackendId::AuditDb.as_str(), "audit_db");
        assert!(BackendId::AuthDb.is_relational());
        assert!(!BackendId::Memory.is_relational());
        assert_eq!(
            serde_json::to_string(&BackendId::Search).unwrap_or_default(),
            "\"search\""
        );
    }

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new(BackendId::CoreDb);
        assert_eq!(cell.snapshot().status, ConnectionStatus::Disconnected);

        cell.connecting(1);
        assert_eq!(cell.snapshot().status, ConnectionStatus::Connecting);
        assert_eq!(cell.snapshot().attempt, 1);

        cell.connected();
        assert!(cell.snapshot().is_connected());

        cell.degraded("connection reset");
        let state = cell.snapshot();
        assert_eq!(state.status, ConnectionStatus::Degraded);
        assert_eq!(state.last_error.as_deref(), Some("connection reset"));

        cell.connected();
        assert!(cell.snapshot().is_connected());
        assert!(cell.snapshot().last_error.is_none());

        cell.disconnected(None);
        assert_eq!(cell.snapshot().status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_degraded_requires_prior_connection() {
        let cell = StateCell::new(BackendId::AuditDb);
        cell.degraded("refused");
        let state = cell.snapshot();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.last_error.as_deref(), Some("refused"));
    }

    #[test]
    fn test_availability_set_mirrors_connectivity() {
        let mut set = AvailabilitySet::new();
        assert!(set.is_empty());

        set.record(BackendId::CoreDb, true);
        set.record(BackendId::Search, true);
        set.record(BackendId::AuditDb, false);
        assert_eq!(set.to_vec(), vec![BackendId::CoreDb, BackendId::Search]);
        assert!(set.has_relational());

        set.record(BackendId::CoreDb, false);
        assert!(!set.contains(BackendId::CoreDb));
        assert!(!set.has_relational());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_best_effort() {
        assert!(BestEffort::from_result(BackendId::Search, "index", Ok(())).succeeded());

        let dropped = BestEffort::from_result::<()>(
            BackendId::Search,
            "index",
            Err(crate::Error::InvalidInput("bad".to_string())),
        );
        assert!(!dropped.succeeded());
        assert!(matches!(dropped, BestEffort::Dropped { reason } if reason.contains("bad")));
    }
}
