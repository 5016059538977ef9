//! Lifecycle contract shared by every backend.
//!
//! The factory holds heterogeneous backends as `Arc<dyn Backend>` so it can
//! probe and close them uniformly.
//!
//! # Implementor Notes
//!
//! - `health_check()` must not return an error; failures are reported in the
//!   returned [`BackendHealth`] and reflected in [`Backend::state`].
//! - `close()` is idempotent.

use crate::storage::{BackendHealth, BackendId, ConnectionState};
use async_trait::async_trait;

/// Trait implemented by every connection manager.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Identifier of this backend.
    fn id(&self) -> BackendId;

    /// Snapshot of the connection state.
    fn state(&self) -> ConnectionState;

    /// Returns true when the backend is usable.
    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Re-runs the liveness probe.
    async fn health_check(&self) -> BackendHealth;

    /// Releases every connection.
    async fn close(&self);
}
