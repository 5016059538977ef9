//! Bounded retry for backend initialization.
//!
//! Initialization retries a fixed number of times with a fixed delay and
//! then gives up. Steady-state operations are never retried here: a failing
//! query surfaces to its caller, which decides whether to treat the backend
//! as degraded.
//!
//! # Usage
//!
//! ```rust,ignore
//! use deskstore::storage::{RetryPolicy, retry_connection};
//!
//! let policy = RetryPolicy::default(); // 5 attempts, 5s apart
//! let conn = retry_connection(&policy, BackendId::AuditDb, |attempt| async move {
//!     connect().await
//! }).await?;
//! ```

use super::BackendId;
use crate::{Error, Result};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry policy for backend initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    /// A single attempt with no delay.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, 0)
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Runs `connect` until it succeeds or the policy is exhausted.
///
/// `connect` receives the 1-based attempt number. Exactly
/// `policy.max_attempts` attempts are made on persistent failure (at least
/// one, even for a zero policy); the final error is reported as
/// [`Error::Connection`] carrying the attempt count.
pub async fn retry_connection<T, F, Fut>(
    policy: &RetryPolicy,
    backend: BackendId,
    mut connect: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        metrics::counter!(
            "deskstore_connect_attempts_total",
            "backend" => backend.as_str()
        )
        .increment(1);

        match connect(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(backend = %backend, attempt, "Connected after retry");
                }
                return Ok(value);
            },
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    backend = %backend,
                    attempts = attempt,
                    error = %e,
                    "Giving up on backend after exhausting retries"
                );
                return Err(Error::Connection {
                    backend,
                    attempts: attempt,
                    cause: connection_cause(e),
                });
            },
            Err(e) => {
                tracing::warn!(
                    backend = %backend,
                    attempt,
                    max_attempts,
                    retry_in_ms = policy.delay_ms,
                    error = %e,
                    "Backend connection attempt failed"
                );
                if policy.delay_ms > 0 {
                    tokio::time::sleep(policy.delay()).await;
                }
            },
        }
    }
}

/// Strips a nested connection error down to its cause.
fn connection_cause(error: Error) -> String {
    match error {
        Error::Connection { cause, .. } => cause,
        other => other.to_string(),
    }
}
