//! PostgreSQL connection manager.
//!
//! Owns a `deadpool-postgres` pool for one relational backend (`core_db` or
//! `auth_db`). Every statement runs on a pooled connection that is returned
//! to the pool on every exit path, under the configured statement timeout,
//! and is timed for slow-query logging.
//!
//! # Transactions
//!
//! [`PostgresManager::transaction`] pins one connection for the whole body so
//! statement order is preserved. The body's future may borrow the
//! transaction but nothing else, so captures are moved in:
//!
//! ```rust,ignore
//! let db = Arc::clone(&manager);
//! let id = manager
//!     .transaction(move |tx| {
//!         Box::pin(async move {
//!             db.execute_in(tx, "INSERT INTO tickets (title) VALUES ($1)", &[&title]).await?;
//!             let rows = db.query_in(tx, "SELECT currval('tickets_id_seq')", &[]).await?;
//!             Ok(rows.first().map(|r| r.get::<_, i64>(0)))
//!         })
//!     })
//!     .await?;
//! ```

use super::state::{PoolStats, StateCell};
use super::{Backend, BackendHealth, BackendId, ConnectionState, RelationalStore};
use super::{RetryPolicy, retry_connection};
use crate::config::{RelationalConfig, TlsMode};
use crate::security::statement_preview;
use crate::{Error, Result};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use secrecy::ExposeSecret;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

/// Transaction handle passed to [`PostgresManager::transaction`] bodies.
pub type Transaction<'t> = deadpool_postgres::Transaction<'t>;

/// Future returned by a transaction body.
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 't>>;

/// Liveness probe statement.
const PROBE_SQL: &str = "SELECT 1";

/// Pooled PostgreSQL backend.
pub struct PostgresManager {
    id: BackendId,
    config: RelationalConfig,
    pool: Pool,
    state: StateCell,
}

impl fmt::Debug for PostgresManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresManager")
            .field("id", &self.id)
            .field("state", &self.state.snapshot())
            .finish_non_exhaustive()
    }
}

impl PostgresManager {
    /// Builds the pool. No connection is opened until [`Self::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the config is incomplete, the URL
    /// does not parse, or TLS is required but not compiled in.
    pub fn new(id: BackendId, config: &RelationalConfig) -> Result<Self> {
        if !id.is_relational() {
            return Err(Error::InvalidInput(format!(
                "{id} is not a relational backend"
            )));
        }
        config.validate(id.as_str())?;

        let cfg = build_pool_config(config)?;
        let pool = create_pool(&cfg, config.tls, id)?;

        Ok(Self {
            id,
            config: config.clone(),
            pool,
            state: StateCell::new(id),
        })
    }

    /// Connects with bounded retry and warms the pool.
    ///
    /// Each attempt acquires a connection and runs the liveness probe. On
    /// success the pool is warmed to `pool_min` connections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] carrying the attempt count once the
    /// policy is exhausted.
    pub async fn initialize(&self, policy: &RetryPolicy) -> Result<()> {
        tracing::info!(
            backend = %self.id,
            tls = self.config.tls.as_str(),
            pool_max = self.config.pool_max,
            "Initializing relational backend"
        );

        let probed = retry_connection(policy, self.id, |attempt| {
            self.state.connecting(attempt);
            async move { self.probe().await }
        })
        .await;

        match probed {
            Ok(latency_ms) => {
                self.warm().await;
                self.state.connected();
                self.refresh_pool_stats();
                tracing::info!(backend = %self.id, latency_ms, "Relational backend ready");
                Ok(())
            },
            Err(e) => {
                self.state.disconnected(Some(&e.to_string()));
                Err(e)
            },
        }
    }

    /// Runs a statement on a caller-supplied transaction and returns its rows.
    ///
    /// # Errors
    ///
    /// Same as [`RelationalStore::query`].
    pub async fn query_in(
        &self,
        tx: &Transaction<'_>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        self.timed("query", sql, tx.query(sql, params)).await
    }

    /// Runs a statement on a caller-supplied transaction and returns the
    /// affected row count.
    ///
    /// # Errors
    ///
    /// Same as [`RelationalStore::execute`].
    pub async fn execute_in(
        &self,
        tx: &Transaction<'_>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64> {
        self.timed("execute", sql, tx.execute(sql, params)).await
    }

    /// Runs a multi-statement script on a caller-supplied transaction.
    ///
    /// Used for migration files, which may hold several statements and no
    /// parameters.
    ///
    /// # Errors
    ///
    /// Same as [`RelationalStore::execute`].
    pub async fn batch_in(&self, tx: &Transaction<'_>, script: &str) -> Result<()> {
        self.timed("batch", script, tx.batch_execute(script)).await
    }

    /// Runs `body` inside one transaction on a dedicated connection.
    ///
    /// Commits when the body returns `Ok`. On `Err` the transaction is rolled
    /// back and the body's error is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if `BEGIN` or `COMMIT` fails, or the
    /// body's own error.
    pub async fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t Transaction<'_>) -> TxFuture<'t, T> + Send,
    {
        let mut client = self.acquire().await?;
        let tx = client.transaction().await.map_err(|e| {
            self.note_failure(&e);
            Error::Transaction {
                operation: "begin".to_string(),
                cause: e.to_string(),
            }
        })?;

        let outcome = body(&tx).await;

        match outcome {
            Ok(value) => {
                tx.commit().await.map_err(|e| {
                    self.note_failure(&e);
                    Error::Transaction {
                        operation: "commit".to_string(),
                        cause: e.to_string(),
                    }
                })?;
                Ok(value)
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(
                        backend = %self.id,
                        error = %rollback,
                        "Rollback failed; connection will be discarded"
                    );
                }
                tracing::debug!(backend = %self.id, error = %e, "Transaction rolled back");
                Err(e)
            },
        }
    }

    /// Drops pooled connections idle for longer than `idle_timeout`, keeping
    /// at least `pool_min`. Runs on every health check.
    ///
    /// Returns the number of connections closed.
    pub fn prune_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let min = self.config.pool_min;
        let mut kept = 0;
        let result = self.pool.retain(|_, metrics| {
            let keep = kept < min || metrics.last_used() < idle_timeout;
            if keep {
                kept += 1;
            }
            keep
        });
        let removed = result.removed.len();
        if removed > 0 {
            tracing::debug!(backend = %self.id, removed, "Pruned idle connections");
        }
        self.refresh_pool_stats();
        removed
    }

    /// Current pool occupancy.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            total: status.size,
            idle: usize::try_from(status.available).unwrap_or(0),
            waiting: status.waiting,
        }
    }

    /// Config the pool was built from.
    #[must_use]
    pub const fn config(&self) -> &RelationalConfig {
        &self.config
    }

    /// Checks out a pooled connection.
    async fn acquire(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            let error = match e {
                PoolError::Timeout(_) => Error::Timeout {
                    operation: format!("{}.acquire", self.id),
                    timeout_ms: self.config.acquire_timeout_ms,
                },
                other => Error::Connection {
                    backend: self.id,
                    attempts: 1,
                    cause: other.to_string(),
                },
            };
            self.state.degraded(&error.to_string());
            error
        })
    }

    /// Acquires a connection and runs the liveness probe.
    async fn probe(&self) -> Result<u64> {
        let started = Instant::now();
        let client = self.acquire().await?;
        let timeout = self.config.connect_timeout();

        match tokio::time::timeout(timeout, client.simple_query(PROBE_SQL)).await {
            Ok(Ok(_)) => Ok(elapsed_ms(started.elapsed())),
            Ok(Err(e)) => Err(Error::Connection {
                backend: self.id,
                attempts: 1,
                cause: e.to_string(),
            }),
            Err(_) => Err(Error::Timeout {
                operation: format!("{}.probe", self.id),
                timeout_ms: self.config.connect_timeout_ms,
            }),
        }
    }

    /// Opens `pool_min` connections so the first requests do not pay for them.
    async fn warm(&self) {
        let mut held = Vec::with_capacity(self.config.pool_min);
        for _ in 0..self.config.pool_min {
            match self.pool.get().await {
                Ok(client) => held.push(client),
                Err(e) => {
                    tracing::warn!(backend = %self.id, error = %e, "Pool warm-up stopped early");
                    break;
                },
            }
        }
        tracing::debug!(backend = %self.id, warmed = held.len(), "Pool warmed");
    }

    /// Runs a statement future under the statement timeout with timing.
    async fn timed<T, Fut>(&self, operation: &'static str, sql: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.statement_timeout(), fut).await;
        self.record_timing(operation, sql, started.elapsed());

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.note_failure(&e);
                Err(Error::Query {
                    operation: format!("{}.{operation}", self.id),
                    statement: statement_preview(sql),
                    cause: describe_pg_error(&e),
                })
            },
            Err(_) => {
                tracing::warn!(
                    backend = %self.id,
                    operation,
                    statement = %statement_preview(sql),
                    timeout_ms = self.config.statement_timeout_ms,
                    "Statement timed out"
                );
                Err(Error::Timeout {
                    operation: format!("{}.{operation}", self.id),
                    timeout_ms: self.config.statement_timeout_ms,
                })
            },
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_timing(&self, operation: &'static str, sql: &str, elapsed: Duration) {
        let duration_ms = elapsed_ms(elapsed);
        metrics::counter!(
            "deskstore_queries_total",
            "backend" => self.id.as_str(),
            "operation" => operation
        )
        .increment(1);
        metrics::histogram!("deskstore_query_duration_ms", "backend" => self.id.as_str())
            .record(duration_ms as f64);

        if elapsed > self.config.slow_query_threshold() {
            metrics::counter!("deskstore_slow_queries_total", "backend" => self.id.as_str())
                .increment(1);
            tracing::warn!(
                backend = %self.id,
                operation,
                duration_ms,
                threshold_ms = self.config.slow_query_ms,
                statement = %statement_preview(sql),
                "Slow query"
            );
        }
    }

    /// Marks the backend degraded when a driver error means the connection
    /// itself is gone rather than the statement being rejected.
    fn note_failure(&self, error: &tokio_postgres::Error) {
        if error.is_closed() || error.as_db_error().is_none() {
            self.state.degraded(&error.to_string());
        }
    }

    fn refresh_pool_stats(&self) {
        self.state.pool(self.pool_stats());
    }
}

#[async_trait]
impl Backend for PostgresManager {
    fn id(&self) -> BackendId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        self.state.snapshot()
    }

    async fn health_check(&self) -> BackendHealth {
        let result = self.probe().await;
        self.prune_idle();
        let pool = self.pool_stats();
        self.state.pool(pool);

        match result {
            Ok(latency_ms) => {
                self.state.connected();
                BackendHealth::healthy(self.id, latency_ms, Some(pool))
            },
            Err(e) => {
                let error = e.to_string();
                self.state.degraded(&error);
                BackendHealth::unhealthy(self.id, error, Some(pool))
            },
        }
    }

    async fn close(&self) {
        self.pool.close();
        self.state.disconnected(None);
        self.refresh_pool_stats();
        tracing::info!(backend = %self.id, "Relational backend closed");
    }
}

#[async_trait]
impl RelationalStore for PostgresManager {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        let client = self.acquire().await?;
        self.timed("query", sql, client.query(sql, params)).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let client = self.acquire().await?;
        self.timed("execute", sql, client.execute(sql, params)).await
    }
}

/// Translates a relational config into a deadpool config.
///
/// URL components win; discrete fields fill whatever the URL leaves out.
fn build_pool_config(config: &RelationalConfig) -> Result<Config> {
    let mut cfg = Config::new();

    if let Some(url) = config.url.as_ref().filter(|u| !u.expose_secret().trim().is_empty()) {
        let parsed = url
            .expose_secret()
            .parse::<tokio_postgres::Config>()
            .map_err(|e| Error::Configuration(format!("invalid database url: {e}")))?;
        cfg.host = parsed.get_hosts().first().map(host_to_string);
        cfg.port = parsed.get_ports().first().copied();
        cfg.user = parsed.get_user().map(String::from);
        cfg.password = parsed
            .get_password()
            .map(|p| String::from_utf8_lossy(p).to_string());
        cfg.dbname = parsed.get_dbname().map(String::from);
        cfg.options = parsed.get_options().map(String::from);
    }

    if cfg.host.is_none() {
        cfg.host.clone_from(&config.host);
    }
    if cfg.port.is_none() {
        cfg.port = Some(config.port);
    }
    if cfg.user.is_none() {
        cfg.user.clone_from(&config.user);
    }
    if cfg.password.is_none() {
        cfg.password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string());
    }
    if cfg.dbname.is_none() {
        cfg.dbname.clone_from(&config.database);
    }

    cfg.application_name = Some(config.application_name.clone());
    cfg.connect_timeout = Some(config.connect_timeout());
    let statement_timeout = format!("-c statement_timeout={}", config.statement_timeout_ms);
    cfg.options = Some(match cfg.options.take() {
        Some(options) => format!("{options} {statement_timeout}"),
        None => statement_timeout,
    });
    cfg.ssl_mode = Some(match config.tls {
        TlsMode::Disable => deadpool_postgres::SslMode::Disable,
        TlsMode::Prefer => deadpool_postgres::SslMode::Prefer,
        TlsMode::Require => deadpool_postgres::SslMode::Require,
    });

    cfg.pool = Some(deadpool_postgres::PoolConfig {
        max_size: config.pool_max,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(config.acquire_timeout()),
            create: Some(config.connect_timeout()),
            recycle: Some(config.connect_timeout()),
        },
        ..Default::default()
    });
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    Ok(cfg)
}

#[cfg(feature = "postgres-tls")]
fn create_pool(cfg: &Config, tls: TlsMode, id: BackendId) -> Result<Pool> {
    let pool = match tls {
        TlsMode::Disable => cfg.create_pool(Some(Runtime::Tokio1), NoTls),
        TlsMode::Prefer | TlsMode::Require => {
            cfg.create_pool(Some(Runtime::Tokio1), tls_connector())
        },
    };
    pool.map_err(|e| Error::Configuration(format!("{id}: cannot create pool: {e}")))
}

#[cfg(not(feature = "postgres-tls"))]
fn create_pool(cfg: &Config, tls: TlsMode, id: BackendId) -> Result<Pool> {
    match tls {
        TlsMode::Require => {
            return Err(Error::Configuration(format!(
                "{id}: TLS is required but deskstore was built without the postgres-tls feature"
            )));
        },
        TlsMode::Prefer => {
            tracing::warn!(backend = %id, "TLS preferred but not compiled in; connecting in plaintext");
        },
        TlsMode::Disable => {},
    }
    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| Error::Configuration(format!("{id}: cannot create pool: {e}")))
}

/// rustls connector trusting the webpki root set.
#[cfg(feature = "postgres-tls")]
fn tls_connector() -> tokio_postgres_rustls::MakeRustlsConnect {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tokio_postgres_rustls::MakeRustlsConnect::new(config)
}

#[cfg(unix)]
fn host_to_string(h: &tokio_postgres::config::Host) -> String {
    match h {
        tokio_postgres::config::Host::Tcp(s) => s.clone(),
        tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
    }
}

#[cfg(not(unix))]
fn host_to_string(h: &tokio_postgres::config::Host) -> String {
    let tokio_postgres::config::Host::Tcp(s) = h;
    s.clone()
}

/// Server errors carry a SQLSTATE worth keeping; the message alone is
/// often ambiguous.
fn describe_pg_error(error: &tokio_postgres::Error) -> String {
    error.as_db_error().map_or_else(
        || error.to_string(),
        |db| format!("{} (SQLSTATE {})", db.message(), db.code().code()),
    )
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
