//! Document store manager backed by Redis.
//!
//! Collections are key namespaces. Each document is a JSON string stored at
//! `<prefix>:<collection>:<id>` and its id is tracked in the set
//! `<prefix>:<collection>:_ids`. Known collections are registered in
//! `<prefix>:_collections`.
//!
//! A single multiplexed [`redis::aio::ConnectionManager`] is shared by every
//! caller; it is cheap to clone and pipelines concurrent commands.

use super::state::{PoolStats, StateCell};
use super::{Backend, BackendHealth, BackendId, BestEffort, ConnectionState};
use super::{RetryPolicy, retry_connection};
use crate::config::DocumentConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use secrecy::ExposeSecret;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Collections created at startup.
pub const DECLARED_COLLECTIONS: &[&str] = &["audit_logs", "sessions", "notifications"];

/// Collection receiving audit events.
pub const AUDIT_COLLECTION: &str = "audit_logs";

/// Redis-backed document store.
pub struct DocumentManager {
    config: DocumentConfig,
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
    state: StateCell,
}

impl fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentManager")
            .field("key_prefix", &self.config.key_prefix)
            .field("state", &self.state.snapshot())
            .finish_non_exhaustive()
    }
}

impl DocumentManager {
    /// Validates the URL. No connection is opened until [`Self::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the URL is not a valid Redis URL.
    pub fn new(config: &DocumentConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.expose_secret())
            .map_err(|e| Error::Configuration(format!("audit_db: invalid document url: {e}")))?;
        if config.key_prefix.trim().is_empty() {
            return Err(Error::Configuration(
                "audit_db: key_prefix must not be empty".to_string(),
            ));
        }

        Ok(Self {
            config: config.clone(),
            client,
            connection: Mutex::new(None),
            state: StateCell::new(BackendId::AuditDb),
        })
    }

    /// Connects with bounded retry, probes with `PING` and registers the
    /// declared collections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] once the policy is exhausted, or the
    /// command error if the collections cannot be registered. Either way the
    /// backend is left disconnected.
    pub async fn initialize(&self, policy: &RetryPolicy) -> Result<()> {
        tracing::info!(backend = %BackendId::AuditDb, "Initializing document backend");

        let connected = retry_connection(policy, BackendId::AuditDb, |attempt| {
            self.state.connecting(attempt);
            async move { self.connect().await }
        })
        .await;

        let connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                self.state.disconnected(Some(&e.to_string()));
                return Err(e);
            },
        };

        // Registration must succeed before the backend is reported connected.
        let mut bootstrap = redis::cmd("SADD");
        bootstrap.arg(self.registry_key());
        for name in DECLARED_COLLECTIONS {
            bootstrap.arg(*name);
        }
        let registered: Result<i64> = self
            .run_on(connection.clone(), "bootstrap", |mut conn| async move {
                bootstrap.query_async(&mut conn).await
            })
            .await;
        let added = match registered {
            Ok(added) => added,
            Err(e) => {
                self.connection
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                self.state.disconnected(Some(&e.to_string()));
                self.state.pool(single_connection(false));
                return Err(e);
            },
        };

        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) = Some(connection);
        self.state.connected();
        self.state.pool(single_connection(true));
        tracing::info!(
            backend = %BackendId::AuditDb,
            collections = DECLARED_COLLECTIONS.len(),
            newly_registered = added,
            "Document backend ready"
        );
        Ok(())
    }

    /// Returns a handle to a collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] unless the name is lowercase
    /// alphanumeric with underscores.
    pub fn collection(&self, name: &str) -> Result<DocumentCollection<'_>> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !name.starts_with('_');
        if !valid {
            return Err(Error::InvalidInput(format!(
                "invalid collection name: {name:?}"
            )));
        }
        Ok(DocumentCollection {
            manager: self,
            name: name.to_string(),
        })
    }

    /// Names registered in the collection registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    pub async fn collections(&self) -> Result<Vec<String>> {
        let key = self.registry_key();
        let mut names: Vec<String> = self
            .run("collections", |mut conn| async move {
                redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await
            })
            .await?;
        names.sort();
        Ok(names)
    }

    /// Appends an event to the audit trail.
    ///
    /// The event is stamped with `recorded_at`. Failures are logged and
    /// counted, never raised.
    pub async fn record_audit(&self, mut event: serde_json::Value) -> BestEffort {
        if let Some(object) = event.as_object_mut() {
            object
                .entry("recorded_at")
                .or_insert_with(|| serde_json::Value::String(chrono::Utc::now().to_rfc3339()));
        }
        let result = match self.collection(AUDIT_COLLECTION) {
            Ok(audit) => audit.insert_new(&event).await,
            Err(e) => Err(e),
        };
        BestEffort::from_result(BackendId::AuditDb, "record_audit", result)
    }

    fn registry_key(&self) -> String {
        format!("{}:_collections", self.config.key_prefix)
    }

    /// Opens the multiplexed connection and pings it.
    async fn connect(&self) -> Result<ConnectionManager> {
        let timeout_ms = self.config.connect_timeout_ms;
        let connect = async {
            let mut connection = self.client.get_connection_manager().await?;
            let _: String = redis::cmd("PING").query_async(&mut connection).await?;
            Ok::<_, redis::RedisError>(connection)
        };

        match tokio::time::timeout(self.config.connect_timeout(), connect).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(Error::Connection {
                backend: BackendId::AuditDb,
                attempts: 1,
                cause: e.to_string(),
            }),
            Err(_) => Err(Error::Timeout {
                operation: "audit_db.connect".to_string(),
                timeout_ms,
            }),
        }
    }

    /// Clones the shared connection handle.
    fn handle(&self) -> Result<ConnectionManager> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Connection {
                backend: BackendId::AuditDb,
                attempts: 0,
                cause: "document backend is not initialized".to_string(),
            })
    }

    /// Runs one command (or pipeline) under the command timeout.
    async fn run<T, F, Fut>(&self, operation: &'static str, command: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.handle()?;
        self.run_on(conn, operation, command).await
    }

    async fn run_on<T, F, Fut>(
        &self,
        conn: ConnectionManager,
        operation: &'static str,
        command: F,
    ) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.command_timeout(), command(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.state.degraded(&e.to_string());
                }
                Err(Error::Query {
                    operation: format!("audit_db.{operation}"),
                    statement: operation.to_string(),
                    cause: e.to_string(),
                })
            },
            Err(_) => {
                self.state.degraded(&format!(
                    "{operation} timed out after {}ms",
                    self.config.command_timeout_ms
                ));
                Err(Error::Timeout {
                    operation: format!("audit_db.{operation}"),
                    timeout_ms: self.config.command_timeout_ms,
                })
            },
        }
    }
}

#[async_trait]
impl Backend for DocumentManager {
    fn id(&self) -> BackendId {
        BackendId::AuditDb
    }

    fn state(&self) -> ConnectionState {
        self.state.snapshot()
    }

    async fn health_check(&self) -> BackendHealth {
        let started = Instant::now();
        let result: Result<String> = self
            .run("ping", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await;

        match result {
            Ok(_) => {
                let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.state.connected();
                let pool = single_connection(true);
                self.state.pool(pool);
                BackendHealth::healthy(BackendId::AuditDb, latency_ms, Some(pool))
            },
            Err(e) => {
                let error = e.to_string();
                self.state.degraded(&error);
                BackendHealth::unhealthy(BackendId::AuditDb, error, Some(single_connection(false)))
            },
        }
    }

    async fn close(&self) {
        let dropped = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if dropped.is_some() {
            tracing::info!(backend = %BackendId::AuditDb, "Document backend closed");
        }
        self.state.disconnected(None);
        self.state.pool(single_connection(false));
    }
}

/// A namespace of JSON documents.
#[derive(Debug)]
pub struct DocumentCollection<'a> {
    manager: &'a DocumentManager,
    name: String,
}

impl DocumentCollection<'_> {
    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores a document under `id`, replacing any existing one.
    ///
    /// The collection is added to the registry on first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized or the command
    /// fails.
    pub async fn insert(&self, id: &str, document: &serde_json::Value) -> Result<()> {
        validate_id(id)?;
        let json = serde_json::to_string(document).map_err(|e| Error::OperationFailed {
            operation: "serialize_document".to_string(),
            cause: e.to_string(),
        })?;
        let key = self.key(id);
        let ids_key = self.ids_key();
        let registry_key = self.manager.registry_key();
        let collection = self.name.clone();
        let id = id.to_string();

        self.manager
            .run("insert", |mut conn| async move {
                redis::pipe()
                    .atomic()
                    .cmd("SET")
                    .arg(key)
                    .arg(json)
                    .ignore()
                    .cmd("SADD")
                    .arg(ids_key)
                    .arg(id)
                    .ignore()
                    .cmd("SADD")
                    .arg(registry_key)
                    .arg(collection)
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await
    }

    /// Stores a document under a freshly generated id and returns the id.
    ///
    /// # Errors
    ///
    /// Same as [`Self::insert`].
    pub async fn insert_new(&self, document: &serde_json::Value) -> Result<String> {
        let id = uuid::Uuid::now_v7().to_string();
        self.insert(&id, document).await?;
        Ok(id)
    }

    /// Fetches a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the stored value is not JSON.
    pub async fn get(&self, id: &str) -> Result<Option<serde_json::Value>> {
        validate_id(id)?;
        let key = self.key(id);
        let raw: Option<String> = self
            .manager
            .run("get", |mut conn| async move {
                redis::cmd("GET").arg(key).query_async(&mut conn).await
            })
            .await?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| Error::OperationFailed {
                operation: "deserialize_document".to_string(),
                cause: e.to_string(),
            })
        })
        .transpose()
    }

    /// Deletes a document. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let key = self.key(id);
        let ids_key = self.ids_key();
        let id = id.to_string();

        let (removed,): (i64,) = self
            .manager
            .run("delete", |mut conn| async move {
                redis::pipe()
                    .atomic()
                    .cmd("DEL")
                    .arg(key)
                    .cmd("SREM")
                    .arg(ids_key)
                    .arg(id)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(removed > 0)
    }

    /// Ids in this collection, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ids(&self) -> Result<Vec<String>> {
        let ids_key = self.ids_key();
        let mut ids: Vec<String> = self
            .manager
            .run("ids", |mut conn| async move {
                redis::cmd("SMEMBERS").arg(ids_key).query_async(&mut conn).await
            })
            .await?;
        ids.sort();
        Ok(ids)
    }

    /// Number of documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn count(&self) -> Result<u64> {
        let ids_key = self.ids_key();
        self.manager
            .run("count", |mut conn| async move {
                redis::cmd("SCARD").arg(ids_key).query_async(&mut conn).await
            })
            .await
    }

    fn key(&self, id: &str) -> String {
        document_key(&self.manager.config.key_prefix, &self.name, id)
    }

    fn ids_key(&self) -> String {
        format!("{}:{}:_ids", self.manager.config.key_prefix, self.name)
    }
}

/// Ids become key segments, so they must be non-empty and free of `:`.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(':') {
        return Err(Error::InvalidInput(format!("invalid document id: {id:?}")));
    }
    Ok(())
}

/// Key a document is stored under.
#[must_use]
pub fn document_key(prefix: &str, collection: &str, id: &str) -> String {
    format!("{prefix}:{collection}:{id}")
}

const fn single_connection(connected: bool) -> PoolStats {
    let total = if connected { 1 } else { 0 };
    PoolStats {
        total,
        idle: total,
        waiting: 0,
    }
}
