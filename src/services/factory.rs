//! Startup orchestration for every backend.
//!
//! # Architecture
//!
//! ```text
//! DatabaseFactory
//!   ├── core_db   → PostgresManager       (required unless test mode)
//!   ├── auth_db   → PostgresManager       (optional)
//!   ├── audit_db  → DocumentManager       (only when document.enabled)
//!   ├── search    → SearchIndexManager    (degrades unless search.required)
//!   └── memory    → InMemoryStore         (test-mode stand-in)
//! ```
//!
//! # Graceful Degradation
//!
//! Backends are initialized in the order above and isolated from each
//! other: one failing does not prevent the next from starting. Only
//! `core_db` is fatal, and only outside test mode. The set of backends that
//! came up is the [`AvailabilitySet`]; health checks keep it current.
//!
//! # Primary Selection
//!
//! `core_db` if connected; otherwise, in test mode, `auth_db`, then the
//! in-memory stand-in.

use crate::config::StoreConfig;
use crate::migrations::{MigrationManager, PostgresLedger};
use crate::search::SearchIndexManager;
use crate::storage::{
    AvailabilitySet, Backend, BackendHealth, BackendId, DocumentManager, InMemoryStore,
    PostgresManager, RelationalStore,
};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Upper bound for one backend's health probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health of every configured backend.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Whether [`DatabaseFactory::initialize`] completed.
    pub initialized: bool,
    /// Backends currently usable.
    pub available_backends: Vec<BackendId>,
    /// Backend serving as the primary.
    pub primary: Option<BackendId>,
    /// Probe result per backend.
    pub backends: BTreeMap<BackendId, BackendHealth>,
}

impl HealthReport {
    /// Returns true when every probed backend is healthy.
    #[must_use]
    pub fn all_healthy(&self) -> bool {
        self.backends.values().all(BackendHealth::is_healthy)
    }
}

/// The store serving relational requests.
#[derive(Debug, Clone)]
enum Primary {
    Postgres(Arc<PostgresManager>),
    Memory(Arc<InMemoryStore>),
}

impl Primary {
    fn id(&self) -> BackendId {
        match self {
            Self::Postgres(pg) => pg.id(),
            Self::Memory(_) => BackendId::Memory,
        }
    }

    fn store(&self) -> Arc<dyn RelationalStore> {
        match self {
            Self::Postgres(pg) => Arc::clone(pg) as Arc<dyn RelationalStore>,
            Self::Memory(mem) => Arc::clone(mem) as Arc<dyn RelationalStore>,
        }
    }
}

/// Registry of initialized backends.
///
/// Build one per process and share it by `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// use deskstore::{DatabaseFactory, StoreConfig};
///
/// let stores = Arc::new(DatabaseFactory::startup(StoreConfig::load_default().with_env_overrides()).await?);
/// let report = stores.get_health_status().await;
/// ```
#[derive(Debug)]
pub struct DatabaseFactory {
    config: StoreConfig,
    core: Option<Arc<PostgresManager>>,
    auth: Option<Arc<PostgresManager>>,
    audit: Option<Arc<DocumentManager>>,
    search: Option<Arc<SearchIndexManager>>,
    memory: Option<Arc<InMemoryStore>>,
    primary: Option<Primary>,
    available: Mutex<AvailabilitySet>,
    initialized: bool,
}

impl DatabaseFactory {
    /// Creates an uninitialized factory.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            core: None,
            auth: None,
            audit: None,
            search: None,
            memory: None,
            primary: None,
            available: Mutex::new(AvailabilitySet::new()),
            initialized: false,
        }
    }

    /// Creates, initializes and migrates.
    ///
    /// Runs [`Self::initialize`], then pending migrations on the primary,
    /// then seeds when `migrations.run_seeds` is set. Migrations are skipped
    /// when the primary is the in-memory stand-in.
    ///
    /// # Errors
    ///
    /// Returns the first initialization or migration error.
    pub async fn startup(config: StoreConfig) -> Result<Self> {
        let mut factory = Self::new(config);
        factory.initialize().await?;

        match factory.migration_manager() {
            Ok(migrations) => {
                migrations.run_migrations().await?;
                if factory.config.migrations.run_seeds {
                    migrations.run_seeds().await?;
                }
            },
            Err(_) => {
                tracing::warn!(
                    primary = ?factory.primary.as_ref().map(Primary::id),
                    "Primary is not a relational database; skipping migrations"
                );
            },
        }
        Ok(factory)
    }

    /// Connects every configured backend and selects the primary.
    ///
    /// Calling it again after success is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid configuration, and the
    /// `core_db` connection error outside test mode. Search errors are
    /// returned only when `search.required` is set.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.config.validate()?;
        let policy = self.config.retry;
        let test_mode = self.config.test_mode;
        tracing::info!(test_mode, "Initializing backends");

        if self.config.core.is_configured() {
            let core = Arc::new(PostgresManager::new(BackendId::CoreDb, &self.config.core)?);
            match core.initialize(&policy).await {
                Ok(()) => self.record(BackendId::CoreDb, true),
                Err(e) if test_mode => {
                    tracing::warn!(error = %e, "core_db unavailable; continuing in test mode");
                    self.record(BackendId::CoreDb, false);
                },
                Err(e) => return Err(e),
            }
            self.core = Some(core);
        } else if !test_mode {
            return Err(Error::Configuration(
                "core_db is not configured; set DESKSTORE_DATABASE_URL".to_string(),
            ));
        }

        if let Some(auth_config) = self.config.auth.clone() {
            let auth = Arc::new(PostgresManager::new(BackendId::AuthDb, &auth_config)?);
            let connected = match auth.initialize(&policy).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "auth_db unavailable");
                    false
                },
            };
            self.record(BackendId::AuthDb, connected);
            self.auth = Some(auth);
        }

        if self.config.document.enabled {
            let audit = Arc::new(DocumentManager::new(&self.config.document)?);
            let connected = match audit.initialize(&policy).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "audit_db unavailable");
                    false
                },
            };
            self.record(BackendId::AuditDb, connected);
            self.audit = Some(audit);
        }

        let search = Arc::new(SearchIndexManager::new(&self.config.search)?);
        search.initialize(&policy).await?;
        self.record(BackendId::Search, search.is_available());
        self.search = Some(search);

        self.primary = self.select_primary();
        if let Some(Primary::Memory(mem)) = &self.primary {
            self.memory = Some(Arc::clone(mem));
            self.record(BackendId::Memory, true);
        }

        self.initialized = true;
        let available = self.available_databases();
        tracing::info!(
            primary = ?self.primary.as_ref().map(Primary::id),
            available = ?available.to_vec(),
            "Backends initialized"
        );
        Ok(())
    }

    fn select_primary(&self) -> Option<Primary> {
        let connected =
            |pg: &Option<Arc<PostgresManager>>| pg.as_ref().filter(|p| p.is_connected()).cloned();

        if let Some(core) = connected(&self.core) {
            return Some(Primary::Postgres(core));
        }
        if !self.config.test_mode {
            return None;
        }
        if let Some(auth) = connected(&self.auth) {
            tracing::warn!("core_db unavailable; using auth_db as primary");
            return Some(Primary::Postgres(auth));
        }
        tracing::warn!("No relational backend available; using in-memory stand-in");
        Some(Primary::Memory(Arc::new(InMemoryStore::new())))
    }

    /// The store serving relational requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] before initialization or when no
    /// primary could be selected.
    pub fn get_primary_database(&self) -> Result<Arc<dyn RelationalStore>> {
        if !self.initialized {
            return Err(Error::Configuration(
                "database factory is not initialized".to_string(),
            ));
        }
        self.primary
            .as_ref()
            .map(Primary::store)
            .ok_or_else(|| Error::Configuration("no primary database available".to_string()))
    }

    /// Migration manager bound to the relational primary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the primary is not PostgreSQL.
    pub fn migration_manager(&self) -> Result<MigrationManager<PostgresLedger>> {
        match &self.primary {
            Some(Primary::Postgres(pg)) => Ok(MigrationManager::new(
                PostgresLedger::new(Arc::clone(pg)),
                &self.config.migrations,
            )),
            Some(Primary::Memory(_)) => Err(Error::Configuration(
                "migrations require a relational primary; the in-memory stand-in is active"
                    .to_string(),
            )),
            None => Err(Error::Configuration(
                "database factory is not initialized".to_string(),
            )),
        }
    }

    /// Probes every backend concurrently and refreshes availability.
    ///
    /// Each probe runs in its own task bounded by [`HEALTH_CHECK_TIMEOUT`];
    /// a probe that panics or times out is reported as an error entry.
    pub async fn get_health_status(&self) -> HealthReport {
        let probes: Vec<_> = self
            .backends()
            .into_iter()
            .map(|backend| {
                let id = backend.id();
                (id, tokio::spawn(async move { backend.health_check().await }))
            })
            .collect();

        let mut backends = BTreeMap::new();
        for (id, mut handle) in probes {
            let health = match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, &mut handle).await {
                Ok(Ok(health)) => health,
                Ok(Err(join)) => BackendHealth::errored(id, format!("health check failed: {join}")),
                Err(_) => {
                    handle.abort();
                    BackendHealth::errored(
                        id,
                        format!(
                            "health check timed out after {}ms",
                            HEALTH_CHECK_TIMEOUT.as_millis()
                        ),
                    )
                },
            };
            self.record(id, health.is_healthy());
            backends.insert(id, health);
        }

        HealthReport {
            initialized: self.initialized,
            available_backends: self.available_databases().to_vec(),
            primary: self.primary.as_ref().map(Primary::id),
            backends,
        }
    }

    /// Closes every backend.
    pub async fn close(&self) {
        for backend in self.backends() {
            let id = backend.id();
            backend.close().await;
            self.record(id, false);
        }
        tracing::info!("All backends closed");
    }

    /// Relational primary backend.
    #[must_use]
    pub const fn core(&self) -> Option<&Arc<PostgresManager>> {
        self.core.as_ref()
    }

    /// Identity backend.
    #[must_use]
    pub const fn auth(&self) -> Option<&Arc<PostgresManager>> {
        self.auth.as_ref()
    }

    /// Document store.
    #[must_use]
    pub const fn audit(&self) -> Option<&Arc<DocumentManager>> {
        self.audit.as_ref()
    }

    /// Search engine.
    #[must_use]
    pub const fn search(&self) -> Option<&Arc<SearchIndexManager>> {
        self.search.as_ref()
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether [`Self::initialize`] completed.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Snapshot of the availability set.
    #[must_use]
    pub fn available_databases(&self) -> AvailabilitySet {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true if `id` is currently available.
    #[must_use]
    pub fn is_available(&self, id: BackendId) -> bool {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn record(&self, id: BackendId, connected: bool) {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(id, connected);
    }

    fn backends(&self) -> Vec<Arc<dyn Backend>> {
        let mut all: Vec<Arc<dyn Backend>> = Vec::new();
        if let Some(core) = &self.core {
            all.push(Arc::clone(core) as Arc<dyn Backend>);
        }
        if let Some(auth) = &self.auth {
            all.push(Arc::clone(auth) as Arc<dyn Backend>);
        }
        if let Some(audit) = &self.audit {
            all.push(Arc::clone(audit) as Arc<dyn Backend>);
        }
        if let Some(search) = &self.search {
            all.push(Arc::clone(search) as Arc<dyn Backend>);
        }
        if let Some(memory) = &self.memory {
            all.push(Arc::clone(memory) as Arc<dyn Backend>);
        }
        all
    }
}
