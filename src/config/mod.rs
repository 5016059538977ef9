//! Configuration management.
//!
//! Configuration is read from `~/.config/deskstore/config.toml` (or an
//! explicit path) and then overridden by `DESKSTORE_*` environment variables:
//!
//! ```toml
//! test_mode = false
//!
//! [core]
//! url = "${DATABASE_URL}"
//! tls = "require"
//! pool_max = 20
//!
//! [document]
//! enabled = true
//! url = "redis://cache:6379"
//!
//! [search]
//! url = "https://search:9200"
//! username = "elastic"
//! password = "${SEARCH_PASSWORD}"
//!
//! [retry]
//! max_attempts = 5
//! delay_ms = 5000
//! ```

mod backends;

pub use backends::{
    DocumentConfig, LoggingSettings, MigrationSettings, RelationalConfig, SearchConfig, TlsMode,
};

use crate::storage::RetryPolicy;
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration for deskstore.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Relational primary (`core_db`).
    pub core: RelationalConfig,
    /// Relational secondary (`auth_db`); skipped when absent.
    pub auth: Option<RelationalConfig>,
    /// Document store (`audit_db`).
    pub document: DocumentConfig,
    /// Search engine.
    pub search: SearchConfig,
    /// Migration and seed locations.
    pub migrations: MigrationSettings,
    /// Initialization retry policy shared by every backend.
    pub retry: RetryPolicy,
    /// Permits the in-memory stand-in when no relational backend is reachable.
    pub test_mode: bool,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            core: RelationalConfig::default(),
            auth: None,
            document: DocumentConfig::default(),
            search: SearchConfig::default(),
            migrations: MigrationSettings::default(),
            retry: RetryPolicy::default(),
            test_mode: false,
            logging: LoggingSettings::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/deskstore/`. Returns
    /// defaults when no file is found or the file cannot be parsed.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("deskstore").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("deskstore")
                .join("config.toml"),
        ];

        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                },
            }
        }

        Self::default()
    }

    /// Applies `DESKSTORE_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable source.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // core_db
        if let Some(url) = var("DESKSTORE_DATABASE_URL") {
            self.core.url = Some(SecretString::from(url));
        }
        apply_parsed(&var, "DESKSTORE_DB_HOST", |v: String| self.core.host = Some(v));
        apply_parsed(&var, "DESKSTORE_DB_PORT", |v| self.core.port = v);
        apply_parsed(&var, "DESKSTORE_DB_NAME", |v: String| self.core.database = Some(v));
        apply_parsed(&var, "DESKSTORE_DB_USER", |v: String| self.core.user = Some(v));
        if let Some(password) = var("DESKSTORE_DB_PASSWORD") {
            self.core.password = Some(SecretString::from(password));
        }
        if let Some(auth_url) = var("DESKSTORE_AUTH_DATABASE_URL") {
            let base = self.auth.take().unwrap_or_else(|| RelationalConfig {
                url: None,
                ..self.core.clone()
            });
            self.auth = Some(RelationalConfig {
                url: Some(SecretString::from(auth_url)),
                host: None,
                ..base
            });
        }

        // Pool and timeout settings apply to every relational backend.
        let mut relational: Vec<&mut RelationalConfig> = vec![&mut self.core];
        if let Some(auth) = self.auth.as_mut() {
            relational.push(auth);
        }
        for config in relational {
            apply_parsed(&var, "DESKSTORE_DB_SSL", |v| config.tls = v);
            apply_parsed(&var, "DESKSTORE_DB_POOL_MIN", |v| config.pool_min = v);
            apply_parsed(&var, "DESKSTORE_DB_POOL_MAX", |v| config.pool_max = v);
            apply_parsed(&var, "DESKSTORE_DB_ACQUIRE_TIMEOUT_MS", |v| {
                config.acquire_timeout_ms = v;
            });
            apply_parsed(&var, "DESKSTORE_DB_IDLE_TIMEOUT_MS", |v| {
                config.idle_timeout_ms = v;
            });
            apply_parsed(&var, "DESKSTORE_DB_CONNECT_TIMEOUT_MS", |v| {
                config.connect_timeout_ms = v;
            });
            apply_parsed(&var, "DESKSTORE_DB_STATEMENT_TIMEOUT_MS", |v| {
                config.statement_timeout_ms = v;
            });
            apply_parsed(&var, "DESKSTORE_DB_SLOW_QUERY_MS", |v| config.slow_query_ms = v);
        }

        // audit_db
        apply_parsed(&var, "DESKSTORE_DOCUMENT_ENABLED", |v| self.document.enabled = v);
        if let Some(url) = var("DESKSTORE_DOCUMENT_URL") {
            self.document.url = SecretString::from(url);
        }

        // search
        apply_parsed(&var, "DESKSTORE_SEARCH_URL", |v: String| self.search.url = Some(v));
        apply_parsed(&var, "DESKSTORE_SEARCH_USERNAME", |v: String| {
            self.search.username = Some(v);
        });
        if let Some(password) = var("DESKSTORE_SEARCH_PASSWORD") {
            self.search.password = Some(SecretString::from(password));
        }
        apply_parsed(&var, "DESKSTORE_SEARCH_TLS_VERIFY", |v| self.search.tls_verify = v);
        apply_parsed(&var, "DESKSTORE_SEARCH_INDEX_PREFIX", |v| {
            self.search.index_prefix = v;
        });
        apply_parsed(&var, "DESKSTORE_SEARCH_REQUIRED", |v| self.search.required = v);

        // retry
        apply_parsed(&var, "DESKSTORE_CONNECT_MAX_ATTEMPTS", |v| {
            self.retry.max_attempts = v;
        });
        apply_parsed(&var, "DESKSTORE_CONNECT_RETRY_DELAY_MS", |v| {
            self.retry.delay_ms = v;
        });

        // migrations
        apply_parsed(&var, "DESKSTORE_MIGRATIONS_DIR", |v: String| {
            self.migrations.migrations_dir = PathBuf::from(v);
        });
        apply_parsed(&var, "DESKSTORE_SEEDS_DIR", |v: String| {
            self.migrations.seeds_dir = PathBuf::from(v);
        });
        apply_parsed(&var, "DESKSTORE_RUN_SEEDS", |v| self.migrations.run_seeds = v);

        apply_parsed(&var, "DESKSTORE_TEST_MODE", |v| self.test_mode = v);

        // logging
        apply_parsed(&var, "DESKSTORE_LOG", |v: String| self.logging.filter = Some(v));
        apply_parsed(&var, "DESKSTORE_LOG_FORMAT", |v: String| {
            self.logging.format = Some(v);
        });
        apply_parsed(&var, "DESKSTORE_LOG_FILE", |v: String| {
            self.logging.file = Some(PathBuf::from(v));
        });

        self
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.core.is_configured() || !self.test_mode {
            self.core.validate("core_db")?;
        }
        if let Some(auth) = &self.auth {
            auth.validate("auth_db")?;
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.search.required && self.search.url.is_none() {
            return Err(Error::Configuration(
                "search.required is set but search.url is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses `key` with [`std::str::FromStr`] and hands the value to `apply`.
fn apply_parsed<T, V, A>(var: &V, key: &str, apply: A)
where
    T: std::str::FromStr,
    V: Fn(&str) -> Option<String>,
    A: FnOnce(T),
{
    let Some(raw) = var(key) else {
        return;
    };
    match parse_value::<T>(&raw) {
        Some(value) => apply(value),
        None => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}

/// Parses a value, accepting `yes`/`no`/`1`/`0` for booleans via the generic path.
fn parse_value<T: std::str::FromStr>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    trimmed.parse::<T>().ok().or_else(|| {
        let normalized = match trimmed.to_lowercase().as_str() {
            "1" | "yes" | "on" => "true",
            "0" | "no" | "off" => "false",
            _ => return None,
        };
        normalized.parse::<T>().ok()
    })
}

/// Expands a `${VAR}` reference; any other value is returned unchanged.
pub(crate) fn expand_env_reference(value: &str) -> String {
    value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map_or_else(
            || value.to_string(),
            |name| std::env::var(name).unwrap_or_default(),
        )
}

/// Deserializers for secret fields.
///
/// `${VAR}` references are expanded at load time so that the secret never
/// needs to be written to the file.
mod secret_serde {
    use super::expand_env_reference;
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::from(expand_env_reference(&s)))
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.map(|s| SecretString::from(expand_env_reference(&s))))
    }
}
