//! Per-backend configuration records.
//!
//! Each backend kind gets its own strongly-typed record; there is no
//! free-form "options" bag.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Transport encryption mode for relational connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plaintext only.
    #[default]
    Disable,
    /// Use TLS when the server offers it.
    Prefer,
    /// Refuse to connect without TLS.
    Require,
}

impl TlsMode {
    /// Returns the mode as its configuration string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
        }
    }
}

impl FromStr for TlsMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disable" | "false" | "off" | "0" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" | "true" | "on" | "1" => Ok(Self::Require),
            other => Err(crate::Error::Configuration(format!(
                "unknown TLS mode '{other}' (expected disable, prefer or require)"
            ))),
        }
    }
}

/// Relational (PostgreSQL) backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// Full connection URL. Takes precedence over the discrete fields.
    #[serde(deserialize_with = "super::secret_serde::deserialize_opt")]
    pub url: Option<SecretString>,
    /// Server host.
    pub host: Option<String>,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: Option<String>,
    /// User name.
    pub user: Option<String>,
    /// Password.
    #[serde(deserialize_with = "super::secret_serde::deserialize_opt")]
    pub password: Option<SecretString>,
    /// TLS mode.
    pub tls: TlsMode,
    /// Connections opened eagerly after the liveness probe.
    pub pool_min: usize,
    /// Maximum pooled connections.
    pub pool_max: usize,
    /// How long a caller waits for a pooled connection.
    pub acquire_timeout_ms: u64,
    /// Idle connections older than this are pruned.
    pub idle_timeout_ms: u64,
    /// TCP/handshake timeout.
    pub connect_timeout_ms: u64,
    /// Per-statement timeout, enforced both server-side and locally.
    pub statement_timeout_ms: u64,
    /// Statements slower than this are logged at warn level.
    pub slow_query_ms: u64,
    /// `application_name` reported to the server.
    pub application_name: String,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: Some("localhost".to_string()),
            port: 5432,
            database: Some("deskstore".to_string()),
            user: Some("postgres".to_string()),
            password: None,
            tls: TlsMode::Disable,
            pool_min: 2,
            pool_max: 20,
            acquire_timeout_ms: 5_000,
            idle_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            statement_timeout_ms: 30_000,
            slow_query_ms: 1_000,
            application_name: "deskstore".to_string(),
        }
    }
}

impl RelationalConfig {
    /// Creates a config pointing at a connection URL.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(SecretString::from(url.into())),
            host: None,
            database: None,
            user: None,
            ..Self::default()
        }
    }

    /// Returns true when a target is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.url
            .as_ref()
            .is_some_and(|u| !u.expose_secret().trim().is_empty())
            || self.host.as_ref().is_some_and(|h| !h.trim().is_empty())
    }

    /// Acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Idle timeout.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Statement timeout.
    #[must_use]
    pub const fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    /// Slow-query threshold.
    #[must_use]
    pub const fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }

    /// Sets the TLS mode.
    #[must_use]
    pub const fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Sets pool bounds.
    #[must_use]
    pub const fn with_pool(mut self, min: usize, max: usize) -> Self {
        self.pool_min = min;
        self.pool_max = max;
        self
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] describing the first problem.
    pub fn validate(&self, label: &str) -> crate::Result<()> {
        if !self.is_configured() {
            return Err(crate::Error::Configuration(format!(
                "{label}: neither url nor host is set"
            )));
        }
        if self.pool_max == 0 {
            return Err(crate::Error::Configuration(format!(
                "{label}: pool_max must be at least 1"
            )));
        }
        if self.pool_min > self.pool_max {
            return Err(crate::Error::Configuration(format!(
                "{label}: pool_min ({}) exceeds pool_max ({})",
                self.pool_min, self.pool_max
            )));
        }
        Ok(())
    }
}

/// Document store (Redis) configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Gate for the optional document backend.
    pub enabled: bool,
    /// Connection URL.
    #[serde(deserialize_with = "super::secret_serde::deserialize")]
    pub url: SecretString,
    /// Prefix for every key the store writes.
    pub key_prefix: String,
    /// Connect timeout.
    pub connect_timeout_ms: u64,
    /// Per-command timeout.
    pub command_timeout_ms: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: SecretString::from("redis://localhost:6379"),
            key_prefix: "deskstore".to_string(),
            connect_timeout_ms: 5_000,
            command_timeout_ms: 5_000,
        }
    }
}

impl DocumentConfig {
    /// Creates an enabled config for a URL.
    #[must_use]
    pub fn enabled_at(url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            url: SecretString::from(url.into()),
            ..Self::default()
        }
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Command timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Search engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Node URL; `None` leaves search permanently unavailable.
    pub url: Option<String>,
    /// Basic-auth user.
    pub username: Option<String>,
    /// Basic-auth password.
    #[serde(deserialize_with = "super::secret_serde::deserialize_opt")]
    pub password: Option<SecretString>,
    /// Verify server certificates.
    pub tls_verify: bool,
    /// Prefix for every index name.
    pub index_prefix: String,
    /// Strict production mode: an unreachable engine fails startup.
    pub required: bool,
    /// Connect timeout.
    pub connect_timeout_ms: u64,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: Some("http://localhost:9200".to_string()),
            username: None,
            password: None,
            tls_verify: true,
            index_prefix: "deskstore".to_string(),
            required: false,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl SearchConfig {
    /// Creates a config for a node URL.
    #[must_use]
    pub fn at(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Creates a config with no engine.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            url: None,
            ..Self::default()
        }
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Migration locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Directory holding `<version>_<name>.sql` files.
    pub migrations_dir: PathBuf,
    /// Directory holding seed files.
    pub seeds_dir: PathBuf,
    /// Apply seeds after migrations during startup.
    pub run_seeds: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            seeds_dir: PathBuf::from("seeds"),
            run_seeds: false,
        }
    }
}

/// Logging settings as they appear in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `deskstore=debug`.
    pub filter: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}
