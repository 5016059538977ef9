//! Log output configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Default filter when nothing is configured.
const DEFAULT_FILTER: &str = "deskstore=info,warn";

/// Filter used with `--verbose`.
const VERBOSE_FILTER: &str = "deskstore=debug,info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(crate::Error::Configuration(format!(
                "unknown log format '{other}' (expected pretty or json)"
            ))),
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive handed to [`EnvFilter`].
    pub filter: String,
    /// Line format.
    pub format: LogFormat,
    /// Optional log file; stderr when `None`.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging config from file settings.
    ///
    /// `verbose` only raises the level when no explicit filter is configured.
    /// An unknown format falls back to pretty output.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let filter = settings
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map_or_else(
                || {
                    if verbose {
                        VERBOSE_FILTER.to_string()
                    } else {
                        DEFAULT_FILTER.to_string()
                    }
                },
                ToString::to_string,
            );
        let format = settings
            .format
            .as_deref()
            .and_then(|f| f.parse().ok())
            .unwrap_or_default();

        Self {
            filter,
            format,
            file: settings.file.clone(),
        }
    }

    /// Builds the [`EnvFilter`], falling back to the default on a bad directive.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}
