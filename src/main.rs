//! Binary entry point for deskstore.
//!
//! Operator commands for migrations, seeds and backend health.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use deskstore::observability::{self, LoggingConfig};
use deskstore::{DatabaseFactory, StoreConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

/// Deskstore - persistence orchestration for the service desk platform.
#[derive(Parser)]
#[command(name = "deskstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "DESKSTORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations to the primary database.
    Migrate {
        /// Also run seed files afterwards.
        #[arg(long)]
        seed: bool,
    },

    /// Revert the most recently applied migration.
    Rollback,

    /// Run every seed file.
    Seed,

    /// Show applied, pending and orphaned migrations.
    Status,

    /// Probe every configured backend.
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let logging = LoggingConfig::from_settings(&config.logging, cli.verbose);
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads the config file (explicit path or default location) plus env overrides.
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<StoreConfig> {
    let config = match path {
        Some(path) => StoreConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => StoreConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

/// Initializes the backends, runs the selected command and closes every
/// backend whatever the outcome. Returns `false` when the command completed
/// but reported an unhealthy result.
async fn run_command(command: Commands, config: StoreConfig) -> anyhow::Result<bool> {
    let mut factory = DatabaseFactory::new(config);
    let outcome = match factory.initialize().await {
        Ok(()) => execute(command, &factory).await,
        Err(e) => Err(anyhow::Error::new(e).context("initializing backends")),
    };
    factory.close().await;
    outcome
}

async fn execute(command: Commands, factory: &DatabaseFactory) -> anyhow::Result<bool> {
    let healthy = match command {
        Commands::Migrate { seed } => {
            let migrations = factory.migration_manager()?;
            let report = migrations.run_migrations().await?;
            print_json(&report)?;
            if seed || factory.config().migrations.run_seeds {
                print_json(&migrations.run_seeds().await?)?;
            }
            true
        },
        Commands::Rollback => {
            let migrations = factory.migration_manager()?;
            match migrations.rollback_last_migration().await? {
                Some(record) => print_json(&record)?,
                None => println!("No migrations to roll back"),
            }
            true
        },
        Commands::Seed => {
            let report = factory.migration_manager()?.run_seeds().await?;
            print_json(&report)?;
            true
        },
        Commands::Status => {
            let status = factory.migration_manager()?.get_status().await?;
            print_json(&status)?;
            !status.has_drift()
        },
        Commands::Health => {
            let report = factory.get_health_status().await;
            print_json(&report)?;
            report.all_healthy()
        },
    };
    Ok(healthy)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskstore::config::{RelationalConfig, SearchConfig};
    use deskstore::storage::RetryPolicy;

    #[tokio::test]
    async fn test_failed_initialization_is_reported_after_close() {
        let config = StoreConfig {
            core: RelationalConfig {
                connect_timeout_ms: 200,
                acquire_timeout_ms: 200,
                ..RelationalConfig::from_url("postgres://nobody@127.0.0.1:1/none")
            },
            search: SearchConfig {
                required: true,
                connect_timeout_ms: 200,
                request_timeout_ms: 200,
                ..SearchConfig::at("http://127.0.0.1:1")
            },
            retry: RetryPolicy::new(1, 0),
            test_mode: true,
            ..StoreConfig::default()
        };

        let result = run_command(Commands::Health, config).await;
        let message = result.err().map(|e| format!("{e:#}")).unwrap_or_default();
        assert!(message.starts_with("initializing backends"), "{message}");
    }
}
