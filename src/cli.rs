//! Command-line front end: `bitemporal-migrate <CONFIG> [BATCH_SIZE] [--dry-run]`.
//!
//! Exit codes: 0 on success (including "nothing to migrate"), 1 for usage
//! and configuration errors, 2 for any failure once the store is open.

use crate::config::{MigratorConfig, resolve_batch_size};
use crate::databases::RedbStore;
use crate::error::MigrationError;
use crate::migration::{ChainReport, UNKNOWN_VERSION, UpgradeChain, UpgradeStep, VersionMarker};
use anyhow::Context;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_CONFIGURATION: u8 = 1;
pub const EXIT_FAILURE: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "bitemporal-migrate", version)]
#[command(about = "Upgrade a bitemporal document store to the latest schema version")]
pub struct Cli {
    /// TOML file describing the store to migrate
    pub config: PathBuf,

    /// Documents per transaction. Anything other than a positive integer
    /// falls back to the configured value.
    #[arg(allow_hyphen_values = true)]
    pub batch_size: Option<String>,

    /// Print the steps that would run and exit without writing
    #[arg(long)]
    pub dry_run: bool,
}

/// What a successful invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Planned {
        current_version: i64,
        steps: Vec<UpgradeStep>,
    },
    Migrated(ChainReport),
}

/// Load the configuration, open the store and run (or plan) the upgrade
/// chain. The store is closed again before this returns.
pub fn execute(cli: &Cli) -> anyhow::Result<Outcome> {
    let config = MigratorConfig::load(&cli.config)?;
    let batch_size = resolve_batch_size(cli.batch_size.as_deref(), config.migration.batch_size);
    let chain = UpgradeChain::standard()?;

    if cli.dry_run {
        let current_version = if config.store.path.exists() {
            RedbStore::with_read_only(&config.store, |store| VersionMarker::new(store).get())
                .context("reading schema version")?
        } else {
            UNKNOWN_VERSION
        };
        let steps = chain.plan(current_version)?;
        return Ok(Outcome::Planned {
            current_version,
            steps,
        });
    }

    info!(
        "Migrating {} with batch size {batch_size}",
        config.store.path.display()
    );
    let report = RedbStore::with_store(&config.store, |store| chain.run(store, batch_size))
        .with_context(|| format!("migrating {}", config.store.path.display()))?;
    Ok(Outcome::Migrated(report))
}

/// Exit code for a failed invocation.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MigrationError>() {
        Some(e) if e.is_configuration() => EXIT_CONFIGURATION,
        _ => EXIT_FAILURE,
    }
}

/// Run `cli` and report the result, returning the process exit code.
pub fn run(cli: &Cli) -> ExitCode {
    match execute(cli) {
        Ok(Outcome::Planned {
            current_version,
            steps,
        }) => {
            if steps.is_empty() {
                println!("Schema version {current_version}: no migration needed");
            } else {
                println!("Schema version {current_version}: would run");
                for step in steps {
                    println!(
                        "  {step} ({} -> {})",
                        step.from_version(),
                        step.to_version()
                    );
                }
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Ok(Outcome::Migrated(_)) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
