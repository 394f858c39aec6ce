//! # consensus-indexer
//!
//! Genesis state migration engine for a consensus-layer blockchain indexer.
//!
//! A genesis document (registry, staking and governance state with signed
//! registry envelopes) is turned into an atomic, schema-qualified SQL
//! migration, applied through a pooled storage client, and validated through
//! a checkpoint-and-compare protocol.
//!
//! ## Usage
//!
//! ```bash
//! # Render a migration script
//! consensus-indexer generate --genesis genesis.json --output genesis.sql
//!
//! # Apply it to the local store, then snapshot and validate
//! consensus-indexer apply --genesis genesis.json
//! consensus-indexer checkpoint --chain-id oasis-3
//! consensus-indexer validate --genesis genesis.json
//! ```

mod cli;
mod config;
mod error;
mod genesis;
mod migrations;
mod stores;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::genesis::GenesisDocument;
use crate::migrations::{apply_migration, Dialect, GeneratorOptions, MigrationGenerator};
use crate::stores::checkpoint::checkpoint;
use crate::stores::client::{QueryContext, StorageClient};
use crate::stores::validation::{validate_checkpoint, ValidationReport};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.clone();
    let app_config = AppConfig::load(cli)?;

    init_tracing(app_config.log_file.as_deref())?;
    announce_configuration(&app_config);

    let ctx = app_config.storage.query_context();
    install_interrupt_handler(&ctx)?;
    run_command(&app_config, command, &ctx)
}

fn run_command(app_config: &AppConfig, command: Command, ctx: &QueryContext) -> Result<()> {
    match command {
        Command::Generate { genesis, output } => handle_generate(app_config, &genesis, &output),
        Command::Apply { genesis } => handle_apply(app_config, &genesis, ctx),
        Command::Checkpoint { chain_id } => handle_checkpoint(app_config, &chain_id, ctx),
        Command::Validate { genesis } => handle_validate(app_config, &genesis, ctx),
    }
}

/// Ctrl+C cancels the command's context; in-flight statements are interrupted.
fn install_interrupt_handler(ctx: &QueryContext) -> Result<()> {
    let cancel = ctx.cancel_handle();
    ctrlc::set_handler(move || {
        tracing::warn!("Received Ctrl+C, cancelling storage work...");
        cancel.cancel();
    })
    .context("failed to install Ctrl+C handler")
}

fn handle_generate(app_config: &AppConfig, genesis: &Path, output: &Path) -> Result<()> {
    let document = read_genesis(genesis)?;
    let migration = MigrationGenerator::new(app_config.migration)
        .write_genesis_document_migration(output, &document)
        .with_context(|| format!("failed to generate migration for {}", genesis.display()))?;

    println!(
        "Wrote {} statements for chain {} to {}.",
        migration.statements().count(),
        migration.chain_id,
        output.display()
    );
    Ok(())
}

fn handle_apply(app_config: &AppConfig, genesis: &Path, ctx: &QueryContext) -> Result<()> {
    let document = read_genesis(genesis)?;
    let options = GeneratorOptions {
        dialect: Dialect::Sqlite,
        ..app_config.migration
    };
    let migration = MigrationGenerator::new(options)
        .genesis_document_migration(&document)
        .with_context(|| format!("failed to generate migration for {}", genesis.display()))?;

    let client = open_client(app_config)?;
    let result = apply_migration(&client, &migration, ctx)
        .with_context(|| format!("failed to apply genesis migration for chain {}", migration.chain_id));
    client.shutdown();
    result?;

    println!(
        "Applied genesis state of chain {} at height {} to schema {}.",
        migration.chain_id, migration.height, migration.schema
    );
    Ok(())
}

fn handle_checkpoint(app_config: &AppConfig, chain_id: &str, ctx: &QueryContext) -> Result<()> {
    let client = open_client(app_config)?;
    let result = checkpoint(&client, ctx, chain_id)
        .with_context(|| format!("failed to checkpoint chain {chain_id}"));
    client.shutdown();

    println!("Checkpointed chain {chain_id} at height {}.", result?);
    Ok(())
}

fn handle_validate(app_config: &AppConfig, genesis: &Path, ctx: &QueryContext) -> Result<()> {
    let document = read_genesis(genesis)?;
    let client = open_client(app_config)?;
    let result = validate_checkpoint(&client, &document, ctx)
        .with_context(|| format!("failed to validate checkpoint of chain {}", document.chain_id));
    client.shutdown();

    let report = result?;
    for line in summarize(&report) {
        println!("{line}");
    }
    if !report.is_consistent() {
        bail!(
            "checkpoint of chain {} diverges from {}",
            report.chain_id,
            genesis.display()
        );
    }
    Ok(())
}

fn summarize(report: &ValidationReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Chain {} (schema {}), checkpoint height {}:",
        report.chain_id,
        report.schema,
        report
            .checkpoint_height
            .map_or_else(|| "none".to_string(), |height| height.to_string())
    )];
    for table in &report.tables {
        let status = if table.is_consistent() { "ok" } else { "MISMATCH" };
        lines.push(format!(
            "  {:<24} {:>8} expected {:>8} actual  {status}",
            table.table, table.expected, table.actual
        ));
        for (label, keys) in [
            ("missing", &table.missing),
            ("unexpected", &table.unexpected),
            ("mismatched", &table.mismatched),
            ("tolerated", &table.tolerated),
        ] {
            if !keys.is_empty() {
                lines.push(format!("    {label}: {}", keys.join(", ")));
            }
        }
    }
    lines
}

fn read_genesis(path: &Path) -> Result<GenesisDocument> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read genesis document {}", path.display()))?;
    GenesisDocument::from_json(&raw)
        .with_context(|| format!("failed to decode genesis document {}", path.display()))
}

fn open_client(app_config: &AppConfig) -> Result<StorageClient> {
    let config = app_config.storage.client_config();
    StorageClient::new(config)
        .with_context(|| format!("failed to open storage at {}", config.endpoint.display()))
}

fn announce_configuration(app_config: &AppConfig) {
    match &app_config.config_file {
        Some(config_file) => tracing::info!("Config file: {}", config_file.display()),
        None => tracing::info!("Config file: none (using defaults)"),
    }
    tracing::info!("Data dir: {}", app_config.data_dir.display());
    tracing::info!(
        "Storage: {} (max {} connections)",
        app_config.storage.client_config().endpoint.display(),
        app_config.storage.client_config().max_connections
    );
}

fn init_tracing(log_path: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let filter = filter.add_directive(
        Directive::from_str("r2d2=warn").context("invalid r2d2 log directive")?,
    );

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let init_result = if let Some(path) = log_path {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        let _ = LOG_GUARD.set(guard);
        builder.with_writer(writer).try_init()
    } else {
        builder.try_init()
    };

    if init_result.is_err() {
        // The global subscriber was already installed elsewhere (tests, etc.); ignore.
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{MigrationOptions, StorageOptions};
    use crate::genesis::fixtures;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn build_app_config(data_dir: &Path, dialect: Dialect) -> AppConfig {
        AppConfig {
            config_file: None,
            data_dir: data_dir.to_path_buf(),
            log_file: None,
            storage: StorageOptions::default()
                .build(data_dir)
                .expect("storage settings"),
            migration: GeneratorOptions {
                dialect,
                ..MigrationOptions::default().build().expect("migration options")
            },
        }
    }

    fn run(app_config: &AppConfig, command: Command) -> Result<()> {
        run_command(app_config, command, &QueryContext::background())
    }

    fn write_genesis(dir: &Path) -> PathBuf {
        let path = dir.join("genesis.json");
        let raw = serde_json::to_string_pretty(&fixtures::sample_document()).expect("encode");
        fs::write(&path, raw).expect("write genesis");
        path
    }

    #[test]
    fn generate_writes_script_for_configured_dialect() {
        let temp = TempDir::new().expect("temp dir");
        let app_config = build_app_config(temp.path(), Dialect::Postgres);
        let genesis = write_genesis(temp.path());
        let output = temp.path().join("genesis.sql");

        run(
            &app_config,
            Command::Generate {
                genesis,
                output: output.clone(),
            },
        )
        .expect("generate");

        let script = fs::read_to_string(&output).expect("read script");
        assert!(script.starts_with("-- DO NOT MODIFY"));
        assert!(script.contains("TRUNCATE oasis_test_3.entities CASCADE;"));
        assert!(script.trim_end().ends_with("COMMIT;"));
    }

    #[test]
    fn apply_checkpoint_and_validate_round_trip() {
        let temp = TempDir::new().expect("temp dir");
        // Apply always renders for sqlite, whatever the configured dialect.
        let app_config = build_app_config(temp.path(), Dialect::Postgres);
        let genesis = write_genesis(temp.path());

        run(
            &app_config,
            Command::Apply {
                genesis: genesis.clone(),
            },
        )
        .expect("apply");
        run(
            &app_config,
            Command::Checkpoint {
                chain_id: "Oasis-Test 3".to_string(),
            },
        )
        .expect("checkpoint");
        run(&app_config, Command::Validate { genesis }).expect("validate");

        assert!(temp.path().join("indexer.sqlite3").exists());
        assert!(temp.path().join("oasis_test_3.sqlite3").exists());
    }

    #[test]
    fn validate_without_checkpoint_fails() {
        let temp = TempDir::new().expect("temp dir");
        let app_config = build_app_config(temp.path(), Dialect::Sqlite);
        let genesis = write_genesis(temp.path());

        let err = run(&app_config, Command::Validate { genesis })
            .expect_err("nothing to validate");
        assert!(err.to_string().contains("failed to validate"), "got: {err}");
    }

    #[test]
    fn cancelled_context_stops_apply_before_touching_storage() {
        let temp = TempDir::new().expect("temp dir");
        let app_config = build_app_config(temp.path(), Dialect::Sqlite);
        let genesis = write_genesis(temp.path());
        let ctx = QueryContext::background();
        ctx.cancel_handle().cancel();

        let err = run_command(&app_config, Command::Apply { genesis }, &ctx)
            .expect_err("cancelled");
        assert!(format!("{err:#}").contains("operation cancelled"), "got: {err:#}");
        assert!(!temp.path().join("oasis_test_3.sqlite3").exists());
    }

    #[test]
    fn read_genesis_reports_missing_file() {
        let temp = TempDir::new().expect("temp dir");
        let err = read_genesis(&temp.path().join("missing.json"))
            .expect_err("missing file")
            .to_string();
        assert!(err.contains("failed to read genesis document"), "got: {err}");
    }

    #[test]
    fn read_genesis_reports_malformed_json() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write");

        let err = read_genesis(&path).expect_err("malformed").to_string();
        assert!(err.contains("failed to decode genesis document"), "got: {err}");
    }

    #[test]
    fn summary_lists_divergent_keys() {
        let report = ValidationReport {
            chain_id: "oasis-3".to_string(),
            schema: "oasis_3".to_string(),
            document_height: 1,
            checkpoint_height: None,
            tables: vec![crate::stores::validation::TableReport {
                table: "votes",
                expected: 2,
                actual: 1,
                missing: vec!["1/oasis1bob".to_string()],
                ..Default::default()
            }],
        };

        let lines = summarize(&report);
        assert!(lines[0].contains("checkpoint height none"));
        assert!(lines[1].contains("MISMATCH"));
        assert_eq!(lines[2], "    missing: 1/oasis1bob");
    }

    #[test]
    fn init_tracing_with_log_path_creates_file() {
        let temp = TempDir::new().expect("temp dir");
        let log_path = temp.path().join("logs").join("test.log");

        let result = init_tracing(Some(&log_path));
        assert!(result.is_ok());
        assert!(log_path.exists(), "log file should be created");
    }
}
