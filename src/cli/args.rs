use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use super::{MigrationOptions, StorageOptions};

/// Command-line interface definition.
#[derive(Parser, Debug)]
#[command(
    name = "consensus-indexer",
    author,
    version,
    about = "Genesis state migrations for the consensus indexer"
)]
pub struct Cli {
    /// Path to the optional TOML configuration file.
    #[arg(
        long = "config",
        alias = "config-file",
        env = "CONSENSUS_INDEXER_CONFIG",
        global = true,
        value_name = "FILE",
        help = "Optional. Path to the TOML configuration file; defaults to the platform-specific user config directory (ProjectDirs) when omitted."
    )]
    pub config: Option<PathBuf>,

    /// Root directory for all application data.
    #[arg(
        long = "data_dir",
        alias = "data-dir",
        env = "CONSENSUS_INDEXER_DATA_DIR",
        global = true,
        value_name = "PATH",
        help = "Optional. Base directory for indexer data (the storage endpoint defaults to <data_dir>/indexer.sqlite3). Defaults to the platform-specific user data directory (ProjectDirs)."
    )]
    pub data_dir: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(
        long = "log_file",
        alias = "log-file",
        env = "CONSENSUS_INDEXER_LOG_FILE",
        global = true,
        value_name = "FILE",
        help = "Optional. Write logs to FILE instead of stderr."
    )]
    pub log_file: Option<PathBuf>,

    #[command(flatten)]
    pub storage: StorageOptions,

    #[command(flatten)]
    pub migration: MigrationOptions,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectArg {
    Postgres,
    Sqlite,
}

/// Operations supported by the CLI.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Render the genesis migration script for a genesis document.
    Generate {
        #[arg(long, value_name = "FILE", help = "Genesis document (JSON).")]
        genesis: PathBuf,
        #[arg(long, value_name = "FILE", help = "Destination of the SQL script.")]
        output: PathBuf,
    },
    /// Generate and apply the genesis migration to the storage endpoint.
    Apply {
        #[arg(long, value_name = "FILE", help = "Genesis document (JSON).")]
        genesis: PathBuf,
    },
    /// Snapshot the chain's height-dependent tables.
    Checkpoint {
        #[arg(long = "chain_id", alias = "chain-id", value_name = "ID")]
        chain_id: String,
    },
    /// Compare the chain's latest checkpoint with a genesis document.
    Validate {
        #[arg(long, value_name = "FILE", help = "Genesis document (JSON).")]
        genesis: PathBuf,
    },
}
