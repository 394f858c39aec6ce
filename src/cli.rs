//! Command-line interface definitions and argument parsing.
//!
//! This module provides the CLI structure for consensus-indexer using [`clap`],
//! including options for the storage client and the migration generator.

mod args;
mod duration;
mod migration;
mod storage;

pub use args::{Cli, Command, DialectArg};
pub use duration::parse_duration;
pub use migration::{MigrationOptions, DEFAULT_MIGRATION_MAX_ROWS_PER_INSERT};
pub use storage::{StorageOptions, DEFAULT_STORAGE_DB_FILE_NAME};
