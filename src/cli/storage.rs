//! Storage CLI options for the pooled SQLite client.
//!
//! Provides command-line arguments for the storage endpoint, pool sizing, and
//! the timeouts applied to connections and queries.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use super::parse_duration;

macro_rules! define_str_default_with_help {
    ($value_ident:ident, $help_ident:ident, $value:literal, $help_prefix:literal) => {
        pub const $value_ident: &str = $value;
        pub const $help_ident: &str = concat!($help_prefix, $value, "]");
    };
}

define_str_default_with_help!(
    DEFAULT_STORAGE_DB_FILE_NAME,
    HELP_STORAGE_ENDPOINT,
    "indexer.sqlite3",
    "Optional. Path of the primary SQLite database; chain schemas live next to it. [default: <data_dir>/"
);

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[command(next_help_heading = "Storage parameters")]
#[serde(default)]
pub struct StorageOptions {
    #[arg(
        long = "storage_endpoint",
        alias = "storage-endpoint",
        env = "CONSENSUS_INDEXER_STORAGE_ENDPOINT",
        global = true,
        value_name = "PATH",
        help = HELP_STORAGE_ENDPOINT
    )]
    pub endpoint: Option<PathBuf>,

    #[arg(
        long = "storage_max_connections",
        alias = "storage-max-connections",
        env = "CONSENSUS_INDEXER_STORAGE_MAX_CONNECTIONS",
        global = true,
        value_name = "COUNT",
        help = "Optional. Maximum number of pooled connections. [default: 32]"
    )]
    pub max_connections: Option<u32>,

    #[arg(
        long = "storage_connection_timeout",
        alias = "storage-connection-timeout",
        env = "CONSENSUS_INDEXER_STORAGE_CONNECTION_TIMEOUT",
        global = true,
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Optional. Maximum wait for a pooled connection; accepts human-friendly durations (e.g. 5s, 2m). [default: 30s]"
    )]
    #[serde(default, with = "humantime_serde::option")]
    pub connection_timeout: Option<Duration>,

    #[arg(
        long = "storage_busy_timeout",
        alias = "storage-busy-timeout",
        env = "CONSENSUS_INDEXER_STORAGE_BUSY_TIMEOUT",
        global = true,
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Optional. How long a statement waits on a locked database. [default: 5s]"
    )]
    #[serde(default, with = "humantime_serde::option")]
    pub busy_timeout: Option<Duration>,

    #[arg(
        long = "storage_query_timeout",
        alias = "storage-query-timeout",
        env = "CONSENSUS_INDEXER_STORAGE_QUERY_TIMEOUT",
        global = true,
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Optional. Deadline for a whole command's storage work; in-flight statements are interrupted once it passes. [default: none]"
    )]
    #[serde(default, with = "humantime_serde::option")]
    pub query_timeout: Option<Duration>,
}
