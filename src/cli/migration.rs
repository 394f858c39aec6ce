//! Migration generator CLI options.

use clap::Args;
use serde::Deserialize;

use super::DialectArg;

macro_rules! define_usize_default_with_help {
    ($value_ident:ident, $help_ident:ident, $value:literal, $help_prefix:literal) => {
        pub const $value_ident: usize = $value;
        pub const $help_ident: &str = concat!($help_prefix, stringify!($value), "]");
    };
}

define_usize_default_with_help!(
    DEFAULT_MIGRATION_MAX_ROWS_PER_INSERT,
    HELP_MIGRATION_MAX_ROWS_PER_INSERT,
    1000,
    "Optional. Maximum VALUES tuples per generated INSERT statement. [default: "
);

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[command(next_help_heading = "Migration parameters")]
#[serde(default)]
pub struct MigrationOptions {
    #[arg(
        long = "dialect",
        alias = "migration-dialect",
        env = "CONSENSUS_INDEXER_DIALECT",
        global = true,
        value_enum,
        value_name = "DIALECT",
        help = "Optional. SQL dialect of generated scripts; `apply` always uses sqlite. [default: postgres]"
    )]
    pub dialect: Option<DialectArg>,

    #[arg(
        long = "migration_max_rows_per_insert",
        alias = "migration-max-rows-per-insert",
        env = "CONSENSUS_INDEXER_MAX_ROWS_PER_INSERT",
        global = true,
        value_name = "ROWS",
        help = HELP_MIGRATION_MAX_ROWS_PER_INSERT
    )]
    pub max_rows_per_insert: Option<usize>,
}
