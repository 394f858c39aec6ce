//! Genesis migrations: generation, SQL rendering, and application.

pub mod apply;
pub mod generator;
pub mod schema;
pub mod sql;

use std::path::Path;

use crate::error::MigrationError;

pub use apply::{apply_migration, ensure_chain_schema};
pub use generator::{GeneratorOptions, Migration, MigrationGenerator};
pub use sql::Dialect;

/// Persists the rendered script of `migration` at `path`.
pub fn write_migration(path: &Path, migration: &Migration) -> Result<(), MigrationError> {
    migration.write_to(path)
}
