use anyhow::{bail, Result};

use crate::cli::{DialectArg, MigrationOptions, DEFAULT_MIGRATION_MAX_ROWS_PER_INSERT};
use crate::migrations::{Dialect, GeneratorOptions};

use super::overlay::Overlay;

impl MigrationOptions {
    pub fn build(self) -> Result<GeneratorOptions> {
        let max_rows_per_insert = self
            .max_rows_per_insert
            .unwrap_or(DEFAULT_MIGRATION_MAX_ROWS_PER_INSERT);
        if max_rows_per_insert == 0 {
            bail!("migration max_rows_per_insert must be at least 1");
        }

        Ok(GeneratorOptions {
            dialect: self.dialect.map(Into::into).unwrap_or_default(),
            max_rows_per_insert,
        })
    }
}

impl Overlay for MigrationOptions {
    fn overlay(self, overrides: Self) -> Self {
        Self {
            dialect: overrides.dialect.or(self.dialect),
            max_rows_per_insert: overrides.max_rows_per_insert.or(self.max_rows_per_insert),
        }
    }
}

impl From<DialectArg> for Dialect {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}
