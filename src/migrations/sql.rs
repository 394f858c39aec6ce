//! SQL literal and identifier rendering.
//!
//! Every value that reaches a generated statement goes through one of the
//! routines here; nothing is interpolated with ad hoc formatting.

use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};

use crate::error::DocumentError;
use crate::genesis::quantity::Quantity;

/// Target SQL flavor of a rendered migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `TRUNCATE ... CASCADE` and bare numeric literals.
    #[default]
    Postgres,
    /// `DELETE FROM` and quantities as decimal text.
    Sqlite,
}

/// A typed value destined for a VALUES tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Quantity(Quantity),
    Text(String),
}

impl Dialect {
    pub fn literal(self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "true".to_string(),
            SqlValue::Bool(false) => "false".to_string(),
            SqlValue::Integer(value) => value.to_string(),
            // SQLite integers are 64-bit; larger literals silently become REAL.
            SqlValue::Quantity(value) => match self {
                Dialect::Postgres => value.to_string(),
                Dialect::Sqlite => format!("'{value}'"),
            },
            SqlValue::Text(value) => quote_text(value),
        }
    }

    /// Statement that empties `table` (and its dependents where supported).
    pub fn truncate(self, schema: &str, table: &str) -> String {
        match self {
            Dialect::Postgres => format!("TRUNCATE {} CASCADE;", qualified(schema, table)),
            Dialect::Sqlite => format!("DELETE FROM {};", qualified(schema, table)),
        }
    }
}

/// Quotes an identifier unless it is a plain lowercase name.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Single-quoted string literal with embedded quotes doubled.
pub fn quote_text(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Database names SQLite reserves on every connection.
pub fn is_builtin_schema(name: &str) -> bool {
    name.eq_ignore_ascii_case("main") || name.eq_ignore_ascii_case("temp")
}

/// Derives the per-chain schema name from a chain identifier.
pub fn schema_name(chain_id: &str) -> Result<String, DocumentError> {
    let schema = chain_id.to_snake_case();
    if schema.is_empty() || is_builtin_schema(&schema) {
        return Err(DocumentError::InvalidChainId(chain_id.to_string()));
    }
    Ok(schema)
}

pub fn integer(table: &'static str, column: &'static str, value: u64) -> Result<SqlValue, DocumentError> {
    i64::try_from(value)
        .map(SqlValue::Integer)
        .map_err(|_| DocumentError::IntegerOverflow {
            table,
            column,
            value,
        })
}

pub fn text(
    table: &'static str,
    column: &'static str,
    value: impl Into<String>,
) -> Result<SqlValue, DocumentError> {
    let value = value.into();
    if value.contains('\0') {
        return Err(DocumentError::NulInText { table, column });
    }
    Ok(SqlValue::Text(value))
}
