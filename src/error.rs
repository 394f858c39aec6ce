//! Error types shared by the migration engine and the storage client.
//!
//! Generation failures ([`DocumentError`]) are fail-fast and never leave a
//! partial script behind. Apply-time failures ([`StorageError`]) are
//! all-or-nothing at the transaction boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::migrations::sql::Dialect;

/// Malformed or unverifiable content in the source genesis document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The chain identifier does not sanitize into a usable schema name.
    #[error("chain id {0:?} does not yield a schema name")]
    InvalidChainId(String),

    /// A base64 field could not be decoded.
    #[error("{kind} #{index}: invalid base64 in {field}: {source}")]
    Encoding {
        kind: &'static str,
        index: usize,
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// The envelope carried a public key that is not a valid Ed25519 point.
    #[error("{kind} #{index}: invalid signer public key")]
    InvalidPublicKey { kind: &'static str, index: usize },

    /// The envelope signature is not 64 bytes long.
    #[error("{kind} #{index}: invalid signature length {len}")]
    InvalidSignature {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    /// The signature does not verify under the expected context.
    #[error("{kind} #{index}: signature by {signer} does not verify under context {context:?}")]
    SignatureMismatch {
        kind: &'static str,
        index: usize,
        context: &'static str,
        signer: String,
    },

    /// The envelope was signed by a key other than the registered descriptor's.
    #[error("{kind} #{index}: signed by {signer}, expected {expected}")]
    SignerMismatch {
        kind: &'static str,
        index: usize,
        signer: String,
        expected: String,
    },

    /// The verified payload does not decode into the descriptor type.
    #[error("{kind} #{index}: malformed body: {source}")]
    Body {
        kind: &'static str,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A proposal carries neither or both of the upgrade and cancel-upgrade payloads.
    #[error("proposal {id}: content must hold exactly one of upgrade or cancel_upgrade")]
    MalformedProposal { id: u64 },

    /// An unsigned value does not fit a signed 64-bit column.
    #[error("{table}.{column}: value {value} overflows a 64-bit integer column")]
    IntegerOverflow {
        table: &'static str,
        column: &'static str,
        value: u64,
    },

    /// Text values cannot carry NUL bytes into SQL.
    #[error("{table}.{column}: text value contains a NUL byte")]
    NulInText {
        table: &'static str,
        column: &'static str,
    },

    /// The document itself failed to parse.
    #[error("failed to parse genesis document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures of the generate-and-persist path.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Generation failed; no script was produced.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The migration was rendered for a backend other than the storage client's.
    #[error("migration rendered for the {0:?} dialect cannot be applied to sqlite storage")]
    UnsupportedDialect(Dialect),

    /// Applying the migration failed; nothing was committed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The script was generated but could not be written.
    #[error("failed to write migration to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures surfaced by the target storage client.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Pool exhaustion or an unreachable backend.
    #[error("connection error: {0}")]
    Connection(String),

    /// A batch statement failed; the whole batch was rolled back.
    #[error("batch statement #{index} on schema {schema} failed ({statement}): {source}")]
    Transaction {
        schema: String,
        index: usize,
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    /// An ad hoc query failed.
    #[error("query failed ({statement}): {source}")]
    Query {
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The caller's context was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// Filesystem failure while preparing database files.
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        StorageError::Connection(err.to_string())
    }
}

/// Failures of the checkpoint subsystem.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    /// No processed height has ever been recorded for the chain.
    #[error("chain {chain}: no processed height to checkpoint")]
    NoProcessedHeight { chain: String },

    /// The chain was never migrated into this store.
    #[error("chain {chain}: no schema database at {}", .path.display())]
    UnknownChain { chain: String, path: PathBuf },
}

/// Result type for storage client operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Shortens a statement to its first line for error context.
pub(crate) fn statement_summary(sql: &str) -> String {
    const MAX_LEN: usize = 120;
    let first = sql
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    if first.len() <= MAX_LEN {
        return first.to_string();
    }
    let mut end = MAX_LEN;
    while !first.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &first[..end])
}
