//! Pooled SQLite client for the indexer's target storage.
//!
//! The primary database lives at the configured endpoint. Each chain schema is
//! a separate database file next to it. A checkout scoped to a schema attaches
//! that one file under the schema name, so statements can use `schema.table`
//! qualification, and detaches it again before the connection returns to the
//! pool. Batches run in a single transaction; the client itself takes no locks
//! and relies on SQLite transaction semantics for consistency.

use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{
    params_from_iter, Connection, ErrorCode, OptionalExtension, Params, Row, TransactionBehavior,
};
use tracing::{debug, error, info, warn};

use crate::error::{statement_summary, StorageError, StorageResult};
use crate::migrations::sql::{is_builtin_schema, quote_ident};

const MODULE_NAME: &str = "sqlite";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 32;
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite VM instructions between cancellation checks.
const PROGRESS_CHECK_INTERVAL: i32 = 1_000;

/// Connection settings for [`StorageClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Path of the primary database file.
    pub endpoint: PathBuf,
    pub max_connections: u32,
    /// Upper bound on waiting for a pooled connection.
    pub connection_timeout: Duration,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl StorageConfig {
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Cancellation and deadline signal carried by every client call.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl QueryContext {
    /// A context that never expires on its own.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::default(),
        }
    }

    /// Handle that cancels this context (and its clones) from any thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Statements submitted together as one transaction.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    schema: Option<String>,
    statements: Vec<(String, Vec<Value>)>,
}

impl QueryBatch {
    /// Batch against the primary database only.
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch whose connection has `schema` attached.
    pub fn for_schema(schema: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            statements: Vec::new(),
        }
    }

    pub fn queue(&mut self, sql: impl Into<String>) {
        self.statements.push((sql.into(), Vec::new()));
    }

    pub fn queue_with(&mut self, sql: impl Into<String>, params: Vec<Value>) {
        self.statements.push((sql.into(), params));
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// Pooled client over the primary database and the chain schema files.
pub struct StorageClient {
    pool: Pool<SqliteConnectionManager>,
    data_dir: PathBuf,
}

impl StorageClient {
    /// Opens the pool. Fails fast when the endpoint cannot be opened.
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let data_dir = match config.endpoint.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&data_dir).map_err(|source| StorageError::Io {
            path: data_dir.clone(),
            source,
        })?;

        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(&config.endpoint)
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .connection_timeout(config.connection_timeout)
            .build(manager)?;

        info!(
            endpoint = %config.endpoint.display(),
            max_connections = config.max_connections,
            "opened {MODULE_NAME} storage pool"
        );
        Ok(Self { pool, data_dir })
    }

    /// Database file backing `schema`.
    pub fn schema_path(&self, schema: &str) -> PathBuf {
        self.data_dir.join(format!("{schema}.sqlite3"))
    }

    /// Whether a database file for `schema` has been created.
    pub fn schema_exists(&self, schema: &str) -> bool {
        self.schema_path(schema).is_file()
    }

    /// Read access with `schema` attached for the duration of each call.
    pub fn schema<'a>(&'a self, schema: &'a str) -> SchemaScope<'a> {
        SchemaScope {
            client: self,
            schema,
        }
    }

    /// Runs a query against the primary database and maps every resulting row.
    #[cfg(test)]
    pub fn query<T, P, F>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
        map: F,
    ) -> StorageResult<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.query_in(None, ctx, sql, params, map)
    }

    /// Runs a query against the primary database expected to return exactly one row.
    #[cfg(test)]
    pub fn query_row<T, P, F>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
        map: F,
    ) -> StorageResult<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.query_row_in(None, ctx, sql, params, map)
    }

    /// Executes every statement of `batch` in one transaction. The first
    /// failing statement rolls the whole batch back.
    pub fn send_batch(&self, ctx: &QueryContext, batch: &QueryBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let schema = batch.schema().unwrap_or("main").to_string();
        let mut conn = self.checkout(ctx, batch.schema())?;
        // Write lock up front; a deferred read snapshot can go stale under WAL.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| query_error(ctx, "BEGIN IMMEDIATE", err))?;

        for (index, (sql, params)) in batch.statements.iter().enumerate() {
            if let Err(err) = tx.execute(sql, params_from_iter(params.iter())) {
                error!(
                    schema = %schema,
                    index,
                    statement = %statement_summary(sql),
                    error = %err,
                    "failed to execute tx batch"
                );
                if ctx.is_done() && is_interrupt(&err) {
                    return Err(StorageError::Cancelled);
                }
                return Err(StorageError::Transaction {
                    schema,
                    index,
                    statement: statement_summary(sql),
                    source: err,
                });
            }
        }

        tx.commit().map_err(|err| StorageError::Transaction {
            schema: schema.clone(),
            index: batch.len(),
            statement: "COMMIT".to_string(),
            source: err,
        })?;
        debug!(schema = %schema, statements = batch.len(), "committed tx batch");
        Ok(())
    }

    /// Releases every pooled connection.
    pub fn shutdown(self) {
        let state = self.pool.state();
        info!(
            connections = state.connections,
            idle = state.idle_connections,
            "shutting down {MODULE_NAME} storage pool"
        );
    }

    fn query_in<T, P, F>(
        &self,
        schema: Option<&str>,
        ctx: &QueryContext,
        sql: &str,
        params: P,
        map: F,
    ) -> StorageResult<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.checkout(ctx, schema)?;
        let mut statement = conn
            .prepare(sql)
            .map_err(|err| query_error(ctx, sql, err))?;
        let rows = statement
            .query_map(params, map)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<T>>>())
            .map_err(|err| query_error(ctx, sql, err));
        rows
    }

    fn query_row_in<T, P, F>(
        &self,
        schema: Option<&str>,
        ctx: &QueryContext,
        sql: &str,
        params: P,
        map: F,
    ) -> StorageResult<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.checkout(ctx, schema)?;
        let row = conn
            .query_row(sql, params, map)
            .map_err(|err| query_error(ctx, sql, err));
        row
    }

    fn checkout(
        &self,
        ctx: &QueryContext,
        schema: Option<&str>,
    ) -> StorageResult<ContextConnection> {
        if ctx.is_done() {
            return Err(StorageError::Cancelled);
        }
        let conn = match ctx.remaining() {
            Some(remaining) => self.pool.get_timeout(remaining)?,
            None => self.pool.get()?,
        };
        let mut conn = ContextConnection {
            conn,
            attached: None,
        };
        conn.detach_leftovers()?;
        if let Some(schema) = schema.filter(|schema| !is_builtin_schema(schema)) {
            conn.attach(schema, &self.schema_path(schema))?;
        }

        let cancel = ctx.clone();
        conn.progress_handler(PROGRESS_CHECK_INTERVAL, Some(move || cancel.is_done()));
        Ok(conn)
    }
}

/// Queries against one attached chain schema.
#[derive(Clone, Copy)]
pub struct SchemaScope<'a> {
    client: &'a StorageClient,
    schema: &'a str,
}

impl SchemaScope<'_> {
    /// Runs a query and maps every resulting row.
    pub fn query<T, P, F>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
        map: F,
    ) -> StorageResult<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.client.query_in(Some(self.schema), ctx, sql, params, map)
    }

    /// Runs a query expected to return exactly one row.
    pub fn query_row<T, P, F>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
        map: F,
    ) -> StorageResult<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.client
            .query_row_in(Some(self.schema), ctx, sql, params, map)
    }

    /// Like [`SchemaScope::query_row`], but an empty result is `None`.
    pub fn query_row_optional<T, P, F>(
        &self,
        ctx: &QueryContext,
        sql: &str,
        params: P,
        map: F,
    ) -> StorageResult<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.client.checkout(ctx, Some(self.schema))?;
        let row = conn
            .query_row(sql, params, map)
            .optional()
            .map_err(|err| query_error(ctx, sql, err));
        row
    }
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;",
    )
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(ErrorCode::OperationInterrupted))
}

fn query_error(ctx: &QueryContext, sql: &str, err: rusqlite::Error) -> StorageError {
    if ctx.is_done() && is_interrupt(&err) {
        return StorageError::Cancelled;
    }
    error!(statement = %statement_summary(sql), error = %err, "failed to query db");
    StorageError::Query {
        statement: statement_summary(sql),
        source: err,
    }
}

fn storage_query_error(statement: String) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |source| StorageError::Query { statement, source }
}

/// Pooled connection bound to a [`QueryContext`]. The cancellation hook and
/// the attached schema are removed before the connection goes back to the pool.
struct ContextConnection {
    conn: PooledConnection<SqliteConnectionManager>,
    attached: Option<String>,
}

impl ContextConnection {
    /// Detaches schemas a previous checkout failed to release.
    fn detach_leftovers(&self) -> StorageResult<()> {
        const LIST: &str = "SELECT name FROM pragma_database_list";
        let names: Vec<String> = {
            let mut statement = self
                .conn
                .prepare(LIST)
                .map_err(storage_query_error(LIST.to_string()))?;
            let names = statement
                .query_map([], |row| row.get(0))
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
                .map_err(storage_query_error(LIST.to_string()));
            names?
        };

        for name in names.iter().filter(|name| !is_builtin_schema(name)) {
            let detach = format!("DETACH DATABASE {}", quote_ident(name));
            self.conn
                .execute_batch(&detach)
                .map_err(storage_query_error(detach.clone()))?;
            debug!(schema = %name, "detached stale chain schema");
        }
        Ok(())
    }

    fn attach(&mut self, schema: &str, path: &Path) -> StorageResult<()> {
        let attach = format!("ATTACH DATABASE ?1 AS {}", quote_ident(schema));
        self.conn
            .execute(&attach, [path.to_string_lossy().into_owned()])
            .map_err(storage_query_error(attach.clone()))?;
        self.attached = Some(schema.to_string());

        let pragma = format!("PRAGMA {}.journal_mode=WAL;", quote_ident(schema));
        self.conn
            .execute_batch(&pragma)
            .map_err(storage_query_error(pragma))?;
        debug!(schema = %schema, path = %path.display(), "attached chain schema");
        Ok(())
    }
}

impl Deref for ContextConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ContextConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ContextConnection {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
        if let Some(schema) = self.attached.take() {
            let detach = format!("DETACH DATABASE {}", quote_ident(&schema));
            if let Err(err) = self.conn.execute_batch(&detach) {
                // Cleared by `detach_leftovers` on the next checkout.
                warn!(schema = %schema, error = %err, "failed to detach chain schema");
            }
        }
    }
}
