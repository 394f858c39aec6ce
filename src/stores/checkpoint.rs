//! Checkpoints of height-dependent chain state.
//!
//! A checkpoint copies every height-dependent table into a `<table>_checkpoint`
//! shadow and records the latest processed height in `checkpointed_heights`.
//! The copies and the height record form one batch, so all shadows describe
//! the same instant. Only the latest checkpoint is kept per chain.

use tracing::info;

use super::client::{QueryBatch, QueryContext, StorageClient};
use crate::error::CheckpointError;
use crate::migrations::ensure_chain_schema;
use crate::migrations::schema::{
    checkpoint_table, CHECKPOINTED_HEIGHTS, HEIGHT_DEPENDENT_TABLES, PROCESSED_BLOCKS,
};
use crate::migrations::sql::{qualified, schema_name};

/// Snapshots the chain's live tables and returns the checkpointed height.
pub fn checkpoint(
    client: &StorageClient,
    ctx: &QueryContext,
    chain_id: &str,
) -> Result<u64, CheckpointError> {
    let schema = schema_name(chain_id)?;
    if !client.schema_exists(&schema) {
        return Err(CheckpointError::NoProcessedHeight {
            chain: chain_id.to_string(),
        });
    }
    ensure_chain_schema(client, ctx, &schema)?;

    let processed = client.schema(&schema).query_row_optional(
        ctx,
        &format!(
            "SELECT height FROM {} ORDER BY height DESC LIMIT 1",
            qualified(&schema, PROCESSED_BLOCKS)
        ),
        [],
        |row| row.get::<_, i64>(0),
    )?;
    if processed.is_none() {
        return Err(CheckpointError::NoProcessedHeight {
            chain: chain_id.to_string(),
        });
    }

    client.send_batch(ctx, &checkpoint_batch(&schema))?;

    let height = latest_checkpoint_height(client, ctx, &schema)?.ok_or_else(|| {
        CheckpointError::NoProcessedHeight {
            chain: chain_id.to_string(),
        }
    })?;
    info!(
        chain = %chain_id,
        schema = %schema,
        height,
        tables = HEIGHT_DEPENDENT_TABLES.len(),
        "created checkpoint"
    );
    Ok(height)
}

/// Latest height recorded in the checkpoint ledger, if any.
pub fn latest_checkpoint_height(
    client: &StorageClient,
    ctx: &QueryContext,
    schema: &str,
) -> Result<Option<u64>, CheckpointError> {
    let height = client.schema(schema).query_row(
        ctx,
        &format!("SELECT max(height) FROM {}", qualified(schema, CHECKPOINTED_HEIGHTS)),
        [],
        |row| row.get::<_, Option<i64>>(0),
    )?;
    Ok(height.and_then(|height| u64::try_from(height).ok()))
}

fn checkpoint_batch(schema: &str) -> QueryBatch {
    let mut batch = QueryBatch::for_schema(schema);
    for table in HEIGHT_DEPENDENT_TABLES {
        let shadow = qualified(schema, &checkpoint_table(table));
        batch.queue(format!("DROP TABLE IF EXISTS {shadow};"));
        batch.queue(format!(
            "CREATE TABLE {shadow} AS SELECT * FROM {};",
            qualified(schema, table)
        ));
    }
    batch.queue(format!(
        "INSERT OR IGNORE INTO {} (height)
            SELECT height FROM {}
            ORDER BY height DESC, processed_time DESC
            LIMIT 1;",
        qualified(schema, CHECKPOINTED_HEIGHTS),
        qualified(schema, PROCESSED_BLOCKS)
    ));
    batch
}
