//! Applying generated migrations through the storage client.

use rusqlite::types::Value;
use tracing::info;

use super::generator::Migration;
use super::schema::{create_statements, GENESIS_MODULE, PROCESSED_BLOCKS};
use super::sql::{qualified, Dialect};
use crate::error::{DocumentError, MigrationError, StorageResult};
use crate::stores::client::{QueryBatch, QueryContext, StorageClient};

/// Creates the chain schema's database file and any of its missing tables.
pub fn ensure_chain_schema(
    client: &StorageClient,
    ctx: &QueryContext,
    schema: &str,
) -> StorageResult<()> {
    let mut batch = QueryBatch::for_schema(schema);
    for statement in create_statements(schema) {
        batch.queue(statement);
    }
    client.send_batch(ctx, &batch)
}

/// Applies `migration` as one transaction and records its height as processed.
///
/// Re-applying the same migration replaces the chain state again and leaves
/// the processed-height marker untouched.
pub fn apply_migration(
    client: &StorageClient,
    migration: &Migration,
    ctx: &QueryContext,
) -> Result<(), MigrationError> {
    if migration.dialect != Dialect::Sqlite {
        return Err(MigrationError::UnsupportedDialect(migration.dialect));
    }
    let height = i64::try_from(migration.height).map_err(|_| DocumentError::IntegerOverflow {
        table: PROCESSED_BLOCKS,
        column: "height",
        value: migration.height,
    })?;

    ensure_chain_schema(client, ctx, &migration.schema)?;

    let mut batch = QueryBatch::for_schema(migration.schema.as_str());
    for statement in migration.statements() {
        batch.queue(statement);
    }
    batch.queue_with(
        format!(
            "INSERT OR IGNORE INTO {} (height, module) VALUES (?1, ?2);",
            qualified(&migration.schema, PROCESSED_BLOCKS)
        ),
        vec![Value::Integer(height), Value::Text(GENESIS_MODULE.to_string())],
    );
    client.send_batch(ctx, &batch)?;

    info!(
        chain = %migration.chain_id,
        schema = %migration.schema,
        height = migration.height,
        statements = batch.len(),
        "applied genesis migration"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::genesis::document::{GenesisDocument, RegistryGenesis};
    use crate::genesis::fixtures::{self, BIG_BALANCE};
    use crate::migrations::generator::{GeneratorOptions, MigrationGenerator};
    use crate::migrations::schema::HEIGHT_DEPENDENT_TABLES;
    use crate::stores::client::StorageConfig;
    use tempfile::TempDir;

    const SCHEMA: &str = "oasis_test_3";

    fn client(temp: &TempDir) -> StorageClient {
        StorageClient::new(&StorageConfig::new(temp.path().join("indexer.sqlite3")))
            .expect("open client")
    }

    fn sqlite_migration(document: &GenesisDocument) -> Migration {
        MigrationGenerator::new(GeneratorOptions {
            dialect: Dialect::Sqlite,
            ..GeneratorOptions::default()
        })
        .genesis_document_migration(document)
        .expect("generate")
    }

    fn count(client: &StorageClient, schema: &str, table: &str) -> i64 {
        client
            .schema(schema)
            .query_row(
                &QueryContext::background(),
                &format!("SELECT count(*) FROM {}", qualified(schema, table)),
                [],
                |row| row.get(0),
            )
            .expect("count")
    }

    /// Every row of every height-dependent table, rendered and sorted.
    fn contents(client: &StorageClient, schema: &str) -> Vec<(&'static str, Vec<String>)> {
        HEIGHT_DEPENDENT_TABLES
            .iter()
            .map(|table| {
                let mut rows: Vec<String> = client
                    .schema(schema)
                    .query(
                        &QueryContext::background(),
                        &format!("SELECT * FROM {}", qualified(schema, table)),
                        [],
                        |row| {
                            (0..row.as_ref().column_count())
                                .map(|idx| Ok(format!("{:?}", Value::from(row.get_ref(idx)?))))
                                .collect::<rusqlite::Result<Vec<String>>>()
                                .map(|cells| cells.join("|"))
                        },
                    )
                    .expect("table contents");
                rows.sort();
                (*table, rows)
            })
            .collect()
    }

    fn empty_document(chain_id: &str) -> GenesisDocument {
        GenesisDocument {
            height: 1,
            chain_id: chain_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn single_entity_document_yields_one_row() {
        let temp = TempDir::new().expect("temp dir");
        let client = client(&temp);
        let document = GenesisDocument {
            height: 1,
            chain_id: "single".to_string(),
            registry: RegistryGenesis {
                entities: vec![fixtures::signed_entity(1, &[])],
                ..Default::default()
            },
            ..Default::default()
        };

        apply_migration(&client, &sqlite_migration(&document), &QueryContext::background())
            .expect("apply");

        assert_eq!(count(&client, "single", "entities"), 1);
        assert_eq!(count(&client, "single", "nodes"), 0);
        let id: String = client
            .schema("single")
            .query_row(&QueryContext::background(), "SELECT id FROM single.entities", [], |row| {
                row.get(0)
            })
            .expect("entity id");
        assert_eq!(id, fixtures::entity_key(1).to_string());
    }

    #[test]
    fn empty_document_applies_cleanly() {
        let temp = TempDir::new().expect("temp dir");
        let client = client(&temp);

        apply_migration(
            &client,
            &sqlite_migration(&empty_document("empty-chain")),
            &QueryContext::background(),
        )
        .expect("apply");

        for table in HEIGHT_DEPENDENT_TABLES {
            assert_eq!(count(&client, "empty_chain", table), 0, "{table} must be empty");
        }
        assert_eq!(count(&client, "empty_chain", PROCESSED_BLOCKS), 1);
    }

    #[test]
    fn big_quantities_survive_the_round_trip() {
        let temp = TempDir::new().expect("temp dir");
        let client = client(&temp);
        let migration = sqlite_migration(&fixtures::sample_document());
        apply_migration(&client, &migration, &QueryContext::background()).expect("apply");

        let balance: String = client
            .schema(SCHEMA)
            .query_row(
                &QueryContext::background(),
                "SELECT general_balance FROM oasis_test_3.accounts WHERE address = ?1",
                ["oasis1alice"],
                |row| row.get(0),
            )
            .expect("balance");
        assert_eq!(balance, BIG_BALANCE);
    }

    #[test]
    fn proposal_variant_columns_are_null_when_not_applicable() {
        let temp = TempDir::new().expect("temp dir");
        let client = client(&temp);
        let migration = sqlite_migration(&fixtures::sample_document());
        apply_migration(&client, &migration, &QueryContext::background()).expect("apply");

        let rows: Vec<(i64, Option<String>, Option<i64>, Option<i64>)> = client
            .schema(SCHEMA)
            .query(
                &QueryContext::background(),
                "SELECT id, handler, upgrade_epoch, cancels FROM oasis_test_3.proposals ORDER BY id",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .expect("proposals");
        assert_eq!(
            rows,
            vec![
                (1, Some("consensus-v2".to_string()), Some(300), None),
                (2, None, None, Some(1)),
            ]
        );
    }

    #[test]
    fn reapplying_leaves_identical_contents_and_one_marker() {
        let temp = TempDir::new().expect("temp dir");
        let client = client(&temp);
        let ctx = QueryContext::background();
        let migration = sqlite_migration(&fixtures::sample_document());

        apply_migration(&client, &migration, &ctx).expect("first apply");
        let first = contents(&client, SCHEMA);
        apply_migration(&client, &migration, &ctx).expect("second apply");
        let second = contents(&client, SCHEMA);

        assert_eq!(first, second);
        assert!(first.iter().all(|(_, rows)| !rows.is_empty()), "{first:#?}");
        assert_eq!(
            count(&client, SCHEMA, PROCESSED_BLOCKS),
            1,
            "marker is inserted once"
        );
    }

    #[test]
    fn many_chains_apply_side_by_side() {
        let temp = TempDir::new().expect("temp dir");
        let client = client(&temp);
        let ctx = QueryContext::background();

        for chain in 0..12 {
            let document = empty_document(&format!("chain-{chain}"));
            apply_migration(&client, &sqlite_migration(&document), &ctx)
                .unwrap_or_else(|err| panic!("chain-{chain}: {err}"));
        }

        for chain in 0..12 {
            let schema = format!("chain_{chain}");
            assert!(client.schema_exists(&schema));
            assert_eq!(count(&client, &schema, PROCESSED_BLOCKS), 1);
        }
        let one: i64 = client
            .query_row(&ctx, "SELECT 1", [], |row| row.get(0))
            .expect("primary database");
        assert_eq!(one, 1);
    }

    #[test]
    fn builtin_database_names_are_not_chains() {
        let err = MigrationGenerator::new(GeneratorOptions {
            dialect: Dialect::Sqlite,
            ..GeneratorOptions::default()
        })
        .genesis_document_migration(&empty_document("temp"))
        .expect_err("temp is reserved");
        assert!(
            matches!(err, DocumentError::InvalidChainId(_)),
            "got {err:?}"
        );
    }

    #[test]
    fn failed_statement_leaves_previous_state_untouched() {
        let temp = TempDir::new().expect("temp dir");
        let client = client(&temp);
        let ctx = QueryContext::background();
        let migration = sqlite_migration(&fixtures::sample_document());
        apply_migration(&client, &migration, &ctx).expect("apply");
        let before = contents(&client, SCHEMA);

        let mut broken = sqlite_migration(&GenesisDocument {
            height: 9_000_000,
            chain_id: "Oasis-Test 3".to_string(),
            ..Default::default()
        });
        broken.sections[0]
            .statements
            .push("INSERT INTO oasis_test_3.missing_table (id) VALUES (1);".to_string());

        let err = apply_migration(&client, &broken, &ctx).expect_err("broken migration");
        assert!(
            matches!(err, MigrationError::Storage(StorageError::Transaction { .. })),
            "got {err:?}"
        );
        assert_eq!(contents(&client, SCHEMA), before);
        assert_eq!(count(&client, SCHEMA, PROCESSED_BLOCKS), 1);
    }

    #[test]
    fn postgres_migrations_are_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let client = client(&temp);
        let migration = MigrationGenerator::default()
            .genesis_document_migration(&fixtures::sample_document())
            .expect("generate");

        let err = apply_migration(&client, &migration, &QueryContext::background())
            .expect_err("dialect mismatch");
        assert!(matches!(
            err,
            MigrationError::UnsupportedDialect(Dialect::Postgres)
        ));
    }
}
