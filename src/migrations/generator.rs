//! Genesis document to SQL migration.
//!
//! The generator re-initializes all height-dependent state of one chain schema
//! from a genesis document. Backends are processed in a fixed order (registry,
//! staking, governance); the first failure aborts generation and nothing is
//! returned. Every table is emptied before being repopulated, and an INSERT is
//! only emitted when the table has at least one row.

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::schema::{
    ACCOUNTS, ALLOWANCES, DEBONDING_DELEGATIONS, DELEGATIONS, ENTITIES, NODES, PROPOSALS,
    RUNTIMES, VOTES,
};
use super::sql::{integer, qualified, schema_name, text, Dialect, SqlValue};
use crate::error::{DocumentError, MigrationError};
use crate::genesis::document::{GenesisDocument, ProposalKind, Runtime};
use crate::genesis::signature::open_all;

pub const DEFAULT_MAX_ROWS_PER_INSERT: usize = 1000;

const HEADER: &str = "-- DO NOT MODIFY
-- This file was autogenerated by the consensus-indexer migration generator.
";

/// Rendering options for generated migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorOptions {
    pub dialect: Dialect,
    /// Upper bound on VALUES tuples per INSERT statement.
    pub max_rows_per_insert: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            max_rows_per_insert: DEFAULT_MAX_ROWS_PER_INSERT,
        }
    }
}

/// Statements for one backend, rendered under a comment banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: &'static str,
    pub statements: Vec<String>,
}

/// A generated migration for one chain at one height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub chain_id: String,
    pub schema: String,
    pub height: u64,
    pub dialect: Dialect,
    pub sections: Vec<Section>,
}

impl Migration {
    /// Statements in execution order, without the surrounding transaction.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|section| section.statements.iter().map(String::as_str))
    }

    /// Writes the rendered script to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), MigrationError> {
        fs::write(path, self.to_string()).map_err(|source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(HEADER)?;
        f.write_str("\nBEGIN;\n")?;
        for section in &self.sections {
            write!(f, "\n-- {}\n", section.title)?;
            for statement in &section.statements {
                writeln!(f, "{statement}")?;
            }
        }
        f.write_str("\nCOMMIT;\n")
    }
}

/// Rows destined for one table.
struct TableRows {
    table: &'static str,
    columns: &'static [&'static str],
    rows: Vec<Vec<SqlValue>>,
}

impl TableRows {
    fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            rows: Vec::new(),
        }
    }

    fn push(&mut self, row: Vec<SqlValue>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }
}

/// Generates migrations for the indexer's target storage.
#[derive(Debug, Clone, Default)]
pub struct MigrationGenerator {
    options: GeneratorOptions,
}

type BackendFn = fn(&MigrationGenerator, &GenesisDocument) -> Result<Vec<TableRows>, DocumentError>;

impl MigrationGenerator {
    pub fn new(options: GeneratorOptions) -> Self {
        Self { options }
    }

    /// Generates the migration and writes its script to `path`.
    pub fn write_genesis_document_migration(
        &self,
        path: &Path,
        document: &GenesisDocument,
    ) -> Result<Migration, MigrationError> {
        let migration = self.genesis_document_migration(document)?;
        super::write_migration(path, &migration)?;
        info!(
            chain = %migration.chain_id,
            path = %path.display(),
            "wrote genesis migration"
        );
        Ok(migration)
    }

    /// Builds a migration that re-initializes all height-dependent state as
    /// per the provided genesis document.
    pub fn genesis_document_migration(
        &self,
        document: &GenesisDocument,
    ) -> Result<Migration, DocumentError> {
        let schema = schema_name(&document.chain_id)?;
        let backends: [(&'static str, BackendFn); 3] = [
            ("Registry Backend Data", Self::registry_backend),
            ("Staking Backend Data", Self::staking_backend),
            ("Governance Backend Data", Self::governance_backend),
        ];

        let mut sections = Vec::with_capacity(backends.len());
        for (title, backend) in backends {
            let tables = backend(self, document)?;
            let statements = tables
                .iter()
                .flat_map(|rows| self.replace_table(&schema, rows))
                .collect();
            sections.push(Section { title, statements });
        }

        let migration = Migration {
            chain_id: document.chain_id.clone(),
            schema,
            height: document.height,
            dialect: self.options.dialect,
            sections,
        };
        info!(
            chain = %migration.chain_id,
            schema = %migration.schema,
            height = migration.height,
            statements = migration.statements().count(),
            "generated genesis migration"
        );
        Ok(migration)
    }

    /// Truncate followed by zero or more chunked INSERTs.
    fn replace_table(&self, schema: &str, rows: &TableRows) -> Vec<String> {
        let dialect = self.options.dialect;
        let mut statements = vec![dialect.truncate(schema, rows.table)];
        debug!(table = rows.table, rows = rows.rows.len(), "rendering table");

        let chunk_size = self.options.max_rows_per_insert.max(1);
        for chunk in rows.rows.chunks(chunk_size) {
            let values: Vec<String> = chunk
                .iter()
                .map(|row| {
                    let literals: Vec<String> =
                        row.iter().map(|value| dialect.literal(value)).collect();
                    format!("\t({})", literals.join(", "))
                })
                .collect();
            statements.push(format!(
                "INSERT INTO {} ({})\nVALUES\n{};",
                qualified(schema, rows.table),
                rows.columns.join(", "),
                values.join(",\n")
            ));
        }
        statements
    }

    fn registry_backend(&self, document: &GenesisDocument) -> Result<Vec<TableRows>, DocumentError> {
        let registry = &document.registry;

        let mut entities = open_all(&registry.entities)?;
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        let mut entity_rows = TableRows::new(ENTITIES, &["id"]);
        for entity in &entities {
            entity_rows.push(vec![text(ENTITIES, "id", entity.id.to_string())?]);
        }

        let mut nodes = open_all(&registry.nodes)?;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut node_rows = TableRows::new(
            NODES,
            &[
                "id",
                "entity_id",
                "expiration",
                "tls_pubkey",
                "tls_next_pubkey",
                "p2p_pubkey",
                "consensus_pubkey",
                "roles",
            ],
        );
        for node in &nodes {
            node_rows.push(vec![
                text(NODES, "id", node.id.to_string())?,
                text(NODES, "entity_id", node.entity_id.to_string())?,
                integer(NODES, "expiration", node.expiration)?,
                text(NODES, "tls_pubkey", node.tls.pub_key.to_string())?,
                match node.tls.next_pub_key {
                    Some(key) => text(NODES, "tls_next_pubkey", key.to_string())?,
                    None => SqlValue::Null,
                },
                text(NODES, "p2p_pubkey", node.p2p.id.to_string())?,
                text(NODES, "consensus_pubkey", node.consensus.id.to_string())?,
                text(NODES, "roles", node.roles.to_string())?,
            ]);
        }

        let mut runtimes: Vec<(&Runtime, bool)> = registry
            .runtimes
            .iter()
            .map(|runtime| (runtime, false))
            .chain(registry.suspended_runtimes.iter().map(|runtime| (runtime, true)))
            .collect();
        runtimes.sort_by(|(a, _), (b, _)| a.id.cmp(&b.id));
        let mut runtime_rows = TableRows::new(
            RUNTIMES,
            &["id", "suspended", "kind", "tee_hardware", "key_manager"],
        );
        for (runtime, suspended) in runtimes {
            runtime_rows.push(vec![
                text(RUNTIMES, "id", runtime.id.as_str())?,
                SqlValue::Bool(suspended),
                text(RUNTIMES, "kind", runtime.kind.to_string())?,
                text(RUNTIMES, "tee_hardware", runtime.tee_hardware.to_string())?,
                text(
                    RUNTIMES,
                    "key_manager",
                    runtime.key_manager.as_deref().unwrap_or("none"),
                )?,
            ]);
        }

        Ok(vec![entity_rows, node_rows, runtime_rows])
    }

    fn staking_backend(&self, document: &GenesisDocument) -> Result<Vec<TableRows>, DocumentError> {
        let staking = &document.staking;

        let mut accounts = TableRows::new(
            ACCOUNTS,
            &[
                "address",
                "general_balance",
                "nonce",
                "escrow_balance_active",
                "escrow_total_shares_active",
                "escrow_balance_debonding",
                "escrow_total_shares_debonding",
            ],
        );
        let mut allowances = TableRows::new(ALLOWANCES, &["owner", "beneficiary", "allowance"]);
        for (address, account) in &staking.ledger {
            accounts.push(vec![
                text(ACCOUNTS, "address", address.as_str())?,
                SqlValue::Quantity(account.general.balance),
                integer(ACCOUNTS, "nonce", account.general.nonce)?,
                SqlValue::Quantity(account.escrow.active.balance),
                SqlValue::Quantity(account.escrow.active.total_shares),
                SqlValue::Quantity(account.escrow.debonding.balance),
                SqlValue::Quantity(account.escrow.debonding.total_shares),
            ]);
            for (beneficiary, amount) in &account.general.allowances {
                allowances.push(vec![
                    text(ALLOWANCES, "owner", address.as_str())?,
                    text(ALLOWANCES, "beneficiary", beneficiary.as_str())?,
                    SqlValue::Quantity(*amount),
                ]);
            }
        }

        let mut delegations = TableRows::new(DELEGATIONS, &["delegatee", "delegator", "shares"]);
        for (delegatee, escrows) in &staking.delegations {
            for (delegator, delegation) in escrows {
                delegations.push(vec![
                    text(DELEGATIONS, "delegatee", delegatee.as_str())?,
                    text(DELEGATIONS, "delegator", delegator.as_str())?,
                    SqlValue::Quantity(delegation.shares),
                ]);
            }
        }

        let mut debonding = TableRows::new(
            DEBONDING_DELEGATIONS,
            &["delegatee", "delegator", "shares", "debond_end"],
        );
        for (delegatee, escrows) in &staking.debonding_delegations {
            for (delegator, entries) in escrows {
                for entry in entries {
                    debonding.push(vec![
                        text(DEBONDING_DELEGATIONS, "delegatee", delegatee.as_str())?,
                        text(DEBONDING_DELEGATIONS, "delegator", delegator.as_str())?,
                        SqlValue::Quantity(entry.shares),
                        integer(DEBONDING_DELEGATIONS, "debond_end", entry.debond_end)?,
                    ]);
                }
            }
        }

        Ok(vec![accounts, allowances, delegations, debonding])
    }

    fn governance_backend(
        &self,
        document: &GenesisDocument,
    ) -> Result<Vec<TableRows>, DocumentError> {
        let governance = &document.governance;

        let mut proposals: Vec<_> = governance.proposals.iter().collect();
        proposals.sort_by_key(|proposal| proposal.id);
        let mut proposal_rows = TableRows::new(
            PROPOSALS,
            &[
                "id",
                "submitter",
                "state",
                "deposit",
                "handler",
                "cp_target_version",
                "rhp_target_version",
                "rcp_target_version",
                "upgrade_epoch",
                "cancels",
                "created_at",
                "closes_at",
                "invalid_votes",
            ],
        );
        for proposal in proposals {
            let (handler, cp, rhp, rcp, epoch, cancels) = match proposal.kind()? {
                ProposalKind::Upgrade(upgrade) => (
                    text(PROPOSALS, "handler", upgrade.handler.as_str())?,
                    text(
                        PROPOSALS,
                        "cp_target_version",
                        upgrade.target.consensus_protocol.to_string(),
                    )?,
                    text(
                        PROPOSALS,
                        "rhp_target_version",
                        upgrade.target.runtime_host_protocol.to_string(),
                    )?,
                    text(
                        PROPOSALS,
                        "rcp_target_version",
                        upgrade.target.runtime_committee_protocol.to_string(),
                    )?,
                    integer(PROPOSALS, "upgrade_epoch", upgrade.epoch)?,
                    SqlValue::Null,
                ),
                ProposalKind::CancelUpgrade(cancel) => (
                    SqlValue::Null,
                    SqlValue::Null,
                    SqlValue::Null,
                    SqlValue::Null,
                    SqlValue::Null,
                    integer(PROPOSALS, "cancels", cancel.proposal_id)?,
                ),
            };
            proposal_rows.push(vec![
                integer(PROPOSALS, "id", proposal.id)?,
                text(PROPOSALS, "submitter", proposal.submitter.as_str())?,
                text(PROPOSALS, "state", proposal.state.to_string())?,
                SqlValue::Quantity(proposal.deposit),
                handler,
                cp,
                rhp,
                rcp,
                epoch,
                cancels,
                integer(PROPOSALS, "created_at", proposal.created_at)?,
                integer(PROPOSALS, "closes_at", proposal.closes_at)?,
                integer(PROPOSALS, "invalid_votes", proposal.invalid_votes)?,
            ]);
        }

        let mut votes = TableRows::new(VOTES, &["proposal", "voter", "vote"]);
        for (proposal_id, entries) in &governance.vote_entries {
            let mut entries: Vec<_> = entries.iter().collect();
            entries.sort_by(|a, b| a.voter.cmp(&b.voter));
            for entry in entries {
                votes.push(vec![
                    integer(VOTES, "proposal", *proposal_id)?,
                    text(VOTES, "voter", entry.voter.as_str())?,
                    text(VOTES, "vote", entry.vote.to_string())?,
                ]);
            }
        }

        Ok(vec![proposal_rows, votes])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::fixtures::{
        cancel_proposal, entity_key, runtime, sample_document, signed_entity, upgrade_proposal,
        BIG_BALANCE,
    };
    use tempfile::TempDir;

    fn generate(document: &GenesisDocument) -> Migration {
        MigrationGenerator::default()
            .genesis_document_migration(document)
            .expect("generate migration")
    }

    fn empty_document() -> GenesisDocument {
        GenesisDocument {
            chain_id: "oasis-3".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_document_truncates_without_inserting() {
        let migration = generate(&empty_document());
        let statements: Vec<&str> = migration.statements().collect();

        assert_eq!(statements.len(), 9);
        assert!(statements
            .iter()
            .all(|sql| sql.starts_with("TRUNCATE oasis_3.") && sql.ends_with(" CASCADE;")));
        assert!(!migration.to_string().contains("INSERT"));
    }

    #[test]
    fn script_is_wrapped_in_a_transaction_with_header() {
        let script = generate(&sample_document()).to_string();
        assert!(script.starts_with("-- DO NOT MODIFY\n"));
        assert!(script.contains("\nBEGIN;\n"));
        assert!(script.ends_with("\nCOMMIT;\n"));
    }

    #[test]
    fn backends_are_emitted_in_fixed_order() {
        let script = generate(&sample_document()).to_string();
        let registry = script.find("-- Registry Backend Data").expect("registry");
        let staking = script.find("-- Staking Backend Data").expect("staking");
        let governance = script.find("-- Governance Backend Data").expect("governance");
        assert!(registry < staking && staking < governance);

        let entities = script.find("TRUNCATE oasis_test_3.entities").expect("entities");
        let nodes = script.find("TRUNCATE oasis_test_3.nodes").expect("nodes");
        let votes = script.find("TRUNCATE oasis_test_3.votes").expect("votes");
        assert!(entities < nodes && nodes < votes);
    }

    #[test]
    fn single_entity_without_nodes() {
        let mut document = empty_document();
        document.registry.entities = vec![signed_entity(1, &[])];

        let migration = generate(&document);
        let inserts: Vec<&str> = migration
            .statements()
            .filter(|sql| sql.starts_with("INSERT"))
            .collect();

        assert_eq!(inserts.len(), 1);
        assert_eq!(
            inserts[0],
            format!(
                "INSERT INTO oasis_3.entities (id)\nVALUES\n\t('{}');",
                entity_key(1)
            )
        );
    }

    #[test]
    fn runtime_row_uses_none_sentinel_for_missing_key_manager() {
        let mut document = empty_document();
        document.registry.runtimes = vec![runtime("R1")];

        let script = generate(&document).to_string();
        assert!(script.contains("\t('R1', false, 'compute', 'none', 'none');"));
    }

    #[test]
    fn runtimes_and_suspended_runtimes_share_one_insert() {
        let script = generate(&sample_document()).to_string();
        assert_eq!(script.matches("INSERT INTO oasis_test_3.runtimes").count(), 1);
        assert!(script.contains("\t('R0', true, 'compute', 'intel-sgx', 'KM'),\n\t('R1', false"));
    }

    #[test]
    fn big_balances_are_exact_literals() {
        let script = generate(&sample_document()).to_string();
        assert!(script.contains(&format!("('oasis1alice', {BIG_BALANCE}, 7, 100, 100, 0, 0)")));

        let sqlite = MigrationGenerator::new(GeneratorOptions {
            dialect: Dialect::Sqlite,
            ..Default::default()
        })
        .genesis_document_migration(&sample_document())
        .expect("sqlite migration")
        .to_string();
        assert!(sqlite.contains(&format!("('oasis1alice', '{BIG_BALANCE}', 7,")));
        assert!(sqlite.contains("DELETE FROM oasis_test_3.accounts;"));
        assert!(!sqlite.contains("TRUNCATE"));
    }

    #[test]
    fn staking_maps_flatten_one_row_per_leaf() {
        let script = generate(&sample_document()).to_string();
        assert!(script.contains("\t('oasis1alice', 'oasis1bob', 5);"));
        assert!(script.contains("\t('oasis1alice', 'oasis1bob', 50);"));
        assert!(script.contains(
            "\t('oasis1alice', 'oasis1bob', 3, 100),\n\t('oasis1alice', 'oasis1bob', 4, 101);"
        ));
    }

    #[test]
    fn empty_allowances_skip_insert_but_keep_truncate() {
        let mut document = sample_document();
        for account in document.staking.ledger.values_mut() {
            account.general.allowances.clear();
        }
        let script = generate(&document).to_string();
        assert!(script.contains("TRUNCATE oasis_test_3.allowances CASCADE;"));
        assert!(!script.contains("INSERT INTO oasis_test_3.allowances"));
    }

    #[test]
    fn proposal_variants_populate_exclusive_columns() {
        let mut document = empty_document();
        document.governance.proposals = vec![cancel_proposal(2, 1), upgrade_proposal(1)];

        let script = generate(&document).to_string();
        assert!(script.contains(
            "\t(1, 'oasis1submitter', 'passed', 10000, 'consensus-v2', '5.0.0', '5.1.0', '4.0.0', 300, NULL, 10, 20, 1),"
        ));
        assert!(script.contains(
            "\t(2, 'oasis1submitter', 'active', 10000, NULL, NULL, NULL, NULL, NULL, 1, 21, 31, 0);"
        ));
    }

    #[test]
    fn malformed_proposal_aborts_generation() {
        let mut document = sample_document();
        document.governance.proposals[0].content.upgrade = document.governance.proposals[1]
            .content
            .upgrade
            .clone();

        let err = MigrationGenerator::default()
            .genesis_document_migration(&document)
            .expect_err("both payloads set");
        assert!(matches!(err, DocumentError::MalformedProposal { id: 2 }));
    }

    #[test]
    fn forged_envelope_aborts_generation() {
        let mut document = sample_document();
        document.registry.nodes[0].0.signature.signature =
            document.registry.entities[0].0.signature.signature.clone();

        let err = MigrationGenerator::default()
            .genesis_document_migration(&document)
            .expect_err("forged node signature");
        assert!(matches!(
            err,
            DocumentError::SignatureMismatch { kind: "node", .. }
        ));
    }

    #[test]
    fn votes_are_sorted_by_voter() {
        let script = generate(&sample_document()).to_string();
        assert!(script.contains("\t(1, 'oasis1alice', 'no'),\n\t(1, 'oasis1bob', 'yes');"));
    }

    #[test]
    fn output_does_not_depend_on_input_order() {
        let document = sample_document();
        let mut reordered = document.clone();
        reordered.registry.entities.reverse();
        reordered.governance.proposals.reverse();
        for entries in reordered.governance.vote_entries.values_mut() {
            entries.reverse();
        }

        assert_eq!(generate(&document).to_string(), generate(&reordered).to_string());
    }

    #[test]
    fn inserts_are_chunked() {
        let mut document = empty_document();
        document.registry.entities = vec![
            signed_entity(1, &[]),
            signed_entity(2, &[]),
            signed_entity(3, &[]),
        ];

        let migration = MigrationGenerator::new(GeneratorOptions {
            max_rows_per_insert: 2,
            ..Default::default()
        })
        .genesis_document_migration(&document)
        .expect("generate");
        let inserts = migration
            .statements()
            .filter(|sql| sql.starts_with("INSERT INTO oasis_3.entities"))
            .count();
        assert_eq!(inserts, 2);
    }

    #[test]
    fn write_reports_io_failures_separately() {
        let temp = TempDir::new().expect("temp dir");
        let missing = temp.path().join("missing").join("genesis.sql");

        let err = MigrationGenerator::default()
            .write_genesis_document_migration(&missing, &sample_document())
            .expect_err("parent directory is missing");
        assert!(matches!(err, MigrationError::Io { .. }));

        let path = temp.path().join("genesis.sql");
        let migration = MigrationGenerator::default()
            .write_genesis_document_migration(&path, &sample_document())
            .expect("write migration");
        let written = fs::read_to_string(&path).expect("read script");
        assert_eq!(written, migration.to_string());
    }
}
