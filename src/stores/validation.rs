//! Checkpoint validation against a decoded genesis document.
//!
//! Expected rows are derived straight from the document, independently of the
//! migration generator, and compared with the `_checkpoint` shadow tables.
//! Composite keys are joined with `/`.
//!
//! One discrepancy is tolerated: an entity descriptor may list a node that was
//! never registered on its own, so it has no row in `nodes`.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::ValueRef;
use rusqlite::Row;
use tracing::{info, warn};

use super::checkpoint::latest_checkpoint_height;
use super::client::{QueryContext, StorageClient};
use crate::error::{CheckpointError, StorageResult};
use crate::genesis::document::{GenesisDocument, ProposalKind};
use crate::genesis::signature::open_all;
use crate::migrations::schema::{
    checkpoint_table, ACCOUNTS, ALLOWANCES, DEBONDING_DELEGATIONS, DELEGATIONS, ENTITIES, NODES,
    PROPOSALS, RUNTIMES, VOTES,
};
use crate::migrations::sql::{qualified, schema_name};

const NULL: &str = "NULL";

type Rows = BTreeMap<String, Vec<String>>;

/// Comparison outcome for one checkpointed table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableReport {
    pub table: &'static str,
    /// Rows derived from the document.
    pub expected: usize,
    /// Rows found in the checkpoint table.
    pub actual: usize,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub mismatched: Vec<String>,
    pub tolerated: Vec<String>,
}

impl TableReport {
    fn new(table: &'static str) -> Self {
        Self {
            table,
            ..Default::default()
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub chain_id: String,
    pub schema: String,
    pub document_height: u64,
    pub checkpoint_height: Option<u64>,
    pub tables: Vec<TableReport>,
}

impl ValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.tables.iter().all(TableReport::is_consistent)
    }

    pub fn table(&self, table: &str) -> Option<&TableReport> {
        self.tables.iter().find(|report| report.table == table)
    }
}

/// Compares the chain's checkpoint tables with the state in `document`.
pub fn validate_checkpoint(
    client: &StorageClient,
    document: &GenesisDocument,
    ctx: &QueryContext,
) -> Result<ValidationReport, CheckpointError> {
    let schema = schema_name(&document.chain_id)?;
    if !client.schema_exists(&schema) {
        return Err(CheckpointError::UnknownChain {
            chain: document.chain_id.clone(),
            path: client.schema_path(&schema),
        });
    }
    let checkpoint_height = latest_checkpoint_height(client, ctx, &schema)?;
    if checkpoint_height != Some(document.height) {
        warn!(
            chain = %document.chain_id,
            document_height = document.height,
            checkpoint_height = ?checkpoint_height,
            "validating against a checkpoint taken at another height"
        );
    }

    let checker = Checker {
        client,
        ctx,
        schema: &schema,
    };
    let (entities, nodes) = checker.registry(document)?;
    let tables = vec![
        entities,
        nodes,
        checker.runtimes(document)?,
        checker.accounts(document)?,
        checker.allowances(document)?,
        checker.delegations(document)?,
        checker.debonding_delegations(document)?,
        checker.proposals(document)?,
        checker.votes(document)?,
    ];

    let report = ValidationReport {
        chain_id: document.chain_id.clone(),
        schema,
        document_height: document.height,
        checkpoint_height,
        tables,
    };
    for table in report.tables.iter().filter(|table| !table.is_consistent()) {
        warn!(
            chain = %report.chain_id,
            table = table.table,
            missing = table.missing.len(),
            unexpected = table.unexpected.len(),
            mismatched = table.mismatched.len(),
            "checkpoint table diverges from genesis document"
        );
    }
    info!(
        chain = %report.chain_id,
        schema = %report.schema,
        consistent = report.is_consistent(),
        "validated checkpoint"
    );
    Ok(report)
}

struct Checker<'a> {
    client: &'a StorageClient,
    ctx: &'a QueryContext,
    schema: &'a str,
}

impl Checker<'_> {
    /// Loads `columns` from the table's shadow; the first `key_len` form the key.
    fn load(
        &self,
        table: &str,
        key_len: usize,
        columns: &[&str],
    ) -> StorageResult<Vec<(String, Vec<String>)>> {
        let sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            qualified(self.schema, &checkpoint_table(table))
        );
        self.client.schema(self.schema).query(self.ctx, &sql, [], |row| {
            let mut cells = (0..columns.len())
                .map(|idx| cell(row, idx))
                .collect::<rusqlite::Result<Vec<String>>>()?;
            let values = cells.split_off(key_len);
            Ok((cells.join("/"), values))
        })
    }

    fn registry(
        &self,
        document: &GenesisDocument,
    ) -> Result<(TableReport, TableReport), CheckpointError> {
        let entities = open_all(&document.registry.entities)?;
        let nodes = open_all(&document.registry.nodes)?;

        let expected_nodes: Rows = nodes
            .iter()
            .map(|node| {
                (
                    node.id.to_string(),
                    vec![
                        node.entity_id.to_string(),
                        node.expiration.to_string(),
                        node.tls.pub_key.to_string(),
                        node.tls
                            .next_pub_key
                            .map_or_else(|| NULL.to_string(), |key| key.to_string()),
                        node.p2p.id.to_string(),
                        node.consensus.id.to_string(),
                        node.roles.to_string(),
                    ],
                )
            })
            .collect();
        let actual_nodes = self.load(
            NODES,
            1,
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
        )?;

        let mut registered: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (id, values) in &actual_nodes {
            if let Some(entity_id) = values.first() {
                registered
                    .entry(entity_id.as_str())
                    .or_default()
                    .insert(id.as_str());
            }
        }

        let actual_entities = self.load(ENTITIES, 1, &["id"])?;
        let mut report = TableReport::new(ENTITIES);
        report.expected = entities.len();
        report.actual = actual_entities.len();
        let actual_ids: BTreeSet<&str> = actual_entities.iter().map(|(id, _)| id.as_str()).collect();
        let mut expected_ids = BTreeSet::new();
        for entity in &entities {
            let id = entity.id.to_string();
            if !actual_ids.contains(id.as_str()) {
                report.missing.push(id.clone());
            }
            let listed: BTreeSet<String> = entity.nodes.iter().map(ToString::to_string).collect();
            let owned = registered.get(id.as_str()).cloned().unwrap_or_default();
            for node in &listed {
                if !owned.contains(node.as_str()) {
                    report.tolerated.push(format!("{id}/{node}"));
                }
            }
            for node in owned.iter().filter(|node| !listed.contains(**node)) {
                report.mismatched.push(format!("{id}/{node}"));
            }
            expected_ids.insert(id);
        }
        report.unexpected = actual_ids
            .iter()
            .filter(|id| !expected_ids.contains(**id))
            .map(ToString::to_string)
            .collect();

        Ok((report, compare(NODES, expected_nodes, actual_nodes)))
    }

    fn runtimes(&self, document: &GenesisDocument) -> Result<TableReport, CheckpointError> {
        let registry = &document.registry;
        let expected: Rows = registry
            .runtimes
            .iter()
            .map(|runtime| (runtime, false))
            .chain(registry.suspended_runtimes.iter().map(|runtime| (runtime, true)))
            .map(|(runtime, suspended)| {
                (
                    runtime.id.clone(),
                    vec![
                        u8::from(suspended).to_string(),
                        runtime.kind.to_string(),
                        runtime.tee_hardware.to_string(),
                        runtime.key_manager.clone().unwrap_or_else(|| "none".to_string()),
                    ],
                )
            })
            .collect();
        let actual = self.load(
            RUNTIMES,
            1,
            &["id", "suspended", "kind", "tee_hardware", "key_manager"],
        )?;
        Ok(compare(RUNTIMES, expected, actual))
    }

    fn accounts(&self, document: &GenesisDocument) -> Result<TableReport, CheckpointError> {
        let expected: Rows = document
            .staking
            .ledger
            .iter()
            .map(|(address, account)| {
                (
                    address.clone(),
                    vec![
                        account.general.balance.to_string(),
                        account.general.nonce.to_string(),
                        account.escrow.active.balance.to_string(),
                        account.escrow.active.total_shares.to_string(),
                        account.escrow.debonding.balance.to_string(),
                        account.escrow.debonding.total_shares.to_string(),
                    ],
                )
            })
            .collect();
        let actual = self.load(
            ACCOUNTS,
            1,
            &[
                "address",
                "general_balance",
                "nonce",
                "escrow_balance_active",
                "escrow_total_shares_active",
                "escrow_balance_debonding",
                "escrow_total_shares_debonding",
            ],
        )?;
        Ok(compare(ACCOUNTS, expected, actual))
    }

    fn allowances(&self, document: &GenesisDocument) -> Result<TableReport, CheckpointError> {
        let expected: Rows = document
            .staking
            .ledger
            .iter()
            .flat_map(|(owner, account)| {
                account
                    .general
                    .allowances
                    .iter()
                    .map(move |(beneficiary, amount)| {
                        (format!("{owner}/{beneficiary}"), vec![amount.to_string()])
                    })
            })
            .collect();
        let actual = self.load(ALLOWANCES, 2, &["owner", "beneficiary", "allowance"])?;
        Ok(compare(ALLOWANCES, expected, actual))
    }

    fn delegations(&self, document: &GenesisDocument) -> Result<TableReport, CheckpointError> {
        let expected: Rows = document
            .staking
            .delegations
            .iter()
            .flat_map(|(delegatee, escrows)| {
                escrows.iter().map(move |(delegator, delegation)| {
                    (
                        format!("{delegatee}/{delegator}"),
                        vec![delegation.shares.to_string()],
                    )
                })
            })
            .collect();
        let actual = self.load(DELEGATIONS, 2, &["delegatee", "delegator", "shares"])?;
        Ok(compare(DELEGATIONS, expected, actual))
    }

    /// Entries are grouped per (delegatee, delegator) and compared as sorted lists.
    fn debonding_delegations(
        &self,
        document: &GenesisDocument,
    ) -> Result<TableReport, CheckpointError> {
        let mut expected_rows = 0;
        let mut expected = Rows::new();
        for (delegatee, escrows) in &document.staking.debonding_delegations {
            for (delegator, entries) in escrows {
                let mut group: Vec<String> = entries
                    .iter()
                    .map(|entry| format!("{}@{}", entry.shares, entry.debond_end))
                    .collect();
                group.sort();
                expected_rows += group.len();
                expected.insert(format!("{delegatee}/{delegator}"), group);
            }
        }

        let rows = self.load(
            DEBONDING_DELEGATIONS,
            2,
            &["delegatee", "delegator", "shares", "debond_end"],
        )?;
        let actual_rows = rows.len();
        let mut grouped = Rows::new();
        for (key, values) in rows {
            grouped.entry(key).or_default().push(values.join("@"));
        }
        for group in grouped.values_mut() {
            group.sort();
        }

        let mut report = compare(DEBONDING_DELEGATIONS, expected, grouped.into_iter().collect());
        report.expected = expected_rows;
        report.actual = actual_rows;
        Ok(report)
    }

    fn proposals(&self, document: &GenesisDocument) -> Result<TableReport, CheckpointError> {
        let mut expected = Rows::new();
        for proposal in &document.governance.proposals {
            let variant = match proposal.kind()? {
                ProposalKind::Upgrade(upgrade) => [
                    upgrade.handler.clone(),
                    upgrade.target.consensus_protocol.to_string(),
                    upgrade.target.runtime_host_protocol.to_string(),
                    upgrade.target.runtime_committee_protocol.to_string(),
                    upgrade.epoch.to_string(),
                    NULL.to_string(),
                ],
                ProposalKind::CancelUpgrade(cancel) => [
                    NULL.to_string(),
                    NULL.to_string(),
                    NULL.to_string(),
                    NULL.to_string(),
                    NULL.to_string(),
                    cancel.proposal_id.to_string(),
                ],
            };
            let mut values = vec![
                proposal.submitter.clone(),
                proposal.state.to_string(),
                proposal.deposit.to_string(),
            ];
            values.extend(variant);
            values.extend([
                proposal.created_at.to_string(),
                proposal.closes_at.to_string(),
                proposal.invalid_votes.to_string(),
            ]);
            expected.insert(proposal.id.to_string(), values);
        }

        let actual = self.load(
            PROPOSALS,
            1,
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
        )?;
        Ok(compare(PROPOSALS, expected, actual))
    }

    fn votes(&self, document: &GenesisDocument) -> Result<TableReport, CheckpointError> {
        let expected: Rows = document
            .governance
            .vote_entries
            .iter()
            .flat_map(|(proposal, entries)| {
                entries.iter().map(move |entry| {
                    (
                        format!("{proposal}/{}", entry.voter),
                        vec![entry.vote.to_string()],
                    )
                })
            })
            .collect();
        let actual = self.load(VOTES, 2, &["proposal", "voter", "vote"])?;
        Ok(compare(VOTES, expected, actual))
    }
}

fn compare(table: &'static str, expected: Rows, actual: Vec<(String, Vec<String>)>) -> TableReport {
    let mut report = TableReport::new(table);
    report.expected = expected.len();
    report.actual = actual.len();

    let mut seen = BTreeSet::new();
    for (key, values) in actual {
        match expected.get(&key) {
            None => report.unexpected.push(key.clone()),
            Some(want) if *want != values => report.mismatched.push(key.clone()),
            Some(_) => {}
        }
        if !seen.insert(key.clone()) {
            report.mismatched.push(format!("{key} (duplicate)"));
        }
    }
    report.missing = expected
        .keys()
        .filter(|key| !seen.contains(*key))
        .cloned()
        .collect();
    report
}

fn cell(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => NULL.to_string(),
        ValueRef::Integer(value) => value.to_string(),
        ValueRef::Real(value) => value.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}
