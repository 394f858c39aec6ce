//! Per-chain table layout.
//!
//! Table and column names are shared by the generator, the checkpoint
//! subsystem and validation. The DDL targets the SQLite-backed storage client.

use super::sql::qualified;

pub const ENTITIES: &str = "entities";
pub const NODES: &str = "nodes";
pub const RUNTIMES: &str = "runtimes";
pub const ACCOUNTS: &str = "accounts";
pub const ALLOWANCES: &str = "allowances";
pub const DELEGATIONS: &str = "delegations";
pub const DEBONDING_DELEGATIONS: &str = "debonding_delegations";
pub const PROPOSALS: &str = "proposals";
pub const VOTES: &str = "votes";
pub const PROCESSED_BLOCKS: &str = "processed_blocks";
pub const CHECKPOINTED_HEIGHTS: &str = "checkpointed_heights";

/// Module label recorded in `processed_blocks` for genesis migrations.
pub const GENESIS_MODULE: &str = "genesis";

/// Tables whose contents depend on chain height, in backend order.
pub const HEIGHT_DEPENDENT_TABLES: [&str; 9] = [
    // Registry backend.
    ENTITIES,
    NODES,
    RUNTIMES,
    // Staking backend.
    ACCOUNTS,
    ALLOWANCES,
    DELEGATIONS,
    DEBONDING_DELEGATIONS,
    // Governance backend.
    PROPOSALS,
    VOTES,
];

pub fn checkpoint_table(table: &str) -> String {
    format!("{table}_checkpoint")
}

// Quantities are TEXT: NUMERIC affinity would coerce values beyond i64 to REAL.
const TABLE_DEFINITIONS: [(&str, &str); 11] = [
    (ENTITIES, "id TEXT PRIMARY KEY"),
    (
        NODES,
        "id TEXT PRIMARY KEY,
        entity_id TEXT NOT NULL,
        expiration INTEGER NOT NULL,
        tls_pubkey TEXT NOT NULL,
        tls_next_pubkey TEXT,
        p2p_pubkey TEXT NOT NULL,
        consensus_pubkey TEXT NOT NULL,
        roles TEXT NOT NULL",
    ),
    (
        RUNTIMES,
        "id TEXT PRIMARY KEY,
        suspended BOOLEAN NOT NULL DEFAULT false,
        kind TEXT NOT NULL,
        tee_hardware TEXT NOT NULL,
        key_manager TEXT NOT NULL",
    ),
    (
        ACCOUNTS,
        "address TEXT PRIMARY KEY,
        general_balance TEXT NOT NULL,
        nonce INTEGER NOT NULL,
        escrow_balance_active TEXT NOT NULL,
        escrow_total_shares_active TEXT NOT NULL,
        escrow_balance_debonding TEXT NOT NULL,
        escrow_total_shares_debonding TEXT NOT NULL",
    ),
    (
        ALLOWANCES,
        "owner TEXT NOT NULL,
        beneficiary TEXT NOT NULL,
        allowance TEXT NOT NULL,
        PRIMARY KEY (owner, beneficiary)",
    ),
    (
        DELEGATIONS,
        "delegatee TEXT NOT NULL,
        delegator TEXT NOT NULL,
        shares TEXT NOT NULL,
        PRIMARY KEY (delegatee, delegator)",
    ),
    (
        DEBONDING_DELEGATIONS,
        "delegatee TEXT NOT NULL,
        delegator TEXT NOT NULL,
        shares TEXT NOT NULL,
        debond_end INTEGER NOT NULL",
    ),
    (
        PROPOSALS,
        "id INTEGER PRIMARY KEY,
        submitter TEXT NOT NULL,
        state TEXT NOT NULL,
        deposit TEXT NOT NULL,
        handler TEXT,
        cp_target_version TEXT,
        rhp_target_version TEXT,
        rcp_target_version TEXT,
        upgrade_epoch INTEGER,
        cancels INTEGER,
        created_at INTEGER NOT NULL,
        closes_at INTEGER NOT NULL,
        invalid_votes INTEGER NOT NULL DEFAULT 0",
    ),
    (
        VOTES,
        "proposal INTEGER NOT NULL,
        voter TEXT NOT NULL,
        vote TEXT NOT NULL,
        PRIMARY KEY (proposal, voter)",
    ),
    (
        PROCESSED_BLOCKS,
        "height INTEGER NOT NULL,
        module TEXT NOT NULL,
        processed_time TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (height, module)",
    ),
    (
        CHECKPOINTED_HEIGHTS,
        "height INTEGER PRIMARY KEY,
        checkpoint_time TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP",
    ),
];

/// `CREATE TABLE IF NOT EXISTS` statements for every table of a chain schema.
pub fn create_statements(schema: &str) -> Vec<String> {
    let mut statements: Vec<String> = TABLE_DEFINITIONS
        .iter()
        .map(|(table, columns)| {
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n        {columns}\n    );",
                qualified(schema, table)
            )
        })
        .collect();
    statements.push(format!(
        "CREATE INDEX IF NOT EXISTS {}.nodes_entity_id_idx ON {NODES} (entity_id);",
        super::sql::quote_ident(schema)
    ));
    statements
}
