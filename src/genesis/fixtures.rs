//! Deterministic genesis fixtures shared by test suites.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use serde::Serialize;

use super::document::{
    Account, CancelUpgradeProposal, ConsensusInfo, DebondingDelegation, Delegation, Entity,
    GenesisDocument, Node, P2pInfo, Proposal, ProposalContent, ProposalState, ProtocolVersions,
    RoleMask, Runtime, RuntimeKind, TeeHardware, TlsInfo, UpgradeProposal, Version, Vote,
    VoteEntry,
};
use super::keys::PublicKey;
use super::quantity::Quantity;
use super::signature::{
    signer_message, Signature, Signed, SignedEntity, SignedNode, REGISTER_ENTITY_CONTEXT,
    REGISTER_NODE_CONTEXT,
};

pub const BIG_BALANCE: &str = "123456789012345678901234567890";

fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn entity_key(seed: u8) -> PublicKey {
    PublicKey::from_bytes(signing_key(seed).verifying_key().to_bytes())
}

pub fn sign<T: Serialize>(seed: u8, context: &str, body: &T) -> Signed {
    let key = signing_key(seed);
    let raw = serde_json::to_vec(body).expect("encode body");
    let signature = key.sign(&signer_message(context, &raw));
    Signed {
        untrusted_raw_value: STANDARD.encode(&raw),
        signature: Signature {
            public_key: entity_key(seed),
            signature: STANDARD.encode(signature.to_bytes()),
        },
    }
}

pub fn signed_entity(seed: u8, node_seeds: &[u8]) -> SignedEntity {
    let entity = Entity {
        id: entity_key(seed),
        nodes: node_seeds.iter().map(|s| entity_key(*s)).collect(),
    };
    SignedEntity(sign(seed, REGISTER_ENTITY_CONTEXT, &entity))
}

pub fn node(seed: u8, entity_seed: u8) -> Node {
    Node {
        id: entity_key(seed),
        entity_id: entity_key(entity_seed),
        expiration: 42,
        tls: TlsInfo {
            pub_key: entity_key(seed.wrapping_add(100)),
            next_pub_key: None,
        },
        p2p: P2pInfo {
            id: entity_key(seed.wrapping_add(101)),
        },
        consensus: ConsensusInfo {
            id: entity_key(seed.wrapping_add(102)),
        },
        roles: RoleMask(RoleMask::VALIDATOR),
    }
}

pub fn signed_node(seed: u8, entity_seed: u8) -> SignedNode {
    SignedNode(sign(seed, REGISTER_NODE_CONTEXT, &node(seed, entity_seed)))
}

pub fn runtime(id: &str) -> Runtime {
    Runtime {
        id: id.to_string(),
        kind: RuntimeKind::Compute,
        tee_hardware: TeeHardware::None,
        key_manager: None,
    }
}

pub fn account(balance: &str, nonce: u64) -> Account {
    let mut account = Account::default();
    account.general.balance = balance.parse().expect("balance");
    account.general.nonce = nonce;
    account.escrow.active.balance = Quantity::from(100u64);
    account.escrow.active.total_shares = Quantity::from(100u64);
    account
}

fn versions() -> ProtocolVersions {
    ProtocolVersions {
        consensus_protocol: Version {
            major: 5,
            minor: 0,
            patch: 0,
        },
        runtime_host_protocol: Version {
            major: 5,
            minor: 1,
            patch: 0,
        },
        runtime_committee_protocol: Version {
            major: 4,
            minor: 0,
            patch: 0,
        },
    }
}

pub fn upgrade_proposal(id: u64) -> Proposal {
    Proposal {
        id,
        submitter: "oasis1submitter".to_string(),
        state: ProposalState::Passed,
        deposit: Quantity::from(10_000u64),
        content: ProposalContent {
            upgrade: Some(UpgradeProposal {
                handler: "consensus-v2".to_string(),
                target: versions(),
                epoch: 300,
            }),
            cancel_upgrade: None,
        },
        created_at: 10,
        closes_at: 20,
        invalid_votes: 1,
    }
}

pub fn cancel_proposal(id: u64, cancels: u64) -> Proposal {
    Proposal {
        id,
        submitter: "oasis1submitter".to_string(),
        state: ProposalState::Active,
        deposit: Quantity::from(10_000u64),
        content: ProposalContent {
            upgrade: None,
            cancel_upgrade: Some(CancelUpgradeProposal { proposal_id: cancels }),
        },
        created_at: 21,
        closes_at: 31,
        invalid_votes: 0,
    }
}

/// A document with every backend populated.
pub fn sample_document() -> GenesisDocument {
    let mut doc = GenesisDocument {
        height: 8_048_956,
        chain_id: "Oasis-Test 3".to_string(),
        ..Default::default()
    };

    doc.registry.entities = vec![signed_entity(1, &[10, 11]), signed_entity(2, &[])];
    doc.registry.nodes = vec![signed_node(10, 1)];
    doc.registry.runtimes = vec![runtime("R1")];
    let mut suspended = runtime("R0");
    suspended.key_manager = Some("KM".to_string());
    suspended.tee_hardware = TeeHardware::IntelSgx;
    doc.registry.suspended_runtimes = vec![suspended];

    let mut alice = account(BIG_BALANCE, 7);
    alice
        .general
        .allowances
        .insert("oasis1bob".to_string(), Quantity::from(5u64));
    doc.staking.ledger.insert("oasis1alice".to_string(), alice);
    doc.staking
        .ledger
        .insert("oasis1bob".to_string(), account("0", 0));
    doc.staking.delegations.insert(
        "oasis1alice".to_string(),
        [(
            "oasis1bob".to_string(),
            Delegation {
                shares: Quantity::from(50u64),
            },
        )]
        .into_iter()
        .collect(),
    );
    doc.staking.debonding_delegations.insert(
        "oasis1alice".to_string(),
        [(
            "oasis1bob".to_string(),
            vec![
                DebondingDelegation {
                    shares: Quantity::from(3u64),
                    debond_end: 100,
                },
                DebondingDelegation {
                    shares: Quantity::from(4u64),
                    debond_end: 101,
                },
            ],
        )]
        .into_iter()
        .collect(),
    );

    doc.governance.proposals = vec![cancel_proposal(2, 1), upgrade_proposal(1)];
    doc.governance.vote_entries.insert(
        1,
        vec![
            VoteEntry {
                voter: "oasis1bob".to_string(),
                vote: Vote::Yes,
            },
            VoteEntry {
                voter: "oasis1alice".to_string(),
                vote: Vote::No,
            },
        ],
    );
    doc
}
