//! Genesis document model.
//!
//! Field shapes follow the upstream protocol's JSON encoding. Every map that
//! feeds a flattened table is a [`BTreeMap`], so iteration is sorted by key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::keys::PublicKey;
use super::quantity::Quantity;
use super::signature::{SignedEntity, SignedNode};
use crate::error::DocumentError;

/// Staking account address (bech32 text, treated as opaque).
pub type Address = String;

/// Full snapshot of a chain's state at `height`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisDocument {
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub genesis_time: Option<String>,
    pub chain_id: String,
    #[serde(default)]
    pub registry: RegistryGenesis,
    #[serde(default)]
    pub staking: StakingGenesis,
    #[serde(default)]
    pub governance: GovernanceGenesis,
}

impl GenesisDocument {
    pub fn from_json(raw: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryGenesis {
    pub entities: Vec<SignedEntity>,
    pub nodes: Vec<SignedNode>,
    pub runtimes: Vec<Runtime>,
    pub suspended_runtimes: Vec<Runtime>,
}

/// Registered entity descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: PublicKey,
    #[serde(default)]
    pub nodes: Vec<PublicKey>,
}

/// Registered node descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: PublicKey,
    pub entity_id: PublicKey,
    #[serde(default)]
    pub expiration: u64,
    pub tls: TlsInfo,
    pub p2p: P2pInfo,
    pub consensus: ConsensusInfo,
    #[serde(default)]
    pub roles: RoleMask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsInfo {
    pub pub_key: PublicKey,
    #[serde(default)]
    pub next_pub_key: Option<PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pInfo {
    pub id: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusInfo {
    pub id: PublicKey,
}

/// Node role bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMask(pub u32);

impl RoleMask {
    pub const COMPUTE_WORKER: u32 = 1 << 0;
    pub const STORAGE_WORKER: u32 = 1 << 1;
    pub const KEY_MANAGER: u32 = 1 << 2;
    pub const VALIDATOR: u32 = 1 << 3;
    pub const CONSENSUS_RPC: u32 = 1 << 4;
    pub const STORAGE_RPC: u32 = 1 << 5;

    const NAMES: [(u32, &'static str); 6] = [
        (Self::COMPUTE_WORKER, "compute"),
        (Self::STORAGE_WORKER, "storage"),
        (Self::KEY_MANAGER, "key-manager"),
        (Self::VALIDATOR, "validator"),
        (Self::CONSENSUS_RPC, "consensus-rpc"),
        (Self::STORAGE_RPC, "storage-rpc"),
    ];
}

impl fmt::Display for RoleMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("none");
        }
        let known = Self::NAMES.iter().fold(0, |acc, (bit, _)| acc | bit);
        let mut names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if self.0 & !known != 0 {
            names.push("unknown");
        }
        f.write_str(&names.join(","))
    }
}

/// Runtime descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    pub id: String,
    pub kind: RuntimeKind,
    #[serde(default)]
    pub tee_hardware: TeeHardware,
    #[serde(default)]
    pub key_manager: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Compute,
    Keymanager,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuntimeKind::Compute => "compute",
            RuntimeKind::Keymanager => "keymanager",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeeHardware {
    #[default]
    None,
    IntelSgx,
}

impl fmt::Display for TeeHardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TeeHardware::None => "none",
            TeeHardware::IntelSgx => "intel-sgx",
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingGenesis {
    pub ledger: BTreeMap<Address, Account>,
    /// delegatee -> delegator -> delegation
    pub delegations: BTreeMap<Address, BTreeMap<Address, Delegation>>,
    /// delegatee -> delegator -> debonding entries
    pub debonding_delegations: BTreeMap<Address, BTreeMap<Address, Vec<DebondingDelegation>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub general: GeneralAccount,
    pub escrow: EscrowAccount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralAccount {
    pub balance: Quantity,
    pub nonce: u64,
    /// beneficiary -> amount
    pub allowances: BTreeMap<Address, Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowAccount {
    pub active: SharePool,
    pub debonding: SharePool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharePool {
    pub balance: Quantity,
    pub total_shares: Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub shares: Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebondingDelegation {
    pub shares: Quantity,
    pub debond_end: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceGenesis {
    pub proposals: Vec<Proposal>,
    /// proposal id -> votes cast
    pub vote_entries: BTreeMap<u64, Vec<VoteEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub submitter: Address,
    pub state: ProposalState,
    pub deposit: Quantity,
    pub content: ProposalContent,
    pub created_at: u64,
    pub closes_at: u64,
    #[serde(default)]
    pub invalid_votes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalState {
    Active,
    Passed,
    Rejected,
    Failed,
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProposalState::Active => "active",
            ProposalState::Passed => "passed",
            ProposalState::Rejected => "rejected",
            ProposalState::Failed => "failed",
        })
    }
}

/// Stored proposal payload; exactly one field is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalContent {
    pub upgrade: Option<UpgradeProposal>,
    pub cancel_upgrade: Option<CancelUpgradeProposal>,
}

/// Resolved proposal variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalKind<'a> {
    Upgrade(&'a UpgradeProposal),
    CancelUpgrade(&'a CancelUpgradeProposal),
}

impl Proposal {
    pub fn kind(&self) -> Result<ProposalKind<'_>, DocumentError> {
        match (&self.content.upgrade, &self.content.cancel_upgrade) {
            (Some(upgrade), None) => Ok(ProposalKind::Upgrade(upgrade)),
            (None, Some(cancel)) => Ok(ProposalKind::CancelUpgrade(cancel)),
            _ => Err(DocumentError::MalformedProposal { id: self.id }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeProposal {
    pub handler: String,
    pub target: ProtocolVersions,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersions {
    pub consensus_protocol: Version,
    pub runtime_host_protocol: Version,
    pub runtime_committee_protocol: Version,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelUpgradeProposal {
    pub proposal_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEntry {
    pub voter: Address,
    pub vote: Vote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Yes,
    No,
    Abstain,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Vote::Yes => "yes",
            Vote::No => "no",
            Vote::Abstain => "abstain",
        })
    }
}
