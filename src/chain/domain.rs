use crate::shared::types::{CommitteeIndex, Epoch, Pubkey, Slot, ValidatorIndex, H160, H256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Optional data sources a beacon node may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Block attestations and committees decode into per-validator inclusion distances.
    AttestationInclusion,
    /// The node answers the validator liveness endpoint.
    ValidatorLiveness,
    /// Relay data APIs report which builder delivered a payload.
    BuilderHeaders,
}

/// Capabilities negotiated once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(HashSet<Capability>);

impl CapabilitySet {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self(capabilities.into_iter().collect())
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

/// Validator status as reported by the beacon API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    PendingInitialized,
    PendingQueued,
    ActiveOngoing,
    ActiveExiting,
    ActiveSlashed,
    ExitedUnslashed,
    ExitedSlashed,
    WithdrawalPossible,
    WithdrawalDone,
}

impl ValidatorStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, ValidatorStatus::PendingInitialized | ValidatorStatus::PendingQueued)
    }

    pub fn is_queued(&self) -> bool {
        *self == ValidatorStatus::PendingQueued
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ValidatorStatus::ActiveOngoing | ValidatorStatus::ActiveExiting | ValidatorStatus::ActiveSlashed
        )
    }

    pub fn is_exited(&self) -> bool {
        matches!(
            self,
            ValidatorStatus::ExitedUnslashed
                | ValidatorStatus::ExitedSlashed
                | ValidatorStatus::WithdrawalPossible
                | ValidatorStatus::WithdrawalDone
        )
    }
}

/// Coarse lifecycle used by the registry and for transition detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    Pending,
    Active,
    Exited,
    Slashed,
}

/// A validator record as returned by the beacon node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainValidator {
    pub index: ValidatorIndex,
    pub pubkey: Pubkey,
    pub status: ValidatorStatus,
    pub slashed: bool,
}

impl Lifecycle {
    /// Slashing dominates: a slashed validator stays `Slashed` after it exits.
    pub fn of(status: ValidatorStatus, slashed: bool) -> Self {
        if slashed {
            Lifecycle::Slashed
        } else if status.is_exited() {
            Lifecycle::Exited
        } else if status.is_active() {
            Lifecycle::Active
        } else {
            Lifecycle::Pending
        }
    }
}

impl ChainValidator {
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::of(self.status, self.slashed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposerDutyData {
    pub slot: Slot,
    pub validator_index: ValidatorIndex,
    pub pubkey: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeData {
    pub slot: Slot,
    pub index: CommitteeIndex,
    pub validators: Vec<ValidatorIndex>,
}

/// An attestation aggregate found in a block body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAttestation {
    pub slot: Slot,
    pub committee_index: CommitteeIndex,
    /// Hex SSZ bitlist.
    pub aggregation_bits: String,
    /// Hex SSZ bitvector of committees covered, present from Electra on.
    pub committee_bits: Option<String>,
}

/// The canonical block observed at a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedBlock {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub fee_recipient: Option<H160>,
    pub execution_block_number: Option<u64>,
    pub attestations: Vec<BlockAttestation>,
}

/// Relay metadata for a payload delivered through a builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderHeader {
    pub relay: String,
    pub builder_pubkey: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTransaction {
    pub from: H160,
    pub to: Option<H160>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionBlockInfo {
    pub number: u64,
    pub fee_recipient: H160,
    pub last_transaction: Option<ExecutionTransaction>,
}

/// Capability-negotiated access to a beacon node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn capabilities(&self) -> &CapabilitySet;

    /// Slot of the current canonical head block.
    async fn head_slot(&self) -> crate::Result<Slot>;

    async fn finalized_epoch(&self) -> crate::Result<Epoch>;

    async fn proposer_duties(&self, epoch: Epoch) -> crate::Result<Vec<ProposerDutyData>>;

    async fn committees(&self, epoch: Epoch) -> crate::Result<Vec<CommitteeData>>;

    /// Canonical block at `slot`, `None` when the slot is empty.
    async fn block(&self, slot: Slot) -> crate::Result<Option<ObservedBlock>>;

    /// Validator records for `pubkeys`; an empty filter returns the whole set.
    async fn validators(&self, pubkeys: &[Pubkey]) -> crate::Result<Vec<ChainValidator>>;

    /// Only meaningful with `Capability::ValidatorLiveness`.
    async fn liveness(
        &self,
        epoch: Epoch,
        indexes: &[ValidatorIndex],
    ) -> crate::Result<HashMap<ValidatorIndex, bool>>;

    /// Only meaningful with `Capability::BuilderHeaders`.
    async fn builder_header(&self, slot: Slot) -> crate::Result<Option<BuilderHeader>>;
}

/// Resolves execution blocks for the fee recipient check.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn block_info(&self, number: u64) -> crate::Result<ExecutionBlockInfo>;
}

/// ETH/USD quotes.
#[async_trait]
pub trait PriceClient: Send + Sync {
    async fn eth_usd(&self) -> crate::Result<f64>;
}
