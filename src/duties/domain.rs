use crate::chain::domain::ObservedBlock;
use crate::shared::types::{CommitteeIndex, Epoch, Pubkey, Slot, ValidatorIndex};
use serde::{Deserialize, Serialize};

/// Where a proposal duty stands against the latest canonical view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    Pending,
    Proposed,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalDuty {
    pub validator_index: ValidatorIndex,
    pub pubkey: Pubkey,
    pub slot: Slot,
    pub state: ProposalState,
}

/// A proposal duty whose state changed during a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalResolution {
    pub duty: ProposalDuty,
    pub previous: ProposalState,
    /// The canonical block when the duty resolved to `Proposed`.
    pub block: Option<ObservedBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationDuty {
    pub validator_index: ValidatorIndex,
    pub epoch: Epoch,
    pub slot: Slot,
    pub committee_index: CommitteeIndex,
    pub committee_position: usize,
    /// Smallest inclusion distance observed so far.
    pub inclusion_distance: Option<u64>,
}

impl AttestationDuty {
    pub fn record_inclusion(&mut self, distance: u64) {
        self.inclusion_distance = Some(match self.inclusion_distance {
            Some(current) => current.min(distance),
            None => distance,
        });
    }
}
