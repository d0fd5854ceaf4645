use crate::chain::domain::{BlockAttestation, ChainClient, CommitteeData, ObservedBlock, ProposerDutyData};
use crate::duties::domain::{AttestationDuty, ProposalDuty, ProposalResolution, ProposalState};
use crate::infrastructure::config::WatcherConfig;
use crate::registry::WatchedSet;
use crate::shared::constants::watcher;
use crate::shared::error::WatcherError;
use crate::shared::types::{epoch_of, first_slot_of, CommitteeIndex, Epoch, Slot, ValidatorIndex, H256};
use crate::shared::utils::bits;
use crate::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub miss_confirmation_slots: u64,
    pub reorg_window_slots: u64,
    pub max_lookback_epochs: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            miss_confirmation_slots: watcher::DEFAULT_MISS_CONFIRMATION_SLOTS,
            reorg_window_slots: watcher::DEFAULT_REORG_WINDOW_SLOTS,
            max_lookback_epochs: watcher::DEFAULT_MAX_DUTY_LOOKBACK_EPOCHS,
        }
    }
}

impl From<&WatcherConfig> for TrackerSettings {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            miss_confirmation_slots: config.miss_confirmation_slots,
            reorg_window_slots: config.reorg_window_slots,
            max_lookback_epochs: config.max_duty_lookback_epochs,
        }
    }
}

/// Tells apart two blocks observed at the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockIdentity {
    proposer_index: ValidatorIndex,
    parent_root: H256,
}

impl BlockIdentity {
    fn of(block: &ObservedBlock) -> Self {
        Self {
            proposer_index: block.proposer_index,
            parent_root: block.parent_root,
        }
    }
}

/// Duties of the watched validators for one epoch.
#[derive(Debug, Default)]
struct EpochDuties {
    /// Predicted ahead of the epoch with the previous watched set.
    provisional: bool,
    proposals: BTreeMap<Slot, ProposalDuty>,
    attestations: BTreeMap<ValidatorIndex, AttestationDuty>,
    committee_sizes: HashMap<Slot, BTreeMap<CommitteeIndex, usize>>,
    /// (committee position, validator) of watched members per committee.
    watched_members: HashMap<(Slot, CommitteeIndex), Vec<(usize, ValidatorIndex)>>,
    /// Inclusion distance per watched validator, keyed by the including block's slot.
    inclusions: HashMap<ValidatorIndex, BTreeMap<Slot, u64>>,
    /// Blocks that supplied the inclusions above.
    sources: BTreeMap<Slot, BlockIdentity>,
}

impl EpochDuties {
    fn build(
        epoch: Epoch,
        proposers: Vec<ProposerDutyData>,
        committees: Vec<CommitteeData>,
        watched: &WatchedSet,
        provisional: bool,
    ) -> Self {
        let mut duties = EpochDuties {
            provisional,
            ..Default::default()
        };

        for proposer in proposers {
            if epoch_of(proposer.slot) != epoch || !watched.contains(proposer.validator_index) {
                continue;
            }
            duties.proposals.insert(
                proposer.slot,
                ProposalDuty {
                    validator_index: proposer.validator_index,
                    pubkey: proposer.pubkey,
                    slot: proposer.slot,
                    state: ProposalState::Pending,
                },
            );
        }

        for committee in committees {
            if epoch_of(committee.slot) != epoch {
                continue;
            }
            duties
                .committee_sizes
                .entry(committee.slot)
                .or_default()
                .insert(committee.index, committee.validators.len());

            for (position, validator_index) in committee.validators.iter().copied().enumerate() {
                if !watched.contains(validator_index) {
                    continue;
                }
                duties
                    .watched_members
                    .entry((committee.slot, committee.index))
                    .or_default()
                    .push((position, validator_index));
                duties.attestations.insert(
                    validator_index,
                    AttestationDuty {
                        validator_index,
                        epoch,
                        slot: committee.slot,
                        committee_index: committee.index,
                        committee_position: position,
                        inclusion_distance: None,
                    },
                );
            }
        }

        duties
    }

    /// Keeps what was already learned about duties that survive a re-prediction.
    fn carry_over(&mut self, previous: &EpochDuties) {
        for (slot, duty) in self.proposals.iter_mut() {
            if let Some(old) = previous.proposals.get(slot) {
                if old.validator_index == duty.validator_index {
                    duty.state = old.state;
                }
            }
        }

        for (validator_index, duty) in self.attestations.iter_mut() {
            if let Some(old) = previous.attestations.get(validator_index) {
                if old.slot == duty.slot && old.committee_index == duty.committee_index {
                    duty.inclusion_distance = old.inclusion_distance;
                    if let Some(inclusions) = previous.inclusions.get(validator_index) {
                        self.inclusions.insert(*validator_index, inclusions.clone());
                    }
                }
            }
        }
        self.sources = previous.sources.clone();
    }

    /// Drops every inclusion supplied by the block at `block_slot`. Returns
    /// how many watched inclusions were dropped.
    fn forget_block(&mut self, block_slot: Slot) -> usize {
        if self.sources.remove(&block_slot).is_none() {
            return 0;
        }

        let mut dropped = 0;
        for (validator_index, inclusions) in self.inclusions.iter_mut() {
            if inclusions.remove(&block_slot).is_none() {
                continue;
            }
            dropped += 1;
            if let Some(duty) = self.attestations.get_mut(validator_index) {
                duty.inclusion_distance = inclusions.values().min().copied();
            }
        }
        self.inclusions.retain(|_, inclusions| !inclusions.is_empty());
        dropped
    }

    fn record_attestation(
        &mut self,
        attestation: &BlockAttestation,
        block: &ObservedBlock,
    ) -> std::result::Result<usize, WatcherError> {
        let distance = block.slot - attestation.slot;
        // (committee, offset of the committee inside the aggregation bits)
        let covered: Vec<(CommitteeIndex, usize)> = match &attestation.committee_bits {
            None => vec![(attestation.committee_index, 0)],
            Some(committee_bits) => {
                let sizes = self.committee_sizes.get(&attestation.slot).ok_or_else(|| {
                    WatcherError::MissingData(format!("no committees known for slot {}", attestation.slot))
                })?;
                let mut offset = 0;
                let mut covered = Vec::new();
                for committee in bits::set_positions(committee_bits)? {
                    let committee = committee as CommitteeIndex;
                    let size = *sizes.get(&committee).ok_or_else(|| {
                        WatcherError::MissingData(format!(
                            "committee {} unknown at slot {}",
                            committee, attestation.slot
                        ))
                    })?;
                    covered.push((committee, offset));
                    offset += size;
                }
                covered
            }
        };

        let slot = attestation.slot;
        if !covered
            .iter()
            .any(|(committee, _)| self.watched_members.contains_key(&(slot, *committee)))
        {
            return Ok(0);
        }

        let aggregation = bits::decode_bitlist(&attestation.aggregation_bits)?;

        let mut recorded = 0;
        for (committee, offset) in covered {
            let Some(members) = self.watched_members.get(&(slot, committee)) else {
                continue;
            };
            for &(position, validator_index) in members {
                if aggregation.get(offset + position).copied().unwrap_or(false) {
                    if let Some(duty) = self.attestations.get_mut(&validator_index) {
                        duty.record_inclusion(distance);
                        self.inclusions
                            .entry(validator_index)
                            .or_default()
                            .insert(block.slot, distance);
                        self.sources.insert(block.slot, BlockIdentity::of(block));
                        recorded += 1;
                    }
                }
            }
        }

        Ok(recorded)
    }
}

/// Predicts and resolves duties of the watched validators.
pub struct DutyTracker {
    settings: TrackerSettings,
    epochs: BTreeMap<Epoch, EpochDuties>,
    /// Slots already announced as upcoming proposals.
    announced: BTreeSet<Slot>,
}

impl DutyTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            epochs: BTreeMap::new(),
            announced: BTreeSet::new(),
        }
    }

    /// Fetches proposer duties and committees for `epoch` and keeps the ones
    /// belonging to `watched`. Replaces any earlier prediction for that epoch.
    pub async fn predict_epoch(
        &mut self,
        epoch: Epoch,
        watched: &WatchedSet,
        client: &dyn ChainClient,
        provisional: bool,
    ) -> Result<()> {
        let (proposers, committees) =
            tokio::try_join!(client.proposer_duties(epoch), client.committees(epoch))?;

        let mut duties = EpochDuties::build(epoch, proposers, committees, watched, provisional);
        if let Some(previous) = self.epochs.remove(&epoch) {
            duties.carry_over(&previous);
        }

        info!(
            "Epoch {}{}: {} proposal duties and {} attestation duties for watched validators",
            epoch,
            if provisional { " (lookahead)" } else { "" },
            duties.proposals.len(),
            duties.attestations.len()
        );

        self.epochs.insert(epoch, duties);
        Ok(())
    }

    /// Whether `epoch` has been predicted with its own watched set.
    pub fn is_predicted(&self, epoch: Epoch) -> bool {
        self.epochs.get(&epoch).map_or(false, |duties| !duties.provisional)
    }

    pub fn has_duties_for(&self, epoch: Epoch) -> bool {
        self.epochs.contains_key(&epoch)
    }

    /// Records inclusion distances of watched attestations carried by `block`.
    pub fn record_block(&mut self, block: &ObservedBlock) -> usize {
        let mut recorded = 0;

        for attestation in &block.attestations {
            if attestation.slot >= block.slot {
                continue;
            }
            let Some(duties) = self.epochs.get_mut(&epoch_of(attestation.slot)) else {
                continue;
            };

            match duties.record_attestation(attestation, block) {
                Ok(count) => recorded += count,
                Err(e) => warn!(
                    "Skipping attestation for slot {} in block {}: {}",
                    attestation.slot, block.slot, e
                ),
            }
        }

        if recorded > 0 {
            debug!("Block {} included {} watched attestations", block.slot, recorded);
        }
        recorded
    }

    /// Slots of the blocks that supplied inclusions for duties of `epoch`.
    pub fn inclusion_sources(&self, epoch: Epoch) -> Vec<Slot> {
        self.epochs
            .get(&epoch)
            .map(|duties| duties.sources.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Compares the block recorded at `slot` with the canonical one. When it
    /// was orphaned its inclusions are dropped and the replacement, if any, is
    /// recorded instead. Returns true when the recorded block was orphaned.
    pub fn reconcile_block(&mut self, slot: Slot, canonical: Option<&ObservedBlock>) -> bool {
        let recorded = self
            .epochs
            .values()
            .find_map(|duties| duties.sources.get(&slot).copied());
        let Some(recorded) = recorded else {
            return false;
        };
        if canonical.map(BlockIdentity::of) == Some(recorded) {
            return false;
        }

        let dropped: usize = self.epochs.values_mut().map(|duties| duties.forget_block(slot)).sum();
        info!(
            "Block at slot {} is no longer canonical, dropped {} watched inclusions",
            slot, dropped
        );
        if let Some(block) = canonical {
            self.record_block(block);
        }
        true
    }

    /// Re-reads the blocks that supplied inclusions for `epoch` so orphaned
    /// ones stop counting. Returns how many were orphaned.
    pub async fn verify_inclusions(&mut self, epoch: Epoch, client: &dyn ChainClient) -> usize {
        let mut orphaned = 0;
        for slot in self.inclusion_sources(epoch) {
            match client.block(slot).await {
                Ok(canonical) => {
                    if self.reconcile_block(slot, canonical.as_ref()) {
                        orphaned += 1;
                    }
                }
                Err(e) => warn!("Could not re-check block at slot {}, keeping its inclusions: {}", slot, e),
            }
        }
        orphaned
    }

    /// Re-evaluates every proposal duty that is still pending or young enough
    /// to be reorged, against the canonical chain as of `head`.
    pub async fn resolve_slots(
        &mut self,
        head: Slot,
        finalized_epoch: Epoch,
        client: &dyn ChainClient,
    ) -> Vec<ProposalResolution> {
        let finalized_slot = first_slot_of(finalized_epoch);
        let window = self.settings.reorg_window_slots;

        let candidates: Vec<Slot> = self
            .epochs
            .values()
            .flat_map(|duties| duties.proposals.values())
            .filter(|duty| duty.slot <= head)
            .filter(|duty| {
                duty.state == ProposalState::Pending
                    || (duty.slot > finalized_slot && head - duty.slot <= window)
            })
            .map(|duty| duty.slot)
            .collect();

        let mut resolutions = Vec::new();
        for slot in candidates {
            match client.block(slot).await {
                Ok(block) => {
                    if let Some(resolution) = self.apply_observation(slot, head, block) {
                        resolutions.push(resolution);
                    }
                }
                Err(e) => warn!("Could not fetch block at slot {}, keeping its duty as is: {}", slot, e),
            }
        }

        resolutions
    }

    /// Classifies the duty at `slot` given the canonical `block` there (if any)
    /// and the current head. An empty slot only counts as missed once the head
    /// is at least `miss_confirmation_slots` past it.
    pub fn apply_observation(
        &mut self,
        slot: Slot,
        head: Slot,
        block: Option<ObservedBlock>,
    ) -> Option<ProposalResolution> {
        let confirmation = self.settings.miss_confirmation_slots;
        let duty = self.epochs.get_mut(&epoch_of(slot))?.proposals.get_mut(&slot)?;

        let proposed = block
            .as_ref()
            .map_or(false, |block| block.proposer_index == duty.validator_index);

        let next = if proposed {
            ProposalState::Proposed
        } else if head >= slot + confirmation {
            ProposalState::Missed
        } else {
            return None;
        };

        if next == duty.state {
            return None;
        }

        let previous = duty.state;
        duty.state = next;

        Some(ProposalResolution {
            duty: duty.clone(),
            previous,
            block: if proposed { block } else { None },
        })
    }

    /// Future proposals not announced before.
    pub fn take_new_upcoming(&mut self, head: Slot) -> Vec<ProposalDuty> {
        let mut fresh = Vec::new();
        for duties in self.epochs.values() {
            for duty in duties.proposals.values() {
                if duty.slot > head && duty.state == ProposalState::Pending && self.announced.insert(duty.slot) {
                    fresh.push(duty.clone());
                }
            }
        }
        fresh
    }

    pub fn future_proposals(&self, head: Slot) -> usize {
        self.epochs
            .values()
            .flat_map(|duties| duties.proposals.values())
            .filter(|duty| duty.slot > head)
            .count()
    }

    pub fn proposal(&self, slot: Slot) -> Option<&ProposalDuty> {
        self.epochs.get(&epoch_of(slot))?.proposals.get(&slot)
    }

    /// Attestation duties of `epoch`, `None` when that epoch was never predicted.
    pub fn attestation_duties(&self, epoch: Epoch) -> Option<Vec<AttestationDuty>> {
        self.epochs
            .get(&epoch)
            .map(|duties| duties.attestations.values().cloned().collect())
    }

    /// Drops epochs older than the finalized epoch, or older than the lookback
    /// bound when finality stalls. Returns how many epochs were dropped.
    pub fn prune(&mut self, finalized_epoch: Epoch, current_epoch: Epoch) -> usize {
        let cutoff = finalized_epoch.max(current_epoch.saturating_sub(self.settings.max_lookback_epochs));
        let before = self.epochs.len();

        self.epochs = self.epochs.split_off(&cutoff);
        self.announced = self.announced.split_off(&first_slot_of(cutoff));

        let dropped = before - self.epochs.len();
        if dropped > 0 {
            debug!("Pruned {} epochs of duties older than epoch {}", dropped, cutoff);
        }
        dropped
    }

    pub fn tracked_epochs(&self) -> Vec<Epoch> {
        self.epochs.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::domain::ValidatorStatus;
    use crate::registry::Validator;
    use crate::shared::types::{Pubkey, H256};

    fn pubkey(index: u64) -> Pubkey {
        format!("0x{}", format!("{:02x}", index).repeat(48)).parse().unwrap()
    }

    fn watched(indexes: &[u64]) -> WatchedSet {
        WatchedSet::new(
            0,
            indexes.iter().map(|&index| Validator {
                pubkey: pubkey(index),
                index,
                status: ValidatorStatus::ActiveOngoing,
                slashed: false,
            }),
            Vec::new(),
        )
    }

    fn tracker_with(epoch: Epoch, proposers: &[(Slot, u64)], committees: Vec<CommitteeData>, watched_set: &WatchedSet) -> DutyTracker {
        let mut tracker = DutyTracker::new(TrackerSettings::default());
        let proposers = proposers
            .iter()
            .map(|&(slot, index)| ProposerDutyData {
                slot,
                validator_index: index,
                pubkey: pubkey(index),
            })
            .collect();
        tracker
            .epochs
            .insert(epoch, EpochDuties::build(epoch, proposers, committees, watched_set, false));
        tracker
    }

    fn block(slot: Slot, proposer_index: u64, attestations: Vec<BlockAttestation>) -> ObservedBlock {
        ObservedBlock {
            slot,
            proposer_index,
            parent_root: H256::default(),
            fee_recipient: None,
            execution_block_number: None,
            attestations,
        }
    }

    #[test]
    fn test_only_watched_duties_materialize() {
        let set = watched(&[10]);
        let committees = vec![CommitteeData { slot: 5, index: 0, validators: vec![7, 10, 11] }];
        let tracker = tracker_with(0, &[(3, 10), (4, 11)], committees, &set);

        assert!(tracker.proposal(3).is_some());
        assert!(tracker.proposal(4).is_none());
        let attestations = tracker.attestation_duties(0).unwrap();
        assert_eq!(attestations.len(), 1);
        assert_eq!(attestations[0].committee_position, 1);
        assert!(tracker.attestation_duties(1).is_none());
    }

    #[test]
    fn test_missed_only_after_confirmation() {
        let set = watched(&[10]);
        let mut tracker = tracker_with(0, &[(3, 10)], Vec::new(), &set);

        // Head still at the duty slot: too early to call it missed
        assert!(tracker.apply_observation(3, 3, None).is_none());
        assert_eq!(tracker.proposal(3).unwrap().state, ProposalState::Pending);

        let resolution = tracker.apply_observation(3, 4, None).unwrap();
        assert_eq!(resolution.duty.state, ProposalState::Missed);
        assert_eq!(resolution.previous, ProposalState::Pending);

        // Same view again: nothing new
        assert!(tracker.apply_observation(3, 5, None).is_none());
    }

    #[test]
    fn test_reorg_flips_outcome() {
        let set = watched(&[10]);
        let mut tracker = tracker_with(0, &[(3, 10)], Vec::new(), &set);

        let proposed = tracker.apply_observation(3, 3, Some(block(3, 10, Vec::new()))).unwrap();
        assert_eq!(proposed.duty.state, ProposalState::Proposed);
        assert!(proposed.block.is_some());

        let missed = tracker.apply_observation(3, 5, None).unwrap();
        assert_eq!(missed.duty.state, ProposalState::Missed);
        assert_eq!(missed.previous, ProposalState::Proposed);
    }

    #[test]
    fn test_foreign_proposer_counts_as_empty() {
        let set = watched(&[10]);
        let mut tracker = tracker_with(0, &[(3, 10)], Vec::new(), &set);
        let resolution = tracker.apply_observation(3, 4, Some(block(3, 99, Vec::new()))).unwrap();
        assert_eq!(resolution.duty.state, ProposalState::Missed);
        assert!(resolution.block.is_none());
    }

    #[test]
    fn test_record_block_inclusion_distance() {
        let set = watched(&[10, 12]);
        let committees = vec![
            CommitteeData { slot: 5, index: 0, validators: vec![7, 10, 11] },
            CommitteeData { slot: 5, index: 1, validators: vec![12, 13] },
        ];
        let mut tracker = tracker_with(0, &[], committees, &set);

        // Committee 0: positions 0 and 1 set (0b0000_1011, delimiter at 3)
        let late = block(7, 1, vec![BlockAttestation {
            slot: 5,
            committee_index: 0,
            aggregation_bits: "0x0b".to_string(),
            committee_bits: None,
        }]);
        assert_eq!(tracker.record_block(&late), 1);

        let early = block(6, 1, vec![BlockAttestation {
            slot: 5,
            committee_index: 0,
            aggregation_bits: "0x0b".to_string(),
            committee_bits: None,
        }]);
        assert_eq!(tracker.record_block(&early), 1);

        let duties = tracker.attestation_duties(0).unwrap();
        let ten = duties.iter().find(|d| d.validator_index == 10).unwrap();
        let twelve = duties.iter().find(|d| d.validator_index == 12).unwrap();
        assert_eq!(ten.inclusion_distance, Some(1));
        assert_eq!(twelve.inclusion_distance, None);
    }

    #[test]
    fn test_orphaned_block_inclusions_dropped() {
        let set = watched(&[10]);
        let committees = vec![CommitteeData { slot: 5, index: 0, validators: vec![10] }];
        let mut tracker = tracker_with(0, &[], committees, &set);

        // Position 0 set, delimiter at 1: 0b0000_0011
        let included = |slot| BlockAttestation {
            slot,
            committee_index: 0,
            aggregation_bits: "0x03".to_string(),
            committee_bits: None,
        };
        let fork = block(6, 1, vec![included(5)]);
        let canonical_late = block(8, 3, vec![included(5)]);

        assert_eq!(tracker.record_block(&fork), 1);
        assert_eq!(tracker.record_block(&canonical_late), 1);
        assert_eq!(tracker.attestation_duties(0).unwrap()[0].inclusion_distance, Some(1));
        assert_eq!(tracker.inclusion_sources(0), vec![6, 8]);

        // Still canonical: nothing changes
        assert!(!tracker.reconcile_block(8, Some(&canonical_late)));

        // Slot 6 reorged to empty: only the later inclusion counts
        assert!(tracker.reconcile_block(6, None));
        assert_eq!(tracker.attestation_duties(0).unwrap()[0].inclusion_distance, Some(3));
        assert_eq!(tracker.inclusion_sources(0), vec![8]);

        // Slot 8 replaced by a block from another proposer carrying nothing of ours
        let replacement = block(8, 4, Vec::new());
        assert!(tracker.reconcile_block(8, Some(&replacement)));
        assert_eq!(tracker.attestation_duties(0).unwrap()[0].inclusion_distance, None);
        assert!(tracker.inclusion_sources(0).is_empty());
    }

    #[test]
    fn test_record_block_with_committee_bits() {
        let set = watched(&[12]);
        let committees = vec![
            CommitteeData { slot: 5, index: 0, validators: vec![7, 10, 11] },
            CommitteeData { slot: 5, index: 1, validators: vec![13, 12] },
        ];
        let mut tracker = tracker_with(0, &[], committees, &set);

        // Committees 0 and 1 covered; bits 0..3 for committee 0, 3..5 for committee 1.
        // Position 4 (validator 12) set, delimiter at 5: 0b0011_0000
        let electra = block(6, 1, vec![BlockAttestation {
            slot: 5,
            committee_index: 0,
            aggregation_bits: "0x30".to_string(),
            committee_bits: Some("0x0300000000000000".to_string()),
        }]);
        assert_eq!(tracker.record_block(&electra), 1);
        assert_eq!(tracker.attestation_duties(0).unwrap()[0].inclusion_distance, Some(1));
    }

    #[test]
    fn test_malformed_attestation_is_skipped() {
        let set = watched(&[10]);
        let committees = vec![CommitteeData { slot: 5, index: 0, validators: vec![10] }];
        let mut tracker = tracker_with(0, &[], committees, &set);

        let bad = block(6, 1, vec![BlockAttestation {
            slot: 5,
            committee_index: 0,
            aggregation_bits: "0x00".to_string(),
            committee_bits: None,
        }]);
        assert_eq!(tracker.record_block(&bad), 0);
    }

    #[test]
    fn test_upcoming_announced_once() {
        let set = watched(&[10]);
        let mut tracker = tracker_with(0, &[(3, 10), (20, 10)], Vec::new(), &set);

        let fresh = tracker.take_new_upcoming(2);
        assert_eq!(fresh.len(), 2);
        assert!(tracker.take_new_upcoming(2).is_empty());
        assert_eq!(tracker.future_proposals(10), 1);
    }

    #[test]
    fn test_prune_uses_finality_then_lookback() {
        let set = watched(&[10]);
        let mut tracker = DutyTracker::new(TrackerSettings::default());
        for epoch in 0..10 {
            tracker
                .epochs
                .insert(epoch, EpochDuties::build(epoch, Vec::new(), Vec::new(), &set, false));
        }

        // Finality at 7 dominates the lookback bound (9 - 4 = 5)
        assert_eq!(tracker.prune(7, 9), 7);
        assert_eq!(tracker.tracked_epochs(), vec![7, 8, 9]);

        // Stalled finality: lookback keeps the last four epochs
        let mut stalled = DutyTracker::new(TrackerSettings::default());
        for epoch in 0..10 {
            stalled
                .epochs
                .insert(epoch, EpochDuties::build(epoch, Vec::new(), Vec::new(), &set, false));
        }
        stalled.prune(0, 9);
        assert_eq!(stalled.tracked_epochs(), vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_carry_over_keeps_resolution() {
        let set = watched(&[10]);
        let mut previous = EpochDuties::build(
            0,
            vec![ProposerDutyData { slot: 3, validator_index: 10, pubkey: pubkey(10) }],
            Vec::new(),
            &set,
            true,
        );
        previous.proposals.get_mut(&3).unwrap().state = ProposalState::Proposed;

        let mut next = EpochDuties::build(
            0,
            vec![ProposerDutyData { slot: 3, validator_index: 10, pubkey: pubkey(10) }],
            Vec::new(),
            &set,
            false,
        );
        next.carry_over(&previous);
        assert_eq!(next.proposals[&3].state, ProposalState::Proposed);
        assert!(!next.provisional);
    }
}
