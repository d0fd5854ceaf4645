use crate::chain::domain::{
    BuilderHeader, Capability, ChainClient, ChainValidator, ExecutionBlockInfo, ExecutionClient, Lifecycle,
    ObservedBlock,
};
use crate::duties::{AttestationDuty, ProposalDuty, ProposalResolution, ProposalState};
use crate::events::{AttestationSummary, EventDetail, OutcomeEvent, OutcomeKind, ValidatorRef};
use crate::registry::WatchedSet;
use crate::shared::constants::chain::IDEAL_INCLUSION_DISTANCE;
use crate::shared::types::{Epoch, Slot, ValidatorIndex, H160};
use crate::shared::utils::format::short_keys;
use crate::shared::utils::time::with_timeout;
use crate::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Enables the fee recipient check together with an execution client.
    pub expected_fee_recipient: Option<H160>,
    /// Enables the relay check when non-empty.
    pub relay_allow_list: Vec<String>,
    pub call_timeout: Duration,
}

/// Outcome of one validator for one evaluated epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationOutcome {
    Included,
    Suboptimal,
    Missed,
    Unknown,
}

/// What the relays said about a proposed slot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RelayLookup {
    /// Check disabled, or no relay could be asked.
    Skipped,
    Delivered(BuilderHeader),
    NotDelivered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AttestationHistory {
    consecutive_misses: u32,
    last_evaluated: Option<Epoch>,
}

/// Events and tally of one epoch's attestation evaluation.
#[derive(Debug, Clone, Default)]
pub struct AttestationReport {
    pub events: Vec<OutcomeEvent>,
    pub summary: AttestationSummary,
}

/// Classifies resolved duties and status changes into outcome events, and
/// owns the per-validator history those classifications depend on.
pub struct AnomalyDetector {
    settings: DetectorSettings,
    execution: Option<Arc<dyn ExecutionClient>>,
    history: HashMap<ValidatorIndex, AttestationHistory>,
    last_evaluated_epoch: Option<Epoch>,
    last_seen: HashMap<ValidatorIndex, Lifecycle>,
    // Never pruned: each transition is reported at most once per process.
    reported_exits: HashSet<ValidatorIndex>,
    reported_slashings: HashSet<ValidatorIndex>,
}

/// Classification for one attestation duty given what the node can tell us.
pub fn classify_attestation(
    duty: &AttestationDuty,
    live: Option<bool>,
    inclusion_available: bool,
) -> AttestationOutcome {
    let by_distance = |distance: u64| {
        if distance > IDEAL_INCLUSION_DISTANCE {
            AttestationOutcome::Suboptimal
        } else {
            AttestationOutcome::Included
        }
    };

    match (live, inclusion_available) {
        (Some(false), _) => AttestationOutcome::Missed,
        (Some(true), true) => duty
            .inclusion_distance
            .map_or(AttestationOutcome::Included, by_distance),
        (Some(true), false) => AttestationOutcome::Included,
        (None, true) => duty
            .inclusion_distance
            .map_or(AttestationOutcome::Unknown, by_distance),
        (None, false) => AttestationOutcome::Unknown,
    }
}

/// A payload was built externally when its fee recipient pays the proposer
/// in the last transaction, or when the fee recipient is not the proposer's.
pub fn is_builder_block(info: &ExecutionBlockInfo, proposer_fee_recipient: Option<H160>) -> bool {
    let builder_payout = info
        .last_transaction
        .as_ref()
        .map_or(false, |tx| tx.from == info.fee_recipient);

    builder_payout || proposer_fee_recipient.map_or(false, |expected| info.fee_recipient != expected)
}

impl AnomalyDetector {
    pub fn new(settings: DetectorSettings, execution: Option<Arc<dyn ExecutionClient>>) -> Self {
        if settings.expected_fee_recipient.is_some() && execution.is_none() {
            warn!("Fee recipient configured without an execution client, fee recipient check disabled");
        }

        Self {
            settings,
            execution,
            history: HashMap::new(),
            last_evaluated_epoch: None,
            last_seen: HashMap::new(),
            reported_exits: HashSet::new(),
            reported_slashings: HashSet::new(),
        }
    }

    pub fn fee_recipient_check_enabled(&self) -> bool {
        self.settings.expected_fee_recipient.is_some() && self.execution.is_some()
    }

    pub fn consecutive_misses(&self, index: ValidatorIndex) -> u32 {
        self.history.get(&index).map_or(0, |h| h.consecutive_misses)
    }

    pub fn last_evaluated_epoch(&self) -> Option<Epoch> {
        self.last_evaluated_epoch
    }

    /// Events for proposal duties whose state changed this tick. Blocks that
    /// became ours are checked for fee recipient and relay.
    pub async fn proposal_outcomes(
        &self,
        resolutions: Vec<ProposalResolution>,
        chain: &dyn ChainClient,
    ) -> Vec<OutcomeEvent> {
        let mut events = Vec::new();

        for resolution in resolutions {
            match resolution.duty.state {
                ProposalState::Proposed => {
                    let Some(block) = resolution.block else {
                        continue;
                    };
                    events.push(OutcomeEvent::proposal(
                        OutcomeKind::Proposed,
                        &resolution.duty,
                        EventDetail::Block {
                            fee_recipient: block.fee_recipient,
                        },
                    ));

                    let (info, lookup) = tokio::join!(
                        self.execution_info(&block),
                        self.relay_lookup(resolution.duty.slot, chain)
                    );
                    events.extend(self.check_fee_recipient(&resolution.duty, info.as_ref()));
                    events.extend(self.check_relay(&resolution.duty, lookup, info.as_ref()));
                }
                ProposalState::Missed => {
                    let detail = if resolution.previous == ProposalState::Proposed {
                        EventDetail::Reorged
                    } else {
                        EventDetail::None
                    };
                    events.push(OutcomeEvent::proposal(OutcomeKind::Missed, &resolution.duty, detail));
                }
                ProposalState::Pending => {}
            }
        }

        events
    }

    fn relay_check_enabled(&self) -> bool {
        !self.settings.relay_allow_list.is_empty()
    }

    /// Execution block behind a proposal, fetched once for both checks.
    async fn execution_info(&self, block: &ObservedBlock) -> Option<ExecutionBlockInfo> {
        if !self.fee_recipient_check_enabled() && !self.relay_check_enabled() {
            return None;
        }
        let execution = self.execution.as_ref()?;

        let Some(number) = block.execution_block_number else {
            debug!("Block at slot {} carries no execution payload", block.slot);
            return None;
        };

        match with_timeout(self.settings.call_timeout, "execution block", execution.block_info(number)).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(
                    "Could not fetch execution block {} at slot {}: {}",
                    number, block.slot, e
                );
                None
            }
        }
    }

    async fn relay_lookup(&self, slot: Slot, chain: &dyn ChainClient) -> RelayLookup {
        if !self.relay_check_enabled() || !chain.capabilities().supports(Capability::BuilderHeaders) {
            return RelayLookup::Skipped;
        }

        match with_timeout(self.settings.call_timeout, "builder header", chain.builder_header(slot)).await {
            Ok(Some(header)) => RelayLookup::Delivered(header),
            Ok(None) => RelayLookup::NotDelivered,
            Err(e) => {
                warn!("Could not check relay of block at slot {}: {}", slot, e);
                RelayLookup::Skipped
            }
        }
    }

    fn check_fee_recipient(&self, duty: &ProposalDuty, info: Option<&ExecutionBlockInfo>) -> Option<OutcomeEvent> {
        let expected = self.settings.expected_fee_recipient?;
        let info = info?;

        let paid_to_expected = info.fee_recipient == expected
            || info
                .last_transaction
                .as_ref()
                .and_then(|tx| tx.to)
                .map_or(false, |to| to == expected);

        if paid_to_expected {
            return None;
        }

        Some(OutcomeEvent::proposal(
            OutcomeKind::WrongFeeRecipient,
            duty,
            EventDetail::FeeRecipient {
                expected,
                found: info.fee_recipient,
            },
        ))
    }

    fn check_relay(
        &self,
        duty: &ProposalDuty,
        lookup: RelayLookup,
        info: Option<&ExecutionBlockInfo>,
    ) -> Option<OutcomeEvent> {
        let detail = match lookup {
            RelayLookup::Skipped => return None,
            RelayLookup::Delivered(header) if self.is_allowed_relay(&header.relay) => return None,
            RelayLookup::Delivered(header) => EventDetail::Relay { relay: header.relay },
            RelayLookup::NotDelivered => {
                // Built locally unless the payload shows a builder payout
                if !info.map_or(false, |info| is_builder_block(info, self.settings.expected_fee_recipient)) {
                    return None;
                }
                info!(
                    "Block at slot {} was built by a builder no queried relay reports",
                    duty.slot
                );
                EventDetail::None
            }
        };

        Some(OutcomeEvent::proposal(OutcomeKind::UnknownRelay, duty, detail))
    }

    fn is_allowed_relay(&self, relay: &str) -> bool {
        let relay = relay.trim_end_matches('/');
        self.settings
            .relay_allow_list
            .iter()
            .any(|allowed| allowed.trim_end_matches('/') == relay)
    }

    /// Announcement events for future proposals.
    pub fn upcoming(&self, duties: &[ProposalDuty]) -> Vec<OutcomeEvent> {
        duties
            .iter()
            .map(|duty| OutcomeEvent::proposal(OutcomeKind::Upcoming, duty, EventDetail::None))
            .collect()
    }

    /// Classifies the attestation duties of `epoch`. Epochs are evaluated at
    /// most once and in increasing order; anything else yields `Ok(None)`.
    /// A liveness failure returns the error so the epoch can be retried.
    pub async fn evaluate_attestations(
        &mut self,
        epoch: Epoch,
        duties: &[AttestationDuty],
        watched: &WatchedSet,
        chain: &dyn ChainClient,
    ) -> Result<Option<AttestationReport>> {
        if self.last_evaluated_epoch.map_or(false, |last| epoch <= last) {
            debug!("Attestations of epoch {} already evaluated", epoch);
            return Ok(None);
        }

        let capabilities = chain.capabilities();
        let inclusion_available = capabilities.supports(Capability::AttestationInclusion);

        let liveness = if capabilities.supports(Capability::ValidatorLiveness) && !duties.is_empty() {
            let indexes: Vec<ValidatorIndex> = duties.iter().map(|d| d.validator_index).collect();
            Some(with_timeout(self.settings.call_timeout, "validator liveness", chain.liveness(epoch, &indexes)).await?)
        } else {
            None
        };

        let mut grouped: BTreeMap<OutcomeKind, Vec<ValidatorRef>> = BTreeMap::new();
        let mut summary = AttestationSummary {
            epoch,
            ..Default::default()
        };

        for duty in duties {
            let Some(validator) = watched.lookup(duty.validator_index) else {
                continue;
            };
            let validator_ref = ValidatorRef {
                index: validator.index,
                pubkey: validator.pubkey.clone(),
            };

            let live = liveness.as_ref().and_then(|l| l.get(&duty.validator_index).copied());
            let outcome = classify_attestation(duty, live, inclusion_available);

            match outcome {
                AttestationOutcome::Included => summary.included += 1,
                AttestationOutcome::Suboptimal => summary.suboptimal += 1,
                AttestationOutcome::Missed => summary.missed += 1,
                AttestationOutcome::Unknown => summary.unknown += 1,
            }

            if self.record_outcome(duty.validator_index, epoch, outcome) {
                summary.double_missed += 1;
                grouped
                    .entry(OutcomeKind::DoubleMissed)
                    .or_default()
                    .push(validator_ref.clone());
            }

            let kind = match outcome {
                AttestationOutcome::Included => OutcomeKind::AttestationIncluded,
                AttestationOutcome::Suboptimal => OutcomeKind::AttestationSuboptimal,
                AttestationOutcome::Missed => OutcomeKind::AttestationMissed,
                AttestationOutcome::Unknown => OutcomeKind::AttestationUnknown,
            };
            grouped.entry(kind).or_default().push(validator_ref);
        }

        self.last_evaluated_epoch = Some(epoch);
        self.history.retain(|index, _| watched.contains(*index));

        for (kind, validators) in &grouped {
            if kind.is_anomaly() {
                info!(
                    "Epoch {}: {} for {} validators ({})",
                    epoch,
                    kind,
                    validators.len(),
                    short_keys(validators.iter().map(|v| &v.pubkey))
                );
            }
        }

        let events = grouped
            .into_iter()
            .map(|(kind, validators)| OutcomeEvent::attestation(kind, epoch, validators))
            .collect();

        Ok(Some(AttestationReport { events, summary }))
    }

    /// Applies one outcome to the consecutive-miss counter. Returns true when
    /// the counter just reached two.
    fn record_outcome(&mut self, index: ValidatorIndex, epoch: Epoch, outcome: AttestationOutcome) -> bool {
        if outcome == AttestationOutcome::Unknown {
            return false;
        }

        let history = self.history.entry(index).or_default();
        let follows_previous = epoch > 0 && history.last_evaluated == Some(epoch - 1);
        history.last_evaluated = Some(epoch);

        match outcome {
            AttestationOutcome::Missed => {
                history.consecutive_misses = if follows_previous {
                    history.consecutive_misses.saturating_add(1)
                } else {
                    1
                };
                history.consecutive_misses == 2
            }
            _ => {
                history.consecutive_misses = 0;
                false
            }
        }
    }

    /// Compares current statuses with the last ones seen. The first
    /// observation of a validator is a baseline and reports nothing.
    pub fn status_transitions(&mut self, epoch: Epoch, validators: &[ChainValidator]) -> Vec<OutcomeEvent> {
        let mut events = Vec::new();

        for validator in validators {
            let lifecycle = validator.lifecycle();
            let previous = self.last_seen.insert(validator.index, lifecycle);

            let Some(previous) = previous else {
                continue;
            };
            if previous == lifecycle {
                continue;
            }

            let validator_ref = ValidatorRef {
                index: validator.index,
                pubkey: validator.pubkey.clone(),
            };

            match lifecycle {
                Lifecycle::Slashed if self.reported_slashings.insert(validator.index) => {
                    events.push(OutcomeEvent::status(OutcomeKind::Slashed, epoch, validator_ref));
                }
                Lifecycle::Exited if self.reported_exits.insert(validator.index) => {
                    events.push(OutcomeEvent::status(OutcomeKind::Exited, epoch, validator_ref));
                }
                _ => {}
            }
        }

        events
    }

    /// Drops transition baselines of validators no longer watched.
    pub fn forget_unwatched(&mut self, watched: &WatchedSet) {
        self.last_seen.retain(|index, _| watched.contains(*index));
    }
}
