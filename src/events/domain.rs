use crate::duties::ProposalDuty;
use crate::network::NetworkAggregates;
use crate::shared::types::{epoch_of, Epoch, Pubkey, Slot, ValidatorIndex, H160};
use crate::shared::utils::format::short_keys;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified outcome kinds produced by the anomaly detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Proposed,
    Missed,
    Upcoming,
    WrongFeeRecipient,
    UnknownRelay,
    AttestationIncluded,
    AttestationMissed,
    AttestationSuboptimal,
    DoubleMissed,
    AttestationUnknown,
    Exited,
    Slashed,
}

impl OutcomeKind {
    /// Kinds forwarded to the alert channel.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            OutcomeKind::Exited
                | OutcomeKind::Slashed
                | OutcomeKind::WrongFeeRecipient
                | OutcomeKind::DoubleMissed
                | OutcomeKind::Missed
        )
    }

    /// Kinds that point at something going wrong.
    pub fn is_anomaly(&self) -> bool {
        !matches!(
            self,
            OutcomeKind::Proposed
                | OutcomeKind::Upcoming
                | OutcomeKind::AttestationIncluded
                | OutcomeKind::AttestationUnknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Proposed => "proposed",
            OutcomeKind::Missed => "missed",
            OutcomeKind::Upcoming => "upcoming",
            OutcomeKind::WrongFeeRecipient => "wrong-fee-recipient",
            OutcomeKind::UnknownRelay => "unknown-relay",
            OutcomeKind::AttestationIncluded => "attestation-included",
            OutcomeKind::AttestationMissed => "attestation-missed",
            OutcomeKind::AttestationSuboptimal => "attestation-suboptimal",
            OutcomeKind::DoubleMissed => "double-missed",
            OutcomeKind::AttestationUnknown => "attestation-unknown",
            OutcomeKind::Exited => "exited",
            OutcomeKind::Slashed => "slashed",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRef {
    pub index: ValidatorIndex,
    pub pubkey: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventDetail {
    None,
    Block { fee_recipient: Option<H160> },
    /// A block we had counted as proposed is no longer canonical.
    Reorged,
    FeeRecipient { expected: H160, found: H160 },
    Relay { relay: String },
}

/// Immutable record of one classified outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub kind: OutcomeKind,
    pub validators: Vec<ValidatorRef>,
    pub epoch: Epoch,
    pub slot: Option<Slot>,
    pub detail: EventDetail,
}

impl OutcomeEvent {
    pub fn proposal(kind: OutcomeKind, duty: &ProposalDuty, detail: EventDetail) -> Self {
        Self {
            kind,
            validators: vec![ValidatorRef {
                index: duty.validator_index,
                pubkey: duty.pubkey.clone(),
            }],
            epoch: epoch_of(duty.slot),
            slot: Some(duty.slot),
            detail,
        }
    }

    pub fn attestation(kind: OutcomeKind, epoch: Epoch, validators: Vec<ValidatorRef>) -> Self {
        Self {
            kind,
            validators,
            epoch,
            slot: None,
            detail: EventDetail::None,
        }
    }

    pub fn status(kind: OutcomeKind, epoch: Epoch, validator: ValidatorRef) -> Self {
        Self {
            kind,
            validators: vec![validator],
            epoch,
            slot: None,
            detail: EventDetail::None,
        }
    }

    pub fn validator_indexes(&self) -> Vec<ValidatorIndex> {
        self.validators.iter().map(|v| v.index).collect()
    }

    fn keys(&self) -> String {
        short_keys(self.validators.iter().map(|v| &v.pubkey))
    }
}

impl fmt::Display for OutcomeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.unwrap_or_default();
        match (&self.kind, &self.detail) {
            (OutcomeKind::Proposed, _) => write!(f, "Validator {} proposed block at slot {}", self.keys(), slot),
            (OutcomeKind::Missed, EventDetail::Reorged) => write!(
                f,
                "Validator {} block at slot {} was reorged out, counting it as missed",
                self.keys(),
                slot
            ),
            (OutcomeKind::Missed, _) => {
                write!(f, "Validator {} missed block proposal at slot {}", self.keys(), slot)
            }
            (OutcomeKind::Upcoming, _) => write!(
                f,
                "Validator {} will propose a block at slot {} (epoch {})",
                self.keys(),
                slot,
                self.epoch
            ),
            (OutcomeKind::WrongFeeRecipient, EventDetail::FeeRecipient { expected, found }) => write!(
                f,
                "Validator {} proposed block at slot {} with wrong fee recipient {} (expected {})",
                self.keys(),
                slot,
                found,
                expected
            ),
            (OutcomeKind::WrongFeeRecipient, _) => write!(
                f,
                "Validator {} proposed block at slot {} with wrong fee recipient",
                self.keys(),
                slot
            ),
            (OutcomeKind::UnknownRelay, EventDetail::Relay { relay }) => write!(
                f,
                "Validator {} block at slot {} was delivered by relay {} which is not allowed",
                self.keys(),
                slot,
                relay
            ),
            (OutcomeKind::UnknownRelay, _) => write!(
                f,
                "Validator {} block at slot {} was delivered by an unknown relay",
                self.keys(),
                slot
            ),
            (OutcomeKind::AttestationIncluded, _) => write!(
                f,
                "Validator {} attestations included for epoch {}",
                self.keys(),
                self.epoch
            ),
            (OutcomeKind::AttestationMissed, _) => write!(
                f,
                "Validator {} missed attestation at epoch {}",
                self.keys(),
                self.epoch
            ),
            (OutcomeKind::AttestationSuboptimal, _) => write!(
                f,
                "Validator {} had suboptimal attestation inclusion at epoch {}",
                self.keys(),
                self.epoch
            ),
            (OutcomeKind::DoubleMissed, _) => write!(
                f,
                "Validator {} missed 2 attestations in a row from epoch {}",
                self.keys(),
                self.epoch.saturating_sub(1)
            ),
            (OutcomeKind::AttestationUnknown, _) => write!(
                f,
                "Attestation outcome of validator {} unknown for epoch {}",
                self.keys(),
                self.epoch
            ),
            (OutcomeKind::Exited, _) => write!(f, "Validator {} is exited", self.keys()),
            (OutcomeKind::Slashed, _) => write!(f, "Validator {} is slashed", self.keys()),
        }
    }
}

/// Per-epoch attestation tally used for rate gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationSummary {
    pub epoch: Epoch,
    pub included: usize,
    pub suboptimal: usize,
    pub missed: usize,
    pub double_missed: usize,
    pub unknown: usize,
}

impl AttestationSummary {
    /// Percentage of known outcomes that were not optimal, `None` when nothing is known.
    pub fn suboptimal_rate(&self) -> Option<f64> {
        let known = self.included + self.suboptimal + self.missed;
        if known == 0 {
            None
        } else {
            Some(100.0 * (self.suboptimal + self.missed) as f64 / known as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub slot: Slot,
    pub epoch: Epoch,
    pub future_proposals: usize,
}

/// Everything the dispatcher fans out to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Emission {
    Outcome(OutcomeEvent),
    Attestations(AttestationSummary),
    Aggregates(NetworkAggregates),
    Tick(TickSummary),
}

impl Emission {
    pub fn label(&self) -> &'static str {
        match self {
            Emission::Outcome(event) => event.kind.as_str(),
            Emission::Attestations(_) => "attestation-summary",
            Emission::Aggregates(_) => "aggregates",
            Emission::Tick(_) => "tick",
        }
    }
}
