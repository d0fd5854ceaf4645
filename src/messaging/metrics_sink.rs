use crate::events::{Emission, OutcomeKind};
use crate::infrastructure::metrics as exporter;
use crate::messaging::domain::EventSink;
use crate::shared::types::{Epoch, Slot};
use async_trait::async_trait;

/// Every value exported to Prometheus. Lives as long as the process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsState {
    pub slot: Slot,
    pub epoch: Epoch,

    // Epoch aggregates
    pub eth_usd: Option<f64>,
    pub entry_queue_duration_sec: Option<u64>,
    pub keys_count: u64,
    pub our_pending_queued_validators_count: u64,
    pub our_active_validators_count: u64,
    pub our_exited_validators_count: u64,
    pub our_slashed_validators_count: u64,
    pub total_pending_queued_validators_count: Option<u64>,
    pub total_active_validators_count: Option<u64>,
    pub total_slashed_validators_count: Option<u64>,

    // Attestations of the last evaluated epoch
    pub missed_attestations_count: u64,
    pub double_missed_attestations_count: u64,
    pub suboptimal_attestations_rate: Option<f64>,

    // Proposals, monotonic
    pub missed_block_proposals_count: u64,
    pub wrong_fee_recipient_proposed_block_count: u64,
    pub bad_relay_count: u64,
    pub future_block_proposals_count: u64,
}

impl MetricsState {
    /// Folds one emission into the state. Returns the (slot, epoch) of a
    /// newly missed proposal so its labeled series can be bumped.
    pub fn apply(&mut self, emission: &Emission) -> Option<(Slot, Epoch)> {
        match emission {
            Emission::Tick(tick) => {
                self.slot = tick.slot;
                self.epoch = tick.epoch;
                self.future_block_proposals_count = tick.future_proposals as u64;
            }
            Emission::Aggregates(aggregates) => {
                self.eth_usd = aggregates.eth_usd;
                self.keys_count = aggregates.ours.keys;
                self.our_active_validators_count = aggregates.ours.active;
                self.our_pending_queued_validators_count = aggregates.ours.pending_queued;
                self.our_exited_validators_count = aggregates.ours.exited;
                self.our_slashed_validators_count = aggregates.ours.slashed;

                let totals = aggregates.totals.as_ref();
                self.entry_queue_duration_sec = totals.map(|t| t.entry_queue_duration_sec);
                self.total_active_validators_count = totals.map(|t| t.active);
                self.total_pending_queued_validators_count = totals.map(|t| t.pending_queued);
                self.total_slashed_validators_count = totals.map(|t| t.slashed);
            }
            Emission::Attestations(summary) => {
                self.missed_attestations_count = summary.missed as u64;
                self.double_missed_attestations_count = summary.double_missed as u64;
                if let Some(rate) = summary.suboptimal_rate() {
                    self.suboptimal_attestations_rate = Some(rate);
                }
            }
            Emission::Outcome(event) => match event.kind {
                OutcomeKind::Missed => {
                    self.missed_block_proposals_count += 1;
                    return event.slot.map(|slot| (slot, event.epoch));
                }
                OutcomeKind::WrongFeeRecipient => self.wrong_fee_recipient_proposed_block_count += 1,
                OutcomeKind::UnknownRelay => self.bad_relay_count += 1,
                _ => {}
            },
        }
        None
    }
}

/// Keeps an explicit `MetricsState` and pushes it to the Prometheus recorder.
pub struct MetricsSink {
    state: MetricsState,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            state: MetricsState::default(),
        }
    }

    pub fn state(&self) -> &MetricsState {
        &self.state
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for MetricsSink {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn deliver(&mut self, emission: &Emission) -> crate::Result<()> {
        if let Some((slot, epoch)) = self.state.apply(emission) {
            exporter::record_missed_proposal(slot, epoch);
        }
        exporter::publish(&self.state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duties::{ProposalDuty, ProposalState};
    use crate::events::{AttestationSummary, EventDetail, OutcomeEvent, TickSummary};
    use crate::network::{NetworkAggregates, NetworkTotals, OwnCounts};

    fn missed(slot: Slot) -> Emission {
        let duty = ProposalDuty {
            validator_index: 5,
            pubkey: format!("0x{}", "05".repeat(48)).parse().unwrap(),
            slot,
            state: ProposalState::Missed,
        };
        Emission::Outcome(OutcomeEvent::proposal(OutcomeKind::Missed, &duty, EventDetail::None))
    }

    #[test]
    fn test_missed_proposals_accumulate() {
        let mut state = MetricsState::default();
        assert_eq!(state.apply(&missed(40)), Some((40, 1)));
        assert_eq!(state.apply(&missed(70)), Some((70, 2)));
        assert_eq!(state.missed_block_proposals_count, 2);
    }

    #[test]
    fn test_price_omitted_for_one_tick() {
        let mut state = MetricsState::default();
        let mut aggregates = NetworkAggregates {
            epoch: 1,
            ours: OwnCounts {
                keys: 3,
                active: 2,
                ..Default::default()
            },
            totals: Some(NetworkTotals {
                active: 1_000,
                pending_queued: 8,
                slashed: 1,
                entry_queue_duration_sec: 768,
            }),
            eth_usd: Some(3_000.0),
        };
        state.apply(&Emission::Aggregates(aggregates.clone()));
        assert_eq!(state.eth_usd, Some(3_000.0));

        aggregates.eth_usd = None;
        state.apply(&Emission::Aggregates(aggregates.clone()));
        assert_eq!(state.eth_usd, None);
        assert_eq!(state.total_active_validators_count, Some(1_000));
        assert_eq!(state.keys_count, 3);

        aggregates.eth_usd = Some(3_100.0);
        state.apply(&Emission::Aggregates(aggregates));
        assert_eq!(state.eth_usd, Some(3_100.0));
    }

    #[test]
    fn test_attestation_summary() {
        let mut state = MetricsState::default();
        state.apply(&Emission::Attestations(AttestationSummary {
            epoch: 4,
            included: 3,
            missed: 1,
            double_missed: 1,
            ..Default::default()
        }));
        assert_eq!(state.missed_attestations_count, 1);
        assert_eq!(state.double_missed_attestations_count, 1);
        assert_eq!(state.suboptimal_attestations_rate, Some(25.0));
    }

    #[tokio::test]
    async fn test_sink_delivers_without_recorder() {
        let mut sink = MetricsSink::new();
        sink.deliver(&Emission::Tick(TickSummary {
            slot: 100,
            epoch: 3,
            future_proposals: 2,
        }))
        .await
        .unwrap();
        assert_eq!(sink.state().slot, 100);
        assert_eq!(sink.state().future_block_proposals_count, 2);
    }
}
