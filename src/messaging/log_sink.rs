use crate::events::{Emission, OutcomeKind};
use crate::messaging::domain::EventSink;
use crate::shared::utils::time::format_duration;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Renders every emission to the log stream.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&mut self, emission: &Emission) -> crate::Result<()> {
        match emission {
            Emission::Outcome(event) => match event.kind {
                OutcomeKind::AttestationIncluded | OutcomeKind::AttestationUnknown => debug!("{}", event),
                OutcomeKind::Proposed | OutcomeKind::Upcoming => info!("{}", event),
                _ => warn!("{}", event),
            },
            Emission::Attestations(summary) => {
                if let Some(rate) = summary.suboptimal_rate() {
                    info!(
                        "Epoch {} attestations: {} included, {} suboptimal, {} missed, {} unknown ({:.1}% not optimal)",
                        summary.epoch, summary.included, summary.suboptimal, summary.missed, summary.unknown, rate
                    );
                } else {
                    info!(
                        "Epoch {} attestations: {} outcomes unknown",
                        summary.epoch, summary.unknown
                    );
                }
            }
            Emission::Aggregates(aggregates) => {
                let ours = &aggregates.ours;
                info!(
                    "Epoch {}: watching {} keys, {} active, {} queued, {} exited, {} slashed",
                    aggregates.epoch, ours.keys, ours.active, ours.pending_queued, ours.exited, ours.slashed
                );
                if let Some(totals) = &aggregates.totals {
                    info!(
                        "Entry queue: {} validators, about {}",
                        totals.pending_queued,
                        format_duration(totals.entry_queue_duration_sec)
                    );
                }
                if let Some(eth_usd) = aggregates.eth_usd {
                    info!("ETH/USD: {:.2}", eth_usd);
                }
            }
            Emission::Tick(tick) => {
                debug!(
                    "Slot {} (epoch {}), {} future proposals",
                    tick.slot, tick.epoch, tick.future_proposals
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TickSummary;

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        let mut sink = LogSink;
        let result = sink
            .deliver(&Emission::Tick(TickSummary {
                slot: 1,
                epoch: 0,
                future_proposals: 0,
            }))
            .await;
        assert!(result.is_ok());
        assert_eq!(sink.name(), "log");
    }
}
