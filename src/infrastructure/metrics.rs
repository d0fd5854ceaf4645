use crate::infrastructure::config::MetricsConfig;
use crate::messaging::metrics_sink::MetricsState;
use crate::shared::constants::{chain::SECONDS_PER_SLOT, monitoring::GAUGE_IDLE_SLOTS};
use crate::shared::types::{Epoch, Slot};
use anyhow::Result;
use metrics::{absolute_counter, counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::MetricKindMask;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

pub struct Metrics;

impl Metrics {
    /// Installs the Prometheus recorder and its HTTP listener.
    pub fn init(config: &MetricsConfig) -> Result<()> {
        if !config.enabled {
            info!("Metrics collection disabled");
            return Ok(());
        }

        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid metrics address: {}", e))?;

        // Gauges are rewritten every tick, so an unknown value stops being
        // written and ages out instead of exporting the last reading.
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .idle_timeout(
                MetricKindMask::GAUGE,
                Some(Duration::from_secs(GAUGE_IDLE_SLOTS * SECONDS_PER_SLOT)),
            )
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus metrics: {}", e))?;

        describe_all();

        info!("Metrics exposed on {}", addr);
        Ok(())
    }
}

fn describe_all() {
    describe_gauge!("slot", "Slot");
    describe_gauge!("epoch", "Epoch");
    describe_gauge!("eth_usd", "ETH price in USD");
    describe_gauge!("entry_queue_duration_sec", "Estimated entry queue duration in seconds");
    describe_gauge!("keys_count", "Number of watched keys");
    describe_gauge!("our_pending_queued_validators_count", "Our pending queued validators count");
    describe_gauge!("total_pending_queued_validators_count", "Total pending queued validators count");
    describe_gauge!("our_active_validators_count", "Our active validators count");
    describe_gauge!("total_active_validators_count", "Total active validators count");
    describe_gauge!("our_exited_validators_count", "Our exited validators count");
    describe_gauge!("our_slashed_validators_count", "Our slashed validators count");
    describe_gauge!("total_slashed_validators_count", "Total slashed validators count");
    describe_gauge!("missed_attestations_count", "Missed attestations in the last evaluated epoch");
    describe_gauge!(
        "double_missed_attestations_count",
        "Validators which missed two attestations in a row"
    );
    describe_gauge!(
        "suboptimal_attestations_rate",
        "Percentage of our attestations not optimally included"
    );
    describe_gauge!("future_block_proposals_count", "Future block proposals count");
    describe_counter!("missed_block_proposals_count", "Missed block proposals count");
    describe_counter!(
        "missed_block_proposals_count_details",
        "Missed block proposals count by slot and epoch"
    );
    describe_counter!(
        "wrong_fee_recipient_proposed_block_count",
        "Proposed blocks with a wrong fee recipient"
    );
    describe_counter!("bad_relay_count", "Proposed blocks delivered by a relay outside the allow list");
}

/// Gauge values known for `state`. Unknown optional values are absent, so a
/// failed price fetch leaves `eth_usd` unwritten until it ages out.
pub fn gauge_values(state: &MetricsState) -> Vec<(&'static str, f64)> {
    let mut values = vec![
        ("slot", state.slot as f64),
        ("epoch", state.epoch as f64),
        ("keys_count", state.keys_count as f64),
        (
            "our_pending_queued_validators_count",
            state.our_pending_queued_validators_count as f64,
        ),
        ("our_active_validators_count", state.our_active_validators_count as f64),
        ("our_exited_validators_count", state.our_exited_validators_count as f64),
        ("our_slashed_validators_count", state.our_slashed_validators_count as f64),
        ("missed_attestations_count", state.missed_attestations_count as f64),
        (
            "double_missed_attestations_count",
            state.double_missed_attestations_count as f64,
        ),
        ("future_block_proposals_count", state.future_block_proposals_count as f64),
    ];

    let optional = [
        ("eth_usd", state.eth_usd),
        (
            "entry_queue_duration_sec",
            state.entry_queue_duration_sec.map(|v| v as f64),
        ),
        (
            "total_pending_queued_validators_count",
            state.total_pending_queued_validators_count.map(|v| v as f64),
        ),
        (
            "total_active_validators_count",
            state.total_active_validators_count.map(|v| v as f64),
        ),
        (
            "total_slashed_validators_count",
            state.total_slashed_validators_count.map(|v| v as f64),
        ),
        ("suboptimal_attestations_rate", state.suboptimal_attestations_rate),
    ];
    values.extend(optional.into_iter().filter_map(|(name, value)| value.map(|v| (name, v))));

    values
}

/// Pushes the whole state through the metrics facade.
pub fn publish(state: &MetricsState) {
    for (name, value) in gauge_values(state) {
        gauge!(name, value);
    }

    absolute_counter!("missed_block_proposals_count", state.missed_block_proposals_count);
    absolute_counter!(
        "wrong_fee_recipient_proposed_block_count",
        state.wrong_fee_recipient_proposed_block_count
    );
    absolute_counter!("bad_relay_count", state.bad_relay_count);
}

pub fn record_missed_proposal(slot: Slot, epoch: Epoch) {
    counter!(
        "missed_block_proposals_count_details",
        1,
        "slot" => slot.to_string(),
        "epoch" => epoch.to_string()
    );
}
