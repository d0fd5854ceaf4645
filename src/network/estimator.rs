use crate::chain::domain::{ChainClient, ChainValidator, Lifecycle, PriceClient};
use crate::registry::WatchedSet;
use crate::shared::constants::chain::{
    CHURN_LIMIT_QUOTIENT, MAX_PER_EPOCH_ACTIVATION_CHURN_LIMIT, MIN_PER_EPOCH_CHURN_LIMIT, SECONDS_PER_EPOCH,
};
use crate::shared::types::Epoch;
use crate::shared::utils::time::{format_duration, with_timeout};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Figures about the watched validators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnCounts {
    pub keys: u64,
    pub active: u64,
    pub pending_queued: u64,
    pub exited: u64,
    pub slashed: u64,
}

/// Network-wide figures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTotals {
    pub active: u64,
    pub pending_queued: u64,
    pub slashed: u64,
    pub entry_queue_duration_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAggregates {
    pub epoch: Epoch,
    pub ours: OwnCounts,
    /// Absent when the full validator set could not be fetched this epoch.
    pub totals: Option<NetworkTotals>,
    /// Absent when the price collaborator failed or is disabled.
    pub eth_usd: Option<f64>,
}

/// Validators that may activate per epoch.
pub fn activation_churn_limit(active: u64) -> u64 {
    (active / CHURN_LIMIT_QUOTIENT)
        .max(MIN_PER_EPOCH_CHURN_LIMIT)
        .min(MAX_PER_EPOCH_ACTIVATION_CHURN_LIMIT)
}

/// Wall-clock wait for the last queued validator, in seconds.
pub fn entry_queue_duration_sec(queued: u64, active: u64) -> u64 {
    let churn = activation_churn_limit(active);
    let epochs = (queued + churn - 1) / churn;
    epochs * SECONDS_PER_EPOCH
}

pub fn totals_of(validators: &[ChainValidator]) -> NetworkTotals {
    let active = validators.iter().filter(|v| v.status.is_active()).count() as u64;
    let pending_queued = validators.iter().filter(|v| v.status.is_queued()).count() as u64;
    let slashed = validators.iter().filter(|v| v.slashed).count() as u64;

    NetworkTotals {
        active,
        pending_queued,
        slashed,
        entry_queue_duration_sec: entry_queue_duration_sec(pending_queued, active),
    }
}

pub fn own_counts(watched: &WatchedSet) -> OwnCounts {
    OwnCounts {
        keys: watched.keys_count() as u64,
        active: watched.validators().filter(|v| v.status.is_active()).count() as u64,
        pending_queued: watched.queued_count() as u64,
        exited: watched.count(Lifecycle::Exited) as u64,
        slashed: watched.validators().filter(|v| v.slashed).count() as u64,
    }
}

/// Computes epoch aggregates. The full validator list and the price are
/// fetched concurrently; either failing only drops its own figures.
pub struct NetworkEstimator {
    price: Option<Arc<dyn PriceClient>>,
    call_timeout: Duration,
}

impl NetworkEstimator {
    pub fn new(price: Option<Arc<dyn PriceClient>>, call_timeout: Duration) -> Self {
        Self { price, call_timeout }
    }

    pub async fn estimate(&self, epoch: Epoch, watched: &WatchedSet, chain: &dyn ChainClient) -> NetworkAggregates {
        let limit = self.call_timeout;

        let validators = with_timeout(limit, "validator set", chain.validators(&[]));
        let price = async {
            match &self.price {
                Some(client) => Some(with_timeout(limit, "eth/usd price", client.eth_usd()).await),
                None => None,
            }
        };
        let (validators, price) = tokio::join!(validators, price);

        let totals = match validators {
            Ok(validators) => Some(totals_of(&validators)),
            Err(e) => {
                warn!("Network totals unavailable for epoch {}: {}", epoch, e);
                None
            }
        };

        let eth_usd = match price {
            Some(Ok(quote)) => Some(quote),
            Some(Err(e)) => {
                warn!("ETH/USD price unavailable for epoch {}: {}", epoch, e);
                None
            }
            None => None,
        };

        if let Some(totals) = &totals {
            info!(
                "Epoch {}: {} active validators, {} queued, entry queue {}",
                epoch,
                totals.active,
                totals.pending_queued,
                format_duration(totals.entry_queue_duration_sec)
            );
        }

        NetworkAggregates {
            epoch,
            ours: own_counts(watched),
            totals,
            eth_usd,
        }
    }
}
