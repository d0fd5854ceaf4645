
use eth_validator_watcher::{
    chain::domain::{Capability, PriceClient, ValidatorStatus},
    events::{Emission, EventDetail, OutcomeEvent, OutcomeKind, ValidatorRef},
    messaging::{EventDispatcher, EventSink, MetricsState},
    network::NetworkEstimator,
    registry::{FileKeySource, KeySource, ValidatorRegistry},
    Result,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;

const TEST_TIMEOUT: Duration = Duration::from_secs(8);

async fn within_timeout(scenario: impl Future<Output = Result<()>>) -> Result<()> {
    match tokio::time::timeout(TEST_TIMEOUT, scenario).await {
        Ok(inner) => inner,
        Err(_) => Err(anyhow::anyhow!("scenario timed out after {} seconds", TEST_TIMEOUT.as_secs())),
    }
}

fn network_chain() -> Arc<MockChain> {
    let chain = MockChain::new([Capability::AttestationInclusion]);
    chain.update(|state| {
        state.validators = vec![
            chain_validator(1, ValidatorStatus::ActiveOngoing, false),
            chain_validator(2, ValidatorStatus::PendingQueued, false),
            chain_validator(3, ValidatorStatus::ActiveSlashed, true),
            chain_validator(4, ValidatorStatus::ActiveOngoing, false),
        ];
    });
    chain
}

/// A failing price feed drops only the price, and recovers on the next epoch.
#[tokio::test]
async fn test_price_failure_keeps_totals() -> Result<()> {
    within_timeout(async {
        let chain = network_chain();
        let price = MockPrice::new(None);
        let estimator = NetworkEstimator::new(
            Some(Arc::clone(&price) as Arc<dyn PriceClient>),
            Duration::from_secs(1),
        );

        let mut registry = ValidatorRegistry::new(vec![Box::new(StaticKeySource::new(&[1, 2]))]);
        let watched = registry.refresh(5, chain.as_ref()).await?;

        let aggregates = estimator.estimate(5, &watched, chain.as_ref()).await;
        assert_eq!(aggregates.eth_usd, None);
        let totals = aggregates.totals.clone().ok_or_else(|| anyhow::anyhow!("totals missing"))?;
        assert_eq!(totals.active, 3);
        assert_eq!(totals.pending_queued, 1);
        assert_eq!(totals.slashed, 1);
        // One queued validator at the minimum churn: one epoch
        assert_eq!(totals.entry_queue_duration_sec, 384);
        assert_eq!(aggregates.ours.keys, 2);
        assert_eq!(aggregates.ours.active, 1);
        assert_eq!(aggregates.ours.pending_queued, 1);

        // No quote this epoch: eth_usd stops being written
        let mut state = MetricsState::default();
        state.eth_usd = Some(1_800.0);
        state.apply(&Emission::Aggregates(aggregates));
        assert_eq!(state.eth_usd, None);
        assert_eq!(state.total_active_validators_count, Some(3));

        price.set(Some(2_000.0));
        let aggregates = estimator.estimate(6, &watched, chain.as_ref()).await;
        assert_eq!(aggregates.eth_usd, Some(2_000.0));
        Ok(())
    })
    .await
}

/// An unreachable node drops the totals but keeps our own counts.
#[tokio::test]
async fn test_unreachable_node_drops_totals() -> Result<()> {
    within_timeout(async {
        let chain = network_chain();
        let mut registry = ValidatorRegistry::new(vec![Box::new(StaticKeySource::new(&[1]))]);
        let watched = registry.refresh(5, chain.as_ref()).await?;

        chain.update(|state| state.unreachable = true);
        let estimator = NetworkEstimator::new(None, Duration::from_secs(1));
        let aggregates = estimator.estimate(5, &watched, chain.as_ref()).await;

        assert!(aggregates.totals.is_none());
        assert!(aggregates.eth_usd.is_none());
        assert_eq!(aggregates.ours.keys, 1);
        Ok(())
    })
    .await
}

/// A failed refresh leaves the published snapshot untouched, and snapshots
/// handed out earlier never change.
#[tokio::test]
async fn test_registry_refresh_is_atomic() -> Result<()> {
    within_timeout(async {
        let chain = network_chain();
        let keys = StaticKeySource::new(&[1, 2]);
        let mut registry = ValidatorRegistry::new(vec![Box::new(keys.clone())]);

        let first = registry.refresh(10, chain.as_ref()).await?;
        assert_eq!(first.keys_count(), 2);

        keys.set(None);
        assert!(registry.refresh(11, chain.as_ref()).await.is_err());
        assert_eq!(registry.snapshot().epoch(), Some(10));
        assert_eq!(registry.snapshot().keys_count(), 2);

        // Unknown key 9 stays unresolved until the chain knows it
        keys.set(Some(&[1, 9]));
        let second = registry.refresh(12, chain.as_ref()).await?;
        assert_eq!(second.keys_count(), 2);
        assert_eq!(second.unresolved().len(), 1);
        assert!(second.contains(1));
        assert!(!second.contains(2));

        assert_eq!(first.epoch(), Some(10));
        assert!(first.contains(2));
        Ok(())
    })
    .await
}

/// Keys are re-read from the file on every load.
#[tokio::test]
async fn test_file_key_source_reloads() -> Result<()> {
    within_timeout(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pubkeys.txt");
        std::fs::write(&path, format!("# ours\n{}\n\nnot-a-key\n", pubkey(1)))?;

        let source = FileKeySource::new(path.clone());
        let keys = source.load().await?;
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&pubkey(1)));

        std::fs::write(&path, format!("{}\n{}\n", pubkey(1), pubkey(2)))?;
        assert_eq!(source.load().await?.len(), 2);

        std::fs::remove_file(&path)?;
        assert!(source.load().await.is_err());
        Ok(())
    })
    .await
}

/// Every sink sees every emission even when one of them keeps failing.
#[tokio::test]
async fn test_dispatcher_isolates_failures() -> Result<()> {
    within_timeout(async {
        let recording = RecordingSink::default();
        let sinks: Vec<Box<dyn EventSink>> = vec![Box::new(BrokenSink), Box::new(recording.clone())];
        let mut dispatcher = EventDispatcher::new(sinks, Duration::from_millis(200));

        let missed = OutcomeEvent {
            kind: OutcomeKind::Missed,
            validators: vec![ValidatorRef {
                index: 1,
                pubkey: pubkey(1),
            }],
            epoch: 1,
            slot: Some(40),
            detail: EventDetail::None,
        };
        let emissions = vec![Emission::Outcome(missed.clone()), Emission::Outcome(missed)];

        let report = dispatcher.emit_all(&emissions).await;
        assert_eq!(report.emissions, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(recording.outcomes(OutcomeKind::Missed).len(), 2);
        assert!(dispatcher.stats().failure_rate("broken") > 0.99);
        Ok(())
    })
    .await
}

/// The missed proposal counter only moves forward.
#[test]
fn test_metrics_state_counts_proposals() {
    let event = |kind| OutcomeEvent {
        kind,
        validators: vec![ValidatorRef {
            index: 1,
            pubkey: pubkey(1),
        }],
        epoch: 2,
        slot: Some(70),
        detail: EventDetail::None,
    };

    let mut state = MetricsState::default();
    assert_eq!(state.apply(&Emission::Outcome(event(OutcomeKind::Missed))), Some((70, 2)));
    assert_eq!(state.apply(&Emission::Outcome(event(OutcomeKind::Proposed))), None);
    state.apply(&Emission::Outcome(event(OutcomeKind::Missed)));
    state.apply(&Emission::Outcome(event(OutcomeKind::UnknownRelay)));

    assert_eq!(state.missed_block_proposals_count, 2);
    assert_eq!(state.bad_relay_count, 1);
    assert_eq!(state.wrong_fee_recipient_proposed_block_count, 0);
}
