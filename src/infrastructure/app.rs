use crate::chain::beacon::BeaconClient;
use crate::chain::domain::{ChainClient, ExecutionClient, PriceClient};
use crate::chain::execution::ExecutionRpcClient;
use crate::chain::price::CoinGeckoClient;
use crate::detection::{AnomalyDetector, DetectorSettings};
use crate::duties::{DutyTracker, TrackerSettings};
use crate::events::{Emission, TickSummary};
use crate::infrastructure::{config::Config, health::LivenessFile, shutdown::ShutdownSignal};
use crate::messaging::{DispatchReport, EventDispatcher, EventSink, LogSink, MetricsSink, SlackAlertSink};
use crate::network::NetworkEstimator;
use crate::registry::{FileKeySource, KeySource, ValidatorRegistry, Web3SignerKeySource};
use crate::shared::constants::chain::SECONDS_PER_SLOT;
use crate::shared::error::WatcherError;
use crate::shared::types::{epoch_of, first_slot_of, slot_in_epoch, Epoch, Slot};
use crate::shared::utils::time::{retry_with_backoff, with_timeout};
use crate::Result;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub attestation_evaluation_slot: u64,
    pub max_catch_up_slots: u64,
    pub call_timeout: Duration,
    /// Delay before the first tick.
    pub tick_offset: Duration,
}

impl From<&Config> for WatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            attestation_evaluation_slot: config.watcher.attestation_evaluation_slot,
            max_catch_up_slots: config.watcher.max_catch_up_slots.max(1),
            call_timeout: config.beacon.request_timeout(),
            tick_offset: config.watcher.tick_offset(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub head: Slot,
    pub epoch: Epoch,
    pub new_epoch: bool,
    pub slots_processed: u64,
    pub emissions: Vec<Emission>,
    pub dispatch: DispatchReport,
}

#[derive(Debug, Clone, Default)]
pub struct WatcherStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub emissions: u64,
}

/// Owns every component and drives them once per slot. All state lives here
/// and is only touched from `tick`, one tick at a time.
pub struct Watcher {
    settings: WatcherSettings,
    chain: Arc<dyn ChainClient>,
    registry: ValidatorRegistry,
    tracker: DutyTracker,
    detector: AnomalyDetector,
    estimator: NetworkEstimator,
    dispatcher: EventDispatcher,
    liveness: Option<LivenessFile>,
    current_epoch: Option<Epoch>,
    last_slot: Option<Slot>,
    stats: WatcherStats,
}

impl Watcher {
    pub fn new(
        config: &Config,
        chain: Arc<dyn ChainClient>,
        execution: Option<Arc<dyn ExecutionClient>>,
        price: Option<Arc<dyn PriceClient>>,
        sources: Vec<Box<dyn KeySource>>,
        sinks: Vec<Box<dyn EventSink>>,
    ) -> Self {
        let settings = WatcherSettings::from(config);

        let detector = AnomalyDetector::new(
            DetectorSettings {
                expected_fee_recipient: config.expected_fee_recipient(),
                relay_allow_list: config.watcher.relay_allow_list.clone(),
                call_timeout: settings.call_timeout,
            },
            execution,
        );

        Self {
            registry: ValidatorRegistry::new(sources),
            tracker: DutyTracker::new(TrackerSettings::from(&config.watcher)),
            detector,
            estimator: NetworkEstimator::new(price, settings.call_timeout),
            dispatcher: EventDispatcher::new(sinks, config.watcher.sink_timeout()),
            liveness: config.watcher.liveness_file.clone().map(LivenessFile::new),
            chain,
            settings,
            current_epoch: None,
            last_slot: None,
            stats: WatcherStats::default(),
        }
    }

    /// Builds the real collaborators from configuration and negotiates the
    /// beacon node capabilities, retrying until the node answers. Returns
    /// `None` when shutdown is requested first.
    pub async fn from_config(config: &Config, shutdown: &ShutdownSignal) -> Result<Option<Self>> {
        config
            .validate()
            .map_err(|e| WatcherError::Config(format!("validation failed: {}", e)))?;

        let request_timeout = config.beacon.request_timeout();

        let mut beacon = BeaconClient::new(&config.beacon, config.watcher.queried_relays())?;
        let negotiated = retry_with_backoff(
            "Beacon node negotiation",
            config.beacon.startup_retry_delay(),
            config.beacon.startup_retry_max_delay(),
            shutdown.wait(),
            || beacon.negotiate(),
        )
        .await;
        let Some(capabilities) = negotiated else {
            info!("Shutdown requested before the beacon node became reachable");
            return Ok(None);
        };
        beacon.set_capabilities(capabilities);
        let chain: Arc<dyn ChainClient> = Arc::new(beacon);

        let execution: Option<Arc<dyn ExecutionClient>> = match &config.execution.url {
            Some(url) => Some(Arc::new(ExecutionRpcClient::new(url.clone(), request_timeout)?)),
            None => None,
        };

        let price: Option<Arc<dyn PriceClient>> = if config.price.enabled {
            Some(Arc::new(CoinGeckoClient::new(config.price.url.clone(), request_timeout)?))
        } else {
            None
        };

        let mut sources: Vec<Box<dyn KeySource>> = Vec::new();
        if let Some(path) = &config.keys.pubkeys_file {
            sources.push(Box::new(FileKeySource::new(path.clone())));
        }
        for url in &config.keys.web3signer_urls {
            sources.push(Box::new(Web3SignerKeySource::new(url.clone(), request_timeout)?));
        }

        let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(LogSink)];
        if config.metrics.enabled {
            sinks.push(Box::new(MetricsSink::new()));
        }
        if let (Some(channel), Some(token)) = (&config.slack.channel, &config.slack.token) {
            sinks.push(Box::new(SlackAlertSink::new(
                channel.clone(),
                token.clone(),
                request_timeout,
            )?));
        }

        Ok(Some(Self::new(config, chain, execution, price, sources, sinks)))
    }

    pub fn stats(&self) -> &WatcherStats {
        &self.stats
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &DutyTracker {
        &self.tracker
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Ticks once per slot until shutdown is requested. A tick in flight
    /// always completes before the loop exits.
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> Result<()> {
        info!("Starting validator watcher...");

        let period = Duration::from_secs(SECONDS_PER_SLOT);
        let mut ticker = interval_at(Instant::now() + self.settings.tick_offset, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_logged().await;
                }
                _ = shutdown.wait() => {
                    break;
                }
            }
        }

        info!(
            "Validator watcher stopped after {} ticks ({} failed)",
            self.stats.ticks, self.stats.failed_ticks
        );
        Ok(())
    }

    async fn tick_logged(&mut self) {
        match self.tick().await {
            Ok(report) => {
                debug!(
                    "Tick at slot {} done: {} slots processed, {} emissions",
                    report.head,
                    report.slots_processed,
                    report.emissions.len()
                );
            }
            Err(e) => {
                self.stats.failed_ticks += 1;
                let transient = e
                    .downcast_ref::<WatcherError>()
                    .map_or(false, WatcherError::is_transient);
                if transient {
                    warn!("Tick failed, retrying next slot: {}", e);
                } else {
                    error!("Tick failed, retrying next slot: {}", e);
                }
            }
        }
    }

    /// One pass over the chain as of the current head.
    pub async fn tick(&mut self) -> Result<TickReport> {
        self.stats.ticks += 1;
        let limit = self.settings.call_timeout;
        let chain = Arc::clone(&self.chain);

        let (head, finalized_epoch) = tokio::try_join!(
            with_timeout(limit, "head slot", chain.head_slot()),
            with_timeout(limit, "finality checkpoints", chain.finalized_epoch()),
        )?;
        let epoch = epoch_of(head);

        let mut report = TickReport {
            head,
            epoch,
            ..Default::default()
        };

        if self.current_epoch.map_or(true, |current| epoch > current) {
            report.new_epoch = true;
            self.on_new_epoch(epoch, finalized_epoch, &mut report.emissions).await;
        }
        self.ensure_predictions(epoch).await;

        report.slots_processed = self.process_new_slots(head).await;

        let resolutions = self.tracker.resolve_slots(head, finalized_epoch, chain.as_ref()).await;
        let proposals = self.detector.proposal_outcomes(resolutions, chain.as_ref()).await;
        report.emissions.extend(proposals.into_iter().map(Emission::Outcome));

        self.evaluate_attestations(head, &mut report.emissions).await;
        self.check_statuses(epoch, &mut report.emissions).await;

        let upcoming = self.tracker.take_new_upcoming(head);
        report
            .emissions
            .extend(self.detector.upcoming(&upcoming).into_iter().map(Emission::Outcome));

        report.emissions.push(Emission::Tick(TickSummary {
            slot: head,
            epoch,
            future_proposals: self.tracker.future_proposals(head),
        }));

        report.dispatch = self.dispatcher.emit_all(&report.emissions).await;
        self.stats.emissions += report.emissions.len() as u64;

        if let Some(liveness) = &self.liveness {
            if let Err(e) = liveness.mark_alive().await {
                warn!("Failed to write liveness marker: {}", e);
            }
        }

        Ok(report)
    }

    /// Registry refresh, aggregates and pruning, in that order, once per epoch.
    async fn on_new_epoch(&mut self, epoch: Epoch, finalized_epoch: Epoch, emissions: &mut Vec<Emission>) {
        info!("New epoch {}", epoch);
        let limit = self.settings.call_timeout;
        let chain = Arc::clone(&self.chain);

        if let Err(e) = with_timeout(limit, "registry refresh", self.registry.refresh(epoch, chain.as_ref())).await {
            warn!("Registry refresh failed, keeping the previous watched set: {}", e);
        }
        let watched = self.registry.snapshot();
        self.detector.forget_unwatched(&watched);

        let aggregates = self.estimator.estimate(epoch, &watched, chain.as_ref()).await;
        emissions.push(Emission::Aggregates(aggregates));

        self.tracker.prune(finalized_epoch, epoch);
        self.current_epoch = Some(epoch);
    }

    /// Predicts the current epoch with this epoch's watched set and the next
    /// one provisionally. Retried every tick until it succeeds.
    async fn ensure_predictions(&mut self, epoch: Epoch) {
        let limit = self.settings.call_timeout;
        let chain = Arc::clone(&self.chain);
        let watched = self.registry.snapshot();

        let mut targets = Vec::new();
        if !self.tracker.is_predicted(epoch) {
            targets.push((epoch, false));
        }
        if !self.tracker.has_duties_for(epoch + 1) {
            targets.push((epoch + 1, true));
        }

        for (target, provisional) in targets {
            let prediction = self.tracker.predict_epoch(target, &watched, chain.as_ref(), provisional);
            if let Err(e) = with_timeout(limit, "duty prediction", prediction).await {
                warn!("Duty prediction for epoch {} failed: {}", target, e);
            }
        }
    }

    /// Scans blocks of slots not seen yet for attestation inclusions. Stops
    /// at the first block that cannot be fetched so it is retried next tick.
    async fn process_new_slots(&mut self, head: Slot) -> u64 {
        let limit = self.settings.call_timeout;
        let chain = Arc::clone(&self.chain);

        let next = match self.last_slot {
            Some(last) => last + 1,
            None => first_slot_of(epoch_of(head)),
        };
        let oldest_allowed = head.saturating_sub(self.settings.max_catch_up_slots - 1);
        let start = next.max(oldest_allowed);
        if start > next {
            warn!("Skipping {} slots behind head {}", start - next, head);
        }

        let mut processed = 0;
        for slot in start..=head {
            match with_timeout(limit, "block", chain.block(slot)).await {
                Ok(Some(block)) => {
                    self.tracker.record_block(&block);
                }
                Ok(None) => debug!("Slot {} is empty", slot),
                Err(e) => {
                    warn!("Could not fetch block at slot {}, retrying next tick: {}", slot, e);
                    break;
                }
            }
            self.last_slot = Some(slot);
            processed += 1;
        }
        processed
    }

    /// Evaluates the previous epoch once the current one reaches the
    /// evaluation slot.
    async fn evaluate_attestations(&mut self, head: Slot, emissions: &mut Vec<Emission>) {
        let epoch = epoch_of(head);
        if epoch == 0 || slot_in_epoch(head) < self.settings.attestation_evaluation_slot {
            return;
        }

        let target = epoch - 1;
        if self.detector.last_evaluated_epoch().map_or(false, |last| last >= target) {
            return;
        }
        if !self.tracker.has_duties_for(target) {
            debug!("No duties recorded for epoch {}, skipping attestation evaluation", target);
            return;
        }

        let chain = Arc::clone(&self.chain);
        let orphaned = self.tracker.verify_inclusions(target, chain.as_ref()).await;
        if orphaned > 0 {
            info!("{} blocks carrying inclusions for epoch {} were reorged out", orphaned, target);
        }
        let Some(duties) = self.tracker.attestation_duties(target) else {
            return;
        };

        let watched = self.registry.snapshot();
        match self
            .detector
            .evaluate_attestations(target, &duties, &watched, chain.as_ref())
            .await
        {
            Ok(Some(report)) => {
                emissions.extend(report.events.into_iter().map(Emission::Outcome));
                emissions.push(Emission::Attestations(report.summary));
            }
            Ok(None) => {}
            Err(e) => warn!("Attestation evaluation for epoch {} failed, retrying next tick: {}", target, e),
        }
    }

    async fn check_statuses(&mut self, epoch: Epoch, emissions: &mut Vec<Emission>) {
        let watched = self.registry.snapshot();
        let pubkeys = watched.resolved_pubkeys();
        if pubkeys.is_empty() {
            return;
        }

        let chain = Arc::clone(&self.chain);
        match with_timeout(self.settings.call_timeout, "validator statuses", chain.validators(&pubkeys)).await {
            Ok(validators) => {
                let events = self.detector.status_transitions(epoch, &validators);
                emissions.extend(events.into_iter().map(Emission::Outcome));
            }
            Err(e) => warn!("Could not fetch validator statuses: {}", e),
        }
    }
}
