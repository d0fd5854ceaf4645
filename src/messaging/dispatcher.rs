use crate::events::Emission;
use crate::messaging::domain::{DispatchReport, DispatcherStats, EventSink};
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, warn};

/// Fans emissions out to every sink concurrently, each bounded by a timeout per batch.
pub struct EventDispatcher {
    sinks: Vec<Box<dyn EventSink>>,
    sink_timeout: Duration,
    stats: DispatcherStats,
}

impl EventDispatcher {
    pub fn new(sinks: Vec<Box<dyn EventSink>>, sink_timeout: Duration) -> Self {
        Self {
            sinks,
            sink_timeout,
            stats: DispatcherStats::new(),
        }
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|sink| sink.name().to_string()).collect()
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    /// Delivers one emission to all sinks.
    pub async fn emit(&mut self, emission: &Emission) -> DispatchReport {
        self.deliver_batch(std::slice::from_ref(emission)).await
    }

    /// Delivers a tick's emissions in order. Sinks run concurrently and each
    /// one gets a single `sink_timeout` for the whole batch, so a stuck sink
    /// costs the tick one timeout however many emissions there are.
    pub async fn emit_all(&mut self, emissions: &[Emission]) -> DispatchReport {
        let report = self.deliver_batch(emissions).await;

        let names = self.sink_names();
        self.stats.record(&report, &names);

        if !emissions.is_empty() {
            debug!(
                "Dispatched {} emissions to {} sinks ({} failures)",
                report.emissions,
                self.sinks.len(),
                report.failures.len()
            );
        }
        report
    }

    async fn deliver_batch(&mut self, emissions: &[Emission]) -> DispatchReport {
        let limit = self.sink_timeout;

        let deliveries = self.sinks.iter_mut().map(|sink| async move {
            let name = sink.name().to_string();
            let mut outcomes: Vec<Result<(), String>> = Vec::with_capacity(emissions.len());

            let batch = async {
                for emission in emissions {
                    outcomes.push(sink.deliver(emission).await.map_err(|e| e.to_string()));
                }
            };
            if tokio::time::timeout(limit, batch).await.is_err() {
                outcomes.resize(
                    emissions.len(),
                    Err(format!("timed out after {}ms", limit.as_millis())),
                );
            }
            (name, outcomes)
        });

        let mut report = DispatchReport {
            emissions: emissions.len(),
            ..Default::default()
        };

        for (name, outcomes) in join_all(deliveries).await {
            for (emission, outcome) in emissions.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => report.delivered += 1,
                    Err(reason) => {
                        warn!("Sink {} failed to deliver {}: {}", name, emission.label(), reason);
                        report.failures.push((name.clone(), reason));
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TickSummary;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        name: String,
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&mut self, _emission: &Emission) -> crate::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&mut self, _emission: &Emission) -> crate::Result<()> {
            Err(anyhow::anyhow!("channel unavailable"))
        }
    }

    struct StuckSink;

    #[async_trait]
    impl EventSink for StuckSink {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn deliver(&mut self, _emission: &Emission) -> crate::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn tick() -> Emission {
        Emission::Tick(TickSummary {
            slot: 64,
            epoch: 2,
            future_proposals: 0,
        })
    }

    #[tokio::test]
    async fn test_failing_sinks_are_isolated() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new(
            vec![
                Box::new(FailingSink),
                Box::new(StuckSink),
                Box::new(CountingSink {
                    name: "counting".to_string(),
                    seen: Arc::clone(&seen),
                }),
            ],
            Duration::from_millis(50),
        );

        let report = dispatcher.emit_all(&[tick(), tick()]).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(report.emissions, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failures.len(), 4);
        assert!(report.failures.iter().any(|(_, reason)| reason.contains("timed out")));
        assert_eq!(dispatcher.stats().failure_rate("counting"), 0.0);
        assert_eq!(dispatcher.stats().failure_rate("stuck"), 1.0);
    }

    #[tokio::test]
    async fn test_stuck_sink_costs_one_timeout_per_batch() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new(
            vec![
                Box::new(StuckSink),
                Box::new(CountingSink {
                    name: "counting".to_string(),
                    seen: Arc::clone(&seen),
                }),
            ],
            Duration::from_millis(100),
        );
        let emissions: Vec<Emission> = (0..10).map(|_| tick()).collect();

        let started = std::time::Instant::now();
        let report = dispatcher.emit_all(&emissions).await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(500), "batch took {:?}", elapsed);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(report.emissions, 10);
        assert_eq!(report.delivered, 10);
        assert_eq!(report.failures.len(), 10);
        assert!(report.failures.iter().all(|(sink, _)| sink == "stuck"));
        assert_eq!(dispatcher.stats().failure_rate("stuck"), 1.0);
    }

    #[tokio::test]
    async fn test_no_sinks() {
        let mut dispatcher = EventDispatcher::new(Vec::new(), Duration::from_millis(50));
        let report = dispatcher.emit(&tick()).await;
        assert!(report.is_clean());
        assert_eq!(report.delivered, 0);
    }
}
