use crate::events::Emission;
use async_trait::async_trait;
use std::collections::HashMap;

/// A consumer of outcome events and aggregate values.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    /// Delivers one emission. Errors are reported per sink and never abort a tick.
    async fn deliver(&mut self, emission: &Emission) -> crate::Result<()>;
}

/// Result of fanning one batch out to every sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub emissions: usize,
    pub delivered: usize,
    /// (sink, reason) for every failed or timed out delivery.
    pub failures: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.emissions += other.emissions;
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Running delivery statistics per sink.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    pub total_emissions: u64,
    pub delivered: HashMap<String, u64>,
    pub failed: HashMap<String, u64>,
}

impl DispatcherStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, report: &DispatchReport, sink_names: &[String]) {
        self.total_emissions += report.emissions as u64;
        for name in sink_names {
            let failures = report.failures.iter().filter(|(sink, _)| sink == name).count() as u64;
            let delivered = (report.emissions as u64).saturating_sub(failures);
            *self.delivered.entry(name.clone()).or_default() += delivered;
            *self.failed.entry(name.clone()).or_default() += failures;
        }
    }

    pub fn failure_rate(&self, sink: &str) -> f64 {
        let failed = self.failed.get(sink).copied().unwrap_or_default();
        let delivered = self.delivered.get(sink).copied().unwrap_or_default();
        let total = failed + delivered;
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_merge() {
        let mut report = DispatchReport {
            emissions: 1,
            delivered: 2,
            failures: Vec::new(),
        };
        report.merge(DispatchReport {
            emissions: 1,
            delivered: 1,
            failures: vec![("slack".to_string(), "timed out".to_string())],
        });
        assert_eq!(report.emissions, 2);
        assert_eq!(report.delivered, 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_stats_failure_rate() {
        let mut stats = DispatcherStats::new();
        let names = vec!["log".to_string(), "slack".to_string()];
        let report = DispatchReport {
            emissions: 4,
            delivered: 7,
            failures: vec![("slack".to_string(), "status 500".to_string())],
        };
        stats.record(&report, &names);

        assert_eq!(stats.failure_rate("log"), 0.0);
        assert_eq!(stats.failure_rate("slack"), 0.25);
        assert_eq!(stats.total_emissions, 4);
    }
}
