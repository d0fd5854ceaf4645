use crate::shared::constants::{beacon, chain::SLOTS_PER_EPOCH, monitoring, price, watcher};
use crate::shared::types::H160;
use config::{Config as ConfigSource, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub beacon: BeaconConfig,
    pub execution: ExecutionConfig,
    pub keys: KeysConfig,
    pub watcher: WatcherConfig,
    pub price: PriceConfig,
    pub slack: SlackConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub url: String,
    pub request_timeout: u64,
    /// First pause between startup connection attempts, doubled on each failure.
    pub startup_retry_delay_ms: u64,
    pub startup_retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub pubkeys_file: Option<PathBuf>,
    pub web3signer_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Expected fee recipient; enables the fee recipient check.
    pub fee_recipient: Option<String>,
    /// Relays allowed to deliver payloads for our blocks; enables the relay check.
    pub relay_allow_list: Vec<String>,
    /// Extra relay data API endpoints queried besides the allow-listed ones.
    pub relay_urls: Vec<String>,
    /// Slots the head must advance past an empty duty slot before it counts as missed.
    pub miss_confirmation_slots: u64,
    pub reorg_window_slots: u64,
    /// Duty retention bound used when finality stalls.
    pub max_duty_lookback_epochs: u64,
    /// Slot within epoch E at which attestations of E-1 are evaluated.
    pub attestation_evaluation_slot: u64,
    pub tick_offset_ms: u64,
    pub sink_timeout_ms: u64,
    pub max_catch_up_slots: u64,
    pub liveness_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub channel: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        info!("Loading configuration from: {}", config_path);

        let config = ConfigSource::builder()
            .add_source(File::from(Path::new("config/default.toml")).required(false))
            .add_source(File::from(Path::new(&config_path)).required(false))
            .add_source(
                Environment::with_prefix("ETH_WATCHER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("keys.web3signer_urls")
                    .with_list_parse_key("watcher.relay_allow_list")
                    .with_list_parse_key("watcher.relay_urls")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.beacon.url.is_empty() {
            return Err("Beacon URL cannot be empty".to_string());
        }

        if self.keys.pubkeys_file.is_none() && self.keys.web3signer_urls.is_empty() {
            return Err("At least one key source (pubkeys file or web3signer) is required".to_string());
        }

        if self.watcher.miss_confirmation_slots == 0 {
            return Err("miss_confirmation_slots must be at least 1".to_string());
        }

        if self.watcher.max_duty_lookback_epochs < 2 {
            return Err("max_duty_lookback_epochs must be at least 2".to_string());
        }

        if self.watcher.attestation_evaluation_slot >= SLOTS_PER_EPOCH {
            return Err(format!(
                "attestation_evaluation_slot must be below {}",
                SLOTS_PER_EPOCH
            ));
        }

        if let Some(fee_recipient) = &self.watcher.fee_recipient {
            fee_recipient
                .parse::<H160>()
                .map_err(|e| format!("Invalid fee recipient: {}", e))?;
            if self.execution.url.is_none() {
                return Err("Fee recipient check requires an execution URL".to_string());
            }
        }

        if let Some(url) = self
            .watcher
            .relay_allow_list
            .iter()
            .chain(&self.watcher.relay_urls)
            .find(|url| !url.starts_with("http://") && !url.starts_with("https://"))
        {
            return Err(format!("Invalid relay URL: {}", url));
        }

        if self.slack.channel.is_some() != self.slack.token.is_some() {
            return Err("Slack channel and token must be set together".to_string());
        }

        Ok(())
    }

    pub fn expected_fee_recipient(&self) -> Option<H160> {
        self.watcher.fee_recipient.as_deref().and_then(|s| s.parse().ok())
    }
}

impl WatcherConfig {
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn tick_offset(&self) -> Duration {
        Duration::from_millis(self.tick_offset_ms)
    }

    /// Every relay asked about delivered payloads: the allow-list first,
    /// then the extra URLs, without duplicates.
    pub fn queried_relays(&self) -> Vec<String> {
        let mut relays: Vec<String> = Vec::new();
        for url in self.relay_allow_list.iter().chain(&self.relay_urls) {
            let url = url.trim_end_matches('/');
            if !relays.iter().any(|known| known == url) {
                relays.push(url.to_string());
            }
        }
        relays
    }
}

impl BeaconConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn startup_retry_delay(&self) -> Duration {
        Duration::from_millis(self.startup_retry_delay_ms.max(1))
    }

    pub fn startup_retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.startup_retry_max_delay_ms).max(self.startup_retry_delay())
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            url: beacon::DEFAULT_URL.to_string(),
            request_timeout: beacon::DEFAULT_REQUEST_TIMEOUT,
            startup_retry_delay_ms: beacon::DEFAULT_STARTUP_RETRY_DELAY_MS,
            startup_retry_max_delay_ms: beacon::DEFAULT_STARTUP_RETRY_MAX_DELAY_MS,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            fee_recipient: None,
            relay_allow_list: Vec::new(),
            relay_urls: Vec::new(),
            miss_confirmation_slots: watcher::DEFAULT_MISS_CONFIRMATION_SLOTS,
            reorg_window_slots: watcher::DEFAULT_REORG_WINDOW_SLOTS,
            max_duty_lookback_epochs: watcher::DEFAULT_MAX_DUTY_LOOKBACK_EPOCHS,
            attestation_evaluation_slot: watcher::DEFAULT_ATTESTATION_EVALUATION_SLOT,
            tick_offset_ms: watcher::DEFAULT_TICK_OFFSET_MS,
            sink_timeout_ms: watcher::DEFAULT_SINK_TIMEOUT_MS,
            max_catch_up_slots: watcher::DEFAULT_MAX_CATCH_UP_SLOTS,
            liveness_file: None,
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: price::DEFAULT_URL.to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: monitoring::DEFAULT_METRICS_HOST.to_string(),
            port: monitoring::DEFAULT_METRICS_PORT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.keys.pubkeys_file = Some(PathBuf::from("pubkeys.txt"));
        config
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_requires_key_source() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fee_recipient_requires_execution_client() {
        let mut config = valid_config();
        config.watcher.fee_recipient = Some("0x742d35cc6634c0532925a3b8d4c9db96c4b4d8b6".to_string());
        assert!(config.validate().is_err());

        config.execution.url = Some("http://localhost:8545".to_string());
        assert!(config.validate().is_ok());
        assert!(config.expected_fee_recipient().is_some());
    }

    #[test]
    fn test_invalid_fee_recipient() {
        let mut config = valid_config();
        config.execution.url = Some("http://localhost:8545".to_string());
        config.watcher.fee_recipient = Some("0x1234".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_confirmation_rejected() {
        let mut config = valid_config();
        config.watcher.miss_confirmation_slots = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_settings() {
        let mut config = valid_config();
        config.watcher.relay_allow_list = vec!["https://relay.example/".to_string()];
        assert!(config.validate().is_ok());
        assert_eq!(config.watcher.queried_relays(), vec!["https://relay.example".to_string()]);

        config.watcher.relay_urls = vec!["relay.example".to_string()];
        assert!(config.validate().is_err());

        config.watcher.relay_urls = vec![
            "https://relay.example".to_string(),
            "https://other-relay.example".to_string(),
        ];
        assert!(config.validate().is_ok());
        assert_eq!(
            config.watcher.queried_relays(),
            vec![
                "https://relay.example".to_string(),
                "https://other-relay.example".to_string()
            ]
        );

        config.watcher.relay_allow_list = vec!["relay.example".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.watcher.miss_confirmation_slots, 1);
        assert_eq!(config.watcher.attestation_evaluation_slot, 16);
        assert_eq!(config.metrics.port, 8000);
        assert_eq!(config.beacon.startup_retry_delay(), Duration::from_secs(1));
        assert_eq!(config.beacon.startup_retry_max_delay(), Duration::from_secs(60));
        assert!(config.execution.url.is_none());
    }
}
