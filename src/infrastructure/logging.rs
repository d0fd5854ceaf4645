use crate::infrastructure::config::LoggingConfig;
use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub struct Logging {
    config: LoggingConfig,
}

impl Logging {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    /// `RUST_LOG` wins over the configured level when set.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }

        let level: Level = self
            .config
            .level
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", self.config.level, e))?;
        Ok(EnvFilter::new(format!("eth_validator_watcher={}", level.as_str().to_lowercase())))
    }

    pub fn init(&self) -> Result<()> {
        let env_filter = self.env_filter()?;

        let installed = match self.config.format.as_str() {
            "json" => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false).json())
                .try_init(),
            "text" => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false))
                .try_init(),
            other => return Err(anyhow::anyhow!("Unknown log format '{}'", other)),
        };
        installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        tracing::info!("Logging initialized with format: {}", self.config.format);
        Ok(())
    }

    pub fn set_level(&mut self, level: &str) -> Result<()> {
        let _: Level = level
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", level, e))?;

        self.config.level = level.to_string();
        Ok(())
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self::new(LoggingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_creation() {
        let logging = Logging::default();
        assert_eq!(logging.config().format, "json");
    }

    #[test]
    fn test_logging_set_level() {
        let mut logging = Logging::default();
        assert!(logging.set_level("debug").is_ok());
        assert_eq!(logging.config().level, "debug");
        assert!(logging.set_level("invalid").is_err());
    }

    #[test]
    fn test_unknown_format_rejected() {
        let logging = Logging::new(LoggingConfig {
            level: "info".to_string(),
            format: "xml".to_string(),
        });
        assert!(logging.init().is_err());
    }
}
