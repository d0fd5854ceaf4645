use anyhow::Result;
use eth_validator_watcher::infrastructure::{
    app::Watcher, config::Config, logging::Logging, metrics::Metrics, shutdown::ShutdownSignal,
};
use eth_validator_watcher::shared::error::WatcherError;
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load().map_err(WatcherError::from) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = Logging::new(config.logging.clone()).init() {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("Starting Ethereum validator watcher...");

    if let Err(e) = Metrics::init(&config.metrics) {
        error!("Failed to start metrics exporter: {}", e);
        process::exit(1);
    }

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current tick");
            signal.shutdown();
        }
    });

    let mut watcher = match Watcher::from_config(&config, &shutdown).await {
        Ok(Some(watcher)) => watcher,
        Ok(None) => return Ok(()),
        Err(e) => {
            error!("Failed to initialize validator watcher: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = watcher.run(shutdown).await {
        error!("Validator watcher failed: {}", e);
        process::exit(1);
    }

    info!("Validator watcher shutdown complete");
    Ok(())
}
