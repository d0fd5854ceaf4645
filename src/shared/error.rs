use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Beacon node error: {0}")]
    Beacon(String),

    #[error("Execution node error: {0}")]
    Execution(String),

    #[error("Key source {source_name} failed: {reason}")]
    KeySource { source_name: String, reason: String },

    #[error("Price source error: {0}")]
    Price(String),

    #[error("Sink {sink} failed: {reason}")]
    Sink { sink: String, reason: String },

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Invalid validator public key: {0}")]
    InvalidPubkey(String),

    #[error("Invalid Ethereum address: {0}")]
    InvalidAddress(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid bitfield: {0}")]
    InvalidBitfield(String),
}

impl WatcherError {
    /// Transient I/O failures are retried on the next tick using cached state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WatcherError::Http(_)
                | WatcherError::Timeout(_)
                | WatcherError::Beacon(_)
                | WatcherError::Execution(_)
                | WatcherError::KeySource { .. }
                | WatcherError::Price(_)
                | WatcherError::Sink { .. }
        )
    }
}

impl From<config::ConfigError> for WatcherError {
    fn from(err: config::ConfigError) -> Self {
        WatcherError::Config(err.to_string())
    }
}
