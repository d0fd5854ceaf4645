// Domain constants for the validator watcher

pub mod chain {
    // Mainnet beacon chain timing
    pub const SLOTS_PER_EPOCH: u64 = 32;
    pub const SECONDS_PER_SLOT: u64 = 12;
    pub const SECONDS_PER_EPOCH: u64 = SLOTS_PER_EPOCH * SECONDS_PER_SLOT;

    // Churn parameters used for the entry queue estimate
    pub const MIN_PER_EPOCH_CHURN_LIMIT: u64 = 4;
    pub const CHURN_LIMIT_QUOTIENT: u64 = 65_536;
    pub const MAX_PER_EPOCH_ACTIVATION_CHURN_LIMIT: u64 = 8;

    // An attestation included in the very next slot is optimal
    pub const IDEAL_INCLUSION_DISTANCE: u64 = 1;
}

pub mod watcher {
    pub const DEFAULT_MISS_CONFIRMATION_SLOTS: u64 = 1;
    pub const DEFAULT_REORG_WINDOW_SLOTS: u64 = 32;
    pub const DEFAULT_MAX_DUTY_LOOKBACK_EPOCHS: u64 = 4;
    pub const DEFAULT_ATTESTATION_EVALUATION_SLOT: u64 = 16;
    pub const DEFAULT_TICK_OFFSET_MS: u64 = 4_000;
    pub const DEFAULT_SINK_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_MAX_CATCH_UP_SLOTS: u64 = 32;

    // How many keys are spelled out in a log or alert line
    pub const MAX_LISTED_KEYS: usize = 5;
}

pub mod beacon {
    pub const DEFAULT_URL: &str = "http://localhost:5052";
    pub const DEFAULT_REQUEST_TIMEOUT: u64 = 10_000; // 10 seconds
    pub const DEFAULT_STARTUP_RETRY_DELAY_MS: u64 = 1_000;
    pub const DEFAULT_STARTUP_RETRY_MAX_DELAY_MS: u64 = 60_000;
}

pub mod price {
    pub const DEFAULT_URL: &str =
        "https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd";
}

pub mod slack {
    pub const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
}

pub mod monitoring {
    pub const DEFAULT_METRICS_PORT: u16 = 8000;
    pub const DEFAULT_METRICS_HOST: &str = "0.0.0.0";
    /// Gauges left unwritten for this many slots drop out of the scrape.
    pub const GAUGE_IDLE_SLOTS: u64 = 3;
}
