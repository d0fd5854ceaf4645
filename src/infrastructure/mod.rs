// Infrastructure - configuration, logging, metrics exposition and the tick driver

pub mod config;
pub mod app;
pub mod logging;
pub mod metrics;
pub mod health;
pub mod shutdown;
