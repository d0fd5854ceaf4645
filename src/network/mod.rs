// Network aggregates - network-wide validator counts, entry queue and price

pub mod estimator;

pub use estimator::{NetworkAggregates, NetworkEstimator, NetworkTotals, OwnCounts};
