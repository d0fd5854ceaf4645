// Messaging - fan-out of outcome events to metrics, alert and log sinks

pub mod domain;
pub mod dispatcher;
pub mod log_sink;
pub mod metrics_sink;
pub mod slack;

pub use dispatcher::EventDispatcher;
pub use domain::{DispatchReport, EventSink};
pub use log_sink::LogSink;
pub use metrics_sink::{MetricsSink, MetricsState};
pub use slack::SlackAlertSink;
