// Outcome events - what the detector reports and the sinks consume

pub mod domain;

pub use domain::{AttestationSummary, Emission, EventDetail, OutcomeEvent, OutcomeKind, TickSummary, ValidatorRef};
