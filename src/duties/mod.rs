// Duty tracking - proposal and attestation duties of the watched set

pub mod domain;
pub mod tracker;

pub use domain::{AttestationDuty, ProposalDuty, ProposalResolution, ProposalState};
pub use tracker::{DutyTracker, TrackerSettings};
