// Anomaly detection - outcome classification and per-validator history

pub mod detector;

pub use detector::{classify_attestation, AnomalyDetector, AttestationOutcome, AttestationReport, DetectorSettings};
