// src/core/errors.rs

use std::time::Duration;
use thiserror::Error;

/// Every failure the scan pipeline knows about.
///
/// Only `Configuration` and `InvalidTarget` abort a run, and both are raised before
/// any probe is dispatched. The probe-level variants end up inside a `ResultEnvelope`,
/// and `AggregationData` never leaves the aggregator except as a log line.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScanError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// A probe failed on its own (network error, parse error, remote service down).
    #[error("{0}")]
    ProbeExecution(String),

    #[error("timeout: probe exceeded its {}s deadline", .0.as_secs_f64())]
    ProbeTimeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("malformed field `{field}`: {reason}")]
    AggregationData { field: String, reason: String },

    #[error("report error: {0}")]
    Report(String),
}

impl ScanError {
    pub fn probe(message: impl Into<String>) -> Self {
        ScanError::ProbeExecution(message.into())
    }

    /// True for the errors that must stop a scan before it starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Configuration(_) | ScanError::InvalidTarget(_))
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        ScanError::ProbeExecution(format!("HTTP error: {}", e))
    }
}

impl From<hickory_resolver::error::ResolveError> for ScanError {
    fn from(e: hickory_resolver::error::ResolveError) -> Self {
        ScanError::ProbeExecution(format!("DNS error: {}", e))
    }
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        ScanError::ProbeExecution(format!("I/O error: {}", e))
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(e: serde_json::Error) -> Self {
        ScanError::ProbeExecution(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_reason() {
        let err = ScanError::ProbeTimeout(Duration::from_secs(5));
        assert!(err.to_string().starts_with("timeout"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn probe_error_message_is_passed_through() {
        assert_eq!(ScanError::probe("network down").to_string(), "network down");
    }

    #[test]
    fn only_configuration_and_target_errors_are_fatal() {
        assert!(ScanError::Configuration("x".into()).is_fatal());
        assert!(ScanError::InvalidTarget("x".into()).is_fatal());
        assert!(!ScanError::Cancelled.is_fatal());
        assert!(!ScanError::probe("x").is_fatal());
    }
}
