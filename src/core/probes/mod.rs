// src/core/probes/mod.rs

//! The probe capability and the four probes shipped with the tool.
//!
//! A probe owns its own HTTP client or resolver, runs its sub-lookups concurrently and
//! hands back one JSON object or one error. The orchestrator never looks inside.

pub mod active;
pub mod breach;
pub mod dns;
pub mod feeds;
pub mod fingerprint;
pub mod headers;
pub mod ipinfo;
pub mod passive;
pub mod ports;
pub mod social;
pub mod subdomains;
pub mod tls;
pub mod whois;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::ScanError;
use crate::core::models::{Payload, Target};

pub use active::ActiveReconProbe;
pub use breach::BreachMonitorProbe;
pub use passive::PassiveReconProbe;
pub use social::SocialPresenceProbe;

pub const USER_AGENT: &str = "VanguardOSINT/0.1";

/// One independently executable information-gathering capability.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable identifier, unique within a run. Matches the configuration key.
    fn name(&self) -> &str;

    async fn execute(&self, target: &Target) -> Result<Payload, ScanError>;
}

/// Serializes a probe's typed result into the JSON object carried by an envelope.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Payload, ScanError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(ScanError::probe(format!("probe result is not an object: {}", other))),
    }
}

pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ScanError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ScanError::probe(format!("Failed to build HTTP client: {}", e)))
}

/// Sub-lookup failures of a probe that still produced data.
#[derive(Debug, Default, Serialize)]
pub struct PartialFailures(Vec<PartialFailure>);

#[derive(Debug, Serialize)]
struct PartialFailure {
    section: &'static str,
    error: String,
}

impl PartialFailures {
    /// Unwraps `result`, remembering the error under `section` if there is one.
    pub fn take<T>(&mut self, section: &'static str, result: Result<T, ScanError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.0.push(PartialFailure { section, error: e.to_string() });
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fails the whole probe when every one of its `sections` failed.
    pub fn into_result(self, sections: usize) -> Result<Self, ScanError> {
        if sections > 0 && self.0.len() >= sections {
            let joined = self
                .0
                .iter()
                .map(|f| format!("{}: {}", f.section, f.error))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ScanError::probe(format!("all lookups failed ({})", joined)));
        }
        Ok(self)
    }
}
