// src/core/models.rs

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;
use url::Url;

use crate::core::errors::ScanError;
use crate::core::knowledge_base::Indicator;

/// The open-ended mapping a probe returns on success.
pub type Payload = serde_json::Map<String, serde_json::Value>;

static RE_HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+(?:[a-z]{2,63}|xn--[a-z0-9-]{1,59})$").unwrap()
});

// --- Target ---

/// The subject of one scan: a domain plus whatever identifiers are already known about it.
///
/// A `Target` is built once at scan start and then shared read-only between every
/// probe of the run; there are no setters. Deserializing re-checks the domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "TargetRecord")]
pub struct Target {
    domain: String,
    ip_addresses: BTreeSet<String>,
    subdomains: BTreeSet<String>,
    created_at: DateTime<Utc>,
}

impl Target {
    /// Builds a target from user input. Accepts a bare hostname or a URL, in which case
    /// only the host part is kept.
    pub fn new(input: &str) -> Result<Self, ScanError> {
        let domain = normalize_domain(input)?;
        Ok(Self {
            domain,
            ip_addresses: BTreeSet::new(),
            subdomains: BTreeSet::new(),
            created_at: Utc::now(),
        })
    }

    pub fn with_ip_addresses<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip_addresses.extend(ips.into_iter().map(Into::into));
        self
    }

    pub fn with_subdomains<I, S>(mut self, subdomains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subdomains.extend(subdomains.into_iter().map(Into::into));
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn ip_addresses(&self) -> &BTreeSet<String> {
        &self.ip_addresses
    }

    pub fn subdomains(&self) -> &BTreeSet<String> {
        &self.subdomains
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The registrable-looking part of the domain with a leading "www." removed.
    pub fn root_domain(&self) -> &str {
        self.domain.strip_prefix("www.").unwrap_or(&self.domain)
    }
}

#[derive(Deserialize)]
struct TargetRecord {
    domain: String,
    #[serde(default)]
    ip_addresses: BTreeSet<String>,
    #[serde(default)]
    subdomains: BTreeSet<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TargetRecord> for Target {
    type Error = ScanError;

    fn try_from(record: TargetRecord) -> Result<Self, Self::Error> {
        if normalize_domain(&record.domain)? != record.domain {
            return Err(ScanError::InvalidTarget(format!("'{}' is not normalized", record.domain)));
        }
        Ok(Self {
            domain: record.domain,
            ip_addresses: record.ip_addresses,
            subdomains: record.subdomains,
            created_at: record.created_at,
        })
    }
}

fn normalize_domain(input: &str) -> Result<String, ScanError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ScanError::InvalidTarget("domain must not be empty".to_string()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let host = Url::parse(&with_scheme)
        .ok()
        .and_then(|url| url.host_str().map(String::from))
        .unwrap_or_else(|| trimmed.to_string());

    let domain = host.trim_end_matches('.').to_lowercase();
    if domain.len() > 253 || !RE_HOSTNAME.is_match(&domain) {
        return Err(ScanError::InvalidTarget(format!("'{}' is not a valid hostname", input.trim())));
    }
    Ok(domain)
}

// --- Result envelope ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Success,
    Error,
}

/// The uniform outcome of one probe against one target.
///
/// The two constructors are the only way to build one, which keeps the invariant
/// "payload empty on error, no message on success" true for every instance.
/// Deserialization goes through the same check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "EnvelopeRecord")]
pub struct ResultEnvelope {
    probe: String,
    status: ProbeStatus,
    payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    completed_at: DateTime<Utc>,
}

impl ResultEnvelope {
    pub fn success(probe: impl Into<String>, payload: Payload) -> Self {
        Self {
            probe: probe.into(),
            status: ProbeStatus::Success,
            payload,
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(probe: impl Into<String>, error: &ScanError) -> Self {
        Self {
            probe: probe.into(),
            status: ProbeStatus::Error,
            payload: Payload::new(),
            error: Some(error.to_string()),
            completed_at: Utc::now(),
        }
    }

    pub fn probe(&self) -> &str {
        &self.probe
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == ProbeStatus::Success
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

#[derive(Deserialize)]
struct EnvelopeRecord {
    probe: String,
    status: ProbeStatus,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    error: Option<String>,
    completed_at: DateTime<Utc>,
}

impl TryFrom<EnvelopeRecord> for ResultEnvelope {
    type Error = ScanError;

    fn try_from(record: EnvelopeRecord) -> Result<Self, Self::Error> {
        let consistent = match (record.status, &record.error) {
            (ProbeStatus::Success, None) => true,
            (ProbeStatus::Error, Some(_)) => record.payload.is_empty(),
            _ => false,
        };
        if !consistent {
            return Err(ScanError::Report(format!(
                "envelope `{}` mixes status, payload and error",
                record.probe
            )));
        }
        Ok(Self {
            probe: record.probe,
            status: record.status,
            payload: record.payload,
            error: record.error,
            completed_at: record.completed_at,
        })
    }
}

// --- Analysis ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// One dated exposure pulled out of a probe payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    pub date: DateTime<Utc>,
    pub indicator: Indicator,
    pub probe: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Statistics {
    pub total_probes: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_breaches: usize,
    pub total_pastes: usize,
    pub total_forum_mentions: usize,
    pub total_market_mentions: usize,
    pub exposure_trend: Trend,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Analysis {
    pub risk_score: u8,
    pub timeline: Vec<TimelineEvent>,
    pub recommendations: Vec<String>,
    pub statistics: Statistics,
}

// --- Main report ---

/// The aggregated output of one run, handed to a `ReportSink` once complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    target: Target,
    #[serde(rename = "scan_results")]
    envelopes: Vec<ResultEnvelope>,
    analysis: Analysis,
    generated_at: DateTime<Utc>,
}

impl ScanReport {
    pub(crate) fn new(target: Target, envelopes: Vec<ResultEnvelope>, analysis: Analysis) -> Self {
        Self {
            target,
            envelopes,
            analysis,
            generated_at: Utc::now(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn envelopes(&self) -> &[ResultEnvelope] {
        &self.envelopes
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn envelope(&self, probe: &str) -> Option<&ResultEnvelope> {
        self.envelopes.iter().find(|e| e.probe == probe)
    }
}
