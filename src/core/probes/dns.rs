// src/core/probes/dns.rs

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::errors::ScanError;

/// Record types gathered for every target.
pub const RECORD_TYPES: &[RecordType] = &[
    RecordType::A,
    RecordType::AAAA,
    RecordType::MX,
    RecordType::NS,
    RecordType::TXT,
    RecordType::SOA,
    RecordType::CNAME,
    RecordType::CAA,
];

/// Record type name to record data, e.g. `"MX" -> ["10 mail.example.com."]`.
pub type DnsRecords = IndexMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DmarcData {
    pub record: String,
    pub policy: Option<String>,
}

/// SPF and DMARC posture of the domain, plus the finding codes it triggers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmailSecurity {
    pub spf: Option<String>,
    pub dmarc: Option<DmarcData>,
    pub findings: Vec<&'static str>,
}

pub fn resolver() -> TokioAsyncResolver {
    TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
}

/// Looks up every type in `RECORD_TYPES` concurrently. A type with no records maps to an
/// empty list; only a resolver failure on every type is reported as an error.
pub async fn collect_records(resolver: &TokioAsyncResolver, domain: &str) -> Result<DnsRecords, ScanError> {
    info!(target = %domain, "Collecting DNS records.");

    let (a, aaaa, mx, ns, txt, soa, cname, caa) = tokio::join!(
        lookup_type(resolver, domain, RecordType::A),
        lookup_type(resolver, domain, RecordType::AAAA),
        lookup_type(resolver, domain, RecordType::MX),
        lookup_type(resolver, domain, RecordType::NS),
        lookup_type(resolver, domain, RecordType::TXT),
        lookup_type(resolver, domain, RecordType::SOA),
        lookup_type(resolver, domain, RecordType::CNAME),
        lookup_type(resolver, domain, RecordType::CAA),
    );

    let mut records = DnsRecords::new();
    let mut last_error = None;
    for (record_type, result) in RECORD_TYPES.iter().zip([a, aaaa, mx, ns, txt, soa, cname, caa]) {
        let values = match result {
            Ok(values) => values,
            Err(e) => {
                last_error = Some(e);
                Vec::new()
            }
        };
        records.insert(record_type.to_string(), values);
    }

    let answered = records.values().filter(|v| !v.is_empty()).count();
    match last_error {
        Some(e) if answered == 0 => Err(e),
        _ => {
            info!(types_with_records = answered, "DNS records collected.");
            Ok(records)
        }
    }
}

async fn lookup_type(
    resolver: &TokioAsyncResolver,
    domain: &str,
    record_type: RecordType,
) -> Result<Vec<String>, ScanError> {
    debug!(target = %domain, %record_type, "Looking up record type.");
    match resolver.lookup(domain, record_type).await {
        Ok(lookup) => Ok(lookup
            .iter()
            .filter(|rdata| rdata.record_type() == record_type)
            .map(|rdata| rdata.to_string())
            .collect()),
        Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
            debug!(target = %domain, %record_type, "No records of this type.");
            Ok(Vec::new())
        }
        Err(e) => {
            warn!(target = %domain, %record_type, error = %e, "DNS lookup failed.");
            Err(e.into())
        }
    }
}

/// Looks up SPF and DMARC for the root domain and grades them.
pub async fn email_security(resolver: &TokioAsyncResolver, domain: &str) -> Result<EmailSecurity, ScanError> {
    let (spf, dmarc) = tokio::join!(lookup_spf(resolver, domain), lookup_dmarc(resolver, domain));
    let (spf, dmarc) = (spf?, dmarc?);
    let findings = grade_email_security(spf.as_deref(), dmarc.as_ref());
    info!(findings = findings.len(), "Email security checked.");
    Ok(EmailSecurity { spf, dmarc, findings })
}

/// Finding codes for an SPF record and a DMARC record, either of which may be absent.
pub fn grade_email_security(spf: Option<&str>, dmarc: Option<&DmarcData>) -> Vec<&'static str> {
    let mut findings = Vec::new();

    match dmarc {
        None => findings.push("DNS_DMARC_MISSING"),
        Some(d) if d.policy.as_deref() == Some("none") => findings.push("DNS_DMARC_POLICY_NONE"),
        Some(_) => {}
    }

    match spf {
        None => findings.push("DNS_SPF_MISSING"),
        Some(record) if record.ends_with("~all") => findings.push("DNS_SPF_POLICY_SOFTFAIL"),
        Some(record) if record.ends_with("?all") => findings.push("DNS_SPF_POLICY_NEUTRAL"),
        Some(_) => {}
    }

    findings
}

/// Extracts the `p=` tag of a DMARC record.
pub fn dmarc_policy(record: &str) -> Option<String> {
    record
        .split(';')
        .map(str::trim)
        .find(|tag| tag.starts_with("p="))
        .and_then(|tag| tag.split('=').nth(1))
        .map(|p| p.trim().to_string())
}

async fn lookup_spf(resolver: &TokioAsyncResolver, domain: &str) -> Result<Option<String>, ScanError> {
    match resolver.txt_lookup(domain).await {
        Ok(txt_records) => Ok(txt_records
            .iter()
            .map(|r| r.to_string())
            .find(|r| r.starts_with("v=spf1"))),
        Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(None),
        Err(e) => {
            warn!(target = %domain, error = %e, "SPF lookup failed.");
            Err(e.into())
        }
    }
}

async fn lookup_dmarc(resolver: &TokioAsyncResolver, domain: &str) -> Result<Option<DmarcData>, ScanError> {
    let dmarc_target = format!("_dmarc.{}", domain);
    match resolver.txt_lookup(dmarc_target.as_str()).await {
        Ok(txt_records) => Ok(txt_records
            .iter()
            .map(|r| r.to_string())
            .find(|r| r.starts_with("v=DMARC1"))
            .map(|record| DmarcData { policy: dmarc_policy(&record), record })),
        Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(None),
        Err(e) => {
            warn!(target = %dmarc_target, error = %e, "DMARC lookup failed.");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dmarc_policy_is_parsed() {
        assert_eq!(dmarc_policy("v=DMARC1; p=reject; rua=mailto:x@example.com"), Some("reject".into()));
        assert_eq!(dmarc_policy("v=DMARC1;p=none"), Some("none".into()));
        assert_eq!(dmarc_policy("v=DMARC1"), None);
    }

    #[test]
    fn grading_flags_missing_and_weak_policies() {
        assert_eq!(grade_email_security(None, None), vec!["DNS_DMARC_MISSING", "DNS_SPF_MISSING"]);

        let weak = DmarcData { record: "v=DMARC1; p=none".into(), policy: Some("none".into()) };
        assert_eq!(
            grade_email_security(Some("v=spf1 include:_spf.example.com ~all"), Some(&weak)),
            vec!["DNS_DMARC_POLICY_NONE", "DNS_SPF_POLICY_SOFTFAIL"]
        );

        let strict = DmarcData { record: "v=DMARC1; p=reject".into(), policy: Some("reject".into()) };
        assert!(grade_email_security(Some("v=spf1 -all"), Some(&strict)).is_empty());
    }
}
