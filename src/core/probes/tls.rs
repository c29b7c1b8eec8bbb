// src/core/probes/tls.rs

use std::net::TcpStream;

use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use serde::Serialize;
use tokio::task::spawn_blocking;
use tracing::{debug, error, info};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use crate::core::errors::ScanError;

/// The leaf certificate a server presents on port 443.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub version: u32,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub san: Vec<String>,
    pub is_valid: bool,
}

/// Connects to `domain:443`, completes a TLS handshake and parses the peer certificate.
///
/// native-tls is blocking, so the whole exchange runs on the blocking pool.
pub async fn inspect_certificate(domain: &str) -> Result<CertificateInfo, ScanError> {
    info!(target = %domain, "Starting TLS certificate inspection.");
    let target_owned = domain.to_string();

    let info = spawn_blocking(move || perform_tls_handshake(&target_owned))
        .await
        .unwrap_or_else(|e| {
            error!(panic = %e, "Blocking TLS task panicked!");
            Err(ScanError::probe(format!("Task panicked: {}", e)))
        })?;

    info!(subject = %info.subject, days_left = info.days_until_expiry, "TLS certificate inspected.");
    Ok(info)
}

fn perform_tls_handshake(target: &str) -> Result<CertificateInfo, ScanError> {
    let connector = TlsConnector::new()
        .map_err(|e| ScanError::probe(format!("TlsConnector Error: {}", e)))?;

    debug!(target, "Connecting TCP stream to port 443.");
    let stream = TcpStream::connect((target, 443))
        .map_err(|e| ScanError::probe(format!("TCP Connection Error: {}", e)))?;

    debug!(target, "Performing TLS handshake.");
    let stream = connector
        .connect(target, stream)
        .map_err(|e| ScanError::probe(format!("TLS Handshake Error: {}", e)))?;

    let cert = stream
        .peer_certificate()
        .map_err(|e| ScanError::probe(format!("Could not get peer certificate: {}", e)))?
        .ok_or_else(|| ScanError::probe("Server did not provide a certificate"))?;

    let der = cert
        .to_der()
        .map_err(|e| ScanError::probe(format!("Could not convert certificate to DER: {}", e)))?;

    parse_certificate(&der, Utc::now())
}

/// Extracts the fields of a DER-encoded certificate, judged against `now`.
pub fn parse_certificate(der: &[u8], now: DateTime<Utc>) -> Result<CertificateInfo, ScanError> {
    let (_, x509) = parse_x509_certificate(der)
        .map_err(|e| ScanError::probe(format!("X.509 Parse Error: {}", e)))?;

    let validity = x509.validity();
    let not_before = asn1_time_to_chrono_utc(&validity.not_before);
    let not_after = asn1_time_to_chrono_utc(&validity.not_after);

    let san = match x509.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                GeneralName::IPAddress(bytes) => Some(format_ip(bytes)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(CertificateInfo {
        subject: x509.subject().to_string(),
        issuer: x509.issuer().to_string(),
        // X.509 versions are zero-based on the wire.
        version: x509.version().0 + 1,
        serial_number: x509.raw_serial_as_string(),
        not_before,
        not_after,
        days_until_expiry: not_after.signed_duration_since(now).num_days(),
        san,
        is_valid: now > not_before && now < not_after,
    })
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn format_ip(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}
