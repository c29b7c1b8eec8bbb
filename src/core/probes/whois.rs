// src/core/probes/whois.rs

//! Plain WHOIS (RFC 3912) over TCP port 43, starting at IANA and following the `refer:`
//! line to the registry's own server.

use std::collections::BTreeSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::core::errors::ScanError;

const IANA_WHOIS: &str = "whois.iana.org";
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;

static RE_EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+").unwrap());

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WhoisInfo {
    pub server: String,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub name_servers: Vec<String>,
    pub status: Vec<String>,
    pub emails: Vec<String>,
    pub org: Option<String>,
}

pub async fn lookup(domain: &str, io_timeout: Duration) -> Result<WhoisInfo, ScanError> {
    info!(target = %domain, "Starting WHOIS lookup.");

    let tld = domain.rsplit('.').next().unwrap_or(domain);
    let iana = query(IANA_WHOIS, tld, io_timeout).await?;
    let server = referral_server(&iana).unwrap_or_else(|| IANA_WHOIS.to_string());
    debug!(%server, "Using WHOIS referral.");

    let response = query(&server, domain, io_timeout).await?;
    let mut parsed = parse_response(&response);
    parsed.server = server;
    info!(registrar = ?parsed.registrar, "WHOIS lookup finished.");
    Ok(parsed)
}

async fn query(server: &str, query: &str, io_timeout: Duration) -> Result<String, ScanError> {
    let exchange = async {
        let mut stream = TcpStream::connect((server, 43)).await?;
        stream.write_all(format!("{}\r\n", query).as_bytes()).await?;
        let mut buf = Vec::new();
        stream.take(MAX_RESPONSE_BYTES).read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    };

    let bytes = timeout(io_timeout, exchange)
        .await
        .map_err(|_| ScanError::probe(format!("WHOIS query to {} timed out", server)))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// The `refer:` (IANA) or `whois:` line of a response, if any.
pub fn referral_server(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        ((key == "refer" || key == "whois") && !value.is_empty()).then(|| value.to_string())
    })
}

/// Picks the common fields out of a free-form WHOIS response. First value wins for the
/// single-valued fields; name servers and statuses are collected and deduplicated.
pub fn parse_response(response: &str) -> WhoisInfo {
    let mut info = WhoisInfo::default();
    let mut name_servers = BTreeSet::new();
    let mut statuses = BTreeSet::new();

    for line in response.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.as_str() {
            "registrar" | "sponsoring registrar" => {
                info.registrar.get_or_insert_with(|| value.to_string());
            }
            "creation date" | "created" | "registered on" => {
                info.creation_date.get_or_insert_with(|| value.to_string());
            }
            "registry expiry date" | "registrar registration expiration date" | "expiry date"
            | "expires" | "expiration date" => {
                info.expiration_date.get_or_insert_with(|| value.to_string());
            }
            "name server" | "nserver" => {
                name_servers.insert(value.split_whitespace().next().unwrap_or(value).to_lowercase());
            }
            "domain status" | "status" => {
                statuses.insert(value.split_whitespace().next().unwrap_or(value).to_string());
            }
            "registrant organization" | "org" | "organization" => {
                info.org.get_or_insert_with(|| value.to_string());
            }
            _ => {}
        }
    }

    let emails: BTreeSet<String> = RE_EMAIL
        .find_iter(response)
        .map(|m| m.as_str().to_lowercase())
        .collect();

    info.name_servers = name_servers.into_iter().collect();
    info.status = statuses.into_iter().collect();
    info.emails = emails.into_iter().collect();
    info
}
