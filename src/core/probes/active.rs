// src/core/probes/active.rs

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, SERVER};
use serde::Serialize;
use tokio::net::lookup_host;
use tracing::{debug, info, warn};

use super::fingerprint::{self, Technology};
use super::headers::missing_security_headers;
use super::ipinfo::{self, IpInfo};
use super::ports::{self, HostPorts};
use super::{PartialFailures, Probe, http_client, to_payload};
use crate::config::Config;
use crate::core::errors::ScanError;
use crate::core::models::{Payload, Target};

pub const NAME: &str = "active_recon";

const SCHEMES: &[&str] = &["http", "https"];
const SECTIONS: usize = 5;

/// Lookups that talk to the target directly: address resolution and geolocation, a TCP
/// connect scan and a look at what the web server answers on both schemes.
pub struct ActiveReconProbe {
    config: Arc<Config>,
}

#[derive(Debug, Serialize)]
struct ActiveReport {
    resolved_ips: Vec<IpInfo>,
    port_scan: Vec<HostPorts>,
    web_technologies: IndexMap<&'static str, WebAnalysis>,
    vulnerabilities: Vulnerabilities,
    partial_failures: PartialFailures,
}

#[derive(Debug, Default, Serialize)]
struct Vulnerabilities {
    missing_security_headers: Vec<String>,
}

/// What one scheme's homepage revealed, or why it could not be fetched.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WebAnalysis {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub technologies: Vec<Technology>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct FetchedPage {
    analysis: WebAnalysis,
    headers: HeaderMap,
}

impl ActiveReconProbe {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    async fn resolve(&self, target: &Target) -> Result<Vec<IpAddr>, ScanError> {
        let known: BTreeSet<IpAddr> = target
            .ip_addresses()
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .collect();
        if !known.is_empty() {
            debug!(count = known.len(), "Using addresses supplied with the target.");
            return Ok(known.into_iter().collect());
        }

        let resolved: BTreeSet<IpAddr> = lookup_host((target.domain(), 0))
            .await?
            .map(|addr| addr.ip())
            .collect();
        if resolved.is_empty() {
            return Err(ScanError::probe(format!("{} did not resolve to any address", target.domain())));
        }
        Ok(resolved.into_iter().collect())
    }

    async fn scan_ports(&self, ips: &[IpAddr]) -> Result<Vec<HostPorts>, ScanError> {
        let options = &self.config.scan_options;
        let connect_timeout = Duration::from_millis(options.connect_timeout_ms);

        let mut hosts = Vec::with_capacity(ips.len());
        for ip in ips {
            hosts.push(ports::scan_host(*ip, &options.ports, options.threads, connect_timeout).await?);
        }
        Ok(hosts)
    }

    async fn describe_ips(&self, ips: &[IpAddr]) -> Result<Vec<IpInfo>, ScanError> {
        let client = http_client(self.config.http_timeout())?;
        ipinfo::describe(&client, ips).await
    }

    async fn analyze_web(&self, domain: &str) -> Result<Vec<FetchedPage>, ScanError> {
        let client = http_client(self.config.http_timeout())?;
        let (http, https) = tokio::join!(
            fetch_page(&client, SCHEMES[0], domain),
            fetch_page(&client, SCHEMES[1], domain),
        );
        Ok(vec![http, https])
    }
}

async fn fetch_page(client: &reqwest::Client, scheme: &str, domain: &str) -> FetchedPage {
    let url = format!("{}://{}", scheme, domain);
    let mut analysis = WebAnalysis { url: url.clone(), ..WebAnalysis::default() };

    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(%url, error = %e, "Homepage request failed.");
            analysis.error = Some(ScanError::from(e).to_string());
            return FetchedPage { analysis, headers: HeaderMap::new() };
        }
    };

    let headers = response.headers().clone();
    analysis.status = Some(response.status().as_u16());
    analysis.server = headers.get(SERVER).and_then(|v| v.to_str().ok()).map(str::to_string);

    match response.text().await {
        Ok(body) => analysis.technologies = fingerprint::detect(&headers, &body),
        Err(e) => analysis.error = Some(ScanError::from(e).to_string()),
    }
    debug!(%url, technologies = analysis.technologies.len(), "Homepage analyzed.");
    FetchedPage { analysis, headers }
}

/// Security headers are judged on the HTTPS answer when there is one.
fn judge_headers(pages: &[FetchedPage]) -> Result<Vec<String>, ScanError> {
    pages
        .iter()
        .rev()
        .find(|page| page.analysis.status.is_some())
        .map(|page| missing_security_headers(&page.headers))
        .ok_or_else(|| ScanError::probe("no HTTP response to inspect for security headers"))
}

#[async_trait]
impl Probe for ActiveReconProbe {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, target: &Target) -> Result<Payload, ScanError> {
        info!(target = %target.domain(), "Starting active reconnaissance.");
        let mut failures = PartialFailures::default();

        let address_lookup = async {
            let ips = self.resolve(target).await?;
            let (scanned, described) = tokio::join!(self.scan_ports(&ips), self.describe_ips(&ips));
            Ok::<_, ScanError>((ips, scanned, described))
        };
        let (address_lookup, pages) = tokio::join!(address_lookup, self.analyze_web(target.domain()));

        let (resolved_ips, port_scan) = match failures.take("resolved_ips", address_lookup) {
            Some((ips, scanned, described)) => {
                let port_scan = failures.take("port_scan", scanned).unwrap_or_default();
                let resolved_ips = failures
                    .take("ip_info", described)
                    .unwrap_or_else(|| ips.iter().copied().map(IpInfo::classify).collect());
                (resolved_ips, port_scan)
            }
            None => {
                failures.take::<()>("ip_info", Err(ScanError::probe("no address to describe")));
                failures.take::<()>("port_scan", Err(ScanError::probe("no address to scan")));
                (Vec::new(), Vec::new())
            }
        };

        let pages = failures.take("web_technologies", pages).unwrap_or_default();
        if !pages.is_empty() && pages.iter().all(|p| p.analysis.status.is_none()) {
            failures.take::<()>("web_technologies", Err(ScanError::probe("homepage unreachable on every scheme")));
        }
        let missing = failures.take("vulnerabilities", judge_headers(&pages)).unwrap_or_default();

        let web_technologies: IndexMap<&'static str, WebAnalysis> = SCHEMES
            .iter()
            .copied()
            .zip(pages.into_iter().map(|p| p.analysis))
            .collect();

        let partial_failures = failures.into_result(SECTIONS)?;
        info!(
            addresses = resolved_ips.len(),
            failed_sections = partial_failures.len(),
            "Active reconnaissance finished."
        );

        to_payload(&ActiveReport {
            resolved_ips,
            port_scan,
            web_technologies,
            vulnerabilities: Vulnerabilities { missing_security_headers: missing },
            partial_failures,
        })
    }
}
