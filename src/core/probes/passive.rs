// src/core/probes/passive.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use super::dns::{self, DnsRecords, EmailSecurity};
use super::subdomains;
use super::tls::{self, CertificateInfo};
use super::whois::{self, WhoisInfo};
use super::{PartialFailures, Probe, http_client, to_payload};
use crate::config::Config;
use crate::core::errors::ScanError;
use crate::core::models::{Payload, Target};

pub const NAME: &str = "passive_recon";

/// Lookups that never touch the target's own services beyond a TLS handshake:
/// WHOIS, DNS, mail authentication records, the certificate and CT logs.
pub struct PassiveReconProbe {
    config: Arc<Config>,
}

#[derive(Debug, Serialize)]
struct PassiveReport {
    whois: Option<WhoisInfo>,
    dns_records: Option<DnsRecords>,
    email_security: Option<EmailSecurity>,
    ssl_certificate: Option<CertificateInfo>,
    discovered_subdomains: Vec<String>,
    partial_failures: PartialFailures,
}

const SECTIONS: usize = 5;

impl PassiveReconProbe {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    async fn discover_subdomains(&self, target: &Target) -> (Vec<String>, Option<ScanError>) {
        let domain = target.root_domain();
        let max = self.config.scan_options.max_subdomains;

        let entries = match http_client(self.config.http_timeout()) {
            Ok(client) => subdomains::from_certificate_transparency(&client, domain).await,
            Err(e) => Err(e),
        };
        match entries {
            Ok(entries) => (subdomains::extract_subdomains(&entries, target.subdomains(), domain, max), None),
            Err(e) => {
                warn!(target = %domain, error = %e, "Certificate transparency search failed.");
                (subdomains::extract_subdomains(&[], target.subdomains(), domain, max), Some(e))
            }
        }
    }
}

#[async_trait]
impl Probe for PassiveReconProbe {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, target: &Target) -> Result<Payload, ScanError> {
        info!(target = %target.domain(), "Starting passive reconnaissance.");
        let resolver = dns::resolver();
        let whois_timeout = Duration::from_secs(self.config.scan_options.http_timeout);

        let (whois, records, email, certificate, (subdomains, ct_error)) = tokio::join!(
            whois::lookup(target.root_domain(), whois_timeout),
            dns::collect_records(&resolver, target.domain()),
            dns::email_security(&resolver, target.root_domain()),
            tls::inspect_certificate(target.domain()),
            self.discover_subdomains(target),
        );

        let mut failures = PartialFailures::default();
        let whois = failures.take("whois", whois);
        let dns_records = failures.take("dns_records", records);
        let email_security = failures.take("email_security", email);
        let ssl_certificate = failures.take("ssl_certificate", certificate);
        if let Some(e) = ct_error {
            failures.take::<()>("discovered_subdomains", Err(e));
        }

        let partial_failures = failures.into_result(SECTIONS)?;
        info!(
            subdomains = subdomains.len(),
            failed_sections = partial_failures.len(),
            "Passive reconnaissance finished."
        );

        to_payload(&PassiveReport {
            whois,
            dns_records,
            email_security,
            ssl_certificate,
            discovered_subdomains: subdomains,
            partial_failures,
        })
    }
}
