// src/core/probes/breach.rs

//! Breach and leak monitoring through public sources only: the Have I Been Pwned breach
//! catalogue and security subreddits. Paste sites and marketplaces have no public API and
//! are reported as unavailable rather than scraped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use super::feeds::{self, Mention};
use super::{PartialFailures, Probe, http_client, to_payload};
use crate::config::Config;
use crate::core::errors::ScanError;
use crate::core::models::{Payload, Target};

pub const NAME: &str = "dark_web";

const HIBP_BREACHES: &str = "https://haveibeenpwned.com/api/v3/breaches";
const SECURITY_SUBREDDITS: &[&str] = &["netsec", "InfoSecNews"];
const UNAVAILABLE_SOURCES: &[&str] = &["paste_sites", "marketplaces"];
const SECTIONS: usize = 2;

pub struct BreachMonitorProbe {
    config: Arc<Config>,
}

/// A breach record as served by the HIBP v3 API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HibpBreach {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub domain: String,
    pub breach_date: Option<String>,
    pub added_date: Option<String>,
    #[serde(default)]
    pub pwn_count: u64,
    #[serde(default)]
    pub data_classes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreachRecord {
    pub name: String,
    pub title: String,
    pub domain: String,
    pub date: Option<String>,
    pub added_date: Option<String>,
    pub pwn_count: u64,
    pub data_classes: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct Breaches {
    known_breaches: Vec<BreachRecord>,
    potential_exposures: Vec<BreachRecord>,
}

#[derive(Debug, Default, Serialize)]
struct Pastes {
    recent_pastes: Vec<Mention>,
    historical_pastes: Vec<Mention>,
}

#[derive(Debug, Default, Serialize)]
struct ForumMentions {
    mentions: Vec<Mention>,
}

#[derive(Debug, Default, Serialize)]
struct MarketMentions {
    mentions: Vec<Mention>,
    listings: Vec<Mention>,
}

#[derive(Debug, Serialize)]
struct BreachReport {
    breaches: Breaches,
    pastes: Pastes,
    forum_mentions: ForumMentions,
    market_mentions: MarketMentions,
    sources_unavailable: Vec<&'static str>,
    partial_failures: PartialFailures,
}

impl From<HibpBreach> for BreachRecord {
    fn from(b: HibpBreach) -> Self {
        Self {
            name: b.name,
            title: b.title,
            domain: b.domain,
            date: b.breach_date,
            added_date: b.added_date,
            pwn_count: b.pwn_count,
            data_classes: b.data_classes,
        }
    }
}

/// Splits catalogue entries into breaches of `domain` itself (or a subdomain) and entries
/// whose domain merely contains it, e.g. `example.com.br` for `example.com`.
pub fn classify_breaches(catalogue: Vec<HibpBreach>, domain: &str) -> (Vec<BreachRecord>, Vec<BreachRecord>) {
    let suffix = format!(".{}", domain);
    let mut known = Vec::new();
    let mut potential = Vec::new();

    for breach in catalogue {
        let breach_domain = breach.domain.to_lowercase();
        if breach_domain.is_empty() {
            continue;
        }
        if breach_domain == domain || breach_domain.ends_with(&suffix) {
            known.push(breach.into());
        } else if breach_domain.contains(domain) {
            potential.push(breach.into());
        }
    }
    (known, potential)
}

impl BreachMonitorProbe {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    async fn check_breaches(&self, client: &reqwest::Client, domain: &str) -> Result<Breaches, ScanError> {
        let url = Url::parse_with_params(HIBP_BREACHES, &[("domain", domain)])
            .map_err(|e| ScanError::probe(format!("invalid HIBP URL: {}", e)))?;

        let mut request = client.get(url);
        let api_key = self.config.api_key("haveibeenpwned");
        if !api_key.is_empty() {
            request = request.header("hibp-api-key", api_key);
        }

        let catalogue = request.send().await?.error_for_status()?.json::<Vec<HibpBreach>>().await?;
        let (known_breaches, potential_exposures) = classify_breaches(catalogue, domain);
        info!(
            known = known_breaches.len(),
            potential = potential_exposures.len(),
            "Breach catalogue checked."
        );
        Ok(Breaches { known_breaches, potential_exposures })
    }

    /// A subreddit that fails is skipped; the section fails only if all of them do.
    async fn scan_forums(&self, client: &reqwest::Client, domain: &str) -> Result<ForumMentions, ScanError> {
        let mut mentions = Vec::new();
        let mut last_error = None;
        let mut failed = 0;
        for subreddit in SECURITY_SUBREDDITS.iter().copied() {
            match feeds::search_reddit(client, domain, Some(subreddit)).await {
                Ok(found) => mentions.extend(found),
                Err(e) => {
                    warn!(subreddit, error = %e, "Forum search failed.");
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if failed == SECURITY_SUBREDDITS.len() => Err(e),
            _ => Ok(ForumMentions { mentions }),
        }
    }
}

#[async_trait]
impl Probe for BreachMonitorProbe {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, target: &Target) -> Result<Payload, ScanError> {
        let domain = target.root_domain();
        info!(target = %domain, "Starting breach and leak monitoring.");
        let client = http_client(self.config.http_timeout())?;

        let (breaches, forums) = tokio::join!(
            self.check_breaches(&client, domain),
            self.scan_forums(&client, domain),
        );

        let mut failures = PartialFailures::default();
        let breaches = failures.take("breaches", breaches).unwrap_or_default();
        let forum_mentions = failures.take("forum_mentions", forums).unwrap_or_default();
        let partial_failures = failures.into_result(SECTIONS)?;

        to_payload(&BreachReport {
            breaches,
            pastes: Pastes::default(),
            forum_mentions,
            market_mentions: MarketMentions::default(),
            sources_unavailable: UNAVAILABLE_SOURCES.to_vec(),
            partial_failures,
        })
    }
}
