// src/core/probes/social.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::feeds::{self, Mention};
use super::{PartialFailures, Probe, http_client, to_payload};
use crate::config::Config;
use crate::core::errors::ScanError;
use crate::core::models::{Payload, Target};

pub const NAME: &str = "social_media";

const GITHUB_USER_SEARCH: &str = "https://api.github.com/search/users";
const GITHUB_ORGS: &str = "https://api.github.com/orgs";
const SECTIONS: usize = 5;

static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}").unwrap());

/// Platform name and the shape of a profile link on it.
static PLATFORMS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("twitter", r"^https?://(?:www\.)?(?:twitter|x)\.com/[A-Za-z0-9_]{1,15}/?$"),
        ("facebook", r"^https?://(?:www\.)?facebook\.com/[A-Za-z0-9.\-]+/?$"),
        ("linkedin", r"^https?://(?:[a-z]{2,3}\.)?linkedin\.com/(?:company|in)/[A-Za-z0-9_\-]+/?$"),
        ("instagram", r"^https?://(?:www\.)?instagram\.com/[A-Za-z0-9_.]+/?$"),
        ("github", r"^https?://(?:www\.)?github\.com/[A-Za-z0-9\-]+/?$"),
        ("youtube", r"^https?://(?:www\.)?youtube\.com/(?:c/|channel/|user/|@)[A-Za-z0-9_\-]+/?$"),
    ]
    .into_iter()
    .map(|(name, re)| (name, Regex::new(re).unwrap()))
    .collect()
});

/// Where the target shows up on social platforms and discussion sites.
pub struct SocialPresenceProbe {
    config: Arc<Config>,
}

#[derive(Debug, Serialize)]
struct SocialReport {
    profiles: Profiles,
    employees: Vec<Employee>,
    mentions: Mentions,
    metadata: Option<PageMetadata>,
    partial_failures: PartialFailures,
}

#[derive(Debug, Default, Serialize)]
struct Profiles {
    /// Platform name to profile URLs linked from the homepage.
    #[serde(flatten)]
    links: IndexMap<String, Vec<String>>,
    github_users: Vec<GithubUser>,
}

#[derive(Debug, Default, Serialize)]
struct Mentions {
    hackernews: Vec<Mention>,
    reddit: Vec<Mention>,
}

/// What the homepage says about its owner.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub author: Option<String>,
    pub emails: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GithubSearch {
    #[serde(default)]
    items: Vec<GithubUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GithubUser {
    pub login: String,
    pub html_url: String,
}

/// A person publicly tied to the target's organization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Employee {
    pub name: String,
    pub profile_url: String,
    pub source: &'static str,
}

impl From<GithubUser> for Employee {
    fn from(user: GithubUser) -> Self {
        Self { name: user.login, profile_url: user.html_url, source: "github" }
    }
}

impl SocialPresenceProbe {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

/// Fetches the homepage, preferring HTTPS.
async fn fetch_homepage(client: &reqwest::Client, domain: &str) -> Result<String, ScanError> {
    let mut last_error = None;
    for scheme in ["https", "http"] {
        let url = format!("{}://{}", scheme, domain);
        match client.get(&url).send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => return Ok(response.text().await?),
            Err(e) => {
                debug!(%url, error = %e, "Homepage fetch failed.");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.map(ScanError::from).unwrap_or_else(|| ScanError::probe("homepage unreachable")))
}

async fn search_github(client: &reqwest::Client, query: &str) -> Result<Vec<GithubUser>, ScanError> {
    let url = Url::parse_with_params(GITHUB_USER_SEARCH, &[("q", query), ("per_page", "10")])
        .map_err(|e| ScanError::probe(format!("invalid GitHub URL: {}", e)))?;
    let response = client
        .get(url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await?
        .error_for_status()?;
    let users = response.json::<GithubSearch>().await?.items;
    info!(query, users = users.len(), "GitHub user search finished.");
    Ok(users)
}

/// The GitHub organization to look members up in: the first organization linked from
/// the homepage, else the domain's leading label.
pub fn github_org<'a>(links: &'a IndexMap<String, Vec<String>>, fallback: &'a str) -> &'a str {
    links
        .get("github")
        .and_then(|urls| urls.first())
        .and_then(|url| url.rsplit('/').next())
        .filter(|org| !org.is_empty())
        .unwrap_or(fallback)
}

/// Members of a public-members listing, deduplicated by profile.
pub fn parse_members(raw: &str) -> Result<Vec<Employee>, ScanError> {
    let users: Vec<GithubUser> = serde_json::from_str(raw)?;
    let mut seen = BTreeSet::new();
    Ok(users
        .into_iter()
        .filter(|user| seen.insert(user.html_url.clone()))
        .map(Employee::from)
        .collect())
}

/// Public members of a GitHub organization. An unknown organization has none.
async fn find_employees(client: &reqwest::Client, org: &str) -> Result<Vec<Employee>, ScanError> {
    let url = format!("{}/{}/public_members?per_page=50", GITHUB_ORGS, org);
    let response = client
        .get(&url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        debug!(org, "No GitHub organization under this name.");
        return Ok(Vec::new());
    }
    let employees = parse_members(&response.error_for_status()?.text().await?)?;
    info!(org, employees = employees.len(), "GitHub organization members listed.");
    Ok(employees)
}

/// Social profile links on a page, grouped by platform. Only platforms with at least
/// one link appear; links are deduplicated and sorted.
pub fn extract_profiles(html: &str) -> IndexMap<String, Vec<String>> {
    let document = Html::parse_document(html);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return IndexMap::new();
    };

    let hrefs: Vec<&str> = document
        .select(&anchors)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .collect();

    PLATFORMS
        .iter()
        .filter_map(|(platform, re)| {
            let links: BTreeSet<String> = hrefs
                .iter()
                .filter(|href| re.is_match(href))
                .map(|href| href.trim_end_matches('/').to_string())
                .collect();
            (!links.is_empty()).then(|| (platform.to_string(), links.into_iter().collect()))
        })
        .collect()
}

pub fn extract_metadata(html: &str) -> PageMetadata {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|s| document.select(&s).next().map(|el| el.text().collect::<String>()))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let meta = |name: &str| -> Option<String> {
        let selector = Selector::parse(&format!("meta[name='{}']", name)).ok()?;
        document
            .select(&selector)
            .find_map(|el| el.value().attr("content"))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    };

    let keywords = meta("keywords")
        .map(|k| k.split(',').map(str::trim).filter(|k| !k.is_empty()).map(String::from).collect())
        .unwrap_or_default();

    let emails: BTreeSet<String> = RE_EMAIL.find_iter(html).map(|m| m.as_str().to_lowercase()).collect();

    PageMetadata {
        title,
        description: meta("description"),
        keywords,
        author: meta("author"),
        emails: emails.into_iter().collect(),
    }
}

#[async_trait]
impl Probe for SocialPresenceProbe {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, target: &Target) -> Result<Payload, ScanError> {
        let domain = target.root_domain();
        info!(target = %domain, "Starting social media analysis.");
        let client = http_client(self.config.http_timeout())?;
        let handle = domain.split('.').next().unwrap_or(domain);

        let (homepage, github, hackernews, reddit) = tokio::join!(
            fetch_homepage(&client, target.domain()),
            search_github(&client, handle),
            feeds::search_hackernews(&client, domain),
            feeds::search_reddit(&client, domain, None),
        );

        let mut failures = PartialFailures::default();
        let (links, metadata) = match failures.take("homepage", homepage) {
            Some(body) => (extract_profiles(&body), Some(extract_metadata(&body))),
            None => {
                warn!(target = %domain, "Homepage unavailable, no profile links or metadata.");
                (IndexMap::new(), None)
            }
        };
        let github_users = failures.take("github", github).unwrap_or_default();
        let employees = find_employees(&client, github_org(&links, handle)).await;
        let employees = failures.take("employees", employees).unwrap_or_default();
        let mentions = Mentions {
            hackernews: failures.take("hackernews", hackernews).unwrap_or_default(),
            reddit: failures.take("reddit", reddit).unwrap_or_default(),
        };

        let partial_failures = failures.into_result(SECTIONS)?;
        info!(
            platforms = links.len(),
            employees = employees.len(),
            mentions = mentions.hackernews.len() + mentions.reddit.len(),
            "Social media analysis finished."
        );

        to_payload(&SocialReport {
            profiles: Profiles { links, github_users },
            employees,
            mentions,
            metadata,
            partial_failures,
        })
    }
}
