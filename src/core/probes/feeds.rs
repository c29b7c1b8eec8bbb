// src/core/probes/feeds.rs

//! Public discussion feeds searched by the social and breach probes: Reddit's JSON search
//! and the Hacker News search API.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::core::errors::ScanError;

const REDDIT_BASE: &str = "https://www.reddit.com/";
const HACKERNEWS_SEARCH: &str = "https://hn.algolia.com/api/v1/search";

/// One post or story mentioning the target.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Mention {
    pub source: String,
    pub title: String,
    pub url: String,
    /// RFC 3339, when the feed reports a creation time.
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RedditListing {
    data: RedditListingData,
}

#[derive(Debug, Deserialize)]
struct RedditListingData {
    #[serde(default)]
    children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
struct RedditChild {
    data: RedditPost,
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    title: String,
    permalink: String,
    subreddit: Option<String>,
    created_utc: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct HackerNewsResults {
    #[serde(default)]
    hits: Vec<HackerNewsHit>,
}

#[derive(Debug, Deserialize)]
struct HackerNewsHit {
    #[serde(rename = "objectID")]
    object_id: String,
    title: Option<String>,
    story_title: Option<String>,
    url: Option<String>,
    created_at: Option<String>,
}

impl RedditListing {
    pub fn into_mentions(self) -> Vec<Mention> {
        self.data
            .children
            .into_iter()
            .map(|child| {
                let post = child.data;
                let source = match post.subreddit {
                    Some(sub) => format!("reddit/r/{}", sub),
                    None => "reddit".to_string(),
                };
                Mention {
                    source,
                    title: post.title,
                    url: format!("https://www.reddit.com{}", post.permalink),
                    date: post
                        .created_utc
                        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
                        .map(|dt| dt.to_rfc3339()),
                }
            })
            .collect()
    }
}

impl HackerNewsResults {
    /// Hits with neither a title nor a story title are comments on deleted stories and dropped.
    pub fn into_mentions(self) -> Vec<Mention> {
        self.hits
            .into_iter()
            .filter_map(|hit| {
                let title = hit.title.or(hit.story_title)?;
                let url = hit
                    .url
                    .unwrap_or_else(|| format!("https://news.ycombinator.com/item?id={}", hit.object_id));
                Some(Mention { source: "hackernews".to_string(), title, url, date: hit.created_at })
            })
            .collect()
    }
}

/// Searches Reddit for `query`, either site-wide or restricted to one subreddit.
pub async fn search_reddit(
    client: &reqwest::Client,
    query: &str,
    subreddit: Option<&str>,
) -> Result<Vec<Mention>, ScanError> {
    let path = match subreddit {
        Some(sub) => format!("r/{}/search.json", sub),
        None => "search.json".to_string(),
    };
    let mut url = Url::parse(REDDIT_BASE)
        .and_then(|base| base.join(&path))
        .map_err(|e| ScanError::probe(format!("invalid Reddit URL: {}", e)))?;
    url.query_pairs_mut().append_pair("q", query).append_pair("limit", "25");
    if subreddit.is_some() {
        url.query_pairs_mut().append_pair("restrict_sr", "1");
    }

    debug!(%url, "Searching Reddit.");
    let response = client.get(url).send().await?.error_for_status()?;
    let mentions = response.json::<RedditListing>().await?.into_mentions();
    info!(subreddit = ?subreddit, hits = mentions.len(), "Reddit search finished.");
    Ok(mentions)
}

pub async fn search_hackernews(client: &reqwest::Client, query: &str) -> Result<Vec<Mention>, ScanError> {
    let url = Url::parse_with_params(HACKERNEWS_SEARCH, &[("query", query)])
        .map_err(|e| ScanError::probe(format!("invalid Hacker News URL: {}", e)))?;

    debug!(%url, "Searching Hacker News.");
    let response = client.get(url).send().await?.error_for_status()?;
    let mentions = response.json::<HackerNewsResults>().await?.into_mentions();
    info!(hits = mentions.len(), "Hacker News search finished.");
    Ok(mentions)
}
