// src/core/knowledge_base.rs

//! Static, read-only tables that drive the analysis step.
//!
//! Each breach-style `Indicator` knows where it lives inside a probe payload, what it
//! weighs in the risk score by default and whether its entries carry dates for the
//! timeline. The recommendation rules map indicators to fixed advice strings.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// A countable exposure signal that any probe may report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIter, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Indicator {
    /// Breach records from a breach catalogue.
    KnownBreaches,
    /// Recent leak posts on paste sites.
    RecentPastes,
    /// Mentions on security forums.
    ForumMentions,
    /// Mentions on data marketplaces.
    MarketMentions,
}

impl Indicator {
    /// Object keys leading from the payload root to the JSON array holding this indicator.
    pub fn payload_path(&self) -> &'static [&'static str] {
        match self {
            Indicator::KnownBreaches => &["breaches", "known_breaches"],
            Indicator::RecentPastes => &["pastes", "recent_pastes"],
            Indicator::ForumMentions => &["forum_mentions", "mentions"],
            Indicator::MarketMentions => &["market_mentions", "mentions"],
        }
    }

    /// Weight used when the configuration does not override it.
    pub fn default_weight(&self) -> i64 {
        match self {
            Indicator::KnownBreaches => 10,
            Indicator::RecentPastes => 5,
            Indicator::ForumMentions => 2,
            Indicator::MarketMentions => 8,
        }
    }

    /// Marketplace listings are rarely dated reliably, so they stay out of the timeline.
    pub fn feeds_timeline(&self) -> bool {
        !matches!(self, Indicator::MarketMentions)
    }
}

/// Keys tried, in order, when looking for the date of a timeline entry.
pub const DATE_KEYS: &[&str] = &["date", "BreachDate", "AddedDate", "created_at", "created_utc"];

/// Keys tried, in order, when looking for a human-readable label of a timeline entry.
pub const TITLE_KEYS: &[&str] = &["title", "Title", "name", "Name"];

/// A fixed rule: whenever `trigger` is present in any envelope, emit `recommendations`.
pub struct RecommendationRule {
    pub trigger: Indicator,
    pub recommendations: &'static [&'static str],
}

const BREACH_ADVICE: &[&str] = &[
    "Implement regular security assessments and penetration testing",
    "Review and update incident response procedures",
];

const EXPOSURE_ADVICE: &[&str] = &[
    "Enhance monitoring of public data exposure",
    "Implement data loss prevention (DLP) solutions",
];

static RULES: &[RecommendationRule] = &[
    RecommendationRule { trigger: Indicator::KnownBreaches, recommendations: BREACH_ADVICE },
    RecommendationRule { trigger: Indicator::RecentPastes, recommendations: EXPOSURE_ADVICE },
    RecommendationRule { trigger: Indicator::ForumMentions, recommendations: EXPOSURE_ADVICE },
    RecommendationRule { trigger: Indicator::MarketMentions, recommendations: EXPOSURE_ADVICE },
];

/// All recommendation rules triggered by a given indicator.
pub fn rules_for(indicator: Indicator) -> impl Iterator<Item = &'static RecommendationRule> {
    RULES.iter().filter(move |rule| rule.trigger == indicator)
}
