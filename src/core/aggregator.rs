// src/core/aggregator.rs

//! Merges the envelopes of one run into a `ScanReport` and derives its analysis block.
//!
//! The aggregator only reads breach-style indicators (see `knowledge_base::Indicator`)
//! and never fails: a missing field counts as zero, a malformed one is logged and
//! treated the same way.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::errors::ScanError;
use crate::core::knowledge_base::{self, DATE_KEYS, Indicator, TITLE_KEYS};
use crate::core::models::{
    Analysis, Payload, ResultEnvelope, ScanReport, Statistics, Target, TimelineEvent, Trend,
};

/// Tunable constants of the analysis step.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    weights: BTreeMap<Indicator, i64>,
    trend_threshold: f64,
    recent_buckets: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            weights: Indicator::iter().map(|i| (i, i.default_weight())).collect(),
            trend_threshold: 1.5,
            recent_buckets: 3,
        }
    }
}

impl AnalysisSettings {
    /// Reads the weight table and trend constants from the configuration. Every indicator
    /// must have a weight.
    pub fn from_config(config: &Config) -> Result<Self, ScanError> {
        let options = &config.analysis;

        let mut weights = BTreeMap::new();
        for indicator in Indicator::iter() {
            let weight = options.risk_weights.get(indicator.as_ref()).ok_or_else(|| {
                ScanError::Configuration(format!("analysis.risk_weights is missing `{}`", indicator))
            })?;
            weights.insert(indicator, *weight);
        }
        if let Some(unknown) = options
            .risk_weights
            .keys()
            .find(|k| !Indicator::iter().any(|i| i.as_ref() == k.as_str()))
        {
            return Err(ScanError::Configuration(format!("analysis.risk_weights has unknown indicator `{}`", unknown)));
        }
        if !(options.trend_threshold.is_finite() && options.trend_threshold > 0.0) {
            return Err(ScanError::Configuration("analysis.trend_threshold must be positive".into()));
        }
        if options.recent_buckets == 0 {
            return Err(ScanError::Configuration("analysis.recent_buckets must be at least 1".into()));
        }

        Ok(Self { weights, trend_threshold: options.trend_threshold, recent_buckets: options.recent_buckets })
    }

    pub fn weight(&self, indicator: Indicator) -> i64 {
        self.weights.get(&indicator).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    settings: AnalysisSettings,
}

/// Entries found for one indicator, with the probe each came from.
struct Collected<'a> {
    counts: BTreeMap<Indicator, usize>,
    entries: Vec<(Indicator, &'a str, &'a Value)>,
}

impl Aggregator {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self { settings }
    }

    pub fn aggregate(&self, target: Target, envelopes: Vec<ResultEnvelope>) -> ScanReport {
        let analysis = self.analyze(&envelopes);
        debug!(
            risk_score = analysis.risk_score,
            events = analysis.timeline.len(),
            trend = %analysis.statistics.exposure_trend,
            "Analysis complete."
        );
        ScanReport::new(target, envelopes, analysis)
    }

    pub fn analyze(&self, envelopes: &[ResultEnvelope]) -> Analysis {
        let collected = collect_indicators(envelopes);

        let risk_score = self.risk_score(&collected.counts);
        let timeline = build_timeline(&collected.entries);
        let exposure_trend = self.exposure_trend(&timeline);
        let recommendations = build_recommendations(&collected.counts);

        let count = |i: Indicator| collected.counts.get(&i).copied().unwrap_or(0);
        let succeeded = envelopes.iter().filter(|e| e.is_success()).count();
        let statistics = Statistics {
            total_probes: envelopes.len(),
            succeeded,
            failed: envelopes.len() - succeeded,
            total_breaches: count(Indicator::KnownBreaches),
            total_pastes: count(Indicator::RecentPastes),
            total_forum_mentions: count(Indicator::ForumMentions),
            total_market_mentions: count(Indicator::MarketMentions),
            exposure_trend,
        };

        Analysis { risk_score, timeline, recommendations, statistics }
    }

    fn risk_score(&self, counts: &BTreeMap<Indicator, usize>) -> u8 {
        let total = counts.iter().fold(0i64, |acc, (indicator, count)| {
            let count = i64::try_from(*count).unwrap_or(i64::MAX);
            acc.saturating_add(count.saturating_mul(self.settings.weight(*indicator)))
        });
        total.clamp(0, 100) as u8
    }

    fn exposure_trend(&self, timeline: &[TimelineEvent]) -> Trend {
        let mut months: BTreeMap<String, usize> = BTreeMap::new();
        for event in timeline {
            *months.entry(event.date.format("%Y-%m").to_string()).or_default() += 1;
        }
        if months.len() < 2 {
            return Trend::InsufficientData;
        }

        let counts: Vec<usize> = months.into_values().collect();
        let split = counts.len().saturating_sub(self.settings.recent_buckets);
        let older: usize = counts[..split].iter().sum();
        let recent: usize = counts[split..].iter().sum();
        classify_trend(recent, older, self.settings.trend_threshold)
    }
}

/// `increasing` when recent > older × threshold, `decreasing` when older > recent × threshold.
pub fn classify_trend(recent: usize, older: usize, threshold: f64) -> Trend {
    let (recent, older) = (recent as f64, older as f64);
    if recent > older * threshold {
        Trend::Increasing
    } else if older > recent * threshold {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn collect_indicators(envelopes: &[ResultEnvelope]) -> Collected<'_> {
    let mut counts = BTreeMap::new();
    let mut entries = Vec::new();

    for envelope in envelopes.iter().filter(|e| e.is_success()) {
        for indicator in Indicator::iter() {
            match indicator_entries(envelope.payload(), indicator) {
                Ok(items) => {
                    *counts.entry(indicator).or_insert(0) += items.len();
                    entries.extend(items.iter().map(|item| (indicator, envelope.probe(), item)));
                }
                Err(e) => {
                    warn!(probe = envelope.probe(), error = %e, "Ignoring malformed payload field.");
                }
            }
        }
    }

    Collected { counts, entries }
}

/// The array at the indicator's payload path. Absent paths are empty; a path that runs
/// into a non-object, or ends on a non-array, is malformed.
fn indicator_entries(payload: &Payload, indicator: Indicator) -> Result<&[Value], ScanError> {
    let path = indicator.payload_path();
    let malformed = |reason: &str| ScanError::AggregationData {
        field: path.join("."),
        reason: reason.to_string(),
    };

    let Some((last, parents)) = path.split_last() else {
        return Ok(&[]);
    };

    let mut current = payload;
    for key in parents {
        match current.get(*key) {
            None | Some(Value::Null) => return Ok(&[]),
            Some(Value::Object(map)) => current = map,
            Some(_) => return Err(malformed("expected an object")),
        }
    }

    match current.get(*last) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(malformed("expected a list")),
    }
}

fn build_timeline(entries: &[(Indicator, &str, &Value)]) -> Vec<TimelineEvent> {
    let mut events: Vec<TimelineEvent> = entries
        .iter()
        .filter(|(indicator, _, _)| indicator.feeds_timeline())
        .filter_map(|(indicator, probe, item)| {
            let Some(date) = entry_date(item) else {
                debug!(probe = %probe, indicator = %indicator, "Entry has no usable date, skipped.");
                return None;
            };
            Some(TimelineEvent {
                date,
                indicator: *indicator,
                probe: probe.to_string(),
                title: entry_title(item),
            })
        })
        .collect();

    // sort_by is stable: equal dates keep their input order.
    events.sort_by(|a, b| b.date.cmp(&a.date));
    events
}

fn entry_date(item: &Value) -> Option<DateTime<Utc>> {
    let object = item.as_object()?;
    DATE_KEYS.iter().filter_map(|key| object.get(*key)).find_map(parse_date)
}

/// Accepts RFC 3339, plain `YYYY-MM-DD`, or Unix seconds.
pub(crate) fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                let date = NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()?;
                Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
            }),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp(secs as i64, 0)
        }
        _ => None,
    }
}

fn entry_title(item: &Value) -> Option<String> {
    let object = item.as_object()?;
    TITLE_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn build_recommendations(counts: &BTreeMap<Indicator, usize>) -> Vec<String> {
    let unique: BTreeSet<&str> = counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .flat_map(|(indicator, _)| knowledge_base::rules_for(*indicator))
        .flat_map(|rule| rule.recommendations.iter().copied())
        .collect();
    unique.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(probe: &str, payload: Value) -> ResultEnvelope {
        let Value::Object(map) = payload else { panic!("payload must be an object") };
        ResultEnvelope::success(probe, map)
    }

    fn target() -> Target {
        Target::new("example.com").unwrap()
    }

    fn breach(date: &str) -> Value {
        json!({ "name": format!("breach-{}", date), "date": date })
    }

    #[test]
    fn empty_input_is_insufficient_data_and_zero_risk() {
        let report = Aggregator::default().aggregate(target(), Vec::new());
        let analysis = report.analysis();
        assert_eq!(analysis.risk_score, 0);
        assert_eq!(analysis.statistics.exposure_trend, Trend::InsufficientData);
        assert!(analysis.timeline.is_empty());
        assert!(analysis.recommendations.is_empty());
        assert!(report.envelopes().is_empty());
    }

    #[test]
    fn trend_threshold_boundaries() {
        assert_eq!(classify_trend(10, 5, 1.5), Trend::Increasing);
        assert_eq!(classify_trend(4, 10, 1.5), Trend::Decreasing);
        assert_eq!(classify_trend(5, 5, 1.5), Trend::Stable);
        // Exactly 1.5x is not strictly greater.
        assert_eq!(classify_trend(15, 10, 1.5), Trend::Stable);
        assert_eq!(classify_trend(10, 15, 1.5), Trend::Stable);
    }

    #[test]
    fn risk_score_uses_weights_and_clamps() {
        let few = envelope("dark_web", json!({
            "breaches": { "known_breaches": [breach("2023-01-01")] },
            "forum_mentions": { "mentions": [{}, {}] }
        }));
        let analysis = Aggregator::default().analyze(&[few]);
        assert_eq!(analysis.risk_score, 10 + 2 * 2);

        let many: Vec<Value> = (0..50).map(|_| json!({})).collect();
        let lots = envelope("dark_web", json!({ "breaches": { "known_breaches": many } }));
        assert_eq!(Aggregator::default().analyze(&[lots]).risk_score, 100);
    }

    #[test]
    fn negative_weights_clamp_at_zero() {
        let mut settings = AnalysisSettings::default();
        settings.weights.insert(Indicator::ForumMentions, -50);
        let payload = envelope("x", json!({ "forum_mentions": { "mentions": [{}] } }));
        assert_eq!(Aggregator::new(settings).analyze(&[payload]).risk_score, 0);
    }

    #[test]
    fn indicators_are_summed_across_envelopes() {
        let a = envelope("one", json!({ "pastes": { "recent_pastes": [{}, {}] } }));
        let b = envelope("two", json!({ "pastes": { "recent_pastes": [{}] }, "market_mentions": { "mentions": [{}] } }));
        let analysis = Aggregator::default().analyze(&[a, b]);
        assert_eq!(analysis.statistics.total_pastes, 3);
        assert_eq!(analysis.statistics.total_market_mentions, 1);
        assert_eq!(analysis.risk_score, 3 * 5 + 8);
    }

    #[test]
    fn malformed_and_missing_fields_count_as_zero() {
        let malformed = envelope("bad", json!({
            "breaches": { "known_breaches": "lots" },
            "pastes": ["not", "an", "object"],
            "forum_mentions": { "mentions": [{}] }
        }));
        let unrelated = envelope("dns", json!({ "dns": ["1.2.3.4"] }));
        let failed = ResultEnvelope::failure("down", &ScanError::probe("network down"));

        let analysis = Aggregator::default().analyze(&[malformed, unrelated, failed]);
        assert_eq!(analysis.statistics.total_breaches, 0);
        assert_eq!(analysis.statistics.total_pastes, 0);
        assert_eq!(analysis.statistics.total_forum_mentions, 1);
        assert_eq!(analysis.risk_score, 2);
        assert_eq!(analysis.statistics.succeeded, 2);
        assert_eq!(analysis.statistics.failed, 1);
    }

    #[test]
    fn recommendations_are_deduplicated_and_sorted() {
        let a = envelope("a", json!({ "breaches": { "known_breaches": [{}] } }));
        let b = envelope("b", json!({ "breaches": { "known_breaches": [{}] } }));
        let analysis = Aggregator::default().analyze(&[a, b]);
        assert_eq!(
            analysis.recommendations,
            vec![
                "Implement regular security assessments and penetration testing".to_string(),
                "Review and update incident response procedures".to_string(),
            ]
        );

        let exposure = envelope("c", json!({
            "pastes": { "recent_pastes": [{}] },
            "forum_mentions": { "mentions": [{}] },
            "breaches": { "known_breaches": [{}] }
        }));
        let recs = Aggregator::default().analyze(&[exposure]).recommendations;
        assert_eq!(recs.len(), 4);
        let mut sorted = recs.clone();
        sorted.sort();
        assert_eq!(recs, sorted);
    }

    #[test]
    fn timeline_is_most_recent_first_with_stable_ties() {
        let payload = envelope("dark_web", json!({
            "breaches": { "known_breaches": [
                { "Name": "Old", "BreachDate": "2019-05-01" },
                { "Name": "TieA", "BreachDate": "2022-03-10" },
                { "Name": "Undated" }
            ] },
            "forum_mentions": { "mentions": [
                { "title": "TieB", "date": "2022-03-10" },
                { "title": "Newest", "created_utc": 1_700_000_000 }
            ] },
            "market_mentions": { "mentions": [{ "title": "Market", "date": "2024-01-01" }] }
        }));
        let timeline = Aggregator::default().analyze(&[payload]).timeline;
        let titles: Vec<_> = timeline.iter().map(|e| e.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["Newest", "TieA", "TieB", "Old"]);
        assert_eq!(timeline[0].indicator, Indicator::ForumMentions);
        assert_eq!(timeline[1].probe, "dark_web");
    }

    #[test]
    fn trend_uses_month_buckets() {
        // One old month with 1 event, one recent month with 5: increasing.
        let mut items = vec![breach("2020-01-15")];
        items.extend((0..5).map(|d| breach(&format!("2024-06-0{}", d + 1))));
        let payload = envelope("dark_web", json!({ "breaches": { "known_breaches": items } }));
        let stats = Aggregator::default().analyze(&[payload]).statistics;
        assert_eq!(stats.exposure_trend, Trend::Increasing);

        // Single month, many events: still insufficient.
        let items: Vec<_> = (1..=4).map(|d| breach(&format!("2024-06-0{}", d))).collect();
        let payload = envelope("dark_web", json!({ "breaches": { "known_breaches": items } }));
        let stats = Aggregator::default().analyze(&[payload]).statistics;
        assert_eq!(stats.exposure_trend, Trend::InsufficientData);

        // Heavy history, quiet recent months: decreasing.
        let mut items: Vec<_> = (1..=9).map(|d| breach(&format!("2019-0{}-01", d))).collect();
        items.push(breach("2024-01-01"));
        let payload = envelope("dark_web", json!({ "breaches": { "known_breaches": items } }));
        let stats = Aggregator::default().analyze(&[payload]).statistics;
        assert_eq!(stats.exposure_trend, Trend::Decreasing);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let payload = envelope("dark_web", json!({
            "breaches": { "known_breaches": [breach("2021-01-01"), breach("2023-04-02")] },
            "pastes": { "recent_pastes": [{ "date": "2023-04-02", "title": "p" }] }
        }));
        let envelopes = vec![payload, ResultEnvelope::failure("x", &ScanError::Cancelled)];
        let aggregator = Aggregator::default();
        let first = aggregator.analyze(&envelopes);
        let second = aggregator.analyze(&envelopes);
        assert_eq!(first, second);
    }

    #[test]
    fn envelopes_pass_through_unchanged() {
        let envelopes = vec![
            envelope("a", json!({ "dns": ["1.2.3.4"] })),
            ResultEnvelope::failure("b", &ScanError::probe("network down")),
        ];
        let report = Aggregator::default().aggregate(target(), envelopes.clone());
        assert_eq!(report.envelopes(), envelopes.as_slice());
        assert_eq!(report.target().domain(), "example.com");
    }

    #[test]
    fn settings_require_every_weight() {
        let config = Config::from_yaml("analysis:\n  risk_weights:\n    known_breaches: 10\n").unwrap();
        let err = AnalysisSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
        assert!(err.to_string().contains("recent_pastes"));

        let config = Config::from_yaml("analysis:\n  trend_threshold: 0\n").unwrap();
        assert!(AnalysisSettings::from_config(&config).is_err());

        let settings = AnalysisSettings::from_config(&Config::default()).unwrap();
        assert_eq!(settings, AnalysisSettings::default());
    }

    #[test]
    fn parse_date_formats() {
        assert!(parse_date(&json!("2023-04-02T10:00:00Z")).is_some());
        assert!(parse_date(&json!("2023-04-02")).is_some());
        assert!(parse_date(&json!(1_700_000_000.5)).is_some());
        assert!(parse_date(&json!("yesterday")).is_none());
        assert!(parse_date(&json!(null)).is_none());
    }
}
