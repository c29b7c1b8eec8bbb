// src/app.rs

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::core::errors::ScanError;
use crate::core::models::{ScanReport, Target, Trend};
use crate::core::orchestrator::CancelSignal;
use crate::core::registry::ProbeRegistry;
use crate::core::scan::ScanPlan;
use crate::core::sink::{JsonFileSink, ReportSink};

/// How alarming a risk score is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Low,
    Medium,
    High,
    Critical,
}

impl Rating {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=19 => Rating::Low,
            20..=49 => Rating::Medium,
            50..=79 => Rating::High,
            _ => Rating::Critical,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Rating::Low => "LOW",
            Rating::Medium => "MEDIUM",
            Rating::High => "HIGH",
            Rating::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeLine {
    pub name: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// The headline figures of a report, as printed at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub domain: String,
    pub score: u8,
    pub rating: Rating,
    pub trend: Trend,
    pub probes: Vec<ProbeLine>,
    pub recommendations: Vec<String>,
}

impl ScanSummary {
    pub fn from_report(report: &ScanReport) -> Self {
        let analysis = report.analysis();
        Self {
            domain: report.target().domain().to_string(),
            score: analysis.risk_score,
            rating: Rating::from_score(analysis.risk_score),
            trend: analysis.statistics.exposure_trend,
            probes: report
                .envelopes()
                .iter()
                .map(|e| ProbeLine {
                    name: e.probe().to_string(),
                    succeeded: e.is_success(),
                    error: e.error().map(str::to_string),
                })
                .collect(),
            recommendations: analysis.recommendations.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Target:     {}", self.domain);
        let _ = writeln!(out, "Risk score: {}/100 ({})", self.score, self.rating.label());
        let _ = writeln!(out, "Trend:      {}", self.trend);
        let _ = writeln!(out, "\nProbes:");
        for probe in &self.probes {
            match &probe.error {
                None => {
                    let _ = writeln!(out, "  [ OK ] {}", probe.name);
                }
                Some(error) => {
                    let _ = writeln!(out, "  [FAIL] {}: {}", probe.name, error);
                }
            }
        }
        if !self.recommendations.is_empty() {
            let _ = writeln!(out, "\nRecommendations:");
            for recommendation in &self.recommendations {
                let _ = writeln!(out, "  - {}", recommendation);
            }
        }
        out
    }
}

/// Wires configuration, probe registry and report sink together for one process.
pub struct App {
    config: Arc<Config>,
    registry: ProbeRegistry,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, ProbeRegistry::builtin())
    }

    pub fn with_registry(config: Config, registry: ProbeRegistry) -> Self {
        Self { config: Arc::new(config), registry }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates the input and the configuration, then runs every enabled probe.
    /// Only those two validations can fail; probe failures live inside the report.
    pub async fn run(&self, domain: &str, cancel: CancelSignal) -> Result<ScanReport, ScanError> {
        let target = Target::new(domain)?;
        let plan = ScanPlan::prepare(&self.config, &self.registry)?;
        info!(target = %target.domain(), "Running scan.");
        Ok(plan.execute_with_cancel(target, cancel).await)
    }

    /// Saves `report` under the configured output directory. The format was checked
    /// when the configuration was loaded.
    pub fn persist(&self, report: &ScanReport) -> Result<PathBuf, ScanError> {
        JsonFileSink::new(&self.config.output.directory).persist(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bands() {
        assert_eq!(Rating::from_score(0), Rating::Low);
        assert_eq!(Rating::from_score(19), Rating::Low);
        assert_eq!(Rating::from_score(20), Rating::Medium);
        assert_eq!(Rating::from_score(50), Rating::High);
        assert_eq!(Rating::from_score(80), Rating::Critical);
        assert_eq!(Rating::from_score(100), Rating::Critical);
    }

    #[tokio::test]
    async fn invalid_domain_fails_before_any_probe_runs() {
        let app = App::new(Config::default());
        let err = app.run("not a domain", CancelSignal::never()).await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn unknown_module_fails_the_run() {
        let mut config = Config::default();
        config.modules.insert("telepathy".into(), true);
        let err = App::new(config).run("example.com", CancelSignal::never()).await.unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[tokio::test]
    async fn summary_lists_every_probe() {
        let mut config = Config::default();
        config.modules.clear();
        let report = App::new(config).run("example.com", CancelSignal::never()).await.unwrap();

        let summary = ScanSummary::from_report(&report);
        assert_eq!(summary.score, 0);
        assert_eq!(summary.rating, Rating::Low);
        let text = summary.render();
        assert!(text.contains("example.com"));
        assert!(text.contains("insufficient_data"));
    }
}
