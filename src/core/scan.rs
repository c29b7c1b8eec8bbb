// src/core/scan.rs

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::core::aggregator::{Aggregator, AnalysisSettings};
use crate::core::errors::ScanError;
use crate::core::models::{ScanReport, Target};
use crate::core::orchestrator::{CancelSignal, Orchestrator, OrchestratorSettings};
use crate::core::probes::Probe;
use crate::core::registry::ProbeRegistry;

/// Everything a scan needs, validated up front: the resolved probes, their deadlines
/// and the analysis constants. Once a plan exists, executing it cannot fail.
pub struct ScanPlan {
    probes: Vec<Arc<dyn Probe>>,
    orchestrator: Orchestrator,
    aggregator: Aggregator,
}

impl ScanPlan {
    /// Resolves probes and settings from `config`. Any configuration problem surfaces
    /// here, before a single probe is dispatched.
    pub fn prepare(config: &Arc<Config>, registry: &ProbeRegistry) -> Result<Self, ScanError> {
        let probes = registry.resolve(config)?;
        let analysis = AnalysisSettings::from_config(config)?;
        let orchestrator = Orchestrator::new(OrchestratorSettings::from_config(config));
        Ok(Self::from_parts(probes, orchestrator, Aggregator::new(analysis)))
    }

    pub fn from_parts(probes: Vec<Arc<dyn Probe>>, orchestrator: Orchestrator, aggregator: Aggregator) -> Self {
        Self { probes, orchestrator, aggregator }
    }

    pub fn probe_names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    pub async fn execute(&self, target: Target) -> ScanReport {
        self.execute_with_cancel(target, CancelSignal::never()).await
    }

    pub async fn execute_with_cancel(&self, target: Target, cancel: CancelSignal) -> ScanReport {
        info!(target = %target.domain(), probes = ?self.probe_names(), "Scan started.");
        let shared = Arc::new(target);
        let envelopes = self.orchestrator.run_with_cancel(Arc::clone(&shared), &self.probes, cancel).await;

        let target = Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone());
        let report = self.aggregator.aggregate(target, envelopes);
        info!(risk_score = report.analysis().risk_score, "Scan finished.");
        report
    }
}
