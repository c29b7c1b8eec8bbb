// src/core/orchestrator.rs

//! Fan-out/fan-in over the enabled probes of one scan.
//!
//! Each probe runs in its own tokio task that races the probe against its deadline and
//! the run's cancellation signal. The join handles are kept in dispatch order, so the
//! envelopes come back in that order no matter which probe finishes first, and a task
//! that fails in any way (error, timeout, cancellation, panic) still yields an envelope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::errors::ScanError;
use crate::core::models::{ResultEnvelope, Target};
use crate::core::probes::Probe;

/// Deadlines applied by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub default_timeout: Duration,
    pub per_probe: HashMap<String, Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { default_timeout: Duration::from_secs(30), per_probe: HashMap::new() }
    }
}

impl OrchestratorSettings {
    /// Global timeout from `scan_options`, plus any `probes.<name>.timeout` override.
    pub fn from_config(config: &Config) -> Self {
        let per_probe = config
            .probes
            .keys()
            .map(|name| (name.clone(), config.probe_timeout(name)))
            .collect();
        Self { default_timeout: Duration::from_secs(config.scan_options.timeout), per_probe }
    }

    pub fn timeout_for(&self, probe: &str) -> Duration {
        self.per_probe.get(probe).copied().unwrap_or(self.default_timeout)
    }
}

/// Caller side of a run-wide cancellation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even once every receiver is gone.
        self.tx.send_replace(true);
    }
}

/// Probe side of a run-wide cancellation. Resolves only once `cancel` has been called.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&mut self) {
        loop {
            let fired = *self.rx.borrow_and_update();
            if fired {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped without cancelling: this run can no longer be cancelled.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Runs every probe concurrently against `target` and returns one envelope per probe,
    /// in the order of `probes`.
    pub async fn run(&self, target: Arc<Target>, probes: &[Arc<dyn Probe>]) -> Vec<ResultEnvelope> {
        self.run_with_cancel(target, probes, CancelSignal::never()).await
    }

    /// Same as `run`, but every probe still in flight when `cancel` fires is reported
    /// as a `cancelled` error.
    pub async fn run_with_cancel(
        &self,
        target: Arc<Target>,
        probes: &[Arc<dyn Probe>],
        cancel: CancelSignal,
    ) -> Vec<ResultEnvelope> {
        info!(target = %target.domain(), probes = probes.len(), "Dispatching probes.");

        let handles: Vec<JoinHandle<ResultEnvelope>> = probes
            .iter()
            .map(|probe| {
                let deadline = self.settings.timeout_for(probe.name());
                tokio::spawn(supervise(Arc::clone(probe), Arc::clone(&target), deadline, cancel.clone()))
            })
            .collect();

        let mut envelopes = Vec::with_capacity(handles.len());
        for (probe, handle) in probes.iter().zip(handles) {
            let envelope = match handle.await {
                Ok(envelope) => envelope,
                Err(join_error) => {
                    warn!(probe = probe.name(), error = %join_error, "Probe task did not complete.");
                    let reason = if join_error.is_cancelled() {
                        ScanError::Cancelled
                    } else {
                        ScanError::probe(format!("probe task panicked: {}", join_error))
                    };
                    ResultEnvelope::failure(probe.name(), &reason)
                }
            };
            envelopes.push(envelope);
        }

        let failed = envelopes.iter().filter(|e| !e.is_success()).count();
        info!(total = envelopes.len(), failed, "All probes settled.");
        envelopes
    }
}

/// Runs one probe under its deadline and the cancellation signal and wraps the outcome.
async fn supervise(
    probe: Arc<dyn Probe>,
    target: Arc<Target>,
    deadline: Duration,
    mut cancel: CancelSignal,
) -> ResultEnvelope {
    let name = probe.name().to_string();
    debug!(probe = %name, deadline_secs = deadline.as_secs_f64(), "Probe started.");

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
        result = tokio::time::timeout(deadline, probe.execute(&target)) => match result {
            Ok(inner) => inner,
            Err(_) => Err(ScanError::ProbeTimeout(deadline)),
        },
    };

    match outcome {
        Ok(payload) => {
            info!(probe = %name, keys = payload.len(), "Probe succeeded.");
            ResultEnvelope::success(name, payload)
        }
        Err(e) => {
            warn!(probe = %name, error = %e, "Probe failed.");
            ResultEnvelope::failure(name, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Payload, ProbeStatus};
    use async_trait::async_trait;
    use serde_json::json;

    enum Behaviour {
        Succeed(u64),
        Fail(&'static str),
        Hang,
        Panic,
    }

    struct FakeProbe {
        name: &'static str,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Probe for FakeProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, target: &Target) -> Result<Payload, ScanError> {
            match self.behaviour {
                Behaviour::Succeed(delay_ms) => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let mut payload = Payload::new();
                    payload.insert("domain".into(), json!(target.domain()));
                    payload.insert("probe".into(), json!(self.name));
                    Ok(payload)
                }
                Behaviour::Fail(msg) => Err(ScanError::probe(msg)),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Payload::new())
                }
                Behaviour::Panic => panic!("probe blew up"),
            }
        }
    }

    fn probe(name: &'static str, behaviour: Behaviour) -> Arc<dyn Probe> {
        Arc::new(FakeProbe { name, behaviour })
    }

    fn target() -> Arc<Target> {
        Arc::new(Target::new("example.com").unwrap())
    }

    fn orchestrator(timeout: Duration) -> Orchestrator {
        Orchestrator::new(OrchestratorSettings { default_timeout: timeout, per_probe: HashMap::new() })
    }

    #[tokio::test(start_paused = true)]
    async fn envelopes_follow_dispatch_order_not_completion_order() {
        let probes = vec![
            probe("slow", Behaviour::Succeed(300)),
            probe("fast", Behaviour::Succeed(1)),
            probe("medium", Behaviour::Succeed(100)),
        ];
        let envelopes = orchestrator(Duration::from_secs(5)).run(target(), &probes).await;
        let names: Vec<_> = envelopes.iter().map(|e| e.probe()).collect();
        assert_eq!(names, vec!["slow", "fast", "medium"]);
        assert!(envelopes.iter().all(|e| e.is_success()));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated_per_probe() {
        let probes = vec![
            probe("a", Behaviour::Succeed(10)),
            probe("hang", Behaviour::Hang),
            probe("throw", Behaviour::Fail("boom")),
            probe("b", Behaviour::Succeed(20)),
        ];
        let envelopes = orchestrator(Duration::from_secs(5)).run(target(), &probes).await;

        assert_eq!(envelopes.len(), 4);
        assert_eq!(envelopes[0].status(), ProbeStatus::Success);
        assert_eq!(envelopes[0].payload()["probe"], json!("a"));
        assert!(envelopes[1].error().unwrap().starts_with("timeout"));
        assert_eq!(envelopes[2].error(), Some("boom"));
        assert_eq!(envelopes[3].status(), ProbeStatus::Success);
        assert_eq!(envelopes[3].payload()["domain"], json!("example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn per_probe_timeout_override_applies_only_to_that_probe() {
        let mut per_probe = HashMap::new();
        per_probe.insert("patient".to_string(), Duration::from_secs(10));
        let orchestrator = Orchestrator::new(OrchestratorSettings {
            default_timeout: Duration::from_secs(1),
            per_probe,
        });
        let probes = vec![
            probe("patient", Behaviour::Succeed(5_000)),
            probe("impatient", Behaviour::Succeed(5_000)),
        ];
        let envelopes = orchestrator.run(target(), &probes).await;
        assert!(envelopes[0].is_success());
        assert!(!envelopes[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_probe_becomes_an_error_envelope() {
        let probes = vec![probe("panics", Behaviour::Panic), probe("ok", Behaviour::Succeed(1))];
        let envelopes = orchestrator(Duration::from_secs(5)).run(target(), &probes).await;
        assert_eq!(envelopes[0].probe(), "panics");
        assert!(envelopes[0].error().unwrap().contains("panicked"));
        assert!(envelopes[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_still_returns_every_envelope() {
        let probes = vec![
            probe("quick", Behaviour::Succeed(1)),
            probe("stuck-1", Behaviour::Hang),
            probe("stuck-2", Behaviour::Hang),
        ];
        let (handle, signal) = cancel_pair();
        let runner = orchestrator(Duration::from_secs(600));
        let run = runner.run_with_cancel(target(), &probes, signal);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        };
        let (envelopes, _) = tokio::join!(run, cancel);

        assert_eq!(envelopes.len(), 3);
        assert!(envelopes[0].is_success());
        assert_eq!(envelopes[1].error(), Some("cancelled"));
        assert_eq!(envelopes[2].error(), Some("cancelled"));
    }

    #[tokio::test]
    async fn no_probes_no_envelopes() {
        let envelopes = Orchestrator::default().run(target(), &[]).await;
        assert!(envelopes.is_empty());
    }

    #[test]
    fn settings_read_overrides_from_config() {
        let config = Config::from_yaml("scan_options:\n  timeout: 7\nprobes:\n  dark_web:\n    timeout: 2\n").unwrap();
        let settings = OrchestratorSettings::from_config(&config);
        assert_eq!(settings.timeout_for("dark_web"), Duration::from_secs(2));
        assert_eq!(settings.timeout_for("passive_recon"), Duration::from_secs(7));
    }
}
