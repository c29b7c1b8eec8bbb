// tests/scan_pipeline.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use vanguard_osint::core::models::{Payload, ProbeStatus, Trend};
use vanguard_osint::core::orchestrator::cancel_pair;
use vanguard_osint::core::sink::{JsonFileSink, ReportSink};
use vanguard_osint::{Config, Probe, ProbeRegistry, ScanError, ScanPlan, Target};

enum Behaviour {
    Return(Value),
    Fail(&'static str),
    Hang,
    Sleep(u64),
}

struct ScriptedProbe {
    name: String,
    behaviour: Behaviour,
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _target: &Target) -> Result<Payload, ScanError> {
        match &self.behaviour {
            Behaviour::Return(Value::Object(map)) => Ok(map.clone()),
            Behaviour::Return(other) => Err(ScanError::probe(format!("bad fixture: {}", other))),
            Behaviour::Fail(msg) => Err(ScanError::probe(*msg)),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Payload::new())
            }
            Behaviour::Sleep(secs) => {
                tokio::time::sleep(Duration::from_secs(*secs)).await;
                Ok(Payload::new())
            }
        }
    }
}

fn register(registry: &mut ProbeRegistry, name: &'static str, make: fn() -> Behaviour) {
    registry.register(name, move |_| {
        Arc::new(ScriptedProbe { name: name.to_string(), behaviour: make() })
    });
}

fn config(modules: &[&str], timeout: u64) -> Arc<Config> {
    let mut config = Config::default();
    config.modules = modules.iter().map(|m| (m.to_string(), true)).collect();
    config.scan_options.timeout = timeout;
    Arc::new(config)
}

fn abc_registry() -> ProbeRegistry {
    let mut registry = ProbeRegistry::new();
    register(&mut registry, "A", || Behaviour::Return(json!({ "dns": ["1.2.3.4"] })));
    register(&mut registry, "B", || Behaviour::Fail("network down"));
    register(&mut registry, "C", || Behaviour::Hang);
    registry
}

#[tokio::test(start_paused = true)]
async fn example_com_with_success_failure_and_timeout() {
    let plan = ScanPlan::prepare(&config(&["A", "B", "C"], 5), &abc_registry()).unwrap();
    let report = plan.execute(Target::new("example.com").unwrap()).await;

    let envelopes = report.envelopes();
    assert_eq!(envelopes.len(), 3);

    assert_eq!(envelopes[0].probe(), "A");
    assert_eq!(envelopes[0].status(), ProbeStatus::Success);
    assert_eq!(envelopes[0].payload()["dns"], json!(["1.2.3.4"]));

    assert_eq!(envelopes[1].probe(), "B");
    assert_eq!(envelopes[1].status(), ProbeStatus::Error);
    assert_eq!(envelopes[1].error(), Some("network down"));
    assert!(envelopes[1].payload().is_empty());

    assert_eq!(envelopes[2].probe(), "C");
    assert_eq!(envelopes[2].status(), ProbeStatus::Error);
    assert!(envelopes[2].error().unwrap().starts_with("timeout"));

    let analysis = report.analysis();
    assert_eq!(analysis.risk_score, 0);
    assert!(analysis.timeline.is_empty());
    assert!(analysis.recommendations.is_empty());
    assert_eq!(analysis.statistics.exposure_trend, Trend::InsufficientData);
    assert_eq!(analysis.statistics.succeeded, 1);
    assert_eq!(analysis.statistics.failed, 2);
}

#[tokio::test(start_paused = true)]
async fn breach_findings_drive_score_timeline_and_recommendations() {
    let mut registry = abc_registry();
    register(&mut registry, "leaks", || {
        Behaviour::Return(json!({
            "breaches": { "known_breaches": [
                { "title": "Old", "date": "2023-01-15" },
                { "title": "New", "date": "2024-06-01" }
            ], "potential_exposures": [] },
            "pastes": { "recent_pastes": [ { "title": "dump", "date": "2024-05-20" } ] },
            "forum_mentions": { "mentions": [ { "title": "thread", "date": null } ] },
            "market_mentions": { "mentions": [] }
        }))
    });

    let plan = ScanPlan::prepare(&config(&["A", "leaks"], 5), &registry).unwrap();
    let report = plan.execute(Target::new("example.com").unwrap()).await;
    let analysis = report.analysis();

    // 2 breaches x 10 + 1 paste x 5 + 1 forum mention x 2
    assert_eq!(analysis.risk_score, 27);
    let titles: Vec<_> = analysis.timeline.iter().map(|e| e.title.as_deref().unwrap()).collect();
    assert_eq!(titles, vec!["New", "dump", "Old"]);
    assert_eq!(analysis.recommendations.len(), 4);
    assert_eq!(analysis.statistics.total_breaches, 2);
    assert_eq!(analysis.statistics.total_forum_mentions, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_scan_still_reports_every_probe() {
    let plan = ScanPlan::prepare(&config(&["A", "C", "C2"], 600), &{
        let mut registry = abc_registry();
        register(&mut registry, "C2", || Behaviour::Hang);
        registry
    })
    .unwrap();

    let (handle, signal) = cancel_pair();
    let scan = plan.execute_with_cancel(Target::new("example.com").unwrap(), signal);
    let interrupt = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
    };
    let (report, _) = tokio::join!(scan, interrupt);

    let errors: Vec<_> = report.envelopes().iter().map(|e| e.error()).collect();
    assert_eq!(errors, vec![None, Some("cancelled"), Some("cancelled")]);
}

fn register_as(registry: &mut ProbeRegistry, key: &'static str, name: &'static str, make: fn() -> Behaviour) {
    registry.register(key, move |_| {
        Arc::new(ScriptedProbe { name: name.to_string(), behaviour: make() })
    });
}

#[tokio::test(start_paused = true)]
async fn envelopes_are_keyed_by_module_even_when_names_collide() {
    let mut registry = ProbeRegistry::new();
    register_as(&mut registry, "whois_a", "lookup", || Behaviour::Return(json!({ "n": 1 })));
    register_as(&mut registry, "whois_b", "lookup", || Behaviour::Return(json!({ "n": 2 })));

    let plan = ScanPlan::prepare(&config(&["whois_a", "whois_b"], 5), &registry).unwrap();
    let report = plan.execute(Target::new("example.com").unwrap()).await;

    let ids: Vec<_> = report.envelopes().iter().map(|e| e.probe()).collect();
    assert_eq!(ids, vec!["whois_a", "whois_b"]);
    assert_eq!(report.envelope("whois_b").unwrap().payload()["n"], 2);
}

#[tokio::test(start_paused = true)]
async fn per_module_timeout_override_applies_to_the_module_key() {
    let mut registry = ProbeRegistry::new();
    register_as(&mut registry, "slow_feed", "feed", || Behaviour::Sleep(20));

    let yaml = "modules:\n  slow_feed: true\nscan_options:\n  timeout: 5\nprobes:\n  slow_feed:\n    timeout: 60\n";
    let config = Arc::new(Config::from_yaml(yaml).unwrap());
    let report = ScanPlan::prepare(&config, &registry)
        .unwrap()
        .execute(Target::new("example.com").unwrap())
        .await;

    let envelope = report.envelope("slow_feed").unwrap();
    assert_eq!(envelope.error(), None);
    assert_eq!(envelope.status(), ProbeStatus::Success);
}

#[tokio::test]
async fn unregistered_module_is_rejected_before_dispatch() {
    let err = ScanPlan::prepare(&config(&["A", "Z"], 5), &abc_registry()).err().unwrap();
    assert!(matches!(err, ScanError::Configuration(_)));
}

#[tokio::test(start_paused = true)]
async fn finished_report_is_persisted_as_json() {
    let plan = ScanPlan::prepare(&config(&["A", "B"], 5), &abc_registry()).unwrap();
    let report = plan.execute(Target::new("https://www.Example.com/path").unwrap()).await;

    let dir = tempfile::tempdir().unwrap();
    let path = JsonFileSink::new(dir.path()).persist(&report).unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["target"]["domain"], "www.example.com");
    assert_eq!(written["scan_results"].as_array().unwrap().len(), 2);
    assert_eq!(written["analysis"]["statistics"]["exposure_trend"], "insufficient_data");
    assert!(written["metadata"]["timestamp"].is_string());
}
