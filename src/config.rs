// src/config.rs

//! YAML configuration: API keys, which probes run, scan tuning and analysis constants.
//!
//! The configuration is loaded once at start-up, wrapped in an `Arc` and passed explicitly
//! to the registry, the probes and the scan plan. Nothing mutates it afterwards.

use std::fs;
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{debug, info};

use crate::core::errors::ScanError;
use crate::core::knowledge_base::Indicator;

/// Default ports for the TCP connect scan of the active probe.
const DEFAULT_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 143, 443, 445, 465, 587, 993, 995, 3306, 3389, 5432, 8080, 8443,
];

/// Report formats a sink exists for.
pub const SUPPORTED_FORMATS: &[&str] = &["json"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_api_keys")]
    pub api_keys: IndexMap<String, String>,
    /// Probe name to enablement flag. Declaration order is dispatch order.
    #[serde(default = "default_modules")]
    pub modules: IndexMap<String, bool>,
    #[serde(default)]
    pub scan_options: ScanOptions,
    /// Free-form per-probe options, e.g. `{ active_recon: { timeout: 60 } }`.
    #[serde(default)]
    pub probes: IndexMap<String, IndexMap<String, serde_yaml::Value>>,
    #[serde(default)]
    pub analysis: AnalysisOptions,
    #[serde(default)]
    pub output: OutputOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanOptions {
    /// Per-probe deadline in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Concurrent connections used by the port scan.
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_max_subdomains")]
    pub max_subdomains: usize,
    /// Timeout of a single HTTP request, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisOptions {
    #[serde(default = "default_risk_weights")]
    pub risk_weights: IndexMap<String, i64>,
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
    /// How many of the latest month buckets count as "recent" for the trend.
    #[serde(default = "default_recent_buckets")]
    pub recent_buckets: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputOptions {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_directory")]
    pub directory: String,
}

fn default_api_keys() -> IndexMap<String, String> {
    ["shodan", "virustotal", "censys", "haveibeenpwned"]
        .into_iter()
        .map(|k| (k.to_string(), String::new()))
        .collect()
}

fn default_modules() -> IndexMap<String, bool> {
    IndexMap::from([
        ("passive_recon".to_string(), true),
        ("active_recon".to_string(), true),
        ("social_media".to_string(), true),
        ("dark_web".to_string(), false),
    ])
}

fn default_timeout() -> u64 { 30 }
fn default_threads() -> usize { 5 }
fn default_max_subdomains() -> usize { 100 }
fn default_http_timeout() -> u64 { 10 }
fn default_connect_timeout_ms() -> u64 { 1500 }
fn default_ports() -> Vec<u16> { DEFAULT_PORTS.to_vec() }
fn default_trend_threshold() -> f64 { 1.5 }
fn default_recent_buckets() -> usize { 3 }
fn default_format() -> String { "json".to_string() }
fn default_directory() -> String { "results".to_string() }

fn default_risk_weights() -> IndexMap<String, i64> {
    Indicator::iter()
        .map(|i| (i.as_ref().to_string(), i.default_weight()))
        .collect()
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            threads: default_threads(),
            max_subdomains: default_max_subdomains(),
            http_timeout: default_http_timeout(),
            connect_timeout_ms: default_connect_timeout_ms(),
            ports: default_ports(),
        }
    }
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            risk_weights: default_risk_weights(),
            trend_threshold: default_trend_threshold(),
            recent_buckets: default_recent_buckets(),
        }
    }
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self { format: default_format(), directory: default_directory() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_keys: default_api_keys(),
            modules: default_modules(),
            scan_options: ScanOptions::default(),
            probes: IndexMap::new(),
            analysis: AnalysisOptions::default(),
            output: OutputOptions::default(),
        }
    }
}

impl Config {
    /// Loads the configuration at `path`, writing a default file first if none exists.
    pub fn load_or_create(path: &Path) -> Result<Self, ScanError> {
        if !path.exists() {
            info!(path = %path.display(), "No configuration found, writing defaults.");
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        debug!(path = %path.display(), "Reading configuration.");
        let content = fs::read_to_string(path).map_err(|e| {
            ScanError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ScanError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ScanError::Configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ScanError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ScanError::Configuration(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| ScanError::Configuration(format!("cannot serialize configuration: {}", e)))?;
        fs::write(path, yaml).map_err(|e| {
            ScanError::Configuration(format!("cannot write {}: {}", path.display(), e))
        })
    }

    fn validate(&self) -> Result<(), ScanError> {
        if self.scan_options.timeout == 0 {
            return Err(ScanError::Configuration("scan_options.timeout must be positive".into()));
        }
        if self.scan_options.threads == 0 {
            return Err(ScanError::Configuration("scan_options.threads must be positive".into()));
        }
        if !SUPPORTED_FORMATS.contains(&self.output.format.as_str()) {
            return Err(ScanError::Configuration(format!(
                "unsupported output format `{}`",
                self.output.format
            )));
        }
        Ok(())
    }

    /// API key for `service`, or an empty string when none is configured.
    pub fn api_key(&self, service: &str) -> &str {
        self.api_keys.get(service).map(String::as_str).unwrap_or("")
    }

    pub fn probe_option(&self, probe: &str, key: &str) -> Option<&serde_yaml::Value> {
        self.probes.get(probe).and_then(|options| options.get(key))
    }

    /// Deadline for `probe`: its own `timeout` option if set, else the global one.
    pub fn probe_timeout(&self, probe: &str) -> Duration {
        self.probe_option(probe, "timeout")
            .and_then(|v| v.as_f64())
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| Duration::from_secs(self.scan_options.timeout))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_options.http_timeout)
    }
}
