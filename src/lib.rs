// src/lib.rs

//! Orchestration and aggregation core for OSINT scans of a single domain.
//!
//! A scan resolves the enabled probes from configuration, runs them concurrently with
//! per-probe deadlines, and folds their results into one report with a risk score,
//! an exposure timeline and recommendations.

pub mod app;
pub mod config;
pub mod core;
pub mod logging;

pub use crate::config::Config;
pub use crate::core::errors::ScanError;
pub use crate::core::models::{ResultEnvelope, ScanReport, Target};
pub use crate::core::probes::Probe;
pub use crate::core::registry::ProbeRegistry;
pub use crate::core::scan::ScanPlan;
