// src/core/mod.rs

// The scan pipeline: probes are resolved from the registry into a plan, fanned out by
// the orchestrator, folded into a report by the aggregator and handed to a sink.

/// Target, result envelope, analysis and report types.
pub mod models;

pub mod errors;

/// Indicator definitions and the recommendation rule table used by the aggregator.
pub mod knowledge_base;

pub mod probes;
pub mod registry;
pub mod orchestrator;
pub mod aggregator;
pub mod scan;
pub mod sink;
