// src/core/sink.rs

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use crate::core::errors::ScanError;
use crate::core::models::ScanReport;

/// Where finished reports go.
pub trait ReportSink {
    /// Stores `report` and returns where it ended up.
    fn persist(&self, report: &ScanReport) -> Result<PathBuf, ScanError>;
}

/// Writes each report as pretty-printed JSON into one directory.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    directory: PathBuf,
}

impl JsonFileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `osint_<domain>_<YYYYmmdd_HHMMSS>.json`, stamped with the report's generation time (UTC).
    pub fn file_name(report: &ScanReport) -> String {
        format!(
            "osint_{}_{}.json",
            report.target().domain(),
            report.generated_at().format("%Y%m%d_%H%M%S")
        )
    }
}

/// The report as stored on disk: the report itself plus a `metadata` block.
pub fn report_document(report: &ScanReport) -> Result<Value, ScanError> {
    let mut document = serde_json::to_value(report)
        .map_err(|e| ScanError::Report(format!("cannot serialize report: {}", e)))?;
    if let Value::Object(map) = &mut document {
        map.insert(
            "metadata".to_string(),
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "framework_version": env!("CARGO_PKG_VERSION"),
            }),
        );
    }
    Ok(document)
}

impl ReportSink for JsonFileSink {
    fn persist(&self, report: &ScanReport) -> Result<PathBuf, ScanError> {
        fs::create_dir_all(&self.directory).map_err(|e| {
            ScanError::Report(format!("cannot create {}: {}", self.directory.display(), e))
        })?;

        let path = self.directory.join(Self::file_name(report));
        let document = report_document(report)?;
        let pretty = serde_json::to_string_pretty(&document)
            .map_err(|e| ScanError::Report(format!("cannot serialize report: {}", e)))?;
        fs::write(&path, pretty)
            .map_err(|e| ScanError::Report(format!("cannot write {}: {}", path.display(), e)))?;

        info!(path = %path.display(), "Report saved.");
        Ok(path)
    }
}
