// 💾 Output - unified CSV and the JSON run report
//
// Writing is separate from running so a failed write never hides a finished
// merge from the caller.

use crate::aggregate::AnalysisSummary;
use crate::anomaly::AnomalyLog;
use crate::error::OutputError;
use crate::merge::UnifiedTable;
use crate::pipeline::{PipelineOutput, SourceStats};
use crate::quality::BatchSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Header row, then one row per school. `Null` is an empty cell.
pub fn write_unified_csv(table: &UnifiedTable, path: &Path) -> Result<(), OutputError> {
    let csv_err = |e: csv::Error| OutputError::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(table.columns()).map_err(csv_err)?;

    for record in table.records() {
        let cells = record
            .values
            .iter()
            .map(|v| v.render().unwrap_or_default());
        writer.write_record(cells).map_err(csv_err)?;
    }

    writer.flush().map_err(|e| OutputError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    info!(path = %path.display(), rows = table.len(), "Wrote unified table");
    Ok(())
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub version: &'static str,
    pub schools: usize,
    pub columns: usize,
    pub sources: &'a [SourceStats],
    pub anomaly_summary: String,
    pub anomalies: &'a AnomalyLog,
    pub quality: &'a BatchSummary,
    pub analysis: &'a AnalysisSummary,
}

impl<'a> RunReport<'a> {
    pub fn new(output: &'a PipelineOutput) -> Self {
        RunReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            version: crate::VERSION,
            schools: output.table.len(),
            columns: output.table.columns().len(),
            sources: &output.sources,
            anomaly_summary: output.anomalies.summary(),
            anomalies: &output.anomalies,
            quality: &output.quality,
            analysis: &output.analysis,
        }
    }
}

pub fn write_report(report: &RunReport<'_>, path: &Path) -> Result<(), OutputError> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|e| OutputError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json::to_writer_pretty(BufWriter::new(file), report).map_err(|e| OutputError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;

    info!(path = %path.display(), run_id = %report.run_id, "Wrote run report");
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), OutputError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| OutputError::Io {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        _ => Ok(()),
    }
}

// ============================================================================
// TESTS
// ============================================================================
