// 🚰 Pipeline - load → prepare → normalize → condense → merge → check → summarise
//
// Each stage is a plain function over the previous stage's output. The only
// fatal failures are config and load errors; everything else is an anomaly.

use crate::aggregate::AnalysisSummary;
use crate::anomaly::{AnomalyLog, LoadAnomaly, NormalizationAnomaly};
use crate::config::{PipelineConfig, SourceConfig};
use crate::error::{LoadError, PipelineError};
use crate::loader::DelimitedLoader;
use crate::merge::{merge_sources, MergeInput, UnifiedTable};
use crate::normalize::{normalize_table, KEY_COLUMN};
use crate::prepare::{condense_by_key, prepare_table, Condense};
use crate::quality::{BatchSummary, QualityEngine};
use crate::record::profiles;
use crate::table::RawTable;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

// ============================================================================
// OUTPUT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub sha256: String,
    pub rows: usize,
    pub decode_errors: usize,
}

/// What happened to one source on its way into the unified table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub name: String,
    pub files: Vec<SourceFile>,
    pub rows_loaded: usize,
    pub rows_prepared: usize,
    pub distinct_keys: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub table: UnifiedTable,
    pub anomalies: AnomalyLog,
    pub quality: BatchSummary,
    pub sources: Vec<SourceStats>,
    pub analysis: AnalysisSummary,
}

// ============================================================================
// STAGES
// ============================================================================

/// A source's files read and stacked into one table.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub name: String,
    pub table: RawTable,
    pub files: Vec<SourceFile>,
    pub anomalies: Vec<LoadAnomaly>,
}

/// Read every file of one source. Extra files are stacked under the first.
pub fn load_source(config: &PipelineConfig, source: &SourceConfig) -> Result<LoadedSource, PipelineError> {
    let loader = DelimitedLoader::new(source.delimiter_byte()?).with_encoding(source.text_encoding()?);

    let mut table: Option<RawTable> = None;
    let mut files = Vec::new();
    let mut anomalies = Vec::new();
    for relative in std::iter::once(&source.path).chain(&source.extra_files) {
        let path = config.resolve(relative);
        let loaded = loader.load(&source.name, &path)?;
        files.push(SourceFile {
            path,
            sha256: loaded.sha256,
            rows: loaded.table.len(),
            decode_errors: loaded.decode_errors,
        });
        anomalies.extend(loaded.anomalies);
        table = Some(match table {
            Some(existing) => existing.stack(&loaded.table),
            None => loaded.table,
        });
    }

    let table = table.unwrap_or_else(|| RawTable::new(source.name.clone(), Vec::new()));
    info!(source = %source.name, rows = table.len(), files = files.len(), "Loaded source");

    Ok(LoadedSource {
        name: source.name.clone(),
        table,
        files,
        anomalies,
    })
}

/// Prepare, key and (optionally) condense one loaded source.
fn shape_source(
    source: &SourceConfig,
    loaded: &LoadedSource,
    anomalies: &mut AnomalyLog,
) -> Result<(MergeInput, SourceStats), LoadError> {
    let identifier_columns = source.identifier.columns();
    let prepared = prepare_table(&loaded.table, &source.prepare, &identifier_columns)?;
    let normalized = normalize_table(&prepared, &source.identifier);

    // Condensed sources carry one row per class section; repeats are expected
    let condensing = source.condense.is_some();
    for anomaly in normalized.anomalies.iter().cloned() {
        if condensing && matches!(anomaly, NormalizationAnomaly::DuplicateKey { .. }) {
            continue;
        }
        anomalies.push(anomaly);
    }

    let distinct_keys = normalized.keys().collect::<HashSet<_>>().len();
    let table = match source.condense {
        Some(Condense::MeanByKey) => condense_by_key(&normalized.table),
        None => normalized.table,
    };

    debug!(
        source = %source.name,
        prepared = prepared.len(),
        keys = distinct_keys,
        "Shaped source"
    );

    let stats = SourceStats {
        name: source.name.clone(),
        files: loaded.files.clone(),
        rows_loaded: loaded.table.len(),
        rows_prepared: prepared.len(),
        distinct_keys,
    };
    let input = MergeInput::new(source.name.clone(), table, KEY_COLUMN)
        .with_identifier_columns(identifier_columns);

    Ok((input, stats))
}

// ============================================================================
// RUN
// ============================================================================

/// Run every stage. Nothing is written to disk here.
#[tracing::instrument(skip_all, fields(sources = config.sources.len()))]
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    config.validate()?;

    // All sources load before any work starts: a bad file means no output
    let loaded = config
        .sources
        .iter()
        .map(|source| load_source(config, source))
        .collect::<Result<Vec<_>, _>>()?;

    let mut anomalies = AnomalyLog::new();
    let mut inputs = Vec::with_capacity(loaded.len());
    let mut sources = Vec::with_capacity(loaded.len());
    for (source, loaded) in config.sources.iter().zip(&loaded) {
        anomalies.extend(loaded.anomalies.iter().cloned());
        let (input, stats) = shape_source(source, loaded, &mut anomalies)?;
        inputs.push(input);
        sources.push(stats);
    }

    let merged = merge_sources(&inputs, &config.merge_plan());
    anomalies.extend(merged.conflicts);
    let table = merged.table;

    let engine = QualityEngine::new();
    let reports = engine.validate_batch(&profiles(&table, &config.fields));
    let quality = engine.batch_summary(&reports);
    anomalies.extend(reports.into_iter().flat_map(|r| r.issues));
    info!("{}", quality.summary());

    let analysis = AnalysisSummary::build(&table, &config.analysis, &config.fields);
    anomalies.extend(analysis.warnings().cloned());

    info!(
        schools = table.len(),
        columns = table.columns().len(),
        anomalies = anomalies.len(),
        "Pipeline complete"
    );

    Ok(PipelineOutput {
        table,
        anomalies,
        quality,
        sources,
        analysis,
    })
}

// ============================================================================
// TESTS
// ============================================================================
