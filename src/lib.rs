// NYC School Data - Core Library
// Loads the school datasets, keys them by DBN, merges them into one table
// and aggregates it. Used by the CLI and the integration tests.

pub mod value;
pub mod table;
pub mod error;
pub mod anomaly;
pub mod loader;     // Delimited files → RawTable
pub mod prepare;    // Per-source filters, derived columns, condensing
pub mod normalize;  // School keys
pub mod merge;      // Full outer join on the key
pub mod stats;
pub mod record;     // Typed school profile
pub mod quality;    // Range checks
pub mod aggregate;  // Grouped statistics + analysis summary
pub mod config;
pub mod pipeline;
pub mod output;

// Re-export commonly used types
pub use value::Value;
pub use table::{RawTable, Row};
pub use error::{AggregateError, ConfigError, LoadError, OutputError, PipelineError};
pub use anomaly::{
    AggregationWarning, Anomaly, AnomalyLog, LoadAnomaly, MergeConflict,
    NormalizationAnomaly, QualityIssue, Severity,
};
pub use loader::{DelimitedLoader, LoadedTable};
pub use prepare::{Condense, Derivation, Preparation, RowFilter};
pub use normalize::{
    normalize_dbn, normalize_plain, normalize_table, IdentifierSpec, KeyRule,
    NormalizedTable, SchoolKey, KEY_COLUMN,
};
pub use merge::{
    merge_sources, ColumnGroup, ColumnRef, MergeInput, MergeOutcome, MergePlan,
    UnifiedRecord, UnifiedTable,
};
pub use record::{Coordinates, SatScore, SatScores, SchoolProfile, NYC_BOUNDS};
pub use quality::{BatchSummary, QualityEngine, QualityReport};
pub use aggregate::{
    AggregateResult, Aggregator, AnalysisSummary, Correlation, DistrictMeans, GroupSummary,
    Grouping, SubsetResult, MISSING_GROUP,
};
pub use config::{
    AnalysisConfig, Comparison, Condition, FieldMap, PipelineConfig, SourceConfig, Subset,
};
pub use pipeline::{run_pipeline, PipelineOutput, SourceStats};
pub use output::{write_report, write_unified_csv, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
