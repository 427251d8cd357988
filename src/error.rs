//! Error types for the merge pipeline.
//!
//! Fatal conditions are errors. Recoverable data-quality problems are not:
//! they live in [`crate::anomaly`] and travel alongside successful results.

use std::path::PathBuf;
use thiserror::Error;

/// A source could not be turned into a table. Fatal for the run.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read source `{source_name}` from {}", path.display())]
    Unreadable {
        source_name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse line {line} of source `{source_name}` ({})", path.display())]
    Malformed {
        source_name: String,
        path: PathBuf,
        line: usize,
        #[source]
        source: csv::Error,
    },

    #[error("source `{source_name}` has no parseable header row ({})", path.display())]
    MissingHeader { source_name: String, path: PathBuf },

    #[error("source `{source_name}` has no column `{column}`")]
    MissingColumn { source_name: String, column: String },
}

/// The pipeline configuration is unusable.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// An aggregation request that can't be answered.
#[derive(Error, Debug, PartialEq)]
pub enum AggregateError {
    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("bucket count must be at least 1, got {0}")]
    InvalidBuckets(usize),

    #[error("thresholds must be strictly ascending")]
    InvalidThresholds,
}

/// Writing results failed.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error writing {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error writing {}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error writing {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Anything that stops a pipeline run before a unified table exists.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),
}
