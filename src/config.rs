// ⚙️ Pipeline Configuration - sources as data
//
// Each source says where it lives, how its identifier is spelled, how to
// clean it, and how it ranks against the others. Loader, normalizer and
// merger all read the same description; no source gets hand-written code.

use crate::error::ConfigError;
use crate::merge::{ColumnGroup, MergePlan};
use crate::normalize::IdentifierSpec;
use crate::prepare::{Condense, Preparation};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Built-in configuration for the NYC school datasets.
const NYC_DEFAULT: &str = include_str!("../config/nyc_schools.json");

// ============================================================================
// SOURCE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Relative to `data_dir` unless absolute
    pub path: PathBuf,
    /// More files with the same role, stacked under `path`
    #[serde(default)]
    pub extra_files: Vec<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// WHATWG encoding label, e.g. `windows-1252`
    #[serde(default = "default_encoding")]
    pub encoding: String,
    pub identifier: IdentifierSpec,
    #[serde(flatten)]
    pub prepare: Preparation,
    #[serde(default)]
    pub condense: Option<Condense>,
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, identifier: IdentifierSpec) -> Self {
        SourceConfig {
            name: name.into(),
            path: path.into(),
            extra_files: Vec::new(),
            delimiter: default_delimiter(),
            encoding: default_encoding(),
            identifier,
            prepare: Preparation::default(),
            condense: None,
        }
    }

    pub fn delimiter_byte(&self) -> Result<u8, ConfigError> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "source `{}`: delimiter {:?} is not a single ASCII character",
                    self.name, self.delimiter
                ))
            })
    }

    pub fn text_encoding(&self) -> Result<&'static Encoding, ConfigError> {
        Encoding::for_label(self.encoding.as_bytes()).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "source `{}`: unknown encoding `{}`",
                self.name, self.encoding
            ))
        })
    }
}

// ============================================================================
// FIELD MAP
// ============================================================================

/// Unified columns behind each typed school attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    pub name: String,
    pub borough: String,
    pub district: String,
    pub sat_reading: String,
    pub sat_math: String,
    pub sat_writing: String,
    pub sat_total: String,
    /// Category label → percentage column
    #[serde(default)]
    pub demographics: BTreeMap<String, String>,
    /// Respondent group → safety score column
    #[serde(default)]
    pub safety: BTreeMap<String, String>,
    pub graduation_rate: String,
    pub latitude: String,
    pub longitude: String,
}

// ============================================================================
// ANALYSIS CONFIG
// ============================================================================

/// Which relationships the run summary looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Field everything is compared against, normally the SAT total
    pub target: String,
    #[serde(default)]
    pub survey_fields: Vec<String>,
    #[serde(default)]
    pub race_fields: Vec<String>,
    #[serde(default)]
    pub gender_fields: Vec<String>,
    /// Continuous field bucketed into quantiles
    pub safety_field: String,
    #[serde(default = "default_buckets")]
    pub safety_buckets: usize,
    /// Fields averaged per district for the safety map
    #[serde(default)]
    pub district_fields: Vec<String>,
    #[serde(default)]
    pub subsets: Vec<Subset>,
}

fn default_buckets() -> usize {
    4
}

/// A named slice of schools, e.g. majority-Hispanic schools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subset {
    pub name: String,
    /// Every condition must hold
    pub all: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
        }
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub output: PathBuf,
    pub report: PathBuf,
    pub key_column: String,
    #[serde(default)]
    pub district_column: Option<String>,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub precedence: Vec<String>,
    #[serde(default)]
    pub column_groups: Vec<ColumnGroup>,
    pub fields: FieldMap,
    pub analysis: AnalysisConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

impl PipelineConfig {
    /// The shipped NYC configuration.
    pub fn nyc_default() -> Result<Self, ConfigError> {
        Self::from_json(NYC_DEFAULT)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that can't produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no sources configured".to_string()));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name `{}`",
                    source.name
                )));
            }
            source.delimiter_byte()?;
            source.text_encoding()?;
        }

        for name in &self.precedence {
            if !names.contains(name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "precedence names unknown source `{}`",
                    name
                )));
            }
        }

        for group in &self.column_groups {
            for candidate in &group.candidates {
                if !names.contains(candidate.source.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "column group `{}` names unknown source `{}`",
                        group.output, candidate.source
                    )));
                }
            }
        }

        for subset in &self.analysis.subsets {
            if subset.all.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "subset `{}` has no conditions",
                    subset.name
                )));
            }
        }

        if self.analysis.safety_buckets == 0 {
            return Err(ConfigError::Invalid(
                "analysis.safety_buckets must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve a source-relative path against `data_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn merge_plan(&self) -> MergePlan {
        MergePlan {
            key_column: self.key_column.clone(),
            precedence: self.precedence.clone(),
            groups: self.column_groups.clone(),
            district_column: self.district_column.clone(),
        }
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

// ============================================================================
// TESTS
// ============================================================================
