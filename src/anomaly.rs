// ⚠️ Anomaly Log - recoverable data-quality problems
// Nothing in here stops a run. Every entry is returned to the caller.

use crate::normalize::SchoolKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Warning, // Data was dropped or a choice was made for the analyst
    Info,    // Worth knowing, nothing was lost
}

// ============================================================================
// ANOMALY KINDS
// ============================================================================

/// Problems in a file that parsed but didn't fit its own header or encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadAnomaly {
    /// Row had more cells than the header; the extras were dropped.
    ExtraCells {
        source: String,
        line: usize,
        expected: usize,
        found: usize,
    },
    /// Cells replaced with U+FFFD because they weren't valid in `encoding`.
    UndecodableCells {
        source: String,
        path: PathBuf,
        encoding: String,
        cells: usize,
    },
}

/// Identifier problems found while deriving school keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationAnomaly {
    DuplicateKey {
        source: String,
        key: SchoolKey,
        count: usize,
        lines: Vec<usize>,
    },
    UnparseableIdentifier {
        source: String,
        line: usize,
        raw: Option<String>,
    },
}

/// Choices the merger had to make on the analyst's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeConflict {
    /// Same key more than once in one source; the first row was kept.
    DuplicateKey {
        source: String,
        key: SchoolKey,
        count: usize,
        kept_line: usize,
        discarded_lines: Vec<usize>,
    },
    /// Candidates disagreed and precedence didn't rank all of them.
    UnresolvedPrecedence {
        key: SchoolKey,
        column: String,
        candidates: Vec<String>,
        chosen: String,
    },
}

/// A group with nothing to average. Reported, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationWarning {
    pub field: String,
    pub group: String,
}

/// A value outside the range its attribute allows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub key: SchoolKey,
    pub severity: Severity,
    pub field: String,
    pub issue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Anomaly {
    Load(LoadAnomaly),
    Normalization(NormalizationAnomaly),
    Merge(MergeConflict),
    Aggregation(AggregationWarning),
    Quality(QualityIssue),
}

impl Anomaly {
    pub fn severity(&self) -> Severity {
        match self {
            Anomaly::Load(_) | Anomaly::Normalization(_) | Anomaly::Merge(_) => Severity::Warning,
            Anomaly::Aggregation(_) => Severity::Info,
            Anomaly::Quality(issue) => issue.severity,
        }
    }
}

// ============================================================================
// ANOMALY LOG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyLog {
    entries: Vec<Anomaly>,
}

impl AnomalyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, anomaly: impl Into<Anomaly>) {
        self.entries.push(anomaly.into());
    }

    pub fn extend<I, A>(&mut self, anomalies: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<Anomaly>,
    {
        self.entries.extend(anomalies.into_iter().map(Into::into));
    }

    pub fn entries(&self) -> &[Anomaly] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(&self) -> impl Iterator<Item = &LoadAnomaly> {
        self.entries.iter().filter_map(|a| match a {
            Anomaly::Load(l) => Some(l),
            _ => None,
        })
    }

    pub fn normalization(&self) -> impl Iterator<Item = &NormalizationAnomaly> {
        self.entries.iter().filter_map(|a| match a {
            Anomaly::Normalization(n) => Some(n),
            _ => None,
        })
    }

    pub fn merge_conflicts(&self) -> impl Iterator<Item = &MergeConflict> {
        self.entries.iter().filter_map(|a| match a {
            Anomaly::Merge(m) => Some(m),
            _ => None,
        })
    }

    pub fn quality_issues(&self) -> impl Iterator<Item = &QualityIssue> {
        self.entries.iter().filter_map(|a| match a {
            Anomaly::Quality(q) => Some(q),
            _ => None,
        })
    }

    pub fn summary(&self) -> String {
        let warnings = self
            .entries
            .iter()
            .filter(|a| a.severity() == Severity::Warning)
            .count();
        format!(
            "{} anomalies ({} warnings): {} load, {} normalization, {} merge, {} quality",
            self.entries.len(),
            warnings,
            self.load().count(),
            self.normalization().count(),
            self.merge_conflicts().count(),
            self.quality_issues().count()
        )
    }
}

impl From<LoadAnomaly> for Anomaly {
    fn from(a: LoadAnomaly) -> Self {
        Anomaly::Load(a)
    }
}

impl From<NormalizationAnomaly> for Anomaly {
    fn from(a: NormalizationAnomaly) -> Self {
        Anomaly::Normalization(a)
    }
}

impl From<MergeConflict> for Anomaly {
    fn from(a: MergeConflict) -> Self {
        Anomaly::Merge(a)
    }
}

impl From<AggregationWarning> for Anomaly {
    fn from(a: AggregationWarning) -> Self {
        Anomaly::Aggregation(a)
    }
}

impl From<QualityIssue> for Anomaly {
    fn from(a: QualityIssue) -> Self {
        Anomaly::Quality(a)
    }
}
