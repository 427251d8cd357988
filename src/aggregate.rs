// 📊 Aggregator - grouped statistics over the unified table
//
// Groups always partition the table: a record with no grouping value lands in
// "(missing)". Empty groups are reported with a null mean, never dropped and
// never averaged as zero.

use crate::anomaly::AggregationWarning;
use crate::config::{AnalysisConfig, FieldMap, Subset};
use crate::error::AggregateError;
use crate::merge::{UnifiedRecord, UnifiedTable};
use crate::normalize::SchoolKey;
use crate::stats::{mean, pearson, quantile_sorted, sample_stddev};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const MISSING_GROUP: &str = "(missing)";

// ============================================================================
// GROUPING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grouping {
    /// One group per distinct rendered value
    Field { field: String },
    /// `buckets` equal-count buckets over a continuous field, `Q1..Qn`
    Quantiles { field: String, buckets: usize },
    /// Explicit ascending edges; `k` edges give `B1..B(k+1)`
    Thresholds { field: String, edges: Vec<f64> },
}

impl Grouping {
    pub fn field(field: impl Into<String>) -> Self {
        Grouping::Field {
            field: field.into(),
        }
    }

    pub fn quantiles(field: impl Into<String>, buckets: usize) -> Self {
        Grouping::Quantiles {
            field: field.into(),
            buckets,
        }
    }

    pub fn thresholds(field: impl Into<String>, edges: Vec<f64>) -> Self {
        Grouping::Thresholds {
            field: field.into(),
            edges,
        }
    }

    pub fn grouping_field(&self) -> &str {
        match self {
            Grouping::Field { field }
            | Grouping::Quantiles { field, .. }
            | Grouping::Thresholds { field, .. } => field,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub label: String,
    /// Non-null observations of the measured field
    pub count: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub field: String,
    pub grouping: Grouping,
    pub groups: Vec<GroupSummary>,
    /// Interior bucket boundaries for quantile and threshold groupings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_edges: Option<Vec<f64>>,
    pub warnings: Vec<AggregationWarning>,
}

impl AggregateResult {
    pub fn get(&self, label: &str) -> Option<&GroupSummary> {
        self.groups.iter().find(|g| g.label == label)
    }

    pub fn total_count(&self) -> usize {
        self.groups.iter().map(|g| g.count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub field: String,
    /// Pearson r; `None` with fewer than two pairs or no variance
    pub coefficient: Option<f64>,
    pub pairs: usize,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct Aggregator<'a> {
    table: &'a UnifiedTable,
}

impl<'a> Aggregator<'a> {
    pub fn new(table: &'a UnifiedTable) -> Self {
        Aggregator { table }
    }

    /// Mean, count and sample std-dev of `field` per group.
    pub fn aggregate(
        &self,
        field: &str,
        grouping: &Grouping,
    ) -> Result<AggregateResult, AggregateError> {
        self.require(field)?;
        self.require(grouping.grouping_field())?;

        let (labels, edges) = self.layout(grouping)?;

        let mut observations: BTreeMap<String, Vec<f64>> =
            labels.iter().map(|l| (l.clone(), Vec::new())).collect();
        let mut order = labels;

        for record in self.table.records() {
            let label = self.label_for(record, grouping, edges.as_deref());
            let bucket = observations.entry(label.clone()).or_insert_with(|| {
                order.push(label.clone());
                Vec::new()
            });
            if let Some(v) = self.table.number(record, field) {
                bucket.push(v);
            }
        }

        if let Grouping::Field { .. } = grouping {
            order.sort();
        }
        // (missing) always reported last
        if let Some(pos) = order.iter().position(|l| l == MISSING_GROUP) {
            let missing = order.remove(pos);
            order.push(missing);
        }

        let mut warnings = Vec::new();
        let groups = order
            .into_iter()
            .map(|label| {
                let values = observations.remove(&label).unwrap_or_default();
                if values.is_empty() {
                    debug!(field, group = %label, "Group has no observations");
                    warnings.push(AggregationWarning {
                        field: field.to_string(),
                        group: label.clone(),
                    });
                }
                GroupSummary {
                    count: values.len(),
                    mean: mean(&values),
                    std_dev: sample_stddev(&values),
                    label,
                }
            })
            .collect();

        Ok(AggregateResult {
            field: field.to_string(),
            grouping: grouping.clone(),
            groups,
            bucket_edges: edges,
            warnings,
        })
    }

    /// Pearson correlation of each field with `target`.
    pub fn correlate(
        &self,
        target: &str,
        fields: &[String],
    ) -> Result<Vec<Correlation>, AggregateError> {
        self.require(target)?;
        fields
            .iter()
            .map(|field| {
                self.require(field)?;
                let pairs: Vec<(f64, f64)> = self
                    .table
                    .records()
                    .iter()
                    .filter_map(|r| {
                        Some((self.table.number(r, target)?, self.table.number(r, field)?))
                    })
                    .collect();
                Ok(Correlation {
                    field: field.clone(),
                    coefficient: pearson(&pairs),
                    pairs: pairs.len(),
                })
            })
            .collect()
    }

    /// Columns holding at least one number, in table order.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.table
            .columns()
            .iter()
            .filter(|c| {
                self.table
                    .records()
                    .iter()
                    .any(|r| self.table.number(r, c).is_some())
            })
            .cloned()
            .collect()
    }

    /// Keys of the records meeting every condition. A null field never matches.
    pub fn select(&self, subset: &Subset) -> Result<Vec<SchoolKey>, AggregateError> {
        for condition in &subset.all {
            self.require(&condition.field)?;
        }
        let matched = self.table.filter(|record| {
            subset.all.iter().all(|c| {
                self.table
                    .number(record, &c.field)
                    .is_some_and(|v| c.op.holds(v, c.value))
            })
        });
        Ok(matched.into_iter().map(|r| r.key.clone()).collect())
    }

    fn require(&self, field: &str) -> Result<(), AggregateError> {
        if self.table.has_column(field) {
            Ok(())
        } else {
            Err(AggregateError::UnknownField(field.to_string()))
        }
    }

    /// Labels that must always appear, plus bucket edges when bucketing.
    fn layout(&self, grouping: &Grouping) -> Result<(Vec<String>, Option<Vec<f64>>), AggregateError> {
        match grouping {
            Grouping::Field { .. } => Ok((Vec::new(), None)),
            Grouping::Quantiles { field, buckets } => {
                if *buckets == 0 {
                    return Err(AggregateError::InvalidBuckets(*buckets));
                }
                let mut sorted: Vec<f64> = self
                    .table
                    .records()
                    .iter()
                    .filter_map(|r| self.table.number(r, field))
                    .collect();
                sorted.sort_by(f64::total_cmp);

                let edges = (1..*buckets)
                    .filter_map(|i| quantile_sorted(&sorted, i as f64 / *buckets as f64))
                    .collect();
                let labels = (1..=*buckets).map(|i| format!("Q{}", i)).collect();
                Ok((labels, Some(edges)))
            }
            Grouping::Thresholds { edges, .. } => {
                let ascending = edges.iter().all(|e| e.is_finite())
                    && edges.windows(2).all(|w| w[0] < w[1]);
                if !ascending {
                    return Err(AggregateError::InvalidThresholds);
                }
                let labels = (1..=edges.len() + 1).map(|i| format!("B{}", i)).collect();
                Ok((labels, Some(edges.clone())))
            }
        }
    }

    fn label_for(&self, record: &UnifiedRecord, grouping: &Grouping, edges: Option<&[f64]>) -> String {
        match grouping {
            Grouping::Field { field } => self
                .table
                .value(record, field)
                .and_then(|v| v.render())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| MISSING_GROUP.to_string()),
            Grouping::Quantiles { field, .. } | Grouping::Thresholds { field, .. } => {
                match self.table.number(record, field) {
                    Some(v) => bucket_label(grouping, bucket_index(v, edges.unwrap_or(&[]))),
                    None => MISSING_GROUP.to_string(),
                }
            }
        }
    }
}

/// Index of the bucket holding `value`. A value on an edge goes below it.
fn bucket_index(value: f64, edges: &[f64]) -> usize {
    edges.partition_point(|e| *e < value)
}

fn bucket_label(grouping: &Grouping, index: usize) -> String {
    match grouping {
        Grouping::Quantiles { .. } => format!("Q{}", index + 1),
        _ => format!("B{}", index + 1),
    }
}

// ============================================================================
// ANALYSIS SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictMeans {
    pub district: String,
    pub means: BTreeMap<String, Option<f64>>,
    pub counts: BTreeMap<String, usize>,
}

/// Schools picked out by a named subset query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetResult {
    pub name: String,
    pub count: usize,
    pub keys: Vec<SchoolKey>,
}

/// The questions asked of every run: what moves SAT scores, and where.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub target: String,
    /// Target against every numeric column of the unified table
    pub all_correlations: Vec<Correlation>,
    pub survey_correlations: Vec<Correlation>,
    pub race_correlations: Vec<Correlation>,
    pub gender_correlations: Vec<Correlation>,
    pub target_by_borough: Option<AggregateResult>,
    pub target_by_safety: Option<AggregateResult>,
    /// One result per district field, grouped by district
    pub by_district: Vec<AggregateResult>,
    pub subsets: Vec<SubsetResult>,
}

impl AnalysisSummary {
    /// Fields missing from the table are skipped with a warning.
    pub fn build(table: &UnifiedTable, analysis: &AnalysisConfig, fields: &FieldMap) -> Self {
        let aggregator = Aggregator::new(table);
        let target = analysis.target.as_str();

        let present = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .filter(|n| {
                    let found = table.has_column(n);
                    if !found {
                        warn!(field = %n, "Analysis field not in unified table, skipping");
                    }
                    found
                })
                .cloned()
                .collect()
        };

        let correlations = |names: &[String]| {
            aggregator
                .correlate(target, &present(names))
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Correlation skipped");
                    Vec::new()
                })
        };

        let aggregate = |field: &str, grouping: Grouping| match aggregator.aggregate(field, &grouping) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, field, "Aggregation skipped");
                None
            }
        };

        let numeric: Vec<String> = aggregator
            .numeric_columns()
            .into_iter()
            .filter(|c| c != target)
            .collect();

        let subsets = analysis
            .subsets
            .iter()
            .filter_map(|subset| match aggregator.select(subset) {
                Ok(keys) => Some(SubsetResult {
                    name: subset.name.clone(),
                    count: keys.len(),
                    keys,
                }),
                Err(e) => {
                    warn!(error = %e, subset = %subset.name, "Subset skipped");
                    None
                }
            })
            .collect();

        AnalysisSummary {
            target: target.to_string(),
            all_correlations: correlations(&numeric),
            survey_correlations: correlations(&analysis.survey_fields),
            race_correlations: correlations(&analysis.race_fields),
            gender_correlations: correlations(&analysis.gender_fields),
            target_by_borough: aggregate(target, Grouping::field(&fields.borough)),
            target_by_safety: aggregate(
                target,
                Grouping::quantiles(&analysis.safety_field, analysis.safety_buckets),
            ),
            by_district: present(&analysis.district_fields)
                .iter()
                .filter_map(|field| aggregate(field.as_str(), Grouping::field(&fields.district)))
                .collect(),
            subsets,
        }
    }

    /// Per-district rows for the map: one mean and count per district field.
    pub fn district_means(&self) -> Vec<DistrictMeans> {
        let mut rows: BTreeMap<&str, DistrictMeans> = BTreeMap::new();
        for result in &self.by_district {
            for group in &result.groups {
                let row = rows.entry(group.label.as_str()).or_insert_with(|| DistrictMeans {
                    district: group.label.clone(),
                    means: BTreeMap::new(),
                    counts: BTreeMap::new(),
                });
                row.means.insert(result.field.clone(), group.mean);
                row.counts.insert(result.field.clone(), group.count);
            }
        }
        rows.into_values().collect()
    }

    pub fn subset(&self, name: &str) -> Option<&SubsetResult> {
        self.subsets.iter().find(|s| s.name == name)
    }

    /// Empty-group warnings from every aggregation in the summary.
    pub fn warnings(&self) -> impl Iterator<Item = &AggregationWarning> {
        self.target_by_borough
            .iter()
            .chain(self.target_by_safety.iter())
            .chain(self.by_district.iter())
            .flat_map(|r| r.warnings.iter())
    }
}

// ============================================================================
// TESTS
// ============================================================================
