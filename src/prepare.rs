// 🧹 Source Preparation - declarative per-source cleanup
//
// Everything the notebook did by hand per file (pick a cohort, keep GEN ED
// rows, pull coordinates out of an address blob, average class sizes per
// school) expressed as data and applied the same way to every source.

use crate::error::LoadError;
use crate::normalize::KEY_COLUMN;
use crate::table::{RawTable, Row};
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// RULE TYPES
// ============================================================================

/// Keep rows where `column` renders exactly as `equals` (after trimming).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub equals: String,
}

impl RowFilter {
    pub fn new(column: impl Into<String>, equals: impl Into<String>) -> Self {
        RowFilter {
            column: column.into(),
            equals: equals.into(),
        }
    }

    fn matches(&self, table: &RawTable, row: &Row) -> bool {
        table
            .get(row, &self.column)
            .and_then(Value::render)
            .map(|v| v.trim() == self.equals.trim())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    /// `output = sum(inputs)`; missing or non-numeric input gives `Null`
    Sum { output: String, inputs: Vec<String> },
    /// Pull `(lat, lon)` out of free text like `"... (40.67, -73.96)"`
    Coordinates {
        input: String,
        lat_output: String,
        lon_output: String,
    },
    /// Strip `%`, `$` and thousands separators, then parse; in place if `output` is omitted
    Numeric {
        input: String,
        #[serde(default)]
        output: Option<String>,
    },
}

impl Derivation {
    fn inputs(&self) -> Vec<&str> {
        match self {
            Derivation::Sum { inputs, .. } => inputs.iter().map(String::as_str).collect(),
            Derivation::Coordinates { input, .. } | Derivation::Numeric { input, .. } => {
                vec![input.as_str()]
            }
        }
    }

    fn apply(&self, table: &RawTable) -> RawTable {
        match self {
            Derivation::Sum { output, inputs } => table.with_column(output, |t, row| {
                let mut total = 0.0;
                for input in inputs {
                    match t.get(row, input).and_then(Value::as_f64) {
                        Some(n) => total += n,
                        None => return Value::Null,
                    }
                }
                Value::Number(total)
            }),
            Derivation::Coordinates {
                input,
                lat_output,
                lon_output,
            } => {
                let with_lat = table.with_column(lat_output, |t, row| {
                    Value::from(extract_coordinates(t.get(row, input)).map(|(lat, _)| lat))
                });
                with_lat.with_column(lon_output, |t, row| {
                    Value::from(extract_coordinates(t.get(row, input)).map(|(_, lon)| lon))
                })
            }
            Derivation::Numeric { input, output } => {
                let target = output.as_deref().unwrap_or(input.as_str());
                table.with_column(target, |t, row| parse_formatted(t.get(row, input)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condense {
    /// One row per key: numeric columns averaged, text columns dropped
    MeanByKey,
}

/// Preparation steps for one source, in the order they run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preparation {
    #[serde(default)]
    pub filters: Vec<RowFilter>,
    #[serde(default)]
    pub derive: Vec<Derivation>,
    /// Columns to keep besides identifier columns; `None` keeps everything
    #[serde(default)]
    pub select: Option<Vec<String>>,
}

// ============================================================================
// COORDINATES
// ============================================================================

fn coordinate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\(\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)\s*\)")
            .expect("coordinate pattern is valid")
    })
}

/// `(lat, lon)` from the last parenthesised pair in a location string.
pub fn extract_coordinates(value: Option<&Value>) -> Option<(f64, f64)> {
    let text = value?.as_text()?;
    let caps = coordinate_pattern().captures_iter(text).last()?;
    let lat = caps[1].parse().ok()?;
    let lon = caps[2].parse().ok()?;
    Some((lat, lon))
}

/// `"78.9%"` → 78.9, `"1,024"` → 1024. Anything else unparseable becomes `Null`.
fn parse_formatted(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Number(n)) => Value::Number(*n),
        Some(Value::Text(s)) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '%' | '$' | ','))
                .collect();
            Value::from(cleaned.trim().parse::<f64>().ok().filter(|n| n.is_finite()))
        }
        _ => Value::Null,
    }
}

// ============================================================================
// APPLY
// ============================================================================

/// Run filters, derivations and selection over a freshly loaded table.
///
/// `keep` lists columns that must survive selection (the identifier columns).
pub fn prepare_table(
    table: &RawTable,
    prep: &Preparation,
    keep: &[String],
) -> Result<RawTable, LoadError> {
    let missing = |column: &str| LoadError::MissingColumn {
        source_name: table.name.clone(),
        column: column.to_string(),
    };

    for column in keep {
        if !table.has_column(column) {
            return Err(missing(column));
        }
    }

    for filter in &prep.filters {
        if !table.has_column(&filter.column) {
            return Err(missing(&filter.column));
        }
    }

    let mut current = table.filter_rows(|t, row| prep.filters.iter().all(|f| f.matches(t, row)));

    for derivation in &prep.derive {
        for input in derivation.inputs() {
            if !current.has_column(input) {
                return Err(missing(input));
            }
        }
        current = derivation.apply(&current);
    }

    if let Some(select) = &prep.select {
        let mut columns: Vec<String> = keep.to_vec();
        for column in select {
            if !current.has_column(column) {
                return Err(missing(column));
            }
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        current = current.select(&columns);
    }

    Ok(current)
}

/// Collapse rows sharing a school key into one, like a grouped mean.
///
/// Rows without a key are dropped. Key order follows first appearance.
/// A column is kept only if every non-null cell in it is a number.
pub fn condense_by_key(table: &RawTable) -> RawTable {
    let Some(key_idx) = table.column_index(KEY_COLUMN) else {
        return table.clone();
    };

    let numeric: Vec<usize> = (0..table.columns().len())
        .filter(|&i| i != key_idx)
        .filter(|&i| {
            table
                .rows()
                .iter()
                .all(|row| matches!(row.values[i], Value::Null | Value::Number(_)))
        })
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in table.rows() {
        if let Some(key) = row.values[key_idx].as_text() {
            let group = groups.entry(key.to_string()).or_default();
            if group.is_empty() {
                order.push(key.to_string());
            }
            group.push(row);
        }
    }

    let mut columns = vec![KEY_COLUMN.to_string()];
    columns.extend(numeric.iter().map(|&i| table.columns()[i].clone()));

    let rows = order
        .iter()
        .map(|key| {
            let members = &groups[key];
            let mut values = vec![Value::Text(key.clone())];
            for &i in &numeric {
                let observed: Vec<f64> = members
                    .iter()
                    .filter_map(|row| row.values[i].as_f64())
                    .collect();
                values.push(Value::from(crate::stats::mean(&observed)));
            }
            Row {
                line: members[0].line,
                values,
            }
        })
        .collect();

    RawTable::from_parts(table.name.clone(), columns, rows)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_sat_table() -> RawTable {
        let mut table = RawTable::new(
            "sat_results",
            vec![
                "DBN".to_string(),
                "SAT Critical Reading Avg. Score".to_string(),
                "SAT Math Avg. Score".to_string(),
                "SAT Writing Avg. Score".to_string(),
            ],
        );
        table.push_row(
            2,
            vec![Value::from("01M292"), 355.0.into(), 404.0.into(), 363.0.into()],
        );
        table.push_row(
            3,
            vec![Value::from("01M448"), "s".into(), "s".into(), "s".into()],
        );
        table
    }

    #[test]
    fn test_sum_derivation_propagates_missing() {
        let prep = Preparation {
            derive: vec![Derivation::Sum {
                output: "sat_score".to_string(),
                inputs: vec![
                    "SAT Critical Reading Avg. Score".to_string(),
                    "SAT Math Avg. Score".to_string(),
                    "SAT Writing Avg. Score".to_string(),
                ],
            }],
            ..Default::default()
        };

        let prepared = prepare_table(&create_test_sat_table(), &prep, &["DBN".to_string()]).unwrap();
        let rows = prepared.rows();
        assert_eq!(prepared.get(&rows[0], "sat_score"), Some(&Value::Number(1122.0)));
        assert_eq!(prepared.get(&rows[1], "sat_score"), Some(&Value::Null));
    }

    #[test]
    fn test_filters_compare_rendered_values() {
        let mut table = RawTable::new(
            "graduation",
            vec!["DBN".to_string(), "Cohort".to_string(), "Demographic".to_string()],
        );
        table.push_row(2, vec!["01M292".into(), 2006.0.into(), "Total Cohort".into()]);
        table.push_row(3, vec!["01M292".into(), "2006 Aug".into(), "Total Cohort".into()]);
        table.push_row(4, vec!["01M292".into(), 2006.0.into(), "Male".into()]);

        let prep = Preparation {
            filters: vec![
                RowFilter::new("Cohort", "2006"),
                RowFilter::new("Demographic", "Total Cohort"),
            ],
            ..Default::default()
        };

        let prepared = prepare_table(&table, &prep, &["DBN".to_string()]).unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared.rows()[0].line, 2);
    }

    #[test]
    fn test_select_keeps_identifiers_and_rejects_unknown() {
        let table = create_test_sat_table();
        let prep = Preparation {
            select: Some(vec!["SAT Math Avg. Score".to_string()]),
            ..Default::default()
        };
        let prepared = prepare_table(&table, &prep, &["DBN".to_string()]).unwrap();
        assert_eq!(prepared.columns(), &["DBN", "SAT Math Avg. Score"]);

        let bad = Preparation {
            select: Some(vec!["saf_s_11".to_string()]),
            ..Default::default()
        };
        let err = prepare_table(&table, &bad, &["DBN".to_string()]).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn { ref column, .. } if column == "saf_s_11"));
    }

    #[test]
    fn test_numeric_derivation_in_place() {
        let mut table = RawTable::new(
            "graduation",
            vec!["DBN".to_string(), "Total Grads - % of cohort".to_string()],
        );
        table.push_row(2, vec!["01M292".into(), "78.9%".into()]);
        table.push_row(3, vec!["01M448".into(), "s".into()]);
        table.push_row(4, vec!["01M450".into(), 64.0.into()]);

        let prep = Preparation {
            derive: vec![Derivation::Numeric {
                input: "Total Grads - % of cohort".to_string(),
                output: None,
            }],
            ..Default::default()
        };
        let prepared = prepare_table(&table, &prep, &["DBN".to_string()]).unwrap();
        let column = "Total Grads - % of cohort";
        let rows = prepared.rows();

        assert_eq!(prepared.columns().len(), 2);
        assert_eq!(prepared.get(&rows[0], column), Some(&Value::Number(78.9)));
        assert_eq!(prepared.get(&rows[1], column), Some(&Value::Null));
        assert_eq!(prepared.get(&rows[2], column), Some(&Value::Number(64.0)));
    }

    #[test]
    fn test_extract_coordinates() {
        let location = Value::from("883 Classon Avenue\nBrooklyn, NY 11225\n(40.67029890700047, -73.96164787599963)");
        let (lat, lon) = extract_coordinates(Some(&location)).unwrap();
        assert!((lat - 40.670298907).abs() < 1e-6);
        assert!((lon + 73.961647876).abs() < 1e-6);

        assert_eq!(extract_coordinates(Some(&Value::from("no coordinates"))), None);
        assert_eq!(extract_coordinates(Some(&Value::Null)), None);
    }

    #[test]
    fn test_condense_means_numeric_and_drops_text() {
        let mut table = RawTable::new(
            "class_size",
            vec![
                KEY_COLUMN.to_string(),
                "AVERAGE CLASS SIZE".to_string(),
                "CORE SUBJECT".to_string(),
            ],
        );
        table.push_row(2, vec!["01M292".into(), 20.0.into(), "ENGLISH".into()]);
        table.push_row(3, vec!["01M292".into(), 30.0.into(), "MATH".into()]);
        table.push_row(4, vec!["01M448".into(), Value::Null, "ENGLISH".into()]);

        let condensed = condense_by_key(&table);

        assert_eq!(condensed.columns(), &[KEY_COLUMN, "AVERAGE CLASS SIZE"]);
        assert_eq!(condensed.len(), 2);
        assert_eq!(condensed.rows()[0].values[1], Value::Number(25.0));
        // no observations stays missing, not zero
        assert_eq!(condensed.rows()[1].values[1], Value::Null);
    }
}
