// 🔑 Key Normalizer - one canonical school key per row
//
// Sources spell the same DBN differently: "01M015", "01m015", "1M15",
// " 01-M-015 ", or split across CSD + SCHOOL CODE columns. Every spelling
// of the same school must land on the same key.

use crate::anomaly::NormalizationAnomaly;
use crate::table::{RawTable, Row};
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;

/// Column added to every normalized table.
pub const KEY_COLUMN: &str = "school_key";

// ============================================================================
// SCHOOL KEY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchoolKey(String);

impl SchoolKey {
    pub fn new(key: impl Into<String>) -> Self {
        SchoolKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First two characters: the community school district for a DBN.
    pub fn district(&self) -> Option<&str> {
        self.0.get(0..2)
    }
}

impl fmt::Display for SchoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// RULES
// ============================================================================

/// How a source spells its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum KeyRule {
    /// Trim, uppercase, drop non-alphanumerics
    Plain,
    /// District + borough letter + school number, re-padded to `DDBNNN`
    #[default]
    Dbn,
    /// DBN split over two columns: the identifier column holds the district
    DistrictSchoolCode { school_code_column: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierSpec {
    pub column: String,
    #[serde(flatten)]
    pub rule: KeyRule,
}

impl IdentifierSpec {
    pub fn new(column: impl Into<String>, rule: KeyRule) -> Self {
        IdentifierSpec {
            column: column.into(),
            rule,
        }
    }

    /// Every column the rule reads.
    pub fn columns(&self) -> Vec<String> {
        match &self.rule {
            KeyRule::DistrictSchoolCode { school_code_column } => {
                vec![self.column.clone(), school_code_column.clone()]
            }
            _ => vec![self.column.clone()],
        }
    }
}

fn dbn_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^0*(\d{1,2})([MXKQR])0*(\d{1,3})$").expect("DBN pattern is valid")
    })
}

/// Trim, uppercase, keep only ASCII letters and digits.
pub fn normalize_plain(raw: &str) -> Option<SchoolKey> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(SchoolKey(cleaned))
    }
}

/// Canonical `DDBNNN` form, or `None` if `raw` isn't a DBN.
///
/// ```
/// use nyc_school_data::normalize::normalize_dbn;
/// assert_eq!(normalize_dbn(" 1m15 ").unwrap().as_str(), "01M015");
/// ```
pub fn normalize_dbn(raw: &str) -> Option<SchoolKey> {
    let cleaned = normalize_plain(raw)?;
    let caps = dbn_pattern().captures(cleaned.as_str())?;

    let district: u32 = caps[1].parse().ok()?;
    let number: u32 = caps[3].parse().ok()?;

    Some(SchoolKey(format!("{:02}{}{:03}", district, &caps[2], number)))
}

/// Raw district cell to digits. Numbers may arrive as `1` or `1.0`.
fn district_digits(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Some(format!("{:.0}", n)),
        Value::Text(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Derive the key for one row. Also returns the raw text for anomaly reports.
fn key_for_row(table: &RawTable, row: &Row, spec: &IdentifierSpec) -> (Option<SchoolKey>, Option<String>) {
    let identifier = table.get(row, &spec.column).cloned().unwrap_or_default();

    match &spec.rule {
        KeyRule::Plain => {
            let raw = identifier.render();
            (raw.as_deref().and_then(normalize_plain), raw)
        }
        KeyRule::Dbn => {
            let raw = identifier.render();
            (raw.as_deref().and_then(normalize_dbn), raw)
        }
        KeyRule::DistrictSchoolCode { school_code_column } => {
            let code = table
                .get(row, school_code_column)
                .and_then(Value::render);
            match (district_digits(&identifier), code) {
                (Some(district), Some(code)) => {
                    let raw = format!("{}{}", district, code);
                    (normalize_dbn(&raw), Some(raw))
                }
                (district, code) => (None, district.or(code)),
            }
        }
    }
}

// ============================================================================
// TABLE NORMALIZATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct NormalizedTable {
    /// Input table plus a `school_key` column (`Null` where unparseable)
    pub table: RawTable,
    pub anomalies: Vec<NormalizationAnomaly>,
}

impl NormalizedTable {
    pub fn keys(&self) -> impl Iterator<Item = SchoolKey> + '_ {
        self.table.rows().iter().filter_map(|row| {
            self.table
                .get(row, KEY_COLUMN)
                .and_then(Value::as_text)
                .map(SchoolKey::new)
        })
    }
}

/// Add a `school_key` column to `table`.
///
/// Unparseable identifiers and duplicate keys are reported, not fatal.
/// Duplicates are left in place; the merger decides which row wins.
pub fn normalize_table(table: &RawTable, spec: &IdentifierSpec) -> NormalizedTable {
    let mut anomalies = Vec::new();
    let mut seen: HashMap<SchoolKey, Vec<usize>> = HashMap::new();
    let mut first_seen: Vec<SchoolKey> = Vec::new();

    let keyed = table.with_column(KEY_COLUMN, |t, row| {
        let (key, raw) = key_for_row(t, row, spec);
        match key {
            Some(key) => {
                let lines = seen.entry(key.clone()).or_default();
                if lines.is_empty() {
                    first_seen.push(key.clone());
                }
                lines.push(row.line);
                Value::Text(key.0)
            }
            None => {
                anomalies.push(NormalizationAnomaly::UnparseableIdentifier {
                    source: t.name.clone(),
                    line: row.line,
                    raw,
                });
                Value::Null
            }
        }
    });

    for key in first_seen {
        let lines = &seen[&key];
        if lines.len() > 1 {
            warn!(
                source = %table.name,
                key = %key,
                count = lines.len(),
                "Duplicate school key within source"
            );
            anomalies.push(NormalizationAnomaly::DuplicateKey {
                source: table.name.clone(),
                key: key.clone(),
                count: lines.len(),
                lines: lines.clone(),
            });
        }
    }

    let unparseable = anomalies
        .iter()
        .filter(|a| matches!(a, NormalizationAnomaly::UnparseableIdentifier { .. }))
        .count();
    if unparseable > 0 {
        warn!(source = %table.name, unparseable, "Rows without a usable school identifier");
    }

    NormalizedTable {
        table: keyed,
        anomalies,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbn_spellings_are_equivalent() {
        let spellings = ["01M015", "01m015", "1M15", " 01-M-015 ", "001M0015", "01 M 015"];
        for s in spellings {
            assert_eq!(
                normalize_dbn(s),
                Some(SchoolKey::new("01M015")),
                "spelling {:?}",
                s
            );
        }
    }

    #[test]
    fn test_dbn_is_idempotent() {
        for s in ["01M015", "1m15", "32k545", " 75x012", "9X543"] {
            let once = normalize_dbn(s).unwrap();
            let twice = normalize_dbn(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_plain_is_idempotent() {
        for s in ["x", " ab-12 ", "Y"] {
            let once = normalize_plain(s).unwrap();
            assert_eq!(normalize_plain(once.as_str()).unwrap(), once);
        }
    }

    #[test]
    fn test_dbn_rejects_garbage() {
        assert_eq!(normalize_dbn(""), None);
        assert_eq!(normalize_dbn("   "), None);
        assert_eq!(normalize_dbn("HENRY STREET"), None);
        assert_eq!(normalize_dbn("01Z015"), None);
    }

    #[test]
    fn test_identifier_spec_reads_flat_rule() {
        let spec: IdentifierSpec = serde_json::from_str(
            r#"{"column": "CSD", "rule": "district_school_code", "school_code_column": "SCHOOL CODE"}"#,
        )
        .unwrap();
        assert_eq!(spec.columns(), vec!["CSD".to_string(), "SCHOOL CODE".to_string()]);

        let plain: IdentifierSpec = serde_json::from_str(r#"{"column": "dbn", "rule": "dbn"}"#).unwrap();
        assert_eq!(plain.rule, KeyRule::Dbn);
    }

    #[test]
    fn test_district_of_key() {
        assert_eq!(SchoolKey::new("01M015").district(), Some("01"));
    }

    #[test]
    fn test_district_school_code_builds_dbn() {
        let mut table = RawTable::new(
            "class_size",
            vec!["CSD".to_string(), "SCHOOL CODE".to_string()],
        );
        table.push_row(2, vec![Value::Number(1.0), Value::from("M015")]);
        table.push_row(3, vec![Value::Number(17.0), Value::from("K548")]);
        table.push_row(4, vec![Value::Null, Value::from("K548")]);

        let spec = IdentifierSpec::new(
            "CSD",
            KeyRule::DistrictSchoolCode {
                school_code_column: "SCHOOL CODE".to_string(),
            },
        );
        let normalized = normalize_table(&table, &spec);

        let keys: Vec<SchoolKey> = normalized.keys().collect();
        assert_eq!(keys, vec![SchoolKey::new("01M015"), SchoolKey::new("17K548")]);
        assert_eq!(normalized.anomalies.len(), 1);
        assert!(matches!(
            normalized.anomalies[0],
            NormalizationAnomaly::UnparseableIdentifier { line: 4, .. }
        ));
    }

    #[test]
    fn test_duplicates_reported_but_kept() {
        let mut table = RawTable::new("sat_results", vec!["DBN".to_string()]);
        table.push_row(2, vec![Value::from("01M292")]);
        table.push_row(3, vec![Value::from("01m292")]);
        table.push_row(4, vec![Value::from("02M047")]);

        let normalized = normalize_table(&table, &IdentifierSpec::new("DBN", KeyRule::Dbn));

        assert_eq!(normalized.table.len(), 3);
        assert_eq!(normalized.anomalies.len(), 1);
        match &normalized.anomalies[0] {
            NormalizationAnomaly::DuplicateKey { key, count, lines, .. } => {
                assert_eq!(key.as_str(), "01M292");
                assert_eq!(*count, 2);
                assert_eq!(lines, &vec![2, 3]);
            }
            other => panic!("unexpected anomaly {:?}", other),
        }
    }

    #[test]
    fn test_normalizing_normalized_table_is_stable() {
        let mut table = RawTable::new("survey", vec!["dbn".to_string()]);
        table.push_row(2, vec![Value::from("01m015")]);

        let spec = IdentifierSpec::new("dbn", KeyRule::Dbn);
        let once = normalize_table(&table, &spec);
        let again = normalize_table(
            &once.table,
            &IdentifierSpec::new(KEY_COLUMN, KeyRule::Dbn),
        );

        let k1: Vec<SchoolKey> = once.keys().collect();
        let k2: Vec<SchoolKey> = again.keys().collect();
        assert_eq!(k1, k2);
    }
}
