// 🔗 Multi-Source Merger - full outer join on the school key
//
// Rules:
//   - every key from every source appears exactly once
//   - each output column has an ordered list of candidate (source, column)
//     cells; the first non-null one in precedence order wins
//   - duplicate keys within a source: first row wins, the rest are reported
//   - missing stays missing (Null), never zero

use crate::anomaly::MergeConflict;
use crate::normalize::SchoolKey;
use crate::table::RawTable;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

// ============================================================================
// INPUTS & PLAN
// ============================================================================

/// One normalized source ready to join.
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub source: String,
    pub table: RawTable,
    /// Column holding the normalized key
    pub key_column: String,
    /// Raw identifier columns; consumed by the key, not copied to the output
    pub identifier_columns: Vec<String>,
}

impl MergeInput {
    pub fn new(source: impl Into<String>, table: RawTable, key_column: impl Into<String>) -> Self {
        MergeInput {
            source: source.into(),
            table,
            key_column: key_column.into(),
            identifier_columns: Vec::new(),
        }
    }

    pub fn with_identifier_columns(mut self, columns: Vec<String>) -> Self {
        self.identifier_columns = columns;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub source: String,
    pub column: String,
}

/// Differently named columns that mean the same thing, e.g. the school name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGroup {
    pub output: String,
    pub candidates: Vec<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    /// Name of the key column in the unified table
    pub key_column: String,
    /// Source names, highest precedence first
    #[serde(default)]
    pub precedence: Vec<String>,
    #[serde(default)]
    pub groups: Vec<ColumnGroup>,
    /// Derived column holding the key's district prefix; `None` to skip
    #[serde(default)]
    pub district_column: Option<String>,
}

impl MergePlan {
    pub fn new(key_column: impl Into<String>) -> Self {
        MergePlan {
            key_column: key_column.into(),
            precedence: Vec::new(),
            groups: Vec::new(),
            district_column: None,
        }
    }

    fn rank(&self, source: &str) -> Option<usize> {
        self.precedence.iter().position(|s| s == source)
    }
}

// ============================================================================
// UNIFIED TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    pub key: SchoolKey,
    /// One value per unified column, key column included
    pub values: Vec<Value>,
    /// Sources that had a row for this school
    pub sources: Vec<String>,
}

/// One row per school, sorted by key. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTable {
    columns: Vec<String>,
    records: Vec<UnifiedRecord>,
}

impl UnifiedTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[UnifiedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn get(&self, key: &SchoolKey) -> Option<&UnifiedRecord> {
        self.records
            .binary_search_by(|r| r.key.cmp(key))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn value<'a>(&self, record: &'a UnifiedRecord, column: &str) -> Option<&'a Value> {
        self.column_index(column).and_then(|i| record.values.get(i))
    }

    pub fn number(&self, record: &UnifiedRecord, column: &str) -> Option<f64> {
        self.value(record, column).and_then(Value::as_f64)
    }

    /// Records matching a predicate, e.g. schools above 95% Hispanic enrollment.
    pub fn filter<F>(&self, mut keep: F) -> Vec<&UnifiedRecord>
    where
        F: FnMut(&UnifiedRecord) -> bool,
    {
        self.records.iter().filter(|r| keep(r)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub table: UnifiedTable,
    pub conflicts: Vec<MergeConflict>,
}

// ============================================================================
// MERGE
// ============================================================================

struct Candidate {
    input: usize,
    column: usize,
}

struct OutputColumn {
    name: String,
    candidates: Vec<Candidate>,
}

/// Outer-join all inputs on their key column.
#[tracing::instrument(skip_all, fields(sources = inputs.len()))]
pub fn merge_sources(inputs: &[MergeInput], plan: &MergePlan) -> MergeOutcome {
    let mut conflicts = Vec::new();

    // Per source: key → first row index
    let mut first_rows: Vec<HashMap<SchoolKey, usize>> = Vec::with_capacity(inputs.len());
    let mut all_keys: BTreeSet<SchoolKey> = BTreeSet::new();

    for input in inputs {
        let (index, duplicates) = index_rows(input);
        conflicts.extend(duplicates);
        all_keys.extend(index.keys().cloned());
        first_rows.push(index);
    }

    let layout = plan_columns(inputs, plan);

    let mut columns = vec![plan.key_column.clone()];
    columns.extend(layout.iter().map(|c| c.name.clone()));
    if let Some(district) = &plan.district_column {
        columns.push(district.clone());
    }

    let mut records = Vec::with_capacity(all_keys.len());
    for key in all_keys {
        let mut values = Vec::with_capacity(columns.len());
        values.push(Value::Text(key.to_string()));

        for output in &layout {
            let (value, conflict) = resolve(&key, output, inputs, &first_rows, plan);
            if let Some(c) = conflict {
                conflicts.push(c);
            }
            values.push(value);
        }

        if plan.district_column.is_some() {
            values.push(
                key.district()
                    .map(|d| Value::Text(d.to_string()))
                    .unwrap_or(Value::Null),
            );
        }

        let sources = inputs
            .iter()
            .zip(&first_rows)
            .filter(|(_, index)| index.contains_key(&key))
            .map(|(input, _)| input.source.clone())
            .collect();

        records.push(UnifiedRecord {
            key,
            values,
            sources,
        });
    }

    info!(
        schools = records.len(),
        columns = columns.len(),
        conflicts = conflicts.len(),
        "Merged sources"
    );

    MergeOutcome {
        table: UnifiedTable { columns, records },
        conflicts,
    }
}

/// First row per key, plus a conflict record for every key seen twice.
fn index_rows(input: &MergeInput) -> (HashMap<SchoolKey, usize>, Vec<MergeConflict>) {
    let table = &input.table;
    let mut index: HashMap<SchoolKey, usize> = HashMap::new();
    let mut extra: HashMap<SchoolKey, Vec<usize>> = HashMap::new();
    let mut order: Vec<SchoolKey> = Vec::new();

    for (i, row) in table.rows().iter().enumerate() {
        let Some(key) = table
            .get(row, &input.key_column)
            .and_then(Value::as_text)
            .map(SchoolKey::new)
        else {
            continue;
        };

        if index.contains_key(&key) {
            let discarded = extra.entry(key.clone()).or_default();
            if discarded.is_empty() {
                order.push(key.clone());
            }
            discarded.push(row.line);
        } else {
            index.insert(key, i);
        }
    }

    let conflicts = order
        .into_iter()
        .map(|key| {
            let discarded_lines = extra.remove(&key).unwrap_or_default();
            let kept_line = table.rows()[index[&key]].line;
            warn!(
                source = %input.source,
                key = %key,
                kept_line,
                discarded = discarded_lines.len(),
                "Duplicate key in source, keeping first row"
            );
            MergeConflict::DuplicateKey {
                source: input.source.clone(),
                count: discarded_lines.len() + 1,
                key,
                kept_line,
                discarded_lines,
            }
        })
        .collect();

    (index, conflicts)
}

/// Decide which source cell feeds each output column.
fn plan_columns(inputs: &[MergeInput], plan: &MergePlan) -> Vec<OutputColumn> {
    let source_index: HashMap<&str, usize> = inputs
        .iter()
        .enumerate()
        .map(|(i, input)| (input.source.as_str(), i))
        .collect();

    let mut layout: Vec<OutputColumn> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    let mut claimed: BTreeSet<(usize, usize)> = BTreeSet::new();

    for group in &plan.groups {
        let mut candidates = Vec::new();
        for reference in &group.candidates {
            let found = source_index.get(reference.source.as_str()).and_then(|&i| {
                inputs[i]
                    .table
                    .column_index(&reference.column)
                    .map(|c| (i, c))
            });
            match found {
                Some((input, column)) => {
                    claimed.insert((input, column));
                    candidates.push(Candidate { input, column });
                }
                None => debug!(
                    output = %group.output,
                    source = %reference.source,
                    column = %reference.column,
                    "Column group candidate not present, skipping"
                ),
            }
        }
        by_name.insert(group.output.clone(), layout.len());
        layout.push(OutputColumn {
            name: group.output.clone(),
            candidates,
        });
    }

    for (i, input) in inputs.iter().enumerate() {
        for (c, name) in input.table.columns().iter().enumerate() {
            if claimed.contains(&(i, c))
                || *name == input.key_column
                || input.identifier_columns.contains(name)
                || *name == plan.key_column
                || Some(name) == plan.district_column.as_ref()
            {
                continue;
            }

            let candidate = Candidate { input: i, column: c };
            match by_name.get(name) {
                Some(&slot) => layout[slot].candidates.push(candidate),
                None => {
                    by_name.insert(name.clone(), layout.len());
                    layout.push(OutputColumn {
                        name: name.clone(),
                        candidates: vec![candidate],
                    });
                }
            }
        }
    }

    // Ranked sources first, in rank order; unranked keep input order
    for output in &mut layout {
        output.candidates.sort_by_key(|c| {
            let rank = plan.rank(&inputs[c.input].source);
            (rank.is_none(), rank, c.input)
        });
    }

    layout
}

/// Pick the value for one (key, column) cell.
fn resolve(
    key: &SchoolKey,
    output: &OutputColumn,
    inputs: &[MergeInput],
    first_rows: &[HashMap<SchoolKey, usize>],
    plan: &MergePlan,
) -> (Value, Option<MergeConflict>) {
    let present: Vec<(&str, &Value)> = output
        .candidates
        .iter()
        .filter_map(|c| {
            let row = first_rows[c.input].get(key)?;
            let value = &inputs[c.input].table.rows()[*row].values[c.column];
            if value.is_null() {
                None
            } else {
                Some((inputs[c.input].source.as_str(), value))
            }
        })
        .collect();

    let Some(&(winner_source, winner)) = present.first() else {
        return (Value::Null, None);
    };

    let disagree = present.iter().any(|(_, v)| *v != winner);
    let unranked = present.iter().any(|(s, _)| plan.rank(s).is_none());

    let conflict = if disagree && unranked {
        warn!(
            key = %key,
            column = %output.name,
            chosen = winner_source,
            "Sources disagree and precedence does not rank them all"
        );
        Some(MergeConflict::UnresolvedPrecedence {
            key: key.clone(),
            column: output.name.clone(),
            candidates: present.iter().map(|(s, _)| s.to_string()).collect(),
            chosen: winner_source.to_string(),
        })
    } else {
        None
    };

    (winner.clone(), conflict)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_table, IdentifierSpec, KeyRule, KEY_COLUMN};

    fn create_test_input(source: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> MergeInput {
        let mut table = RawTable::new(source, columns.iter().map(|c| c.to_string()).collect());
        for (i, row) in rows.into_iter().enumerate() {
            table.push_row(i + 2, row);
        }
        let normalized = normalize_table(&table, &IdentifierSpec::new("id", KeyRule::Plain));
        MergeInput::new(source, normalized.table, KEY_COLUMN)
            .with_identifier_columns(vec!["id".to_string()])
    }

    fn scenario_inputs() -> Vec<MergeInput> {
        vec![
            create_test_input("a", &["id", "SAT_math"], vec![vec!["X".into(), 500.0.into()]]),
            create_test_input(
                "b",
                &["id", "race_White"],
                vec![
                    vec!["X".into(), 30.0.into()],
                    vec!["Y".into(), 50.0.into()],
                ],
            ),
            create_test_input(
                "c",
                &["id", "borough"],
                vec![
                    vec!["X".into(), "Manhattan".into()],
                    vec!["Y".into(), "Queens".into()],
                ],
            ),
        ]
    }

    #[test]
    fn test_three_table_scenario() {
        let outcome = merge_sources(&scenario_inputs(), &MergePlan::new("key"));
        let table = &outcome.table;

        assert_eq!(table.columns(), &["key", "SAT_math", "race_White", "borough"]);
        assert_eq!(table.len(), 2);

        let x = table.get(&SchoolKey::new("X")).unwrap();
        assert_eq!(table.number(x, "SAT_math"), Some(500.0));
        assert_eq!(table.number(x, "race_White"), Some(30.0));
        assert_eq!(table.value(x, "borough"), Some(&Value::from("Manhattan")));

        let y = table.get(&SchoolKey::new("Y")).unwrap();
        assert_eq!(table.value(y, "SAT_math"), Some(&Value::Null));
        assert_eq!(table.number(y, "race_White"), Some(50.0));
        assert_eq!(table.value(y, "borough"), Some(&Value::from("Queens")));
        assert_eq!(y.sources, vec!["b".to_string(), "c".to_string()]);

        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_key_set_is_union_of_inputs() {
        let inputs = vec![
            create_test_input("a", &["id", "v"], vec![vec!["P".into(), 1.0.into()]]),
            create_test_input("b", &["id", "w"], vec![vec!["Q".into(), 2.0.into()]]),
            create_test_input("c", &["id", "z"], vec![vec!["R".into(), Value::Null]]),
        ];
        let outcome = merge_sources(&inputs, &MergePlan::new("key"));
        let keys: Vec<&str> = outcome.table.records().iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["P", "Q", "R"]);

        // R only exists in c, and c had no value: every field stays null
        let r = outcome.table.get(&SchoolKey::new("R")).unwrap();
        assert!(r.values[1..].iter().all(Value::is_null));
    }

    #[test]
    fn test_duplicate_key_keeps_first_row() {
        let inputs = vec![create_test_input(
            "a",
            &["id", "SAT_math"],
            vec![
                vec!["X".into(), 500.0.into()],
                vec!["X".into(), 510.0.into()],
            ],
        )];
        let outcome = merge_sources(&inputs, &MergePlan::new("key"));

        let x = outcome.table.get(&SchoolKey::new("X")).unwrap();
        assert_eq!(outcome.table.number(x, "SAT_math"), Some(500.0));

        assert_eq!(outcome.conflicts.len(), 1);
        match &outcome.conflicts[0] {
            MergeConflict::DuplicateKey {
                source,
                key,
                count,
                kept_line,
                discarded_lines,
            } => {
                assert_eq!(source, "a");
                assert_eq!(key.as_str(), "X");
                assert_eq!(*count, 2);
                assert_eq!(*kept_line, 2);
                assert_eq!(discarded_lines, &vec![3]);
            }
            other => panic!("unexpected conflict {:?}", other),
        }
    }

    #[test]
    fn test_column_group_follows_precedence() {
        let inputs = vec![
            create_test_input("sat", &["id", "SCHOOL NAME"], vec![vec!["X".into(), "HENRY ST".into()]]),
            create_test_input("dir", &["id", "school_name"], vec![vec!["X".into(), "Henry Street School".into()]]),
        ];
        let mut plan = MergePlan::new("DBN");
        plan.precedence = vec!["dir".to_string(), "sat".to_string()];
        plan.groups = vec![ColumnGroup {
            output: "school_name".to_string(),
            candidates: vec![
                ColumnRef { source: "sat".to_string(), column: "SCHOOL NAME".to_string() },
                ColumnRef { source: "dir".to_string(), column: "school_name".to_string() },
            ],
        }];

        let outcome = merge_sources(&inputs, &plan);
        let table = &outcome.table;
        assert_eq!(table.columns(), &["DBN", "school_name"]);

        let x = table.get(&SchoolKey::new("X")).unwrap();
        assert_eq!(table.value(x, "school_name"), Some(&Value::from("Henry Street School")));
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_lower_precedence_fills_gaps() {
        let inputs = vec![
            create_test_input("sat", &["id", "name"], vec![vec!["X".into(), "HENRY ST".into()]]),
            create_test_input("dir", &["id", "name"], vec![vec!["X".into(), Value::Null]]),
        ];
        let mut plan = MergePlan::new("DBN");
        plan.precedence = vec!["dir".to_string(), "sat".to_string()];

        let outcome = merge_sources(&inputs, &plan);
        let x = outcome.table.get(&SchoolKey::new("X")).unwrap();
        assert_eq!(outcome.table.value(x, "name"), Some(&Value::from("HENRY ST")));
    }

    #[test]
    fn test_unranked_disagreement_is_reported() {
        let inputs = vec![
            create_test_input("sat", &["id", "name"], vec![vec!["X".into(), "HENRY ST".into()]]),
            create_test_input("ap", &["id", "name"], vec![vec!["X".into(), "Henry Street".into()]]),
        ];
        let mut plan = MergePlan::new("DBN");
        plan.precedence = vec!["sat".to_string()];

        let outcome = merge_sources(&inputs, &plan);
        let x = outcome.table.get(&SchoolKey::new("X")).unwrap();
        assert_eq!(outcome.table.value(x, "name"), Some(&Value::from("HENRY ST")));

        assert_eq!(outcome.conflicts.len(), 1);
        assert!(matches!(
            &outcome.conflicts[0],
            MergeConflict::UnresolvedPrecedence { chosen, column, .. }
                if chosen == "sat" && column == "name"
        ));
    }

    #[test]
    fn test_district_column_is_derived_from_key() {
        let inputs = vec![create_test_input("a", &["id", "v"], vec![vec!["01M292".into(), 1.0.into()]])];
        let mut plan = MergePlan::new("DBN");
        plan.district_column = Some("school_dist".to_string());

        let outcome = merge_sources(&inputs, &plan);
        let rec = &outcome.table.records()[0];
        assert_eq!(outcome.table.value(rec, "school_dist"), Some(&Value::from("01")));
        assert_eq!(outcome.table.value(rec, "DBN"), Some(&Value::from("01M292")));
    }
}
