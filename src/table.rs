// 📋 RawTable - one in-memory table per source file

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Line in the original file (header = line 1)
    pub line: usize,
    pub values: Vec<Value>,
}

/// An ordered table where every row shares the same column schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub name: String,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RawTable {
    /// Create an empty table. Duplicate column names get `.1`, `.2` suffixes.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        RawTable {
            name: name.into(),
            columns: dedupe_columns(columns),
            rows: Vec::new(),
        }
    }

    /// Append a row, padding short rows with `Null` and dropping extra cells.
    /// The loader reports dropped cells before they get here.
    pub fn push_row(&mut self, line: usize, mut values: Vec<Value>) {
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(Row { line, values });
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    /// Value of `column` in `row`; `None` when the column doesn't exist.
    pub fn get<'a>(&self, row: &'a Row, column: &str) -> Option<&'a Value> {
        self.column_index(column).and_then(|i| row.values.get(i))
    }

    /// Return a copy with an extra column computed per row.
    pub fn with_column<F>(&self, column: &str, mut compute: F) -> RawTable
    where
        F: FnMut(&RawTable, &Row) -> Value,
    {
        let mut columns = self.columns.clone();
        let existing = self.column_index(column);
        if existing.is_none() {
            columns.push(column.to_string());
        }

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let value = compute(self, row);
                let mut values = row.values.clone();
                match existing {
                    Some(i) => values[i] = value,
                    None => values.push(value),
                }
                Row { line: row.line, values }
            })
            .collect();

        RawTable {
            name: self.name.clone(),
            columns,
            rows,
        }
    }

    /// Return a copy keeping only rows matching `keep`.
    pub fn filter_rows<F>(&self, mut keep: F) -> RawTable
    where
        F: FnMut(&RawTable, &Row) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|row| keep(self, row))
            .cloned()
            .collect();

        RawTable {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Return a copy keeping only the named columns, in the given order.
    /// Unknown names are ignored; callers validate beforehand.
    pub fn select(&self, columns: &[String]) -> RawTable {
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|row| Row {
                line: row.line,
                values: indices.iter().map(|&i| row.values[i].clone()).collect(),
            })
            .collect();

        RawTable {
            name: self.name.clone(),
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows,
        }
    }

    /// Stack `other` under `self`. Columns are the union (ours first); cells a
    /// table doesn't have become `Null`.
    pub fn stack(&self, other: &RawTable) -> RawTable {
        let mut columns = self.columns.clone();
        for c in &other.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }

        let position: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mut rows = Vec::with_capacity(self.rows.len() + other.rows.len());
        for table in [self, other] {
            for row in &table.rows {
                let mut values = vec![Value::Null; columns.len()];
                for (i, c) in table.columns.iter().enumerate() {
                    values[position[c.as_str()]] = row.values[i].clone();
                }
                rows.push(Row { line: row.line, values });
            }
        }

        RawTable {
            name: self.name.clone(),
            columns,
            rows,
        }
    }

    /// Build a table directly from rows (used by condensing).
    pub(crate) fn from_parts(name: String, columns: Vec<String>, rows: Vec<Row>) -> RawTable {
        RawTable { name, columns, rows }
    }
}

fn dedupe_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(columns.len());

    for column in columns {
        let count = seen.entry(column.clone()).or_insert(0);
        if *count == 0 {
            out.push(column.clone());
        } else {
            out.push(format!("{}.{}", column, count));
        }
        *count += 1;
    }

    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table() -> RawTable {
        let mut table = RawTable::new("sat", vec!["DBN".to_string(), "math".to_string()]);
        table.push_row(2, vec![Value::from("01M292"), Value::Number(404.0)]);
        table.push_row(3, vec![Value::from("01M448"), Value::from("s")]);
        table
    }

    #[test]
    fn test_duplicate_headers_get_suffix() {
        let table = RawTable::new(
            "t",
            vec!["a".to_string(), "a".to_string(), "b".to_string(), "a".to_string()],
        );
        assert_eq!(table.columns(), &["a", "a.1", "b", "a.2"]);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let mut table = RawTable::new("t", vec!["a".to_string(), "b".to_string()]);
        table.push_row(2, vec![Value::Number(1.0)]);
        assert_eq!(table.rows()[0].values, vec![Value::Number(1.0), Value::Null]);
    }

    #[test]
    fn test_with_column_appends() {
        let table = create_test_table();
        let doubled = table.with_column("double", |t, row| {
            t.get(row, "math")
                .and_then(Value::as_f64)
                .map(|m| Value::Number(m * 2.0))
                .unwrap_or(Value::Null)
        });

        assert_eq!(doubled.columns().len(), 3);
        assert_eq!(doubled.get(&doubled.rows()[0], "double"), Some(&Value::Number(808.0)));
        assert_eq!(doubled.get(&doubled.rows()[1], "double"), Some(&Value::Null));
        // original untouched
        assert_eq!(table.columns().len(), 2);
    }

    #[test]
    fn test_filter_and_select() {
        let table = create_test_table();
        let numeric = table.filter_rows(|t, row| {
            t.get(row, "math").and_then(Value::as_f64).is_some()
        });
        assert_eq!(numeric.len(), 1);

        let only_dbn = table.select(&["DBN".to_string()]);
        assert_eq!(only_dbn.columns(), &["DBN"]);
        assert_eq!(only_dbn.rows()[1].values, vec![Value::from("01M448")]);
    }

    #[test]
    fn test_stack_unions_columns() {
        let mut all = RawTable::new("survey", vec!["dbn".to_string(), "saf_s_11".to_string()]);
        all.push_row(2, vec![Value::from("01M015"), Value::Number(6.5)]);

        let mut d75 = RawTable::new("survey_d75", vec!["dbn".to_string(), "d75".to_string()]);
        d75.push_row(2, vec![Value::from("75X012"), Value::Number(1.0)]);

        let stacked = all.stack(&d75);
        assert_eq!(stacked.name, "survey");
        assert_eq!(stacked.columns(), &["dbn", "saf_s_11", "d75"]);
        assert_eq!(stacked.len(), 2);
        assert_eq!(
            stacked.rows()[1].values,
            vec![Value::from("75X012"), Value::Null, Value::Number(1.0)]
        );
    }
}
