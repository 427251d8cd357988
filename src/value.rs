// 🧩 Cell values - one tagged value per table cell
// Types are resolved once, at load time, never guessed downstream.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// VALUE
// ============================================================================

/// A single table cell.
///
/// `Null` means "no data". It is never collapsed into zero: a school with
/// zero survey responses and a school with no survey row are different facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    /// Infer a value from a raw cell.
    ///
    /// - empty (after trimming) → `Null`
    /// - finite number → `Number`, except zero-padded identifiers like `01`
    /// - anything else → trimmed `Text`
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Value::Null;
        }

        if looks_zero_padded(trimmed) {
            return Value::Text(trimmed.to_string());
        }

        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => Value::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view. Text is not coerced here: it was already tried at load.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Rendered form used for filters, group labels and CSV output.
    /// `Null` renders as `None` so callers can't mistake it for "".
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// `01`, `007` keep their padding; `0`, `0.5` and `10` are numbers.
fn looks_zero_padded(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('0'), Some(c)) if c.is_ascii_digit()
    )
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) => {
                // -0.0 == 0.0, so this folds negative zero into "0"
                let n = if *n == 0.0 { 0.0 } else { *n };
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{:.0}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Option<f64>> for Value {
    fn from(n: Option<f64>) -> Self {
        n.map(Value::Number).unwrap_or(Value::Null)
    }
}

// ============================================================================
// TESTS
// ============================================================================
