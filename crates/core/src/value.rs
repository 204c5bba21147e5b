//! Cell values, declared column types, and per-value coercion.
//!
//! Every cell in a [`Dataset`](crate::dataset::Dataset) is a [`Value`].
//! Coercion never fails a whole column: [`Value::coerce`] returns `None` for
//! a single unconvertible value and the caller counts the failure.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Declared coercion target for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Numeric,
    Integer,
    Boolean,
    Datetime,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Numeric => "numeric",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single cell value.
///
/// Serializes untagged: `Null` → JSON null, `Int`/`Num` → JSON numbers,
/// `DateTime` → RFC 3339 string. Deserialization tries `DateTime` before
/// `Str`, so RFC 3339 strings round-trip as datetimes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    DateTime(DateTime<Utc>),
    Str(String),
}

/// Datetime formats accepted by string coercion, tried in order after
/// RFC 3339.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Date-only formats accepted by string coercion (midnight UTC assumed).
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the value's runtime type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Num(_) => "numeric",
            Self::DateTime(_) => "datetime",
            Self::Str(_) => "string",
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert a JSON scalar into a [`Value`]. Arrays and objects are
    /// rejected: configuration values must be scalars.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Num)
                }
            }
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// JSON view of the value, used by exporters and the audit trail.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Num(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Self::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Infer a value from a raw text cell (extraction-time inference).
    ///
    /// Empty cells become null. Integers, floats, and booleans are
    /// recognised; everything else stays a string. Datetime recognition is
    /// deliberately left to the cleaning stage's declared `type_mapping`.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return Self::Num(n);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => Self::Str(trimmed.to_string()),
        }
    }

    /// Attempt to convert this value to the declared target type.
    ///
    /// `None` means the single value failed conversion; the caller records
    /// the failure and stores null. Null always coerces to null.
    pub fn coerce(&self, target: DataType) -> Option<Self> {
        if self.is_null() {
            return Some(Self::Null);
        }
        match target {
            DataType::String => Some(Self::Str(self.render())),
            DataType::Numeric => match self {
                Self::Num(_) => Some(self.clone()),
                Self::Int(i) => Some(Self::Num(*i as f64)),
                Self::Bool(b) => Some(Self::Num(if *b { 1.0 } else { 0.0 })),
                Self::Str(s) => s.trim().parse::<f64>().ok().map(Self::Num),
                Self::DateTime(_) | Self::Null => None,
            },
            DataType::Integer => match self {
                Self::Int(_) => Some(self.clone()),
                Self::Num(n) if n.fract() == 0.0 => Some(Self::Int(*n as i64)),
                Self::Bool(b) => Some(Self::Int(i64::from(*b))),
                Self::Str(s) => {
                    let trimmed = s.trim();
                    if let Ok(i) = trimmed.parse::<i64>() {
                        Some(Self::Int(i))
                    } else {
                        match trimmed.parse::<f64>() {
                            Ok(n) if n.fract() == 0.0 => Some(Self::Int(n as i64)),
                            _ => None,
                        }
                    }
                }
                _ => None,
            },
            DataType::Boolean => match self {
                Self::Bool(_) => Some(self.clone()),
                Self::Int(0) => Some(Self::Bool(false)),
                Self::Int(1) => Some(Self::Bool(true)),
                Self::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Some(Self::Bool(true)),
                    "false" | "no" | "0" => Some(Self::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            DataType::Datetime => match self {
                Self::DateTime(_) => Some(self.clone()),
                Self::Str(s) => parse_datetime(s.trim()).map(Self::DateTime),
                _ => None,
            },
        }
    }

    /// Plain-text rendering used for string coercion and CSV export.
    /// Null renders as the empty string.
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Num(n) => n.to_string(),
            Self::DateTime(dt) => dt.to_rfc3339(),
            Self::Str(s) => s.clone(),
        }
    }

    /// Hashable grouping key. `Num` keys by bit pattern, so `-0.0` and
    /// `0.0` are distinct keys while all NaNs with the same payload match.
    pub fn group_key(&self) -> GroupKey {
        match self {
            Self::Null => GroupKey::Null,
            Self::Bool(b) => GroupKey::Bool(*b),
            Self::Int(i) => GroupKey::Int(*i),
            Self::Num(n) => GroupKey::Num(n.to_bits()),
            Self::DateTime(dt) => GroupKey::DateTime(dt.timestamp_micros()),
            Self::Str(s) => GroupKey::Str(s.clone()),
        }
    }

    /// Same-kind partial comparison. `None` for incomparable kinds; numeric
    /// values compare across `Int`/`Num`.
    pub fn partial_cmp_value(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Total ordering used for deterministic sorts (distinct period values,
    /// mode tie-breaks): kind rank first, then within-kind order.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Num(_) => 2,
                Value::DateTime(_) => 3,
                Value::Str(_) => 4,
            }
        }
        match rank(self).cmp(&rank(other)) {
            Ordering::Equal => self
                .partial_cmp_value(other)
                .unwrap_or(Ordering::Equal),
            unequal => unequal,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Parse a datetime string, trying RFC 3339 first, then the fixed
/// [`DATETIME_FORMATS`] and [`DATE_FORMATS`] lists. All results are UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// GroupKey
// ---------------------------------------------------------------------------

/// Hashable, equality-comparable stand-in for a [`Value`], used to key
/// group-by partitions and deduplication sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Null,
    Bool(bool),
    Int(i64),
    Num(u64),
    DateTime(i64),
    Str(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- inference ------------------------------------------------------------

    #[test]
    fn infer_empty_is_null() {
        assert_eq!(Value::infer("  "), Value::Null);
    }

    #[test]
    fn infer_integer() {
        assert_eq!(Value::infer("42"), Value::Int(42));
    }

    #[test]
    fn infer_float() {
        assert_eq!(Value::infer("3.5"), Value::Num(3.5));
    }

    #[test]
    fn infer_boolean_case_insensitive() {
        assert_eq!(Value::infer("TRUE"), Value::Bool(true));
    }

    #[test]
    fn infer_falls_back_to_string() {
        assert_eq!(Value::infer("west"), Value::Str("west".to_string()));
    }

    // -- coercion -------------------------------------------------------------

    #[test]
    fn coerce_string_to_numeric() {
        assert_eq!(
            Value::Str("1200.5".to_string()).coerce(DataType::Numeric),
            Some(Value::Num(1200.5))
        );
    }

    #[test]
    fn coerce_failure_returns_none() {
        assert_eq!(Value::Str("abc".to_string()).coerce(DataType::Numeric), None);
    }

    #[test]
    fn coerce_null_always_succeeds() {
        assert_eq!(Value::Null.coerce(DataType::Integer), Some(Value::Null));
    }

    #[test]
    fn coerce_whole_float_to_integer() {
        assert_eq!(Value::Num(10.0).coerce(DataType::Integer), Some(Value::Int(10)));
    }

    #[test]
    fn coerce_fractional_float_to_integer_fails() {
        assert_eq!(Value::Num(10.5).coerce(DataType::Integer), None);
    }

    #[test]
    fn coerce_date_only_string() {
        let coerced = Value::Str("2024-01-03".to_string()).coerce(DataType::Datetime);
        match coerced {
            Some(Value::DateTime(dt)) => assert_eq!(dt.to_rfc3339(), "2024-01-03T00:00:00+00:00"),
            other => panic!("expected datetime, got {other:?}"),
        }
    }

    #[test]
    fn coerce_already_typed_is_identity() {
        assert_eq!(Value::Int(7).coerce(DataType::Integer), Some(Value::Int(7)));
    }

    // -- comparison -----------------------------------------------------------

    #[test]
    fn int_and_num_compare_numerically() {
        assert_eq!(
            Value::Int(2).partial_cmp_value(&Value::Num(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn string_and_int_are_incomparable() {
        assert_eq!(Value::Str("a".to_string()).partial_cmp_value(&Value::Int(1)), None);
    }

    // -- json round-trip ------------------------------------------------------

    #[test]
    fn from_json_rejects_arrays() {
        assert_eq!(Value::from_json(&serde_json::json!([1, 2])), None);
    }

    #[test]
    fn from_json_scalars() {
        assert_eq!(Value::from_json(&serde_json::json!(5)), Some(Value::Int(5)));
        assert_eq!(
            Value::from_json(&serde_json::json!("High Value")),
            Some(Value::Str("High Value".to_string()))
        );
    }
}
