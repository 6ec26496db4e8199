//! Canonical field values and the coercions between them.
//!
//! Every cell that enters reconciliation, whether it came from a spreadsheet or
//! a database row, ends up as a [`Value`]. Equality between values is
//! type-aware: integers and floats compare numerically (within a relative
//! epsilon), dates and datetimes compare by instant, and booleans match the
//! `0`/`1` integers SQLite stores them as.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::NormalizationError;

pub const DEFAULT_FLOAT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FieldType {
    #[serde(alias = "string", alias = "text")]
    String,
    #[serde(alias = "integer", alias = "int")]
    Integer,
    #[serde(alias = "float", alias = "real")]
    Float,
    #[serde(alias = "boolean", alias = "bool")]
    Boolean,
    #[serde(alias = "date")]
    Date,
    #[serde(alias = "datetime", alias = "timestamp")]
    DateTime,
}

impl FieldType {
    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::DateTime)
    }

    /// Maps a SQLite declared column type onto a field type using the
    /// affinity rules from the SQLite docs, with date/time names recognised
    /// before the generic numeric fallback.
    pub fn from_declared_type(declared: &str) -> Option<Self> {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return None;
        }
        if upper.contains("BOOL") {
            Some(FieldType::Boolean)
        } else if upper.contains("DATETIME") || upper.contains("TIMESTAMP") {
            Some(FieldType::DateTime)
        } else if upper.contains("DATE") {
            Some(FieldType::Date)
        } else if upper.contains("INT") {
            Some(FieldType::Integer)
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Some(FieldType::String)
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
            || upper.contains("DEC")
        {
            Some(FieldType::Float)
        } else {
            None
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
        };
        f.write_str(label)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(FieldType::Boolean),
            Value::Integer(_) => Some(FieldType::Integer),
            Value::Float(_) => Some(FieldType::Float),
            Value::String(_) => Some(FieldType::String),
            Value::Date(_) => Some(FieldType::Date),
            Value::DateTime(_) => Some(FieldType::DateTime),
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        }
    }

    /// The instant a temporal value denotes; dates are taken at midnight.
    pub fn instant(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(d.and_time(NaiveTime::MIN)),
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Type-aware equality used by the reconciler.
    pub fn equivalent(&self, other: &Value, epsilon: f64) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                floats_equal(*a as f64, *b, epsilon)
            }
            (Value::Float(a), Value::Float(b)) => floats_equal(*a, *b, epsilon),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Boolean(b), Value::Integer(i)) | (Value::Integer(i), Value::Boolean(b)) => {
                i64::from(*b) == *i
            }
            (Value::String(a), Value::String(b)) => a == b,
            (left, right) => match (left.instant(), right.instant()) {
                (Some(l), Some(r)) => l == r,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Relative comparison, scaled by the larger magnitude but never below 1 so
/// values near zero still get an absolute tolerance of `epsilon`.
pub fn floats_equal(a: f64, b: f64, epsilon: f64) -> bool {
    if a == b {
        return true;
    }
    if a.is_nan() || b.is_nan() {
        return false;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= epsilon * scale
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %I:%M %p",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    // Offsets are folded into UTC so two renderings of one instant compare equal.
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(value) {
        return Some(with_offset.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn parse_boolean(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_with_format(value: &str, ty: FieldType, format: Option<&str>) -> Option<Value> {
    match ty {
        FieldType::String => Some(Value::String(value.to_string())),
        FieldType::Integer => value
            .parse::<i64>()
            .ok()
            .or_else(|| {
                value
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(Value::Integer),
        FieldType::Float => value.parse::<f64>().ok().map(Value::Float),
        FieldType::Boolean => parse_boolean(value).map(Value::Boolean),
        FieldType::Date => match format {
            Some(fmt) => NaiveDate::parse_from_str(value, fmt).ok(),
            None => parse_naive_date(value)
                .or_else(|| parse_naive_datetime(value).map(|dt| dt.date())),
        }
        .map(Value::Date),
        FieldType::DateTime => match format {
            Some(fmt) => NaiveDateTime::parse_from_str(value, fmt).ok(),
            None => parse_naive_datetime(value)
                .or_else(|| parse_naive_date(value).map(|d| d.and_time(NaiveTime::MIN))),
        }
        .map(Value::DateTime),
    }
}

/// Coerces `value` into `ty`. Blank strings become [`Value::Null`] for every
/// type, matching how an empty spreadsheet cell is read.
pub fn coerce_value(
    field: &str,
    value: Value,
    ty: FieldType,
    format: Option<&str>,
) -> Result<Value, NormalizationError> {
    let failure = |value: &Value| NormalizationError::Coercion {
        field: field.to_string(),
        value: value.as_display(),
        expected: ty.to_string(),
    };
    let coerced = match (&value, ty) {
        (Value::Null, _) => Some(Value::Null),
        (Value::String(s), _) if s.trim().is_empty() => Some(Value::Null),
        (Value::String(s), FieldType::String) => Some(Value::String(s.clone())),
        (Value::String(s), _) => parse_with_format(s.trim(), ty, format),
        (Value::Integer(i), FieldType::Integer) => Some(Value::Integer(*i)),
        (Value::Integer(i), FieldType::Float) => Some(Value::Float(*i as f64)),
        (Value::Integer(i), FieldType::Boolean) => match i {
            0 => Some(Value::Boolean(false)),
            1 => Some(Value::Boolean(true)),
            _ => None,
        },
        (Value::Integer(i), FieldType::String) => Some(Value::String(i.to_string())),
        (Value::Float(f), FieldType::Float) => Some(Value::Float(*f)),
        (Value::Float(f), FieldType::Integer) => (f.fract() == 0.0
            && f.abs() < i64::MAX as f64)
            .then(|| Value::Integer(*f as i64)),
        (Value::Float(f), FieldType::Boolean) => {
            if *f == 0.0 {
                Some(Value::Boolean(false))
            } else if *f == 1.0 {
                Some(Value::Boolean(true))
            } else {
                None
            }
        }
        (Value::Float(_), FieldType::String) => Some(Value::String(value.as_display())),
        (Value::Boolean(b), FieldType::Boolean) => Some(Value::Boolean(*b)),
        (Value::Boolean(b), FieldType::Integer) => Some(Value::Integer(i64::from(*b))),
        (Value::Boolean(b), FieldType::Float) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
        (Value::Boolean(b), FieldType::String) => Some(Value::String(b.to_string())),
        (Value::Date(d), FieldType::Date) => Some(Value::Date(*d)),
        (Value::Date(d), FieldType::DateTime) => Some(Value::DateTime(d.and_time(NaiveTime::MIN))),
        (Value::Date(d), FieldType::String) => Some(Value::String(
            d.format(format.unwrap_or("%Y-%m-%d")).to_string(),
        )),
        (Value::DateTime(dt), FieldType::DateTime) => Some(Value::DateTime(*dt)),
        // Truncating a real time of day would hide a change, so only midnight narrows.
        (Value::DateTime(dt), FieldType::Date) => {
            (dt.time() == NaiveTime::MIN).then(|| Value::Date(dt.date()))
        }
        (Value::DateTime(dt), FieldType::String) => Some(Value::String(
            dt.format(format.unwrap_or("%Y-%m-%d %H:%M:%S%.f")).to_string(),
        )),
        _ => None,
    };
    coerced.ok_or_else(|| failure(&value))
}
