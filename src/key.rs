//! Identity keys used to pair spreadsheet rows with database rows.
//!
//! Key values are canonicalized before they are compared or hashed so that the
//! same logical identity matches regardless of how each side stores it: the
//! spreadsheet string `"1001"`, the SQLite integer `1001`, and the float
//! `1001.0` all become the same [`KeyPart::Number`].

use std::{fmt, str::FromStr};

use chrono::{NaiveDateTime, NaiveTime};
use itertools::Itertools;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Serialize, Serializer};

use crate::data::{FieldType, Value, parse_naive_date, parse_naive_datetime};
use crate::row::Row;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Number(Decimal),
    Text(String),
    Boolean(bool),
    Instant(NaiveDateTime),
}

impl KeyPart {
    /// The value bound for this part in a `WHERE` clause.
    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Number(n) => {
                let converted = if n.is_integer() {
                    n.to_i64().map(Value::Integer)
                } else {
                    n.to_f64().map(Value::Float)
                };
                converted.unwrap_or_else(|| Value::String(n.to_string()))
            }
            KeyPart::Text(s) => Value::String(s.clone()),
            KeyPart::Boolean(b) => Value::Boolean(*b),
            KeyPart::Instant(dt) => Value::DateTime(*dt),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Number(n) => write!(f, "{n}"),
            KeyPart::Text(s) => f.write_str(s),
            KeyPart::Boolean(b) => write!(f, "{b}"),
            KeyPart::Instant(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

/// A non-empty tuple of canonical key parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<KeyPart>);

impl Key {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        debug_assert!(!parts.is_empty(), "key must have at least one part");
        Key(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single}"),
            parts => write!(f, "({})", parts.iter().join(", ")),
        }
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key(vec![KeyPart::Number(Decimal::from(value))])
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(vec![KeyPart::Text(value.to_string())])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnkeyableReason {
    MissingField(String),
    NullValue(String),
    Unusable { field: String, detail: String },
}

impl fmt::Display for UnkeyableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnkeyableReason::MissingField(field) => write!(f, "key field '{field}' is missing"),
            UnkeyableReason::NullValue(field) => write!(f, "key field '{field}' is null"),
            UnkeyableReason::Unusable { field, detail } => {
                write!(f, "key field '{field}' cannot be used: {detail}")
            }
        }
    }
}

/// Key field names plus the type each side should be read as.
///
/// A field hinted as [`FieldType::String`] is never parsed as a number, which
/// keeps identifiers such as `"007"` distinct from `7`.
#[derive(Debug, Clone)]
pub struct KeySpec {
    fields: Vec<String>,
    types: Vec<Option<FieldType>>,
}

impl KeySpec {
    pub fn new(fields: Vec<String>) -> Self {
        let types = vec![None; fields.len()];
        Self { fields, types }
    }

    pub fn with_types(fields: Vec<String>, types: Vec<Option<FieldType>>) -> Self {
        assert_eq!(fields.len(), types.len(), "one type hint per key field");
        Self { fields, types }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn is_key_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field == name)
    }

    pub fn extract(&self, row: &Row) -> Result<Key, UnkeyableReason> {
        self.fields
            .iter()
            .zip(&self.types)
            .map(|(field, hint)| {
                let value = row
                    .get(field)
                    .ok_or_else(|| UnkeyableReason::MissingField(field.clone()))?;
                canonical_part(field, value, *hint)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Key)
    }
}

fn canonical_part(
    field: &str,
    value: &Value,
    hint: Option<FieldType>,
) -> Result<KeyPart, UnkeyableReason> {
    let unusable = |detail: String| UnkeyableReason::Unusable {
        field: field.to_string(),
        detail,
    };
    match value {
        Value::Null => Err(UnkeyableReason::NullValue(field.to_string())),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(UnkeyableReason::NullValue(field.to_string()));
            }
            match hint {
                Some(FieldType::String) => Ok(KeyPart::Text(trimmed.to_string())),
                Some(FieldType::Boolean) => match trimmed.to_ascii_lowercase().as_str() {
                    "true" | "t" | "yes" | "y" | "1" => Ok(KeyPart::Boolean(true)),
                    "false" | "f" | "no" | "n" | "0" => Ok(KeyPart::Boolean(false)),
                    _ => Err(unusable(format!("'{trimmed}' is not a boolean"))),
                },
                Some(FieldType::Date | FieldType::DateTime) => parse_naive_datetime(trimmed)
                    .or_else(|| parse_naive_date(trimmed).map(|d| d.and_time(NaiveTime::MIN)))
                    .map(KeyPart::Instant)
                    .ok_or_else(|| unusable(format!("'{trimmed}' is not a date"))),
                Some(FieldType::Integer | FieldType::Float) => parse_decimal(trimmed)
                    .map(KeyPart::Number)
                    .ok_or_else(|| unusable(format!("'{trimmed}' is not a number"))),
                None => Ok(parse_decimal(trimmed)
                    .map(KeyPart::Number)
                    .unwrap_or_else(|| KeyPart::Text(trimmed.to_string()))),
            }
        }
        Value::Integer(i) => Ok(match hint {
            Some(FieldType::String) => KeyPart::Text(i.to_string()),
            _ => KeyPart::Number(Decimal::from(*i)),
        }),
        Value::Float(f) => {
            let decimal = Decimal::from_f64(*f)
                .ok_or_else(|| unusable(format!("{f} has no exact decimal form")))?
                .normalize();
            Ok(match hint {
                Some(FieldType::String) => KeyPart::Text(decimal.to_string()),
                _ => KeyPart::Number(decimal),
            })
        }
        Value::Boolean(b) => Ok(match hint {
            Some(FieldType::Integer | FieldType::Float) => {
                KeyPart::Number(Decimal::from(i64::from(*b)))
            }
            _ => KeyPart::Boolean(*b),
        }),
        Value::Date(_) | Value::DateTime(_) => value
            .instant()
            .map(KeyPart::Instant)
            .ok_or_else(|| unusable("no instant".to_string())),
    }
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
        .map(|d| d.normalize())
}
