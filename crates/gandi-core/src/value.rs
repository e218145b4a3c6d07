//! Raw values returned by the hosting API.
//!
//! The service speaks XML-RPC, so every result is built from a small closed set
//! of scalar types plus structs and arrays. A struct is a [`Record`]: the raw
//! material every mapped entity wraps.

use chrono::NaiveDateTime;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Format used by XML-RPC `dateTime.iso8601` values.
pub const DATETIME_FORMAT: &str = "%Y%m%dT%H:%M:%S";

/// A raw record: field name to value.
pub type Record = BTreeMap<String, Value>;

/// A single XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `int`, `i4` or `i8`
    Int(i64),
    /// `boolean`
    Bool(bool),
    /// `string` (or untyped value)
    String(String),
    /// `double`
    Double(f64),
    /// `dateTime.iso8601`
    DateTime(NaiveDateTime),
    /// `base64`
    Base64(Vec<u8>),
    /// `struct`
    Struct(Record),
    /// `array`
    Array(Vec<Value>),
    /// `nil`
    Nil,
}

impl Value {
    /// Returns the integer, if this is an `Int`.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a `Bool`.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a float; integers are widened.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the timestamp, if this is a `DateTime`.
    #[must_use]
    pub const fn as_datetime(&self) -> Option<&NaiveDateTime> {
        match self {
            Self::DateTime(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the record, if this is a `Struct`.
    #[must_use]
    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Struct(record) => Some(record),
            _ => None,
        }
    }

    /// Returns the elements, if this is an `Array`.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Returns true for `Nil`.
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Consumes the value and returns its record.
    ///
    /// Info calls sometimes answer with a one-element array; that element is
    /// unwrapped first.
    #[must_use]
    pub fn into_record(self) -> Option<Record> {
        match self.unwrap_singleton() {
            Self::Struct(record) => Some(record),
            _ => None,
        }
    }

    /// Unwraps a one-element array into its element; anything else is returned as is.
    #[must_use]
    pub fn unwrap_singleton(self) -> Self {
        match self {
            Self::Array(mut values) if values.len() == 1 => values.remove(0),
            other => other,
        }
    }

    /// Returns the XML-RPC type name of this value.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Bool(_) => "boolean",
            Self::String(_) => "string",
            Self::Double(_) => "double",
            Self::DateTime(_) => "dateTime.iso8601",
            Self::Base64(_) => "base64",
            Self::Struct(_) => "struct",
            Self::Array(_) => "array",
            Self::Nil => "nil",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Double(value) => write!(f, "{value}"),
            Self::DateTime(value) => write!(f, "{}", value.format(DATETIME_FORMAT)),
            Self::Base64(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Self::Struct(record) => write!(f, "{{{} fields}}", record.len()),
            Self::Array(values) => write!(f, "[{} items]", values.len()),
            Self::Nil => f.write_str("nil"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Struct(record)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Nil,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Double(n.as_f64().unwrap_or_default()), Self::Int),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(values) => {
                Self::Array(values.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::Struct(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::String(value) => serializer.serialize_str(value),
            Self::Double(value) => serializer.serialize_f64(*value),
            Self::DateTime(value) => {
                serializer.serialize_str(&value.format(DATETIME_FORMAT).to_string())
            }
            Self::Base64(bytes) => serializer.serialize_bytes(bytes),
            Self::Struct(record) => {
                let mut map = serializer.serialize_map(Some(record.len()))?;
                for (key, value) in record {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Self::Array(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Self::Nil => serializer.serialize_none(),
        }
    }
}

/// Builds a [`Record`] from a JSON object; non-objects yield an empty record.
#[must_use]
pub fn record_from_json(value: serde_json::Value) -> Record {
    match Value::from(value) {
        Value::Struct(record) => record,
        _ => Record::new(),
    }
}
