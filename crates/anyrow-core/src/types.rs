use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Positional parameter bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
    Uuid(Uuid),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => f.write_str("NULL"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int64(v) => write!(f, "{v}"),
            ParamValue::Float64(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "'{v}'"),
            ParamValue::Uuid(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int64(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int64(value as i64)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float64(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<Uuid> for ParamValue {
    fn from(value: Uuid) -> Self {
        ParamValue::Uuid(value)
    }
}

/// Value shapes a driver hands back for a single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Text(String),
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Nested object or array (json, jsonb, composite).
    Json(serde_json::Value),
    Uuid([u8; 16]),
    /// Arbitrary-precision decimal in its exact textual form.
    Numeric(String),
    Bytes(Vec<u8>),
    /// Anything the driver could not map onto one of the shapes above.
    Other {
        type_name: String,
        value: serde_json::Value,
    },
}

impl NativeValue {
    pub fn kind(&self) -> &'static str {
        match self {
            NativeValue::Null => "null",
            NativeValue::Text(_) => "text",
            NativeValue::Bool(_) => "bool",
            NativeValue::Int16(_) => "int16",
            NativeValue::Int32(_) => "int32",
            NativeValue::Int64(_) => "int64",
            NativeValue::Float32(_) => "float32",
            NativeValue::Float64(_) => "float64",
            NativeValue::Json(_) => "json",
            NativeValue::Uuid(_) => "uuid",
            NativeValue::Numeric(_) => "numeric",
            NativeValue::Bytes(_) => "bytes",
            NativeValue::Other { .. } => "other",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NativeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Normalized cell value. Every native value collapses into exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    String(String),
    Int64(i64),
    Float32(f32),
    /// Serialized JSON text of an object, array or fallback value.
    Json(String),
}

impl CanonicalValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CanonicalValue::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CanonicalValue::Null => serde_json::Value::Null,
            CanonicalValue::Bool(v) => serde_json::Value::Bool(*v),
            CanonicalValue::String(v) => serde_json::Value::String(v.clone()),
            CanonicalValue::Int64(v) => serde_json::Value::from(*v),
            CanonicalValue::Float32(v) => serde_json::Number::from_f64(*v as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CanonicalValue::Json(text) => serde_json::from_str(text)
                .unwrap_or_else(|_| serde_json::Value::String(text.clone())),
        }
    }
}

/// A fetched row as a generic map from column name to value.
pub type Object = HashMap<String, CanonicalValue>;

pub fn object_to_json(object: &Object) -> serde_json::Value {
    let map = object
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}
