use anyrow_core::catalog::ColumnSchema;
use anyrow_core::types::{CanonicalValue, NativeValue};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use metrics::counter;
use tracing::debug;
use uuid::Uuid;

const INTEGER_TYPES: &[&str] = &["integer", "bigint", "smallint", "int", "int2", "int4", "int8"];
const DOUBLE_TYPES: &[&str] = &["double precision", "float8", "double"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodePolicy {
    pub demote_threshold: f64,
}

impl Default for DecodePolicy {
    fn default() -> Self {
        Self {
            demote_threshold: f32::MAX as f64,
        }
    }
}

pub fn decode(value: &NativeValue, column: &ColumnSchema) -> CanonicalValue {
    DecodePolicy::default().decode(value, column)
}

impl DecodePolicy {
    pub fn decode(&self, value: &NativeValue, column: &ColumnSchema) -> CanonicalValue {
        match value {
            NativeValue::Null => CanonicalValue::Null,
            NativeValue::Text(s) => CanonicalValue::String(s.clone()),
            NativeValue::Bool(b) => CanonicalValue::Bool(*b),
            NativeValue::Int16(v) => CanonicalValue::Int64(*v as i64),
            NativeValue::Int32(v) => CanonicalValue::Int64(*v as i64),
            NativeValue::Int64(v) => CanonicalValue::Int64(*v),
            NativeValue::Float32(v) => self.decode_float(*v as f64, column),
            NativeValue::Float64(v) => self.decode_float(*v, column),
            NativeValue::Json(v) => CanonicalValue::Json(v.to_string()),
            NativeValue::Uuid(bytes) => CanonicalValue::String(format_uuid(bytes)),
            NativeValue::Numeric(text) => CanonicalValue::String(text.clone()),
            NativeValue::Bytes(_) | NativeValue::Other { .. } => fallback(value, column),
        }
    }

    fn decode_float(&self, v: f64, column: &ColumnSchema) -> CanonicalValue {
        let type_name = column.type_name.as_str();
        if is_integer_type(type_name) {
            return CanonicalValue::Int64(v.trunc() as i64);
        }
        if is_double_type(type_name) && v.abs() > self.demote_threshold {
            return CanonicalValue::String(format!("{v:.6}"));
        }
        CanonicalValue::Float32(v as f32)
    }
}

pub fn is_integer_type(type_name: &str) -> bool {
    INTEGER_TYPES.contains(&type_name)
}

pub fn is_double_type(type_name: &str) -> bool {
    DOUBLE_TYPES.contains(&type_name)
}

pub fn format_uuid(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes(*bytes).hyphenated().to_string()
}

fn fallback(value: &NativeValue, column: &ColumnSchema) -> CanonicalValue {
    counter!("anyrow_decode_fallback_total").increment(1);
    let json = match value {
        NativeValue::Bytes(bytes) => serde_json::Value::String(STANDARD.encode(bytes)),
        NativeValue::Other { value, .. } => value.clone(),
        _ => serde_json::Value::Null,
    };
    debug!(
        column = %column.name,
        kind = value.kind(),
        driver_type = ?driver_type(value),
        "handled as object"
    );
    CanonicalValue::Json(json.to_string())
}

fn driver_type(value: &NativeValue) -> Option<&str> {
    match value {
        NativeValue::Other { type_name, .. } => Some(type_name),
        _ => None,
    }
}
