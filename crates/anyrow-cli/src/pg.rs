use crate::config::DatabaseConfig;
use anyhow::Context;
use anyrow_core::querier::{Querier, Rows};
use anyrow_core::types::{NativeValue, ParamValue};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use std::error::Error;
use std::fmt::Write;
use std::time::Duration;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

type BoxError = Box<dyn Error + Sync + Send>;

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// `Querier` over a single tokio-postgres client.
pub struct PgQuerier {
    client: Client,
}

pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgQuerier> {
    let connecting = tokio_postgres::connect(&config.url, NoTls);
    let (client, connection) = match config.connect_timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), connecting)
            .await
            .map_err(|_| anyhow::anyhow!("connect timed out after {ms}ms"))??,
        None => connecting.await?,
    };
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!("connection error: {err}");
        }
    });
    info!("connected to database");
    Ok(PgQuerier { client })
}

#[async_trait]
impl Querier for PgQuerier {
    async fn query(&self, sql: &str, params: &[ParamValue]) -> anyhow::Result<Box<dyn Rows>> {
        let bound: Vec<Param<'_>> = params.iter().map(Param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self.client.query(sql, &refs).await?;
        Ok(Box::new(PgRows {
            rows: rows.into_iter(),
            index: 0,
        }))
    }
}

/// Rows already received from the server, decoded one at a time.
struct PgRows {
    rows: std::vec::IntoIter<Row>,
    index: usize,
}

#[async_trait]
impl Rows for PgRows {
    async fn next_row(&mut self) -> anyhow::Result<Option<Vec<NativeValue>>> {
        let Some(row) = self.rows.next() else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(row.len());
        for (i, column) in row.columns().iter().enumerate() {
            let cell: Option<Cell> = row.try_get(i).with_context(|| {
                format!(
                    "decoding column {} ({}) of row {}",
                    column.name(),
                    column.type_(),
                    self.index
                )
            })?;
            values.push(cell.map_or(NativeValue::Null, |c| c.0));
        }
        self.index += 1;
        Ok(Some(values))
    }
}

/// Accepts every column type and maps it onto `NativeValue`.
struct Cell(NativeValue);

impl<'a> FromSql<'a> for Cell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        native_from_sql(ty, raw).map(Cell)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn native_from_sql(ty: &Type, raw: &[u8]) -> Result<NativeValue, BoxError> {
    let value = match *ty {
        Type::BOOL => NativeValue::Bool(bool::from_sql(ty, raw)?),
        Type::INT2 => NativeValue::Int16(i16::from_sql(ty, raw)?),
        Type::INT4 => NativeValue::Int32(i32::from_sql(ty, raw)?),
        Type::INT8 => NativeValue::Int64(i64::from_sql(ty, raw)?),
        Type::OID => NativeValue::Int64(u32::from_sql(ty, raw)? as i64),
        Type::FLOAT4 => NativeValue::Float32(f32::from_sql(ty, raw)?),
        Type::FLOAT8 => NativeValue::Float64(f64::from_sql(ty, raw)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            NativeValue::Text(String::from_sql(ty, raw)?)
        }
        Type::JSON | Type::JSONB => NativeValue::Json(serde_json::Value::from_sql(ty, raw)?),
        Type::UUID => NativeValue::Uuid(uuid::Uuid::from_sql(ty, raw)?.into_bytes()),
        Type::NUMERIC => NativeValue::Numeric(numeric_to_string(raw)?),
        Type::BYTEA => NativeValue::Bytes(raw.to_vec()),
        Type::DATE => NativeValue::Text(NaiveDate::from_sql(ty, raw)?.to_string()),
        Type::TIME => {
            NativeValue::Text(NaiveTime::from_sql(ty, raw)?.format("%H:%M:%S%.f").to_string())
        }
        Type::TIMESTAMP => NativeValue::Text(
            NaiveDateTime::from_sql(ty, raw)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        Type::TIMESTAMPTZ => NativeValue::Text(
            DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
        _ => match ty.kind() {
            Kind::Domain(base) => return native_from_sql(base, raw),
            Kind::Array(_) => match Vec::<Option<Cell>>::from_sql(ty, raw) {
                Ok(items) => NativeValue::Json(serde_json::Value::Array(
                    items
                        .into_iter()
                        .map(|item| {
                            item.map_or(serde_json::Value::Null, |c| native_to_json(c.0))
                        })
                        .collect(),
                )),
                // multi-dimensional arrays
                Err(_) => other(ty, raw),
            },
            Kind::Enum(_) => NativeValue::Text(std::str::from_utf8(raw)?.to_string()),
            _ => other(ty, raw),
        },
    };
    Ok(value)
}

fn other(ty: &Type, raw: &[u8]) -> NativeValue {
    NativeValue::Other {
        type_name: ty.name().to_string(),
        value: serde_json::Value::String(STANDARD.encode(raw)),
    }
}

/// JSON form of an array element. Numerics stay strings to keep their digits.
fn native_to_json(value: NativeValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        NativeValue::Null => Value::Null,
        NativeValue::Text(s) | NativeValue::Numeric(s) => Value::String(s),
        NativeValue::Bool(b) => Value::Bool(b),
        NativeValue::Int16(v) => Value::from(v),
        NativeValue::Int32(v) => Value::from(v),
        NativeValue::Int64(v) => Value::from(v),
        NativeValue::Float32(v) => Value::from(v as f64),
        NativeValue::Float64(v) => Value::from(v),
        NativeValue::Json(v) => v,
        NativeValue::Uuid(bytes) => {
            Value::String(uuid::Uuid::from_bytes(bytes).hyphenated().to_string())
        }
        NativeValue::Bytes(bytes) => Value::String(STANDARD.encode(bytes)),
        NativeValue::Other { value, .. } => value,
    }
}

/// Renders the binary `numeric` representation as exact decimal text.
fn numeric_to_string(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let read_u16 = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
    let ndigits = read_u16(0) as usize;
    let weight = read_u16(2) as i16 as i32;
    let sign = read_u16(4);
    let dscale = read_u16(6) as usize;
    if raw.len() != 8 + ndigits * 2 {
        return Err(format!("numeric with {ndigits} digits has {} bytes", raw.len()).into());
    }
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let digits: Vec<u16> = (0..ndigits).map(|i| read_u16(8 + i * 2)).collect();
    let digit = |index: i32| {
        usize::try_from(index)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && digits.iter().any(|d| *d != 0) {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                let _ = write!(out, "{}", digit(i));
            } else {
                let _ = write!(out, "{:04}", digit(i));
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut group = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", digit(group));
            group += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// Binds a `ParamValue` to whatever type the server inferred for its
/// placeholder, narrowing integers and falling back to text.
#[derive(Debug)]
struct Param<'a>(&'a ParamValue);

impl ToSql for Param<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            ParamValue::Null => Ok(IsNull::Yes),
            ParamValue::Bool(v) if *ty == Type::BOOL => v.to_sql(ty, out),
            ParamValue::Int64(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::INT8 => v.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                _ => bind_text(self.0, ty, out),
            },
            ParamValue::Float64(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => v.to_sql(ty, out),
                _ => bind_text(self.0, ty, out),
            },
            ParamValue::Text(s) => match *ty {
                Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
                }
                _ => bind_text(self.0, ty, out),
            },
            ParamValue::Uuid(v) if *ty == Type::UUID => v.to_sql(ty, out),
            _ => bind_text(self.0, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn bind_text(value: &ParamValue, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if !is_text(ty) {
        return Err(format!("cannot bind {value} to a parameter of type {ty}").into());
    }
    let text = match value {
        ParamValue::Text(s) => s.clone(),
        ParamValue::Uuid(u) => u.hyphenated().to_string(),
        other => other.to_string(),
    };
    text.as_str().to_sql(ty, out)
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}
