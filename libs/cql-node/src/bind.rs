//! JSON parameters to CQL values.
//!
//! Prepared statements know the type of every bind marker, so each parameter is
//! converted to exactly that type (`int`, `uuid`, `timestamp`, `list<int>`, ...).
//! Unprepared statements have no metadata and use a fixed mapping instead.
//!
//! A top-level `null` binds as CQL `NULL`. Collections cannot hold `null`.

use crate::error::ExecutionError;
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use scylla::cluster::metadata::{CollectionType, ColumnType, NativeType};
use scylla::value::{
    Counter, CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlTimeuuid, CqlValue,
    CqlVarint,
};
use serde_json::Value;
use std::fmt::Display;
use std::net::IpAddr;
use uuid::Uuid;

/// `date` values count days from 1970-01-01 shifted by 2^31
const DATE_EPOCH: i64 = 1 << 31;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert `params` to the bind marker types of a prepared statement
pub(crate) fn bind_typed(
    types: &[&ColumnType<'_>],
    params: &[Value],
) -> Result<Vec<Option<CqlValue>>, ExecutionError> {
    if types.len() != params.len() {
        return Err(ExecutionError::Query(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            params.len()
        )));
    }

    types
        .iter()
        .zip(params)
        .enumerate()
        .map(|(index, (typ, value))| {
            nullable(value, typ).map_err(|details| ExecutionError::Bind { index, details })
        })
        .collect()
}

/// Convert `params` without type information
pub(crate) fn bind_untyped(params: &[Value]) -> Result<Vec<Option<CqlValue>>, ExecutionError> {
    params
        .iter()
        .enumerate()
        .map(|(index, value)| {
            json_to_cql(value).map_err(|details| ExecutionError::Bind { index, details })
        })
        .collect()
}

/// Integers bind as `bigint`, other numbers as `double`, arrays as lists and
/// objects as text-keyed maps
pub(crate) fn json_to_cql(value: &Value) -> Result<Option<CqlValue>, String> {
    let converted = match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => CqlValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => CqlValue::BigInt(i),
            None => CqlValue::Double(n.as_f64().ok_or_else(|| mismatch("a number", value))?),
        },
        Value::String(s) => CqlValue::Text(s.clone()),
        Value::Array(items) => CqlValue::List(
            items
                .iter()
                .map(|item| json_to_cql(item)?.ok_or_else(null_element))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(fields) => CqlValue::Map(
            fields
                .iter()
                .map(|(key, item)| {
                    let item = json_to_cql(item)?.ok_or_else(null_element)?;
                    Ok::<_, String>((CqlValue::Text(key.clone()), item))
                })
                .collect::<Result<_, _>>()?,
        ),
    };
    Ok(Some(converted))
}

fn nullable(value: &Value, typ: &ColumnType<'_>) -> Result<Option<CqlValue>, String> {
    if value.is_null() {
        return Ok(None);
    }
    typed(value, typ).map(Some)
}

fn typed(value: &Value, typ: &ColumnType<'_>) -> Result<CqlValue, String> {
    match typ {
        ColumnType::Native(native) => native_value(value, native),
        ColumnType::Collection {
            typ: CollectionType::List(element),
            ..
        } => elements(value, element).map(CqlValue::List),
        ColumnType::Collection {
            typ: CollectionType::Set(element),
            ..
        } => elements(value, element).map(CqlValue::Set),
        ColumnType::Collection {
            typ: CollectionType::Map(key, item),
            ..
        } => entries(value, key, item).map(CqlValue::Map),
        ColumnType::Tuple(types) => {
            let items = value.as_array().ok_or_else(|| mismatch("an array", value))?;
            if items.len() != types.len() {
                return Err(format!(
                    "expected a tuple of {} elements, got {}",
                    types.len(),
                    items.len()
                ));
            }
            items
                .iter()
                .zip(types)
                .map(|(item, typ)| nullable(item, typ))
                .collect::<Result<_, _>>()
                .map(CqlValue::Tuple)
        }
        other => Err(format!("{:?} parameters are not supported", other)),
    }
}

fn elements(value: &Value, typ: &ColumnType<'_>) -> Result<Vec<CqlValue>, String> {
    let items = value.as_array().ok_or_else(|| mismatch("an array", value))?;
    items
        .iter()
        .map(|item| {
            if item.is_null() {
                return Err(null_element());
            }
            typed(item, typ)
        })
        .collect()
}

fn entries(
    value: &Value,
    key_type: &ColumnType<'_>,
    item_type: &ColumnType<'_>,
) -> Result<Vec<(CqlValue, CqlValue)>, String> {
    let fields = value.as_object().ok_or_else(|| mismatch("an object", value))?;
    fields
        .iter()
        .map(|(key, item)| {
            if item.is_null() {
                return Err(null_element());
            }
            Ok((typed(&map_key(key, key_type), key_type)?, typed(item, item_type)?))
        })
        .collect()
}

/// JSON object keys are always strings; non-text keys are read back as JSON first
fn map_key(key: &str, typ: &ColumnType<'_>) -> Value {
    match typ {
        ColumnType::Native(NativeType::Ascii | NativeType::Text) => Value::String(key.to_string()),
        _ => serde_json::from_str(key).unwrap_or_else(|_| Value::String(key.to_string())),
    }
}

fn native_value(value: &Value, typ: &NativeType) -> Result<CqlValue, String> {
    let name = cql_name(typ);
    match typ {
        NativeType::Text => Ok(CqlValue::Text(string(value, &name)?.to_string())),
        NativeType::Ascii => {
            let s = string(value, &name)?;
            if !s.is_ascii() {
                return Err(format!("{:?} is not ascii", s));
            }
            Ok(CqlValue::Ascii(s.to_string()))
        }
        NativeType::Boolean => value
            .as_bool()
            .map(CqlValue::Boolean)
            .ok_or_else(|| mismatch(&name, value)),
        NativeType::TinyInt => integer(value, &name).map(CqlValue::TinyInt),
        NativeType::SmallInt => integer(value, &name).map(CqlValue::SmallInt),
        NativeType::Int => integer(value, &name).map(CqlValue::Int),
        NativeType::BigInt => integer(value, &name).map(CqlValue::BigInt),
        NativeType::Counter => integer(value, &name).map(|n| CqlValue::Counter(Counter(n))),
        NativeType::Varint => integer::<i64>(value, &name)
            .map(|n| CqlValue::Varint(CqlVarint::from_signed_bytes_be(n.to_be_bytes().to_vec()))),
        NativeType::Float => float(value, &name).map(|f| CqlValue::Float(f as f32)),
        NativeType::Double => float(value, &name).map(CqlValue::Double),
        NativeType::Decimal => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.trim().to_string(),
                _ => return Err(mismatch(&name, value)),
            };
            decimal(&text)
                .map(CqlValue::Decimal)
                .ok_or_else(|| format!("{:?} is not a decimal", text))
        }
        NativeType::Timestamp => {
            timestamp(value, &name).map(|ms| CqlValue::Timestamp(CqlTimestamp(ms)))
        }
        NativeType::Date => date(value, &name).map(|d| CqlValue::Date(CqlDate(d))),
        NativeType::Time => time(value, &name).map(|ns| CqlValue::Time(CqlTime(ns))),
        NativeType::Duration => duration(value, &name).map(CqlValue::Duration),
        NativeType::Uuid => uuid(value, &name).map(CqlValue::Uuid),
        NativeType::Timeuuid => {
            let id = uuid(value, &name)?;
            if id.get_version_num() != 1 {
                return Err(format!("{} is not a time-based uuid", id));
            }
            Ok(CqlValue::Timeuuid(CqlTimeuuid::from(id)))
        }
        NativeType::Inet => {
            let s = string(value, &name)?;
            s.parse::<IpAddr>()
                .map(CqlValue::Inet)
                .map_err(|e| format!("{:?}: {}", s, e))
        }
        NativeType::Blob => {
            let s = string(value, &name)?;
            let digits = s
                .strip_prefix("0x")
                .ok_or_else(|| format!("blob {:?} must be a 0x-prefixed hex string", s))?;
            const_hex::decode(digits)
                .map(CqlValue::Blob)
                .map_err(|e| format!("{:?}: {}", s, e))
        }
        _ => Err(format!("{} parameters are not supported", name)),
    }
}

fn cql_name(typ: &NativeType) -> String {
    format!("{:?}", typ).to_lowercase()
}

fn string<'v>(value: &'v Value, name: &str) -> Result<&'v str, String> {
    value.as_str().ok_or_else(|| mismatch(name, value))
}

/// JSON integer or a string holding one
fn integer<T: TryFrom<i64>>(value: &Value, name: &str) -> Result<T, String> {
    let n = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| mismatch(name, value))?;
    T::try_from(n).map_err(|_| format!("{} is out of range for {}", n, name))
}

fn float(value: &Value, name: &str) -> Result<f64, String> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    f.ok_or_else(|| mismatch(name, value))
}

fn decimal(text: &str) -> Option<CqlDecimal> {
    let (mantissa, exponent) = match text.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().ok()?),
        None => (text, 0),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let unscaled: i128 = format!("{}{}", whole, fraction).parse().ok()?;
    let scale = i32::try_from(fraction.len()).ok()?.checked_sub(exponent)?;
    Some(CqlDecimal::from_signed_be_bytes_and_exponent(
        unscaled.to_be_bytes().to_vec(),
        scale,
    ))
}

/// Milliseconds since the epoch, or an RFC 3339 string
fn timestamp(value: &Value, name: &str) -> Result<i64, String> {
    if let Value::String(s) = value {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
            return Ok(dt.timestamp_millis());
        }
    }
    integer(value, name)
}

/// Days since the epoch, or `YYYY-MM-DD`
fn date(value: &Value, name: &str) -> Result<u32, String> {
    let days = match value {
        Value::String(s) if s.contains('-') && !s.trim_start().starts_with('-') => {
            let day = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| format!("{:?}: {}", s, e))?;
            day.signed_duration_since(DateTime::<Utc>::UNIX_EPOCH.date_naive())
                .num_days()
        }
        _ => integer(value, name)?,
    };
    days.checked_add(DATE_EPOCH)
        .and_then(|shifted| u32::try_from(shifted).ok())
        .ok_or_else(|| format!("{} days is out of range for date", days))
}

/// Nanoseconds since midnight, or `HH:MM:SS[.fraction]`
fn time(value: &Value, name: &str) -> Result<i64, String> {
    if let Value::String(s) = value {
        if s.contains(':') {
            let t = NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .map_err(|e| format!("{:?}: {}", s, e))?;
            return Ok(i64::from(t.num_seconds_from_midnight()) * NANOS_PER_SECOND
                + i64::from(t.nanosecond()));
        }
    }
    integer(value, name)
}

/// `{ "months": .., "days": .., "nanoseconds": .. }`, missing fields are zero
fn duration(value: &Value, name: &str) -> Result<CqlDuration, String> {
    let fields = value.as_object().ok_or_else(|| mismatch(name, value))?;
    let field = |key: &str| fields.get(key).map_or(Ok(0), |v| integer::<i64>(v, key));
    Ok(CqlDuration {
        months: i32::try_from(field("months")?).map_err(|e| e.to_string())?,
        days: i32::try_from(field("days")?).map_err(|e| e.to_string())?,
        nanoseconds: field("nanoseconds")?,
    })
}

fn uuid(value: &Value, name: &str) -> Result<Uuid, String> {
    let s = string(value, name)?;
    Uuid::parse_str(s.trim()).map_err(|e| format!("{:?}: {}", s, e))
}

fn mismatch(expected: impl Display, value: &Value) -> String {
    format!("expected {}, got {}", expected, value)
}

fn null_element() -> String {
    "collections cannot contain null".to_string()
}
