//! Value conversion from source wire representations to destination values.
//!
//! Source adapters deliver row values as JSON scalars in the source's wire
//! shape: binary columns as hex strings, temporal columns as text with up to
//! nanosecond precision, bit columns as 0/1. This module normalizes each
//! value to the destination column type before it is written: hex becomes a
//! byte sequence (carried base64-encoded), sub-second timestamps are
//! truncated to 6-digit precision, bit(1) becomes a boolean.
//!
//! Conversion failures are mapping-level problems: the caller logs them and
//! falls back to the plain textual representation, the connector keeps going.

use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Timelike};
use serde_json::Value;

/// Convert one source value to its destination representation for
/// `dst_type` (a canonical destination type name from the catalog).
pub fn to_target_value(dst_type: &str, value: &Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match dst_type {
        "bytea" => convert_bytea(value),
        "boolean" => convert_boolean(value),
        "smallint" | "integer" | "bigint" => convert_integer(value),
        "real" | "double precision" | "numeric" | "money" => convert_float(value),
        "timestamp without time zone" => convert_timestamp(value, false),
        "timestamp with time zone" => convert_timestamp(value, true),
        "time without time zone" | "time with time zone" => convert_time(value),
        "jsonb" => convert_jsonb(value),
        "uuid" => match value {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(bad(dst_type, other)),
        },
        // date, interval, bit, text and friends pass through unchanged
        _ => Ok(value.clone()),
    }
}

/// Textual fallback used when conversion fails: the raw value rendered as a
/// plain string.
pub fn textual_fallback(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

fn convert_bytea(value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => {
            let hex_str = s.strip_prefix("0x").unwrap_or(s);
            let bytes = hex::decode(hex_str)
                .map_err(|e| Error::Mapping(format!("invalid hex literal '{}': {}", s, e)))?;
            Ok(Value::String(BASE64.encode(bytes)))
        }
        other => Err(bad("bytea", other)),
    }
}

fn convert_boolean(value: &Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Number(n) => Ok(Value::Bool(n.as_i64().unwrap_or(0) != 0)),
        Value::String(s) => match s.trim() {
            "1" | "t" | "true" | "TRUE" => Ok(Value::Bool(true)),
            "0" | "f" | "false" | "FALSE" => Ok(Value::Bool(false)),
            _ => Err(bad("boolean", value)),
        },
        other => Err(bad("boolean", other)),
    }
}

fn convert_integer(value: &Value) -> Result<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => {
            // doubles with integral values are accepted
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(bad("integer", value)),
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| bad("integer", value)),
        Value::Bool(b) => Ok(Value::from(*b as i64)),
        other => Err(bad("integer", other)),
    }
}

fn convert_float(value: &Value) -> Result<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let f: f64 = s.trim().parse().map_err(|_| bad("numeric", value))?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| bad("numeric", value))
        }
        other => Err(bad("numeric", other)),
    }
}

/// Parse a source timestamp and truncate sub-second digits to microsecond
/// precision, which is what the destination store keeps.
fn convert_timestamp(value: &Value, with_tz: bool) -> Result<Value> {
    let s = match value {
        Value::String(s) => s.trim(),
        other => return Err(bad("timestamp", other)),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        let truncated = dt.with_nanosecond(micros_of(dt.nanosecond())).unwrap_or(dt);
        let out = if with_tz {
            truncated.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
        } else {
            truncated
                .naive_utc()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string()
        };
        return Ok(Value::String(out));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            let truncated = dt.with_nanosecond(micros_of(dt.nanosecond())).unwrap_or(dt);
            let out = if with_tz {
                format!("{}+00:00", truncated.format("%Y-%m-%d %H:%M:%S%.6f"))
            } else {
                truncated.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
            };
            return Ok(Value::String(out));
        }
    }

    Err(bad("timestamp", value))
}

fn convert_time(value: &Value) -> Result<Value> {
    let s = match value {
        Value::String(s) => s.trim(),
        other => return Err(bad("time", other)),
    };
    let t = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| bad("time", value))?;
    let truncated = t.with_nanosecond(micros_of(t.nanosecond())).unwrap_or(t);
    Ok(Value::String(truncated.format("%H:%M:%S%.6f").to_string()))
}

fn convert_jsonb(value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| Error::Mapping(format!("invalid json document: {}", e))),
        other => Ok(other.clone()),
    }
}

fn micros_of(nanos: u32) -> u32 {
    nanos / 1000 * 1000
}

fn bad(dst_type: &str, value: &Value) -> Error {
    Error::Mapping(format!("cannot convert {} to {}", value, dst_type))
}
