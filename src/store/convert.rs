//! Value conversion between [`crate::types::Value`] and SQLite storage.

use chrono::TimeDelta;
use rusqlite::types::{Value as SqlValue, ValueRef};
use uuid::Uuid;

use crate::types::{DataType, Value, parse_timestamp};

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Storage form of a value. Booleans are 0/1, timestamps ISO text, intervals microseconds.
pub(crate) fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Int64(i) => SqlValue::Integer(*i),
        Value::Float64(f) => SqlValue::Real(*f),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Utf8(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::Interval(d) => d
            .num_microseconds()
            .map(SqlValue::Integer)
            .unwrap_or_else(|| SqlValue::Text(d.to_string())),
        Value::Uuid(u) => SqlValue::Text(u.to_string()),
    }
}

/// Read a stored cell as `dtype`, or by its storage class when the column has no declared
/// type. Cells that do not fit the declared type keep their storage form.
pub(crate) fn from_sql(cell: ValueRef<'_>, dtype: Option<DataType>) -> Value {
    let raw = match cell {
        ValueRef::Null => return Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Utf8(String::from_utf8_lossy(t).into_owned()),
    };
    let Some(dtype) = dtype else { return raw };

    match (dtype, raw) {
        (DataType::Utf8, Value::Utf8(s)) => Value::Utf8(s),
        (DataType::Utf8, other) => Value::Utf8(other.to_string()),
        (DataType::Float64, Value::Int64(i)) => Value::Float64(i as f64),
        (DataType::Bool, Value::Int64(i)) => Value::Bool(i != 0),
        (DataType::Timestamp, Value::Utf8(s)) => parse_timestamp(&s)
            .map(Value::Timestamp)
            .unwrap_or(Value::Utf8(s)),
        (DataType::Interval, Value::Int64(us)) => Value::Interval(TimeDelta::microseconds(us)),
        (DataType::Uuid, Value::Utf8(s)) => Uuid::parse_str(&s)
            .map(Value::Uuid)
            .unwrap_or(Value::Utf8(s)),
        (_, other) => other,
    }
}
