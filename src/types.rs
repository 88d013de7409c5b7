//! Core data model types shared by extraction, loading and consolidation.
//!
//! Extracted files become in-memory [`DataSet`]s: an ordered [`Schema`] of typed [`Field`]s plus
//! row-major [`Value`] storage. Column types are inferred at read time (or forced through
//! per-column overrides) and later mapped to relational column types by [`crate::store`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Native (in-memory) data type of a column.
///
/// The serialized form is the dtype label understood by [`crate::store::align_types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// UTF-8 string.
    #[serde(rename = "object", alias = "str", alias = "string")]
    Utf8,
    /// 64-bit signed integer.
    #[serde(rename = "int64", alias = "int")]
    Int64,
    /// 64-bit floating point number.
    #[serde(rename = "float64", alias = "float")]
    Float64,
    /// Boolean.
    #[serde(rename = "bool")]
    Bool,
    /// Date and time without a zone.
    #[serde(rename = "datetime64[ns]", alias = "datetime")]
    Timestamp,
    /// Signed duration.
    #[serde(rename = "timedelta64[ns]", alias = "timedelta")]
    Interval,
    /// UUID.
    #[serde(rename = "UUID", alias = "uuid")]
    Uuid,
}

impl DataType {
    /// The native dtype label, e.g. `int64` or `datetime64[ns]`.
    pub fn label(self) -> &'static str {
        match self {
            DataType::Utf8 => "object",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Bool => "bool",
            DataType::Timestamp => "datetime64[ns]",
            DataType::Interval => "timedelta64[ns]",
            DataType::Uuid => "UUID",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields describing the shape of a [`DataSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// `(column, dtype label)` pairs in field order.
    pub fn native_labels(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.data_type.label().to_string()))
            .collect()
    }
}

/// A single typed value in a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Date and time without a zone.
    Timestamp(NaiveDateTime),
    /// Signed duration.
    Interval(TimeDelta),
    /// UUID.
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The native type of a non-null value.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Bool(_) => Some(DataType::Bool),
            Value::Utf8(_) => Some(DataType::Utf8),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Interval(_) => Some(DataType::Interval),
            Value::Uuid(_) => Some(DataType::Uuid),
        }
    }

    /// Total ordering used for sorting and min/max.
    ///
    /// Nulls sort after every other value. Integers and floats compare numerically; values of
    /// unrelated types fall back to a fixed type rank.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).total_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.total_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Interval(a), Value::Interval(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int64(_) | Value::Float64(_) => 1,
            Value::Timestamp(_) => 2,
            Value::Interval(_) => 3,
            Value::Uuid(_) => 4,
            Value::Utf8(_) => 5,
            Value::Null => 6,
        }
    }

    /// Render as text, the way the value is written into text columns.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Utf8(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// JSON rendering used by the `unique` aggregation.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Utf8(s) => f.write_str(s),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            Value::Interval(d) => write!(f, "{d}"),
            Value::Uuid(u) => write!(f, "{u}"),
        }
    }
}

/// Parse an ISO-like date or date-time string (`2024-01-31`, `2024-01-31 08:15:00.250`,
/// `2024-01-31T08:15:00`, RFC 3339 with offset).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const DATE_TIME: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ];
    const DATE: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

    let s = s.trim();
    DATE_TIME
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            DATE.iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the dataset.
    pub fn column_count(&self) -> usize {
        self.schema.fields.len()
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(|r| r.get(idx).unwrap_or(&Value::Null)).collect())
    }

    /// Stack datasets vertically, aligning columns by name.
    ///
    /// The output schema is the union of the input columns in first-seen order. A column that
    /// appears with different types in different inputs becomes text. Cells missing from an
    /// input are null.
    pub fn concat(parts: &[DataSet]) -> DataSet {
        let mut fields: Vec<Field> = Vec::new();
        for part in parts {
            for f in &part.schema.fields {
                match fields.iter_mut().find(|g| g.name == f.name) {
                    Some(existing) if existing.data_type != f.data_type => {
                        existing.data_type = DataType::Utf8;
                    }
                    Some(_) => {}
                    None => fields.push(f.clone()),
                }
            }
        }
        let schema = Schema::new(fields);

        let mut rows = Vec::with_capacity(parts.iter().map(DataSet::row_count).sum());
        for part in parts {
            let projection: Vec<Option<usize>> = schema
                .fields
                .iter()
                .map(|f| part.schema.index_of(&f.name))
                .collect();
            for row in &part.rows {
                let out = projection
                    .iter()
                    .zip(&schema.fields)
                    .map(|(idx, field)| {
                        let v = idx.and_then(|i| row.get(i)).cloned().unwrap_or(Value::Null);
                        match (&v, field.data_type) {
                            (Value::Null, _) | (Value::Utf8(_), DataType::Utf8) => v,
                            (_, DataType::Utf8) => Value::Utf8(v.to_string()),
                            _ => v,
                        }
                    })
                    .collect();
                rows.push(out);
            }
        }

        DataSet::new(schema, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_last_and_numbers_compare_across_int_and_float() {
        let mut values = vec![
            Value::Null,
            Value::Float64(2.5),
            Value::Int64(3),
            Value::Int64(1),
        ];
        values.sort_by(Value::total_cmp);
        assert_eq!(
            values,
            vec![
                Value::Int64(1),
                Value::Float64(2.5),
                Value::Int64(3),
                Value::Null
            ]
        );
    }

    #[test]
    fn concat_unions_columns_by_name() {
        let a = DataSet::new(
            Schema::new(vec![Field::new("id", DataType::Int64)]),
            vec![vec![Value::Int64(1)]],
        );
        let b = DataSet::new(
            Schema::new(vec![
                Field::new("name", DataType::Utf8),
                Field::new("id", DataType::Utf8),
            ]),
            vec![vec![Value::Utf8("Ada".into()), Value::Utf8("x".into())]],
        );

        let out = DataSet::concat(&[a, b]);
        assert_eq!(out.schema.field_names().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(out.schema.fields[0].data_type, DataType::Utf8);
        assert_eq!(out.rows[0], vec![Value::Utf8("1".into()), Value::Null]);
        assert_eq!(
            out.rows[1],
            vec![Value::Utf8("x".into()), Value::Utf8("Ada".into())]
        );
    }

    #[test]
    fn timestamps_parse_with_and_without_time() {
        let day = parse_timestamp("2024-01-31").unwrap();
        assert_eq!(day.to_string(), "2024-01-31 00:00:00");
        let ts = parse_timestamp("2024-01-31T08:15:00").unwrap();
        assert_eq!(ts.to_string(), "2024-01-31 08:15:00");
        assert!(parse_timestamp("2024-01-31 08:15:00.250").is_some());
        assert!(parse_timestamp("31 Jan").is_none());
    }

    #[test]
    fn dtype_labels_deserialize() {
        let dt: DataType = serde_json::from_str("\"datetime64[ns]\"").unwrap();
        assert_eq!(dt, DataType::Timestamp);
        let dt: DataType = serde_json::from_str("\"int\"").unwrap();
        assert_eq!(dt, DataType::Int64);
    }
}
