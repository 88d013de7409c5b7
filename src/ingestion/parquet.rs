//! Parquet extraction.
//!
//! Columnar files carry their own column names and physical types, so only dtype overrides and
//! provenance are applied on top of the rows read through the record API.

use std::collections::HashMap;
use std::path::Path;

use chrono::DateTime;
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::Field;

use crate::config::ReadOptions;
use crate::error::IngestionResult;
use crate::types::{DataSet, Value};

use super::frame::{Inference, RawTable, build_dataset};

/// Extract a Parquet file into a [`DataSet`] whose rows are tagged with `prefix`.
///
/// Notes:
/// - Column names are the top-level fields of the file schema
/// - Uses the Parquet record API (`RowIter`); nested values are rendered as text
pub fn extract_parquet_from_path(
    path: impl AsRef<Path>,
    prefix: &str,
    options: &ReadOptions,
) -> IngestionResult<DataSet> {
    let reader = SerializedFileReader::try_from(path.as_ref())?;

    let names: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema()
        .get_fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for row_res in reader.into_iter() {
        let row = row_res?;

        let mut map: HashMap<&str, &Field> = HashMap::new();
        for (name, field) in row.get_column_iter() {
            map.insert(name.as_str(), field);
        }

        rows.push(
            names
                .iter()
                .map(|n| map.get(n.as_str()).map_or(Value::Null, |f| field_value(f)))
                .collect(),
        );
    }

    build_dataset(RawTable::dense(names, rows), prefix, options, Inference::Typed)
}

fn field_value(f: &Field) -> Value {
    match f {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(v) => Value::Int64(i64::from(*v)),
        Field::Short(v) => Value::Int64(i64::from(*v)),
        Field::Int(v) => Value::Int64(i64::from(*v)),
        Field::Long(v) => Value::Int64(*v),
        Field::UByte(v) => Value::Int64(i64::from(*v)),
        Field::UShort(v) => Value::Int64(i64::from(*v)),
        Field::UInt(v) => Value::Int64(i64::from(*v)),
        Field::ULong(v) => i64::try_from(*v)
            .map(Value::Int64)
            .unwrap_or(Value::Float64(*v as f64)),
        Field::Float(v) => Value::Float64(f64::from(*v)),
        Field::Double(v) => Value::Float64(*v),
        Field::Str(s) => Value::Utf8(s.clone()),
        Field::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms)
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .unwrap_or(Value::Null),
        Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us)
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .unwrap_or(Value::Null),
        Field::Date(days) => DateTime::from_timestamp(i64::from(*days) * 86_400, 0)
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .unwrap_or(Value::Null),
        other => Value::Utf8(other.to_string()),
    }
}
