//! Table assembly shared by the format readers.
//!
//! Readers turn a file into a grid of cells; this module applies the read options (skipped rows,
//! header row, dtype overrides), names and types the columns, and appends the provenance column.

use std::collections::HashSet;

use chrono::TimeDelta;
use uuid::Uuid;

use crate::config::ReadOptions;
use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, DataType, Field, Schema, Value, parse_timestamp};

use super::provenance::{PROVENANCE_COLUMN, provenance, source_row_number};

/// How cells are typed when a column has no dtype override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inference {
    /// Cells are raw text; booleans, integers, floats and dates are recognised in that order.
    Text,
    /// Cells carry spreadsheet types; a numeric column of whole numbers becomes integer.
    Spreadsheet,
    /// Cells are already typed by the file format.
    Typed,
}

/// Column names plus data rows of one table, before typing.
#[derive(Debug, Default)]
pub(crate) struct RawTable {
    pub names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// 0-based position of each row among the data rows of the source, blank rows included.
    pub positions: Vec<usize>,
}

impl RawTable {
    /// A table whose rows are numbered consecutively.
    pub fn dense(names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let positions = (0..rows.len()).collect();
        Self {
            names,
            rows,
            positions,
        }
    }
}

/// Drop `skip_rows` rows, take the `header`-th remaining row as column names and keep the rest
/// as data. Rows between the skipped block and the header are discarded, and so are blank data
/// rows, though they still count towards the row numbers of later rows.
pub(crate) fn split_header(grid: Vec<Vec<Value>>, options: &ReadOptions) -> IngestionResult<RawTable> {
    let total = grid.len();
    let mut rows = grid.into_iter().skip(options.skip_rows);
    let header = rows.nth(options.header).ok_or_else(|| IngestionError::Read {
        message: format!(
            "no header row at index {} after skipping {} of {total} rows",
            options.header, options.skip_rows
        ),
    })?;
    let (positions, rows): (Vec<usize>, Vec<Vec<Value>>) = rows
        .enumerate()
        .filter(|(_, row)| row.iter().any(|v| !v.is_null()))
        .unzip();

    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(header.len());
    Ok(RawTable {
        names: column_names(&header, width),
        rows,
        positions,
    })
}

/// Unique column names; blanks become `Unnamed: <i>` and repeats get a `.<n>` suffix.
pub(crate) fn column_names(header: &[Value], width: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    (0..width)
        .map(|i| {
            let base = match header.get(i).map(header_text) {
                Some(s) if !s.is_empty() => s,
                _ => format!("Unnamed: {i}"),
            };
            let mut name = base.clone();
            let mut n = 1;
            while !seen.insert(name.clone()) {
                name = format!("{base}.{n}");
                n += 1;
            }
            name
        })
        .collect()
}

fn header_text(v: &Value) -> String {
    match v {
        Value::Float64(f) if is_whole(*f) => (*f as i64).to_string(),
        Value::Utf8(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Type the columns of `table` and append the provenance column for rows of `prefix`.
///
/// An existing column named like the provenance column is overwritten in place.
pub(crate) fn build_dataset(
    table: RawTable,
    prefix: &str,
    options: &ReadOptions,
    inference: Inference,
) -> IngestionResult<DataSet> {
    let RawTable {
        names,
        rows,
        positions,
    } = table;
    let n_rows = rows.len();
    let row_number = |i: usize| {
        let pos = positions.get(i).copied().unwrap_or(i);
        source_row_number(pos, options.skip_rows, options.header)
    };

    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(n_rows); names.len()];
    for row in rows {
        let mut cells = row.into_iter();
        for col in columns.iter_mut() {
            col.push(cells.next().unwrap_or(Value::Null));
        }
    }

    let mut fields = Vec::with_capacity(names.len() + 1);
    let mut typed: Vec<Vec<Value>> = Vec::with_capacity(names.len() + 1);
    for (name, values) in names.into_iter().zip(columns) {
        let (dtype, values) = match options.dtypes.get(&name) {
            Some(&dtype) => {
                let values = coerce_column(&name, values, dtype, &row_number)?;
                (dtype, values)
            }
            None => infer_column(values, inference),
        };
        fields.push(Field::new(name, dtype));
        typed.push(values);
    }

    let tags: Vec<Value> = (0..n_rows)
        .map(|i| Value::Utf8(provenance(prefix, row_number(i))))
        .collect();
    match fields.iter().position(|f| f.name == PROVENANCE_COLUMN) {
        Some(idx) => {
            fields[idx].data_type = DataType::Utf8;
            typed[idx] = tags;
        }
        None => {
            fields.push(Field::new(PROVENANCE_COLUMN, DataType::Utf8));
            typed.push(tags);
        }
    }

    let mut out: Vec<Vec<Value>> = (0..n_rows).map(|_| Vec::with_capacity(typed.len())).collect();
    for col in typed {
        for (row, v) in out.iter_mut().zip(col) {
            row.push(v);
        }
    }
    Ok(DataSet::new(Schema::new(fields), out))
}

fn coerce_column(
    column: &str,
    values: Vec<Value>,
    dtype: DataType,
    row_number: &dyn Fn(usize) -> usize,
) -> IngestionResult<Vec<Value>> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            coerce_value(&v, dtype).map_err(|message| IngestionError::ParseError {
                row: row_number(i),
                column: column.to_string(),
                raw: v.to_string(),
                message,
            })
        })
        .collect()
}

/// Convert one cell to `dtype`.
pub(crate) fn coerce_value(v: &Value, dtype: DataType) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    match dtype {
        DataType::Utf8 => Ok(Value::Utf8(v.to_string())),
        DataType::Int64 => match v {
            Value::Int64(i) => Ok(Value::Int64(*i)),
            Value::Float64(f) if is_whole(*f) => Ok(Value::Int64(*f as i64)),
            Value::Bool(b) => Ok(Value::Int64(i64::from(*b))),
            Value::Utf8(s) => s.trim().parse::<i64>().map(Value::Int64).map_err(|e| e.to_string()),
            _ => Err("expected integer".to_string()),
        },
        DataType::Float64 => match v {
            Value::Float64(f) => Ok(Value::Float64(*f)),
            Value::Int64(i) => Ok(Value::Float64(*i as f64)),
            Value::Utf8(s) => s.trim().parse::<f64>().map(Value::Float64).map_err(|e| e.to_string()),
            _ => Err("expected number".to_string()),
        },
        DataType::Bool => match v {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Int64(i) => Ok(Value::Bool(*i != 0)),
            Value::Float64(f) => Ok(Value::Bool(*f != 0.0)),
            Value::Utf8(s) => parse_bool(s).map(Value::Bool),
            _ => Err("expected bool".to_string()),
        },
        DataType::Timestamp => match v {
            Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
            Value::Utf8(s) => parse_timestamp(s)
                .map(Value::Timestamp)
                .ok_or_else(|| "expected date or date-time".to_string()),
            _ => Err("expected date or date-time".to_string()),
        },
        DataType::Interval => match v {
            Value::Interval(d) => Ok(Value::Interval(*d)),
            Value::Int64(secs) => seconds(*secs),
            Value::Utf8(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| e.to_string())
                .and_then(seconds),
            _ => Err("expected duration in seconds".to_string()),
        },
        DataType::Uuid => match v {
            Value::Uuid(u) => Ok(Value::Uuid(*u)),
            Value::Utf8(s) => Uuid::parse_str(s.trim()).map(Value::Uuid).map_err(|e| e.to_string()),
            _ => Err("expected uuid".to_string()),
        },
    }
}

fn seconds(secs: i64) -> Result<Value, String> {
    TimeDelta::try_seconds(secs)
        .map(Value::Interval)
        .ok_or_else(|| format!("duration of {secs}s out of range"))
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}

fn infer_column(values: Vec<Value>, inference: Inference) -> (DataType, Vec<Value>) {
    match inference {
        Inference::Text => infer_text(values),
        Inference::Spreadsheet => unify(values, true),
        Inference::Typed => unify(values, false),
    }
}

type TextParser = fn(&str) -> Option<Value>;

const TEXT_PARSERS: [(DataType, TextParser); 4] = [
    (DataType::Bool, |s| {
        let s = s.trim();
        if s.eq_ignore_ascii_case("true") {
            Some(Value::Bool(true))
        } else if s.eq_ignore_ascii_case("false") {
            Some(Value::Bool(false))
        } else {
            None
        }
    }),
    (DataType::Int64, |s| s.trim().parse().ok().map(Value::Int64)),
    (DataType::Float64, |s| s.trim().parse().ok().map(Value::Float64)),
    (DataType::Timestamp, |s| parse_timestamp(s).map(Value::Timestamp)),
];

fn infer_text(values: Vec<Value>) -> (DataType, Vec<Value>) {
    if !values.iter().any(|v| matches!(v, Value::Utf8(_))) {
        return unify(values, false);
    }
    for (dtype, parse) in TEXT_PARSERS {
        let parsed: Option<Vec<Value>> = values
            .iter()
            .map(|v| match v {
                Value::Utf8(s) => parse(s),
                other => Some(other.clone()),
            })
            .collect();
        if let Some(parsed) = parsed {
            return (dtype, parsed);
        }
    }
    unify(values, false)
}

/// Settle a column of already-typed cells on one dtype.
///
/// Integers mixed with floats widen to float (or, with `collapse_whole`, stay integer when every
/// float is whole). Any other mix becomes text. An all-null column is text.
pub(crate) fn unify(values: Vec<Value>, collapse_whole: bool) -> (DataType, Vec<Value>) {
    let mut kinds: Vec<DataType> = Vec::new();
    for dt in values.iter().filter_map(Value::data_type) {
        if !kinds.contains(&dt) {
            kinds.push(dt);
        }
    }

    let numeric = kinds
        .iter()
        .all(|k| matches!(k, DataType::Int64 | DataType::Float64));
    match kinds.as_slice() {
        [] => (DataType::Utf8, values),
        [only] if *only != DataType::Float64 || !collapse_whole => (*only, values),
        _ if numeric => {
            let whole = values.iter().all(|v| match v {
                Value::Float64(f) => is_whole(*f),
                _ => true,
            });
            if collapse_whole && whole {
                let out = values
                    .into_iter()
                    .map(|v| match v {
                        Value::Float64(f) => Value::Int64(f as i64),
                        other => other,
                    })
                    .collect();
                (DataType::Int64, out)
            } else {
                let out = values
                    .into_iter()
                    .map(|v| match v {
                        Value::Int64(i) => Value::Float64(i as f64),
                        other => other,
                    })
                    .collect();
                (DataType::Float64, out)
            }
        }
        _ => {
            let out = values
                .into_iter()
                .map(|v| match v {
                    Value::Null | Value::Utf8(_) => v,
                    other => Value::Utf8(other.to_string()),
                })
                .collect();
            (DataType::Utf8, out)
        }
    }
}

fn is_whole(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15
}
