//! Column transforms applied to a raw-dataset batch before it is loaded.
//!
//! A batch lists its steps in configuration order; [`apply_all`] runs them one after another
//! over the unioned source tables. Every step takes the whole [`DataSet`] and returns a new one,
//! so a failing step leaves nothing half-written.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::config::TransformConfig;
use crate::error::{TransformError, TransformResult};
use crate::ingestion::frame::coerce_value;
use crate::ingestion::summarize_provenance;
use crate::temporal::{AggregationRegistry, ConsolidationSpec, consolidate};
use crate::types::{DataSet, DataType, Field, Value};

/// One resolved transform step.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Rename columns; every old name must exist.
    Rename(BTreeMap<String, String>),
    /// Convert columns to a new dtype, cell by cell.
    Cast(BTreeMap<String, DataType>),
    /// Set each listed column to a constant, adding it when absent.
    Fill { columns: Vec<String>, value: Value },
    /// Change-point consolidation.
    Consolidate(ConsolidationSpec),
    /// Rewrite provenance cells as a `{"<prefix>:row:": [rows]}` summary.
    SummarizeSources { column: String },
}

impl Transform {
    /// Resolve a configured step. Aggregation tags go through `registry`.
    pub fn from_config(
        config: &TransformConfig,
        registry: &AggregationRegistry,
    ) -> TransformResult<Self> {
        Ok(match config {
            TransformConfig::RenameColumns { name_map } => Transform::Rename(name_map.clone()),
            TransformConfig::ChangeDataType { dtype_map } => Transform::Cast(dtype_map.clone()),
            TransformConfig::CreateColumnsWithDefaultValue {
                column_name,
                default_value,
            } => Transform::Fill {
                columns: column_name.clone(),
                value: default_from_json(default_value)?,
            },
            TransformConfig::Consolidate(c) => {
                Transform::Consolidate(ConsolidationSpec::from_config(c, registry)?)
            }
            TransformConfig::ListSourceToDict { source_col_name } => Transform::SummarizeSources {
                column: source_col_name.clone(),
            },
        })
    }

    pub fn apply(&self, data: DataSet) -> TransformResult<DataSet> {
        match self {
            Transform::Rename(map) => rename(data, map),
            Transform::Cast(map) => cast(data, map),
            Transform::Fill { columns, value } => Ok(fill(data, columns, value)),
            Transform::Consolidate(spec) => Ok(consolidate(&data, spec)?),
            Transform::SummarizeSources { column } => summarize_sources(data, column),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Rename(map) => {
                let pairs: Vec<String> = map.iter().map(|(a, b)| format!("{a}->{b}")).collect();
                write!(f, "rename_columns({})", pairs.join(", "))
            }
            Transform::Cast(map) => {
                let pairs: Vec<String> = map.iter().map(|(c, t)| format!("{c}={t}")).collect();
                write!(f, "change_data_type({})", pairs.join(", "))
            }
            Transform::Fill { columns, value } => {
                write!(f, "create_columns_with_default_value({}={value})", columns.join(", "))
            }
            Transform::Consolidate(spec) => write!(f, "{spec}"),
            Transform::SummarizeSources { column } => write!(f, "list_source_to_dict({column})"),
        }
    }
}

/// Resolve every step of a batch, stopping at the first bad one.
pub fn resolve_all(
    configs: &[TransformConfig],
    registry: &AggregationRegistry,
) -> TransformResult<Vec<Transform>> {
    configs
        .iter()
        .map(|c| Transform::from_config(c, registry))
        .collect()
}

/// Run `steps` in order.
pub fn apply_all(mut data: DataSet, steps: &[Transform]) -> TransformResult<DataSet> {
    for step in steps {
        let before = data.row_count();
        data = step.apply(data)?;
        debug!(step = %step, rows_in = before, rows_out = data.row_count(), "transform applied");
    }
    Ok(data)
}

/// Audit label for a batch: `union`, or the steps joined with `"; "`.
pub fn describe(steps: &[Transform]) -> String {
    if steps.is_empty() {
        return "union".to_string();
    }
    steps
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn default_from_json(v: &serde_json::Value) -> TransformResult<Value> {
    Ok(match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::String(s) => Value::Utf8(s.clone()),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            return Err(TransformError::InvalidDefault {
                message: format!("default value must be a scalar, got {v}"),
            });
        }
    })
}

fn rename(mut data: DataSet, map: &BTreeMap<String, String>) -> TransformResult<DataSet> {
    for old in map.keys() {
        if data.schema.index_of(old).is_none() {
            return Err(TransformError::MissingColumn {
                transform: "rename_columns",
                column: old.clone(),
            });
        }
    }
    let mut seen = HashSet::new();
    for field in &mut data.schema.fields {
        if let Some(new) = map.get(&field.name) {
            field.name = new.clone();
        }
        if !seen.insert(field.name.clone()) {
            return Err(TransformError::DuplicateColumn {
                transform: "rename_columns",
                column: field.name.clone(),
            });
        }
    }
    Ok(data)
}

fn cast(mut data: DataSet, map: &BTreeMap<String, DataType>) -> TransformResult<DataSet> {
    let mut targets = Vec::with_capacity(map.len());
    for (column, dtype) in map {
        let idx = data
            .schema
            .index_of(column)
            .ok_or_else(|| TransformError::MissingColumn {
                transform: "change_data_type",
                column: column.clone(),
            })?;
        targets.push((idx, *dtype));
    }
    for (idx, dtype) in targets {
        for (row, cells) in data.rows.iter_mut().enumerate() {
            let Some(cell) = cells.get_mut(idx) else { continue };
            match coerce_value(cell, dtype) {
                Ok(v) => *cell = v,
                Err(message) => {
                    return Err(TransformError::Cast {
                        column: data.schema.fields[idx].name.clone(),
                        row,
                        raw: cell.to_string(),
                        dtype,
                        message,
                    });
                }
            }
        }
        data.schema.fields[idx].data_type = dtype;
    }
    Ok(data)
}

fn fill(mut data: DataSet, columns: &[String], value: &Value) -> DataSet {
    let dtype = value.data_type().unwrap_or(DataType::Utf8);
    for column in columns {
        let idx = match data.schema.index_of(column) {
            Some(idx) => {
                data.schema.fields[idx].data_type = dtype;
                idx
            }
            None => {
                data.schema.fields.push(Field::new(column.clone(), dtype));
                data.schema.fields.len() - 1
            }
        };
        for row in &mut data.rows {
            if row.len() <= idx {
                row.resize(idx + 1, Value::Null);
            }
            row[idx] = value.clone();
        }
    }
    data
}

fn summarize_sources(mut data: DataSet, column: &str) -> TransformResult<DataSet> {
    let idx = data
        .schema
        .index_of(column)
        .ok_or_else(|| TransformError::MissingColumn {
            transform: "list_source_to_dict",
            column: column.to_string(),
        })?;
    for row in &mut data.rows {
        let Some(cell) = row.get_mut(idx) else { continue };
        if let Some(summary) = summarize_cell(cell) {
            *cell = summary;
        }
    }
    data.schema.fields[idx].data_type = DataType::Utf8;
    Ok(data)
}

/// `None` leaves the cell as it is: nulls, non-text values and summaries already in dict form.
fn summarize_cell(cell: &Value) -> Option<Value> {
    let Value::Utf8(text) = cell else { return None };
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        return None;
    }
    let sources: Vec<Value> = if trimmed.starts_with('[') {
        let list: Vec<serde_json::Value> = serde_json::from_str(trimmed).ok()?;
        list.into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(Value::Utf8(s)),
                _ => None,
            })
            .collect()
    } else {
        vec![cell.clone()]
    };
    let refs: Vec<&Value> = sources.iter().collect();
    Some(summarize_provenance(&refs))
}
