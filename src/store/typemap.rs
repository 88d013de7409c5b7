//! Bidirectional map between native dtype labels and relational column types.

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::types::DataType;

/// Direction of [`align_types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDirection {
    /// Native dtype label (`int64`, `datetime64[ns]`, ...) to relational type (`INT`, ...).
    ToRelational,
    /// Relational type to native dtype label.
    ToNative,
}

/// `(normalized native label, relational type, dtype)`.
const TYPE_MAP: &[(&str, &str, DataType)] = &[
    ("object", "text", DataType::Utf8),
    ("int", "INT", DataType::Int64),
    ("float", "numeric", DataType::Float64),
    ("bool", "boolean", DataType::Bool),
    ("datetime", "timestamp", DataType::Timestamp),
    ("timedelta", "interval", DataType::Interval),
    ("UUID", "UUID", DataType::Uuid),
];

/// Strip a bit width and anything after it: `int64 -> int`, `datetime64[ns] -> datetime`.
/// Labels without a letters-then-digits prefix are returned unchanged.
pub fn normalize_native_label(label: &str) -> &str {
    let letters = label
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map_or(label.len(), |(i, _)| i);
    let followed_by_digit = label[letters..].starts_with(|c: char| c.is_ascii_digit());
    if letters > 0 && followed_by_digit {
        &label[..letters]
    } else {
        label
    }
}

/// Relational column type for a native dtype label.
pub fn relational_type(label: &str) -> Option<&'static str> {
    let key = normalize_native_label(label);
    TYPE_MAP
        .iter()
        .find(|(native, _, _)| *native == key)
        .map(|(_, relational, _)| *relational)
}

/// Native dtype for a relational column type (case-insensitive).
pub fn native_type(relational: &str) -> Option<DataType> {
    TYPE_MAP
        .iter()
        .find(|(_, r, _)| r.eq_ignore_ascii_case(relational.trim()))
        .map(|(_, _, dtype)| *dtype)
}

/// Translate `(column, type)` pairs in either direction, preserving order.
///
/// Toward native types the canonical dtype label is produced (`INT -> int64`), so a forward
/// then backward pass returns the labels of a [`crate::types::Schema`] unchanged. A type with no
/// counterpart is [`StoreError::UnsupportedType`].
pub fn align_types(
    columns: &[(String, String)],
    direction: TypeDirection,
) -> StoreResult<Vec<(String, String)>> {
    columns
        .iter()
        .map(|(column, label)| {
            let mapped = match direction {
                TypeDirection::ToRelational => relational_type(label).map(str::to_string),
                TypeDirection::ToNative => native_type(label).map(|dt| dt.label().to_string()),
            };
            mapped.map(|t| (column.clone(), t)).ok_or_else(|| {
                debug!(column = %column, label = %label, ?direction, "no type mapping");
                StoreError::UnsupportedType {
                    column: column.clone(),
                    label: label.clone(),
                }
            })
        })
        .collect()
}
