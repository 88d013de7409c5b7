//! Row provenance strings.
//!
//! Every extracted row carries `"<stem>[<sheet>]:row:<n>"` in the [`PROVENANCE_COLUMN`], where
//! `n` is the 1-based row number in the source file (header and skipped rows included), so a
//! value can be traced back to the literal cell it came from.

use std::collections::BTreeMap;

use crate::types::Value;

/// Name of the provenance column appended to every extracted table.
pub const PROVENANCE_COLUMN: &str = "Source";

/// Separator between the file/sheet prefix and the row number.
pub const ROW_MARKER: &str = ":row:";

/// Prefix for rows of `stem`, or of one sheet of it.
pub fn provenance_prefix(stem: &str, sheet: Option<&str>) -> String {
    match sheet {
        Some(sheet) => format!("{stem}{sheet}"),
        None => stem.to_string(),
    }
}

/// 1-based source row number of the `index`-th data row (0-based) after `skip_rows` skipped
/// rows and a header at `header` (counted after skipping).
pub fn source_row_number(index: usize, skip_rows: usize, header: usize) -> usize {
    index + 2 + skip_rows + header
}

pub fn provenance(prefix: &str, row_number: usize) -> String {
    format!("{prefix}{ROW_MARKER}{row_number}")
}

/// Split a provenance string into its prefix and row number.
pub fn split_provenance(s: &str) -> Option<(&str, usize)> {
    let (prefix, row) = s.rsplit_once(ROW_MARKER)?;
    Some((prefix, row.trim().parse().ok()?))
}

/// Fold provenance strings into `{"<prefix>:row:": [rows...]}` rendered as JSON.
///
/// Rows keep first-seen order and are deduplicated per prefix. Values that are not provenance
/// strings are ignored; with none left the result is null.
pub fn summarize_provenance(values: &[&Value]) -> Value {
    let mut grouped: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for v in values {
        let Value::Utf8(s) = v else { continue };
        let Some((prefix, row)) = split_provenance(s) else {
            continue;
        };
        let rows = grouped.entry(format!("{prefix}{ROW_MARKER}")).or_default();
        if !rows.contains(&row) {
            rows.push(row);
        }
    }
    if grouped.is_empty() {
        return Value::Null;
    }
    match serde_json::to_string(&grouped) {
        Ok(s) => Value::Utf8(s),
        Err(_) => Value::Null,
    }
}
