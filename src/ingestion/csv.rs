//! Delimited text (`.csv`, `.txt`) extraction.

use std::io::Read;
use std::path::Path;

use crate::config::ReadOptions;
use crate::error::IngestionResult;
use crate::types::{DataSet, Value};

use super::frame::{Inference, build_dataset, split_header};

/// Delimiter used when none is configured: tab for `.txt`, comma otherwise.
pub fn default_delimiter(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("txt") => b'\t',
        _ => b',',
    }
}

fn reader_builder(delimiter: u8) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(false).flexible(true).delimiter(delimiter);
    builder
}

fn delimiter_for(path: &Path, options: &ReadOptions) -> u8 {
    options
        .delimiter
        .and_then(|c| u8::try_from(c).ok())
        .unwrap_or_else(|| default_delimiter(path))
}

/// Extract a delimited text file into a [`DataSet`] whose rows are tagged with `prefix`.
///
/// Rules:
///
/// - `options.skip_rows` leading rows are dropped, then row `options.header` holds the names.
/// - Empty cells are null; other cells are trimmed.
/// - Columns without a dtype override are inferred (bool, integer, float, date-time, text).
pub fn extract_csv_from_path(
    path: impl AsRef<Path>,
    prefix: &str,
    options: &ReadOptions,
) -> IngestionResult<DataSet> {
    let path = path.as_ref();
    let mut rdr = reader_builder(delimiter_for(path, options)).from_path(path)?;
    extract_csv_from_reader(&mut rdr, prefix, options)
}

/// Same as [`extract_csv_from_path`] over bytes already in memory (e.g. a decrypted file).
pub fn extract_csv_from_bytes(
    path: &Path,
    bytes: &[u8],
    prefix: &str,
    options: &ReadOptions,
) -> IngestionResult<DataSet> {
    let mut rdr = reader_builder(delimiter_for(path, options)).from_reader(bytes);
    extract_csv_from_reader(&mut rdr, prefix, options)
}

/// Extract from an existing CSV reader. The reader must not consume a header row itself.
pub fn extract_csv_from_reader<R: Read>(
    rdr: &mut csv::Reader<R>,
    prefix: &str,
    options: &ReadOptions,
) -> IngestionResult<DataSet> {
    let mut grid: Vec<Vec<Value>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        grid.push(record.iter().map(cell_value).collect());
    }

    let table = split_header(grid, options)?;
    build_dataset(table, prefix, options, Inference::Text)
}

fn cell_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        Value::Utf8(trimmed.to_owned())
    }
}
