#![cfg(feature = "excel")]

//! Spreadsheet (`.xlsx`, `.xls`, `.xlsm`, `.xlsb`) extraction.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto, open_workbook_auto_from_rs};

use crate::config::{ReadOptions, SheetSelection};
use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, Value, parse_timestamp};

use super::frame::{Inference, build_dataset, split_header};
use super::provenance::provenance_prefix;

/// One extracted sheet. `sheet` is set only for multi-sheet selections.
#[derive(Debug, Clone)]
pub struct SheetTable {
    pub sheet: Option<String>,
    pub data: DataSet,
}

/// Extract the selected sheet(s) of a workbook.
///
/// Behavior:
/// - [`SheetSelection::First`] and [`SheetSelection::Sheet`] yield one untagged table
/// - [`SheetSelection::All`] and [`SheetSelection::Sheets`] yield one table per sheet, and the
///   sheet name is appended to the provenance prefix of its rows
/// - Leading blank rows of a sheet count towards row numbers, so provenance matches the
///   row a spreadsheet program would show
pub fn extract_excel_from_path(
    path: impl AsRef<Path>,
    stem: &str,
    options: &ReadOptions,
) -> IngestionResult<Vec<SheetTable>> {
    let mut workbook = open_workbook_auto(path)?;
    extract_workbook(&mut workbook, stem, options)
}

/// Same as [`extract_excel_from_path`] over a workbook held in memory.
pub fn extract_excel_from_bytes(
    bytes: Vec<u8>,
    stem: &str,
    options: &ReadOptions,
) -> IngestionResult<Vec<SheetTable>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    extract_workbook(&mut workbook, stem, options)
}

fn extract_workbook<RS: Read + Seek>(
    workbook: &mut Sheets<RS>,
    stem: &str,
    options: &ReadOptions,
) -> IngestionResult<Vec<SheetTable>> {
    let available = workbook.sheet_names();
    let sheets: Vec<String> = match &options.sheets {
        SheetSelection::First => available.first().cloned().into_iter().collect(),
        SheetSelection::Sheet(name) => vec![name.clone()],
        SheetSelection::All => available.clone(),
        SheetSelection::Sheets(names) => names.clone(),
    };
    if sheets.is_empty() {
        return Err(IngestionError::Read {
            message: "workbook has no sheets".to_string(),
        });
    }

    let multi = options.sheets.is_multi();
    let mut out = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let range = workbook.worksheet_range(&sheet)?;
        let tag = multi.then_some(sheet.as_str());
        let data = sheet_to_dataset(&range, &provenance_prefix(stem, tag), options)
            .map_err(|e| with_sheet(&sheet, e))?;
        out.push(SheetTable {
            sheet: multi.then_some(sheet),
            data,
        });
    }
    Ok(out)
}

/// Turn one worksheet range into a [`DataSet`] tagged with `prefix`.
pub fn sheet_to_dataset(
    range: &Range<Data>,
    prefix: &str,
    options: &ReadOptions,
) -> IngestionResult<DataSet> {
    let leading = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let mut grid: Vec<Vec<Value>> = Vec::with_capacity(leading + range.height());
    grid.resize_with(leading, Vec::new);
    grid.extend(range.rows().map(|row| row.iter().map(cell_value).collect()));

    let table = split_header(grid, options)?;
    build_dataset(table, prefix, options, Inference::Spreadsheet)
}

fn with_sheet(sheet: &str, err: IngestionError) -> IngestionError {
    match err {
        IngestionError::Read { message } => IngestionError::Read {
            message: format!("sheet '{sheet}': {message}"),
        },
        other => other,
    }
}

fn cell_value(c: &Data) -> Value {
    match c {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::Int64(*i),
        Data::Float(f) => Value::Float64(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::Utf8(s.clone()),
        Data::DateTime(dt) => {
            let converted = if dt.is_duration() {
                dt.as_duration().map(Value::Interval)
            } else {
                dt.as_datetime().map(Value::Timestamp)
            };
            converted.unwrap_or(Value::Null)
        }
        Data::DateTimeIso(s) => parse_timestamp(s)
            .map(Value::Timestamp)
            .unwrap_or_else(|| Value::Utf8(s.clone())),
        Data::DurationIso(s) => Value::Utf8(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::provenance::PROVENANCE_COLUMN;
    use crate::types::DataType;

    fn sheet(cells: &[((u32, u32), Data)]) -> Range<Data> {
        let mut range = Range::new((0, 0), (5, 1));
        for (pos, value) in cells {
            range.set_value(*pos, value.clone());
        }
        range
    }

    #[test]
    fn provenance_counts_header_and_blank_rows() {
        // Header in row 1, data in rows 2 and 6.
        let range = sheet(&[
            ((0, 0), Data::String("id".into())),
            ((0, 1), Data::String("amount".into())),
            ((1, 0), Data::Float(1.0)),
            ((1, 1), Data::Float(9.5)),
            ((5, 0), Data::Float(2.0)),
            ((5, 1), Data::Float(3.0)),
        ]);

        let ds = sheet_to_dataset(&range, "POS_2022", &ReadOptions::default()).unwrap();
        let source = ds.column(PROVENANCE_COLUMN).unwrap();
        assert_eq!(
            source,
            vec![
                &Value::Utf8("POS_2022:row:2".into()),
                &Value::Utf8("POS_2022:row:6".into())
            ]
        );
        assert_eq!(ds.schema.fields[0].data_type, DataType::Int64);
        assert_eq!(ds.schema.fields[1].data_type, DataType::Float64);
    }

    #[test]
    fn offset_range_keeps_absolute_row_numbers() {
        // Used range starts at row 3; two title rows above it are skipped.
        let mut range = Range::new((2, 0), (3, 0));
        range.set_value((2, 0), Data::String("name".into()));
        range.set_value((3, 0), Data::String("Ada".into()));

        let options = ReadOptions {
            skip_rows: 2,
            ..ReadOptions::default()
        };
        let ds = sheet_to_dataset(&range, "book", &options).unwrap();
        assert_eq!(ds.rows, vec![vec![
            Value::Utf8("Ada".into()),
            Value::Utf8("book:row:4".into())
        ]]);
    }

    #[test]
    fn mixed_cells_become_text() {
        let range = sheet(&[
            ((0, 0), Data::String("code".into())),
            ((1, 0), Data::Int(7)),
            ((2, 0), Data::String("A7".into())),
        ]);
        let ds = sheet_to_dataset(&range, "codes", &ReadOptions::default()).unwrap();
        assert_eq!(ds.schema.fields[0].data_type, DataType::Utf8);
        assert_eq!(ds.rows[0][0], Value::Utf8("7".into()));
    }
}
