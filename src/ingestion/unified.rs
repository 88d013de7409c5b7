//! Unified extraction entrypoint.
//!
//! Most callers should use [`extract_from_path`] (one file) or [`extract_batch`] (a scheduled
//! batch of [`SourceFile`]s), which turn files into named, provenance-tagged tables.
//!
//! - If [`IngestionOptions::format`] is `None`, the format is inferred from the file extension.
//! - A configured password decrypts the file in memory before it is parsed.
//! - If an [`super::observability::IngestionObserver`] is provided, success/failure/alerts are
//!   reported to it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::SourceFile;
use crate::config::ReadFileConfig;
use crate::error::{IngestionError, IngestionResult};
use crate::types::DataSet;

use super::observability::{IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats};
use super::{csv, decrypt, parquet};

/// Supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionFormat {
    /// Delimited text (`.csv`, `.txt`).
    DelimitedText,
    /// Apache Parquet.
    Parquet,
    /// Spreadsheet/workbook formats (feature-gated behind `excel`).
    Spreadsheet,
}

impl IngestionFormat {
    /// Parse a format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "txt" => Some(Self::DelimitedText),
            "parquet" | "pq" => Some(Self::Parquet),
            "xlsx" | "xls" | "xlsm" | "xlsb" => Some(Self::Spreadsheet),
            _ => None,
        }
    }

    /// Infer the format of `path` from its extension.
    pub fn for_path(path: &Path) -> IngestionResult<Self> {
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or_default();
        Self::from_extension(ext).ok_or_else(|| IngestionError::Read {
            message: if ext.is_empty() {
                format!("'{}' has no extension to infer a format from", path.display())
            } else {
                format!("unsupported extension '{ext}' on '{}'", path.display())
            },
        })
    }
}

/// Options controlling unified extraction behavior.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct IngestionOptions {
    /// If `None`, auto-detect format from file extension.
    pub format: Option<IngestionFormat>,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for IngestionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionOptions")
            .field("format", &self.format)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            format: None,
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

/// One table extracted from a source file.
#[derive(Debug, Clone)]
pub struct ExtractedTable {
    /// `<stem>` for single-table reads, `<stem>_<sheet>` for multi-sheet reads.
    pub name: String,
    pub source: PathBuf,
    pub sheet: Option<String>,
    pub data: DataSet,
}

/// File name without its extension; the base of every table name derived from the file.
pub fn table_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Extract every table of one file.
///
/// A configured observer sees `on_success` with table and row counts, or `on_failure` followed
/// by `on_alert` once the failure's severity reaches `options.alert_at_or_above`.
///
/// # Examples
///
/// ```no_run
/// use tabular_ingest::config::ReadFileConfig;
/// use tabular_ingest::ingestion::{extract_from_path, IngestionOptions};
///
/// # fn main() -> Result<(), tabular_ingest::IngestionError> {
/// let tables = extract_from_path("POS_2022.csv", &ReadFileConfig::default(), &IngestionOptions::default())?;
/// for t in &tables {
///     println!("{} rows={}", t.name, t.data.row_count());
/// }
/// # Ok(())
/// # }
/// ```
pub fn extract_from_path(
    path: impl AsRef<Path>,
    read: &ReadFileConfig,
    options: &IngestionOptions,
) -> IngestionResult<Vec<ExtractedTable>> {
    extract_observed(path.as_ref(), None, read, options)
}

/// Extract one catalogued file, reporting its dataset to the observer.
pub fn extract_source_file(
    file: &SourceFile,
    options: &IngestionOptions,
) -> IngestionResult<Vec<ExtractedTable>> {
    extract_observed(&file.path, Some(&file.dataset), &file.read, options)
}

fn extract_observed(
    path: &Path,
    dataset: Option<&str>,
    read: &ReadFileConfig,
    options: &IngestionOptions,
) -> IngestionResult<Vec<ExtractedTable>> {
    let format = match options.format {
        Some(f) => f,
        None => IngestionFormat::for_path(path)?,
    };
    let result = extract_file(path, format, read);

    if let Some(obs) = options.observer.as_deref() {
        let ctx = IngestionContext {
            path: path.to_path_buf(),
            format,
            dataset: dataset.map(str::to_string),
        };
        report(obs, &ctx, &result, options.alert_at_or_above);
    }
    result
}

fn report(
    obs: &dyn IngestionObserver,
    ctx: &IngestionContext,
    result: &IngestionResult<Vec<ExtractedTable>>,
    alert_at_or_above: IngestionSeverity,
) {
    match result {
        Ok(tables) => {
            let rows = tables.iter().map(|t| t.data.row_count()).sum();
            obs.on_success(ctx, IngestionStats { tables: tables.len(), rows });
        }
        Err(e) => {
            let severity = IngestionSeverity::of(e);
            obs.on_failure(ctx, severity, e);
            if severity >= alert_at_or_above {
                obs.on_alert(ctx, severity, e);
            }
        }
    }
}

fn extract_file(
    path: &Path,
    fmt: IngestionFormat,
    read: &ReadFileConfig,
) -> IngestionResult<Vec<ExtractedTable>> {
    let stem = table_stem(path);
    let password = read.password.as_deref().filter(|p| !p.is_empty());

    let single = |data: DataSet| {
        vec![ExtractedTable {
            name: stem.clone(),
            source: path.to_path_buf(),
            sheet: None,
            data,
        }]
    };

    match fmt {
        IngestionFormat::DelimitedText => {
            let data = match password {
                Some(pw) => {
                    let bytes = decrypt::decrypt_to_bytes(path, pw)?;
                    csv::extract_csv_from_bytes(path, &bytes, &stem, &read.options)?
                }
                None => csv::extract_csv_from_path(path, &stem, &read.options)?,
            };
            Ok(single(data))
        }
        IngestionFormat::Parquet => {
            if password.is_some() {
                return Err(IngestionError::Read {
                    message: format!("parquet file '{}' cannot be password protected", path.display()),
                });
            }
            let data = parquet::extract_parquet_from_path(path, &stem, &read.options)?;
            Ok(single(data))
        }
        IngestionFormat::Spreadsheet => extract_spreadsheet_dispatch(path, &stem, password, read),
    }
}

fn extract_spreadsheet_dispatch(
    path: &Path,
    stem: &str,
    password: Option<&str>,
    read: &ReadFileConfig,
) -> IngestionResult<Vec<ExtractedTable>> {
    // Avoid unused warnings when the feature is off.
    let _ = (path, stem, password, read);

    #[cfg(feature = "excel")]
    {
        use super::excel;

        let sheets = match password {
            Some(pw) => {
                let bytes = decrypt::decrypt_to_bytes(path, pw)?;
                excel::extract_excel_from_bytes(bytes, stem, &read.options)?
            }
            None => excel::extract_excel_from_path(path, stem, &read.options)?,
        };
        Ok(sheets
            .into_iter()
            .map(|t| ExtractedTable {
                name: match &t.sheet {
                    Some(sheet) => format!("{stem}_{sheet}"),
                    None => stem.to_string(),
                },
                source: path.to_path_buf(),
                sheet: t.sheet,
                data: t.data,
            })
            .collect())
    }

    #[cfg(not(feature = "excel"))]
    {
        Err(IngestionError::Read {
            message: "spreadsheet extraction not enabled (enable cargo feature 'excel')".to_string(),
        })
    }
}

/// A file excluded from a batch.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub dataset: String,
    pub error: IngestionError,
}

/// Tables of a batch keyed by table name, plus the files that failed.
#[derive(Debug, Default)]
pub struct BatchExtraction {
    pub tables: BTreeMap<String, ExtractedTable>,
    pub failures: Vec<FileFailure>,
}

impl BatchExtraction {
    /// Add the tables of one file. A later table with an existing name replaces the earlier one.
    pub fn insert_tables(&mut self, tables: Vec<ExtractedTable>) {
        for t in tables {
            if let Some(prev) = self.tables.get(&t.name) {
                warn!(
                    table = %t.name,
                    previous = %prev.source.display(),
                    file = %t.source.display(),
                    "table name extracted twice in one batch; keeping the later file"
                );
            }
            self.tables.insert(t.name.clone(), t);
        }
    }
}

/// Extract every file of a batch in order. A failing file is recorded and skipped; it never
/// aborts its siblings.
pub fn extract_batch(files: &[SourceFile], options: &IngestionOptions) -> BatchExtraction {
    let mut out = BatchExtraction::default();
    for file in files {
        match extract_source_file(file, options) {
            Ok(tables) => {
                debug!(file = %file.path.display(), tables = tables.len(), "extracted");
                out.insert_tables(tables);
            }
            Err(error) => {
                warn!(file = %file.path.display(), dataset = %file.dataset, error = %error, "file excluded");
                out.failures.push(FileFailure {
                    path: file.path.clone(),
                    dataset: file.dataset.clone(),
                    error,
                });
            }
        }
    }
    out
}
