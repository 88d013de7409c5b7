//! Run configuration.
//!
//! Everything a run needs is carried by [`Settings`], built once at startup (usually from a JSON
//! document via [`Settings::from_path`]) and passed by reference into each component. There is
//! no process-wide configuration state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::logging::LogConfig;
use crate::types::DataType;

/// Top-level settings for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Project name; also the name of the target database.
    #[serde(default = "default_project_name")]
    pub project_name: String,
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineOptions,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub raw_datasets: Option<RawDatasetsConfig>,
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_project_name() -> String {
    "default_project".to_string()
}

impl Settings {
    /// Parse settings from a JSON document and validate them.
    pub fn from_json_str(s: &str) -> ConfigResult<Self> {
        let settings: Settings = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a JSON file and validate them.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "project_name must not be empty".to_string(),
            });
        }
        self.engine.validate()?;
        if self.ingest.datasets.is_empty() {
            return Err(ConfigError::Invalid {
                message: "ingest.datasets must name at least one dataset".to_string(),
            });
        }
        Ok(())
    }
}

/// Connection settings for the embedded relational store.
///
/// A database is the file `<data_dir>/<database>.db`; each schema is a sibling file attached
/// under its own name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database() -> String {
    "maintenance".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    30_000
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database: default_database(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    /// Same store, pointed at another database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// How files of one batch are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunner {
    /// One file at a time, in batch order.
    Sequential,
    /// A bounded worker pool; at most `concurrency_limit` files in flight.
    #[default]
    Concurrent,
}

/// Scheduling and execution bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Maximum files per batch, and maximum files in flight within a batch.
    pub concurrency_limit: usize,
    /// Memory budget per batch in bytes. `None` reads the system's available memory.
    pub available_memory: Option<u64>,
    /// Whether batches are also bounded by summed file size.
    pub check_memory: bool,
    pub runner: TaskRunner,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            concurrency_limit: n,
            available_memory: None,
            check_memory: true,
            runner: TaskRunner::default(),
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid {
                message: "engine.concurrency_limit must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings of the ingest flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root folder walked for source files.
    pub source_files_path: PathBuf,
    /// Schema receiving one raw table per extracted table.
    #[serde(default = "default_source_schema")]
    pub schema: String,
    /// Schema holding the audit tables.
    #[serde(default = "default_workflow_schema")]
    pub workflow_schema: String,
    /// Schema created up front for source tables; usually the same as `schema`.
    #[serde(default = "default_source_schema")]
    pub source_schema: String,
    /// Per-dataset file selection and read settings, keyed by dataset category.
    pub datasets: BTreeMap<String, DatasetConfig>,
}

pub(crate) fn default_source_schema() -> String {
    "source_files".to_string()
}

pub(crate) fn default_workflow_schema() -> String {
    "workflow".to_string()
}

/// Selection and read settings for one dataset category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub file_filters: FileFilters,
    /// Explicit file list; when non-empty it is used verbatim and filters are ignored.
    pub absolute_path_list: Option<Vec<PathBuf>>,
    pub read_file: ReadFileConfig,
}

/// Keyword filters applied to discovered files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilters {
    /// Every keyword must appear in the file name.
    pub filename_include: Vec<String>,
    /// No keyword may appear in the file name.
    pub filename_exclude: Vec<String>,
    /// No keyword may appear (case-insensitively) in the parent path.
    pub filepath_exclude: Vec<String>,
}

impl Default for FileFilters {
    fn default() -> Self {
        Self {
            filename_include: Vec::new(),
            filename_exclude: Vec::new(),
            filepath_exclude: vec!["archive".to_string(), "delete".to_string()],
        }
    }
}

/// How to read the files of one dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadFileConfig {
    /// Password of encrypted Office documents.
    pub password: Option<String>,
    #[serde(alias = "pandas_attributes")]
    pub options: ReadOptions,
}

/// Format-specific parsing options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Header row index, counted after `skip_rows`.
    pub header: usize,
    /// Leading rows skipped before the header search.
    #[serde(alias = "skiprows")]
    pub skip_rows: usize,
    /// Spreadsheet sheet selection.
    #[serde(alias = "sheet_name")]
    pub sheets: SheetSelection,
    /// Delimiter of text files; `.csv` defaults to `,` and `.txt` to tab.
    #[serde(alias = "sep")]
    pub delimiter: Option<char>,
    /// Per-column type overrides; other columns are inferred.
    #[serde(alias = "dtype")]
    pub dtypes: BTreeMap<String, DataType>,
}

impl ReadOptions {
    /// Textual description recorded in the audit trail.
    pub fn describe(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// How to choose sheet(s) when reading a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetSelection {
    /// Read the first sheet into one table named after the file (default).
    #[default]
    First,
    /// Read a single named sheet into one table named after the file.
    Sheet(String),
    /// Read every sheet; one table per sheet.
    All,
    /// Read the listed sheets (in order); one table per sheet.
    Sheets(Vec<String>),
}

impl SheetSelection {
    /// Whether the selection yields one table per sheet.
    pub fn is_multi(&self) -> bool {
        matches!(self, SheetSelection::All | SheetSelection::Sheets(_))
    }
}

/// Settings of the raw-dataset flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDatasetsConfig {
    /// Schema holding the ingested source tables.
    #[serde(default = "default_source_schema")]
    pub source_schema: String,
    /// Schema receiving the built datasets.
    #[serde(default = "default_raw_schema")]
    pub schema: String,
    #[serde(default = "default_workflow_schema")]
    pub workflow_schema: String,
    /// dataset -> batch -> selection and transform.
    pub datasets: BTreeMap<String, BTreeMap<String, RawBatchConfig>>,
}

fn default_raw_schema() -> String {
    "raw_datasets".to_string()
}

/// One group of source tables unioned into a dataset table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBatchConfig {
    pub filename_include: Vec<String>,
    pub filename_exclude: Vec<String>,
    /// Steps applied in order to the union before it is loaded.
    pub functions: Vec<TransformConfig>,
}

/// One raw-dataset step, written as `{"<name>": {arguments}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformConfig {
    /// `{old name: new name}`.
    RenameColumns { name_map: BTreeMap<String, String> },
    /// `{column: dtype}`; a cell that cannot be converted fails the batch.
    ChangeDataType { dtype_map: BTreeMap<String, DataType> },
    /// Sets every cell of each column to `default_value` (null when omitted), adding the
    /// column when it is missing.
    CreateColumnsWithDefaultValue {
        column_name: Vec<String>,
        #[serde(default)]
        default_value: serde_json::Value,
    },
    /// Change-point consolidation, in either mode.
    Consolidate(ConsolidationConfig),
    /// Rewrites provenance cells (a single string or a JSON list of them) as
    /// `{"<prefix>:row:": [rows]}`.
    ListSourceToDict { source_col_name: String },
}

/// Serializable form of a consolidation, parsed by [`crate::temporal::ConsolidationSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    pub entity_key: String,
    pub category: String,
    pub mode: ConsolidationModeConfig,
    #[serde(default)]
    pub aggregations: Vec<AggregationRuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationModeConfig {
    EffectiveDate { time_column: String },
    ExplicitInterval { period_start: String, period_end: String },
}

/// `column` aggregated with the rule tagged `rule` (`first`, `last`, `min`, `max`, `unique`,
/// or a registered custom name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRuleConfig {
    pub column: String,
    pub rule: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"{
        "project_name": "Oberon",
        "store": { "data_dir": "/tmp/store" },
        "engine": { "concurrency_limit": 4, "check_memory": false },
        "ingest": {
            "source_files_path": "/data/extracts",
            "datasets": {
                "positions": {
                    "file_filters": { "filename_include": ["POS"] },
                    "read_file": {
                        "password": null,
                        "pandas_attributes": { "skiprows": 2, "sheet_name": "all" }
                    }
                }
            }
        }
    }"#;

    #[test]
    fn settings_parse_with_defaults() {
        let s = Settings::from_json_str(SETTINGS).unwrap();
        assert_eq!(s.project_name, "Oberon");
        assert_eq!(s.store.database, "maintenance");
        assert_eq!(s.engine.concurrency_limit, 4);
        assert_eq!(s.engine.runner, TaskRunner::Concurrent);
        assert_eq!(s.ingest.schema, "source_files");
        assert_eq!(s.ingest.workflow_schema, "workflow");

        let ds = &s.ingest.datasets["positions"];
        assert_eq!(ds.file_filters.filename_include, vec!["POS".to_string()]);
        assert_eq!(
            ds.file_filters.filepath_exclude,
            vec!["archive".to_string(), "delete".to_string()]
        );
        assert_eq!(ds.read_file.options.skip_rows, 2);
        assert_eq!(ds.read_file.options.sheets, SheetSelection::All);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let raw = SETTINGS.replace("\"concurrency_limit\": 4", "\"concurrency_limit\": 0");
        let err = Settings::from_json_str(&raw).unwrap_err();
        assert!(err.to_string().contains("concurrency_limit"));
    }

    #[test]
    fn describe_omits_password() {
        let cfg: ReadFileConfig =
            serde_json::from_str(r#"{"password":"s3cret","options":{"header":1}}"#).unwrap();
        let text = cfg.options.describe();
        assert!(text.contains("\"header\":1"));
        assert!(!text.contains("s3cret"));
    }

    #[test]
    fn batch_functions_keep_their_order() {
        let batch: RawBatchConfig = serde_json::from_str(
            r#"{
                "filename_include": ["EMP"],
                "functions": [
                    {"change_data_type": {"dtype_map": {"Grade": "int64"}}},
                    {"rename_columns": {"name_map": {"Grade": "Level"}}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            batch.functions,
            vec![
                TransformConfig::ChangeDataType {
                    dtype_map: BTreeMap::from([("Grade".to_string(), DataType::Int64)]),
                },
                TransformConfig::RenameColumns {
                    name_map: BTreeMap::from([("Grade".to_string(), "Level".to_string())]),
                },
            ]
        );
    }

    #[test]
    fn unknown_batch_function_is_rejected() {
        let err = serde_json::from_str::<RawBatchConfig>(
            r#"{"functions": [{"pivot": {"column": "Grade"}}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("pivot"));
    }
}
