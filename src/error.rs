use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for extraction operations.
pub type IngestionResult<T> = Result<T, IngestionError>;
/// Result type for the source catalog.
pub type CatalogResult<T> = Result<T, CatalogError>;
/// Result type for relational store operations.
pub type StoreResult<T> = Result<T, StoreError>;
/// Result type for temporal consolidation.
pub type ConsolidationResult<T> = Result<T, ConsolidationError>;
/// Result type for raw-dataset column transforms.
pub type TransformResult<T> = Result<T, TransformError>;
/// Result type for configuration loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;
/// Result type for building and running the execution engine.
pub type ExecutionResult<T> = Result<T, ExecutionError>;
/// Result type for the ingest and raw-dataset flows.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned when reading a single source file.
///
/// These are per-file failures: callers log them and drop the file from the batch output.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "excel")]
    /// Excel ingestion error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// CSV ingestion error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Parquet ingestion error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// The file is password protected and could not be decrypted.
    #[error("failed to decrypt '{}': {message}", path.display())]
    Decryption { path: PathBuf, message: String },

    /// The file could be opened but not read as a table with the given options.
    #[error("read error: {message}")]
    Read { message: String },

    /// A value could not be parsed into the requested [`crate::types::DataType`].
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },
}

/// Errors raised while enumerating and filtering source files.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Discovery or filtering produced no candidates and no explicit path list was given.
    #[error("no files found for {scope}: {detail}")]
    NoFilesFound { scope: String, detail: String },

    /// Directory walk failure.
    #[error("failed to walk '{}': {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// An explicit path could not be inspected.
    #[error("cannot stat '{}': {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the relational store.
///
/// "Already exists" conditions are never surfaced here; DDL reports them as
/// [`crate::store::DdlOutcome::AlreadyExists`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A column's dtype has no counterpart in the type map.
    #[error("unsupported type '{label}' for column '{column}'")]
    UnsupportedType { column: String, label: String },

    /// An operation was attempted on a closed session.
    #[error("not connected: operation '{operation}' requires an open session")]
    NotConnected { operation: &'static str },

    /// Database and schema names become file names and attach aliases.
    #[error("invalid {kind} name '{name}'")]
    InvalidIdentifier { kind: &'static str, name: String },

    #[error("schema {schema} does not exist")]
    MissingSchema { schema: String },

    #[error("table {schema}.{table} does not exist")]
    MissingTable { schema: String, table: String },
}

/// Errors raised by temporal consolidation. Always raised before any row is processed.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("aggregation config error: {message}")]
    AggregationConfig { message: String },
}

/// Errors raised by raw-dataset column transforms.
///
/// Column problems are found before any cell of the step is touched; only a cast can fail
/// midway, and then the whole batch is dropped.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{transform}: column '{column}' does not exist")]
    MissingColumn {
        transform: &'static str,
        column: String,
    },

    #[error("{transform}: column '{column}' would appear twice")]
    DuplicateColumn {
        transform: &'static str,
        column: String,
    },

    #[error("change_data_type: row {row} of column '{column}' ('{raw}') is not {dtype}: {message}")]
    Cast {
        column: String,
        row: usize,
        raw: String,
        dtype: crate::types::DataType,
        message: String,
    },

    #[error("create_columns_with_default_value: {message}")]
    InvalidDefault { message: String },

    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

/// Errors raised while building the execution engine.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Errors surfaced by the pipeline flows.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}
