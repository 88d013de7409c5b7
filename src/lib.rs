//! `tabular-ingest` loads heterogeneous tabular extracts (spreadsheets, delimited text, Parquet)
//! from a folder tree into an embedded relational store, tagging every row with the file, sheet
//! and row it came from, and consolidates time-varying records into effective-dated intervals.
//!
//! ## Flow
//!
//! 1. [`catalog`] walks the source folder and assigns files to dataset categories by keyword.
//! 2. [`scheduler`] cuts the file list into batches bounded by count and summed size.
//! 3. [`execution`] runs each batch, one file per task, sequentially or on a bounded pool.
//! 4. [`ingestion`] reads a file into named [`types::DataSet`]s with a `Source` provenance column.
//! 5. [`store`] maps dtypes to relational types, creates schemas and tables idempotently,
//!    bulk-loads in one transaction and appends an audit row per file.
//! 6. [`temporal`] collapses runs of equal `(entity, category)` rows into intervals; the
//!    [`pipeline`] raw-dataset flow applies it to unions of loaded tables.
//!
//! ## Supported sources
//!
//! - **Delimited text**: `.csv` (comma) and `.txt` (tab), or any configured delimiter
//! - **Parquet**: `.parquet`, `.pq`
//! - **Workbooks** (Cargo feature `excel`, on by default): `.xlsx`, `.xls`, `.xlsm`, `.xlsb`;
//!   password-protected workbooks need the `encrypted` feature
//!
//! ## Quick example: extract one file
//!
//! ```no_run
//! use tabular_ingest::config::ReadFileConfig;
//! use tabular_ingest::ingestion::{IngestionOptions, extract_from_path};
//!
//! # fn main() -> Result<(), tabular_ingest::IngestionError> {
//! let tables = extract_from_path("POS_2022.csv", &ReadFileConfig::default(), &IngestionOptions::default())?;
//! for t in &tables {
//!     println!("{}: rows={}", t.name, t.data.row_count());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Running the flows
//!
//! ```no_run
//! use tabular_ingest::config::Settings;
//! use tabular_ingest::logging::init_logging;
//! use tabular_ingest::pipeline::{PipelineHooks, create_raw_datasets, ingest_source_data};
//! use tabular_ingest::temporal::AggregationRegistry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_path("ingest.json")?;
//! init_logging(&settings.logging)?;
//! let report = ingest_source_data(&settings, &PipelineHooks::default())?;
//! println!("{}", report.metrics);
//! create_raw_datasets(&settings, &AggregationRegistry::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: run settings, built once and passed by reference
//! - [`catalog`], [`scheduler`], [`execution`]: file selection, batching and task execution
//! - [`ingestion`]: format readers, provenance and extraction observers
//! - [`store`]: the embedded relational store
//! - [`temporal`]: change-point consolidation
//! - [`transform`]: the ordered column steps of a raw-dataset batch
//! - [`pipeline`]: the ingest and raw-dataset flows
//! - [`types`], [`error`], [`logging`]: shared data model, error enums and log setup

pub mod catalog;
pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod temporal;
pub mod transform;
pub mod types;

pub use error::{
    CatalogError, ConfigError, ConsolidationError, ExecutionError, IngestionError,
    IngestionResult, PipelineError, StoreError,
};
