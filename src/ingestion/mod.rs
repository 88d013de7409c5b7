//! Tabular extraction.
//!
//! Most callers should use [`extract_from_path`] or [`extract_batch`] (from [`unified`]) which:
//!
//! - auto-detect format by file extension (or you can override via [`IngestionOptions`])
//! - decrypt password-protected files in memory
//! - return named [`ExtractedTable`]s whose rows carry a [`provenance::PROVENANCE_COLUMN`]
//! - optionally report success/failure/alerts to an [`IngestionObserver`]
//!
//! Format-specific functions are also available under:
//! - [`csv`]
//! - [`excel`] (feature `excel`)
//! - [`parquet`]

pub mod csv;
pub mod decrypt;
#[cfg(feature = "excel")]
pub mod excel;
pub(crate) mod frame;
pub mod observability;
pub mod parquet;
pub mod provenance;
pub mod unified;

pub use observability::{
    CompositeObserver, FileObserver, IngestionContext, IngestionObserver, IngestionSeverity,
    IngestionStats, TracingObserver,
};
pub use provenance::{PROVENANCE_COLUMN, summarize_provenance};
pub use unified::{
    BatchExtraction, ExtractedTable, FileFailure, IngestionFormat, IngestionOptions, extract_batch,
    extract_from_path, extract_source_file, table_stem,
};
