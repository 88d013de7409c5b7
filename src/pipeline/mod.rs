//! The two end-to-end flows.
//!
//! - [`ingest_source_data`]: catalog → schedule → per file (extract, align, create, load,
//!   audit) on the [`crate::execution::IngestEngine`].
//! - [`create_raw_datasets`]: select loaded source tables by name, union them, apply the
//!   batch's transforms, load the result into the raw-dataset schema and audit every source
//!   table. A failing batch is reported and the others continue.

mod ingest;
mod raw;

use std::sync::Arc;

use crate::execution::{ExecutionObserver, TracingExecutionObserver};
use crate::ingestion::{IngestionOptions, TracingObserver};

pub use ingest::{FileError, IngestReport, TableLoad, ingest_source_data};
pub use raw::{RawBatchFailure, RawDatasetLoad, RawDatasetsReport, create_raw_datasets};

/// Observers wired into a flow.
#[derive(Clone)]
pub struct PipelineHooks {
    pub ingestion: IngestionOptions,
    pub execution: Option<Arc<dyn ExecutionObserver>>,
}

impl Default for PipelineHooks {
    /// Everything goes to `tracing`.
    fn default() -> Self {
        Self {
            ingestion: IngestionOptions {
                observer: Some(Arc::new(TracingObserver)),
                ..IngestionOptions::default()
            },
            execution: Some(Arc::new(TracingExecutionObserver)),
        }
    }
}

impl PipelineHooks {
    /// No observers at all.
    pub fn silent() -> Self {
        Self {
            ingestion: IngestionOptions::default(),
            execution: None,
        }
    }
}
