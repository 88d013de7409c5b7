//! Append-only audit tables.

/// A row type written to an audit table. All audit columns are text.
pub trait AuditEntry {
    /// Table name inside the workflow schema.
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    /// Values in [`Self::COLUMNS`] order.
    fn values(&self) -> Vec<String>;
}

/// One successfully ingested source file and how it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub dataset: String,
    pub filename: String,
    /// Description of the read options (no password).
    pub read_options: String,
}

impl AuditEntry for AuditRecord {
    const TABLE: &'static str = "source_file_reading_config";
    const COLUMNS: &'static [&'static str] = &["dataset", "filename", "pandas_attributes"];

    fn values(&self) -> Vec<String> {
        vec![
            self.dataset.clone(),
            self.filename.clone(),
            self.read_options.clone(),
        ]
    }
}

/// One source table folded into a raw dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDatasetAudit {
    pub dataset: String,
    pub batch: String,
    /// Source table the rows came from.
    pub filename: String,
    /// Steps applied to the unioned batch, or `union` when there are none.
    pub function_used: String,
}

impl AuditEntry for RawDatasetAudit {
    const TABLE: &'static str = "create_raw_datasets_reading_config";
    const COLUMNS: &'static [&'static str] = &["dataset", "batch", "filename", "function_used"];

    fn values(&self) -> Vec<String> {
        vec![
            self.dataset.clone(),
            self.batch.clone(),
            self.filename.clone(),
            self.function_used.clone(),
        ]
    }
}
