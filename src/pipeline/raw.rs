use tracing::{error, info, warn};

use crate::catalog::matches_keywords;
use crate::config::{RawDatasetsConfig, Settings};
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::store::{
    Datastore, DdlOutcome, RawDatasetAudit, Session, TypeDirection, align_types, quote_ident,
    sanitize_table_name,
};
use crate::temporal::AggregationRegistry;
use crate::transform::{Transform, apply_all, describe, resolve_all};
use crate::types::DataSet;

/// One dataset table built from a batch of source tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDatasetLoad {
    pub dataset: String,
    pub batch: String,
    /// Target table in the raw-dataset schema.
    pub table: String,
    /// Source tables that were unioned, in name order.
    pub sources: Vec<String>,
    pub outcome: DdlOutcome,
    pub rows: usize,
}

/// A batch that was skipped because its steps did not resolve or its build failed.
#[derive(Debug)]
pub struct RawBatchFailure {
    pub dataset: String,
    pub batch: String,
    pub error: PipelineError,
}

/// Summary of one raw-dataset run.
#[derive(Debug, Default)]
pub struct RawDatasetsReport {
    pub loads: Vec<RawDatasetLoad>,
    /// `(dataset, batch)` pairs whose filters matched no source table.
    pub empty_batches: Vec<(String, String)>,
    pub failures: Vec<RawBatchFailure>,
}

impl RawDatasetsReport {
    fn fail(&mut self, dataset: &str, batch: &str, err: PipelineError) {
        error!(dataset = %dataset, batch = %batch, error = %err, "raw dataset batch skipped");
        self.failures.push(RawBatchFailure {
            dataset: dataset.to_string(),
            batch: batch.to_string(),
            error: err,
        });
    }
}

/// Build every configured dataset from the tables already loaded into the source schema.
///
/// For each dataset batch the source tables whose names pass the batch's keyword filters are
/// read and unioned by column name, the batch's `functions` are applied in order, and the
/// result is appended to `<dataset>_<batch>` in the raw-dataset schema. Every source table is
/// recorded in the raw-dataset audit table.
///
/// Each batch's steps are resolved before any table is read. A batch whose steps do not resolve,
/// or whose build fails, is logged and listed in [`RawDatasetsReport::failures`]; the remaining
/// batches still run. Only a missing section or an unusable store fails the whole call.
pub fn create_raw_datasets(
    settings: &Settings,
    registry: &AggregationRegistry,
) -> PipelineResult<RawDatasetsReport> {
    let raw = settings
        .raw_datasets
        .as_ref()
        .ok_or_else(|| ConfigError::Invalid {
            message: "raw_datasets section is missing".to_string(),
        })?;

    let mut report = RawDatasetsReport::default();
    let mut plans = Vec::new();
    for (dataset, batches) in &raw.datasets {
        for (batch, cfg) in batches {
            match resolve_all(&cfg.functions, registry) {
                Ok(steps) => plans.push((dataset, batch, cfg, steps)),
                Err(e) => report.fail(dataset, batch, e.into()),
            }
        }
    }

    let store = Datastore::new(settings.store.with_database(&settings.project_name))?;
    let mut session = store.connect()?;
    session.ensure_schema(&raw.schema)?;
    session.ensure_schema(&raw.workflow_schema)?;
    session.ensure_audit_table::<RawDatasetAudit>(&raw.workflow_schema)?;
    let available = session.list_tables(&raw.source_schema)?;

    for (dataset, batch, cfg, steps) in plans {
        let sources: Vec<String> = available
            .iter()
            .filter(|t| matches_keywords(t, &cfg.filename_include, &cfg.filename_exclude))
            .cloned()
            .collect();
        if sources.is_empty() {
            warn!(dataset = %dataset, batch = %batch, "no source table matches the batch filters");
            report.empty_batches.push((dataset.clone(), batch.clone()));
            continue;
        }

        match build_batch(&mut session, raw, dataset, batch, sources, &steps) {
            Ok(load) => report.loads.push(load),
            Err(e) => report.fail(dataset, batch, e),
        }
    }
    session.close()?;
    Ok(report)
}

fn build_batch(
    session: &mut Session,
    raw: &RawDatasetsConfig,
    dataset: &str,
    batch: &str,
    sources: Vec<String>,
    steps: &[Transform],
) -> PipelineResult<RawDatasetLoad> {
    let mut parts = Vec::with_capacity(sources.len());
    for table in &sources {
        parts.push(session.query(&format!(
            "SELECT * FROM {}.{}",
            quote_ident(&raw.source_schema),
            quote_ident(table)
        ))?);
    }
    let data = apply_all(DataSet::concat(&parts), steps)?;

    let table = sanitize_table_name(&format!("{dataset}_{batch}"));
    let columns = align_types(&data.schema.native_labels(), TypeDirection::ToRelational)?;
    let outcome = session.ensure_table(&raw.schema, &table, &columns)?;
    if outcome == DdlOutcome::AlreadyExists {
        session.ensure_columns(&raw.schema, &table, &columns)?;
    }
    let rows = session.bulk_load(&raw.schema, &table, &data)?;

    let function_used = describe(steps);
    for source in &sources {
        session.record_audit(
            &raw.workflow_schema,
            &RawDatasetAudit {
                dataset: dataset.to_string(),
                batch: batch.to_string(),
                filename: source.clone(),
                function_used: function_used.clone(),
            },
        )?;
    }
    info!(
        dataset = %dataset,
        batch = %batch,
        table = %table,
        sources = sources.len(),
        rows,
        "raw dataset built"
    );

    Ok(RawDatasetLoad {
        dataset: dataset.to_string(),
        batch: batch.to_string(),
        table,
        sources,
        outcome,
        rows,
    })
}
