use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tracing::{error, info, warn};

use crate::catalog::{self, SourceFile};
use crate::config::Settings;
use crate::error::{CatalogError, PipelineError, PipelineResult};
use crate::execution::{ExecutionMetricsSnapshot, IngestEngine, TaskReport};
use crate::ingestion::{ExtractedTable, IngestionOptions, extract_source_file};
use crate::scheduler::{self, BatchLimits};
use crate::store::{
    AuditRecord, Datastore, DdlOutcome, Session, TypeDirection, align_types, sanitize_table_name,
};

use super::PipelineHooks;

/// One extracted table appended to the source schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoad {
    pub dataset: String,
    pub source: PathBuf,
    /// Sanitized table name.
    pub table: String,
    pub outcome: DdlOutcome,
    /// Columns added to an existing table.
    pub added_columns: Vec<String>,
    pub rows: usize,
}

/// A file that was not (fully) loaded.
#[derive(Debug)]
pub struct FileError {
    pub file: String,
    pub error: PipelineError,
}

/// Summary of one ingest run.
#[derive(Debug)]
pub struct IngestReport {
    /// Database the run loaded into (the project database).
    pub database: String,
    pub batches: usize,
    pub tables: Vec<TableLoad>,
    pub failures: Vec<FileError>,
    /// Datasets that selected no file.
    pub catalog_failures: Vec<CatalogError>,
    pub metrics: ExecutionMetricsSnapshot,
}

/// Ingest every configured dataset into the project database.
///
/// The project database, the source, target and workflow schemas and the audit table are
/// created first (idempotently). Files are then scheduled into batches and each file is
/// extracted and loaded on its own session: one table per extracted table, created or widened
/// as needed, bulk-loaded and audited. A file that fails is reported and never stops the run.
pub fn ingest_source_data(settings: &Settings, hooks: &PipelineHooks) -> PipelineResult<IngestReport> {
    settings.validate()?;
    let ingest = &settings.ingest;

    let root = Datastore::new(settings.store.clone())?;
    root.ensure_database(&settings.project_name)?;
    let store = root.with_database(&settings.project_name)?;

    store.with_session(|session| {
        for schema in [&ingest.source_schema, &ingest.schema, &ingest.workflow_schema] {
            session.ensure_schema(schema)?;
        }
        session.ensure_audit_table::<AuditRecord>(&ingest.workflow_schema)?;
        Ok(())
    })?;

    let has_explicit = ingest
        .datasets
        .values()
        .any(|d| d.absolute_path_list.as_ref().is_some_and(|p| !p.is_empty()));
    let discovered = match catalog::discover(&ingest.source_files_path) {
        Ok(files) => files,
        Err(CatalogError::NoFilesFound { .. }) if has_explicit => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let plan = catalog::plan(&discovered, &ingest.datasets);

    let engine_opts = &settings.engine;
    let limits = BatchLimits {
        concurrency_limit: engine_opts.concurrency_limit,
        available_memory: engine_opts
            .available_memory
            .unwrap_or_else(scheduler::available_memory),
        check_memory: engine_opts.check_memory,
    };
    let batches = scheduler::schedule(plan.files, limits);
    info!(
        database = %store.database(),
        files = batches.iter().map(|b| b.items.len()).sum::<usize>(),
        batches = batches.len(),
        "ingest scheduled"
    );

    let mut engine = IngestEngine::new(engine_opts.clone())?;
    if let Some(observer) = &hooks.execution {
        engine = engine.with_observer(observer.clone());
    }

    let metrics = engine.metrics();
    let loads = Mutex::new(Vec::new());
    let outcomes = engine.run(&batches, |file| {
        let FileLoad { tables, error } = load_file(&store, settings, file, &hooks.ingestion)?;
        let report = TaskReport {
            tables: tables.len(),
            rows: tables.iter().map(|t| t.rows).sum(),
        };
        loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tables);
        match error {
            Some(e) => {
                metrics.on_partial_load(report.tables, report.rows);
                Err(e)
            }
            None => Ok::<_, PipelineError>(report),
        }
    });

    let failures = outcomes
        .into_iter()
        .filter_map(|o| o.result.err().map(|error| FileError { file: o.item, error }))
        .collect();

    Ok(IngestReport {
        database: store.database().to_string(),
        batches: batches.len(),
        tables: loads.into_inner().unwrap_or_else(PoisonError::into_inner),
        failures,
        catalog_failures: plan.failures,
        metrics: engine.metrics().snapshot(),
    })
}

/// Tables of one file that reached the store, and the first table error if any.
struct FileLoad {
    tables: Vec<TableLoad>,
    error: Option<PipelineError>,
}

fn load_file(
    store: &Datastore,
    settings: &Settings,
    file: &SourceFile,
    options: &IngestionOptions,
) -> PipelineResult<FileLoad> {
    let tables = extract_source_file(file, options)?;
    load_tables(store, settings, file, &tables)
}

/// Load each extracted table of `file`. A table that fails does not stop its siblings; the
/// audit row is written only when every table loaded.
fn load_tables(
    store: &Datastore,
    settings: &Settings,
    file: &SourceFile,
    tables: &[ExtractedTable],
) -> PipelineResult<FileLoad> {
    let ingest = &settings.ingest;
    let mut session = store.connect()?;
    let mut loaded = Vec::with_capacity(tables.len());
    let mut first_error = None;
    for table in tables {
        match load_table(&mut session, &ingest.schema, file, table) {
            Ok(Some(load)) => loaded.push(load),
            Ok(None) => {}
            Err(e) => {
                error!(
                    file = %file.path.display(),
                    table = %table.name,
                    error = %e,
                    "table not loaded"
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if first_error.is_some() {
        if !loaded.is_empty() {
            warn!(
                file = %file.path.display(),
                loaded = ?loaded.iter().map(|t| t.table.as_str()).collect::<Vec<_>>(),
                "file partially loaded; no audit row written"
            );
        }
        return Ok(FileLoad {
            tables: loaded,
            error: first_error,
        });
    }

    session.record_audit(
        &ingest.workflow_schema,
        &AuditRecord {
            dataset: file.dataset.clone(),
            filename: file.file_name(),
            read_options: file.read.options.describe(),
        },
    )?;
    session.close()?;
    Ok(FileLoad {
        tables: loaded,
        error: None,
    })
}

fn load_table(
    session: &mut Session,
    schema: &str,
    file: &SourceFile,
    table: &ExtractedTable,
) -> PipelineResult<Option<TableLoad>> {
    let name = sanitize_table_name(&table.name);
    if table.data.column_count() == 0 {
        warn!(file = %file.path.display(), table = %name, "table has no columns; skipped");
        return Ok(None);
    }

    let columns = align_types(&table.data.schema.native_labels(), TypeDirection::ToRelational)?;
    let outcome = session.ensure_table(schema, &name, &columns)?;
    let added_columns = match outcome {
        DdlOutcome::Created => Vec::new(),
        DdlOutcome::AlreadyExists => session.ensure_columns(schema, &name, &columns)?,
    };
    let rows = session.bulk_load(schema, &name, &table.data)?;

    Ok(Some(TableLoad {
        dataset: file.dataset.clone(),
        source: file.path.clone(),
        table: name,
        outcome,
        added_columns,
        rows,
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::config::ReadFileConfig;
    use crate::execution::ExecutionMetrics;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn table(name: &str, ids: &[i64]) -> ExtractedTable {
        ExtractedTable {
            name: name.to_string(),
            source: PathBuf::from("EMP.xlsx"),
            sheet: name.strip_prefix("EMP_").map(str::to_string),
            data: DataSet::new(
                Schema::new(vec![Field::new("id", DataType::Int64)]),
                ids.iter().map(|&i| vec![Value::Int64(i)]).collect(),
            ),
        }
    }

    #[test]
    fn tables_committed_before_a_failing_sibling_are_reported() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::from_json_str(
            &json!({
                "project_name": "oberon",
                "store": { "data_dir": dir.path() },
                "ingest": {
                    "source_files_path": dir.path(),
                    "datasets": { "employees": {} }
                }
            })
            .to_string(),
        )
        .unwrap();
        let store = Datastore::new(settings.store.clone())
            .unwrap()
            .with_database("oberon")
            .unwrap();
        store
            .with_session(|s| {
                s.ensure_schema("source_files")?;
                s.ensure_schema("workflow")?;
                s.ensure_audit_table::<AuditRecord>("workflow")?;
                // Rejects every id the second sheet carries.
                s.query(r#"CREATE TABLE "source_files"."EMP_South" ("id" INT CHECK ("id" > 100))"#)?;
                Ok(())
            })
            .unwrap();

        let file = SourceFile {
            path: PathBuf::from("EMP.xlsx"),
            size: 0,
            dataset: "employees".to_string(),
            read: ReadFileConfig::default(),
        };
        let out = load_tables(
            &store,
            &settings,
            &file,
            &[table("EMP_North", &[1, 2]), table("EMP_South", &[3])],
        )
        .unwrap();

        assert_eq!(out.tables.len(), 1);
        assert_eq!(out.tables[0].table, "EMP_North");
        assert_eq!(out.tables[0].rows, 2);
        assert!(out.error.is_some());

        let audit = store
            .with_session(|s| s.table_shape("workflow", "source_file_reading_config"))
            .unwrap();
        assert_eq!(audit.rows, 0);
    }

    #[test]
    fn partial_loads_count_rows_but_not_files() {
        let metrics = ExecutionMetrics::default();
        metrics.on_partial_load(1, 2);
        let snap = metrics.snapshot();
        assert_eq!((snap.tables_loaded, snap.rows_loaded), (1, 2));
        assert_eq!(snap.files_finished, 0);
    }
}
