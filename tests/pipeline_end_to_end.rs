use std::fs;
use std::path::Path;

use serde_json::json;

use tabular_ingest::config::{RawDatasetsConfig, Settings, StoreConfig};
use tabular_ingest::pipeline::{PipelineHooks, create_raw_datasets, ingest_source_data};
use tabular_ingest::store::{Datastore, DdlOutcome, TableShape};
use tabular_ingest::temporal::{AggregationRegistry, END_DATE, START_DATE};
use tabular_ingest::types::Value;

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn settings(source: &Path, store: &Path) -> Settings {
    let doc = json!({
        "project_name": "oberon",
        "store": { "data_dir": store },
        "engine": { "concurrency_limit": 2, "check_memory": false, "runner": "concurrent" },
        "ingest": {
            "source_files_path": source,
            "datasets": {
                "employees": { "file_filters": { "filename_include": ["EMP"] } },
                "positions": { "file_filters": { "filename_include": ["POS"] } }
            }
        },
        "raw_datasets": {
            "datasets": {
                "employees": {
                    "jobs": {
                        "filename_include": ["EMP"],
                        "functions": [{ "consolidate": {
                            "entity_key": "EmpID",
                            "category": "Job",
                            "mode": { "effective_date": { "time_column": "Date" } },
                            "aggregations": [
                                { "column": "Date", "rule": "min" },
                                { "column": "Source", "rule": "provenance" }
                            ]
                        } }]
                    },
                    "all": { "filename_include": ["EMP"] }
                }
            }
        }
    });
    Settings::from_json_str(&doc.to_string()).unwrap()
}

fn seed_sources(root: &Path) {
    write(
        &root.join("EMP_2022.csv"),
        "EmpID,Job,Date\n1,Intern,2022-01-01\n1,Intern,2022-02-01\n1,Engineer,2022-03-01\n2,Analyst,2022-01-01\n",
    );
    write(&root.join("2023/EMP_2023.csv"), "EmpID,Job,Date\n1,Engineer,2023-01-01\n");
    write(&root.join("Archive/EMP_2021.csv"), "EmpID,Job,Date\n9,Old,2021-01-01\n");
    write(&root.join("POS_bad.csv"), "");
}

fn project(store: &Path) -> Datastore {
    Datastore::new(StoreConfig::new(store))
        .unwrap()
        .with_database("oberon")
        .unwrap()
}

#[test]
fn ingest_loads_good_files_and_reports_the_bad_one() {
    let sources = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    seed_sources(sources.path());
    let settings = settings(sources.path(), store_dir.path());

    let report = ingest_source_data(&settings, &PipelineHooks::silent()).unwrap();
    assert_eq!(report.database, "oberon");

    let mut tables: Vec<(String, usize, DdlOutcome)> = report
        .tables
        .iter()
        .map(|t| (t.table.clone(), t.rows, t.outcome))
        .collect();
    tables.sort();
    assert_eq!(
        tables,
        vec![
            ("EMP_2022".to_string(), 4, DdlOutcome::Created),
            ("EMP_2023".to_string(), 1, DdlOutcome::Created),
        ]
    );
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].file.ends_with("POS_bad.csv"));
    assert!(report.catalog_failures.is_empty());
    assert_eq!(report.metrics.files_finished, 2);
    assert_eq!(report.metrics.files_failed, 1);
    assert_eq!(report.metrics.rows_loaded, 5);

    let store = project(store_dir.path());
    let audit = store
        .query("SELECT dataset, filename FROM \"workflow\".\"source_file_reading_config\" ORDER BY filename")
        .unwrap();
    assert_eq!(
        audit.rows,
        vec![
            vec![Value::Utf8("employees".into()), Value::Utf8("EMP_2022.csv".into())],
            vec![Value::Utf8("employees".into()), Value::Utf8("EMP_2023.csv".into())],
        ]
    );

    let rows = store
        .query("SELECT EmpID, Source FROM \"source_files\".\"EMP_2022\" ORDER BY Source")
        .unwrap();
    assert_eq!(rows.rows[0], vec![Value::Int64(1), Value::Utf8("EMP_2022:row:2".into())]);
}

#[test]
fn a_second_run_appends_to_existing_tables() {
    let sources = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    seed_sources(sources.path());
    let settings = settings(sources.path(), store_dir.path());

    ingest_source_data(&settings, &PipelineHooks::silent()).unwrap();
    let again = ingest_source_data(&settings, &PipelineHooks::silent()).unwrap();
    assert!(again.tables.iter().all(|t| t.outcome == DdlOutcome::AlreadyExists));

    let shape = project(store_dir.path())
        .with_session(|s| s.table_shape("source_files", "EMP_2022"))
        .unwrap();
    assert_eq!(shape, TableShape { rows: 8, columns: 4 });
}

#[test]
fn raw_datasets_union_and_consolidate_loaded_tables() {
    let sources = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    seed_sources(sources.path());
    let settings = settings(sources.path(), store_dir.path());

    ingest_source_data(&settings, &PipelineHooks::silent()).unwrap();
    let report = create_raw_datasets(&settings, &AggregationRegistry::default()).unwrap();
    assert!(report.empty_batches.is_empty());

    let mut loads: Vec<(String, usize)> = report
        .loads
        .iter()
        .map(|l| (l.table.clone(), l.rows))
        .collect();
    loads.sort();
    assert_eq!(
        loads,
        vec![
            ("employees_all".to_string(), 5),
            ("employees_jobs".to_string(), 3),
        ]
    );

    let store = project(store_dir.path());
    let jobs = store
        .query("SELECT * FROM \"raw_datasets\".\"employees_jobs\" ORDER BY EmpID, StartDate")
        .unwrap();
    assert_eq!(
        jobs.schema.field_names().collect::<Vec<_>>(),
        vec!["EmpID", "Job", START_DATE, "Source", END_DATE]
    );
    // Engineer rows from two files merge into one interval.
    assert_eq!(jobs.rows[1][1], Value::Utf8("Engineer".into()));
    assert_eq!(
        jobs.rows[1][3],
        Value::Utf8(r#"{"EMP_2022:row:":[4],"EMP_2023:row:":[2]}"#.into())
    );
    assert_eq!(jobs.rows[0][4], jobs.rows[1][2]);
    assert_eq!(jobs.rows[1][4].to_string(), "9999-12-31 00:00:00");

    let audit = store
        .query(
            "SELECT batch, filename, function_used FROM \"workflow\".\"create_raw_datasets_reading_config\" \
             WHERE batch = 'jobs' ORDER BY filename",
        )
        .unwrap();
    assert_eq!(audit.row_count(), 2);
    assert_eq!(audit.rows[0][1], Value::Utf8("EMP_2022".into()));
    assert!(audit.rows[0][2].to_string().starts_with("effective_date("));
}

#[test]
fn raw_datasets_require_their_section() {
    let sources = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let mut settings = settings(sources.path(), store_dir.path());
    settings.raw_datasets = None;

    assert!(create_raw_datasets(&settings, &AggregationRegistry::default()).is_err());
}

fn with_raw_batches(settings: &mut Settings, datasets: serde_json::Value) {
    let raw: RawDatasetsConfig =
        serde_json::from_value(json!({ "datasets": datasets })).unwrap();
    settings.raw_datasets = Some(raw);
}

#[test]
fn failing_batch_does_not_stop_its_siblings() {
    let sources = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    seed_sources(sources.path());
    let mut settings = settings(sources.path(), store_dir.path());
    with_raw_batches(
        &mut settings,
        json!({
            "a_bad": { "jobs": {
                "filename_include": ["EMP"],
                "functions": [{ "consolidate": {
                    "entity_key": "EmpID",
                    "category": "NoSuchColumn",
                    "mode": { "effective_date": { "time_column": "Date" } }
                } }]
            } },
            "b_good": { "all": { "filename_include": ["EMP"] } },
            "c_unresolved": { "jobs": {
                "filename_include": ["EMP"],
                "functions": [{ "consolidate": {
                    "entity_key": "EmpID",
                    "category": "Job",
                    "mode": { "effective_date": { "time_column": "Date" } },
                    "aggregations": [{ "column": "Source", "rule": "median" }]
                } }]
            } }
        }),
    );

    ingest_source_data(&settings, &PipelineHooks::silent()).unwrap();
    let report = create_raw_datasets(&settings, &AggregationRegistry::default()).unwrap();

    let built: Vec<(&str, usize)> = report.loads.iter().map(|l| (l.table.as_str(), l.rows)).collect();
    assert_eq!(built, vec![("b_good_all", 5)]);

    let mut failed: Vec<(&str, &str)> = report
        .failures
        .iter()
        .map(|f| (f.dataset.as_str(), f.batch.as_str()))
        .collect();
    failed.sort();
    assert_eq!(failed, vec![("a_bad", "jobs"), ("c_unresolved", "jobs")]);
    assert!(report.failures.iter().any(|f| f.error.to_string().contains("NoSuchColumn")));

    let store = project(store_dir.path());
    let session = store.connect().unwrap();
    assert!(!session.table_exists("raw_datasets", "a_bad_jobs").unwrap());
    assert!(session.table_exists("raw_datasets", "b_good_all").unwrap());
    let audit = store
        .query("SELECT DISTINCT dataset FROM \"workflow\".\"create_raw_datasets_reading_config\"")
        .unwrap();
    assert_eq!(audit.rows, vec![vec![Value::Utf8("b_good".into())]]);
}

#[test]
fn batch_functions_run_in_order_before_loading() {
    let sources = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    seed_sources(sources.path());
    let mut settings = settings(sources.path(), store_dir.path());
    with_raw_batches(
        &mut settings,
        json!({
            "employees": { "tidy": {
                "filename_include": ["EMP_2023"],
                "functions": [
                    { "rename_columns": { "name_map": { "Job": "Title" } } },
                    { "change_data_type": { "dtype_map": { "EmpID": "object" } } },
                    { "create_columns_with_default_value": {
                        "column_name": ["Region"], "default_value": "EU" } },
                    { "list_source_to_dict": { "source_col_name": "Source" } }
                ]
            } }
        }),
    );

    ingest_source_data(&settings, &PipelineHooks::silent()).unwrap();
    let report = create_raw_datasets(&settings, &AggregationRegistry::default()).unwrap();
    assert!(report.failures.is_empty());

    let store = project(store_dir.path());
    let tidy = store
        .query("SELECT EmpID, Title, Region, Source FROM \"raw_datasets\".\"employees_tidy\"")
        .unwrap();
    assert_eq!(
        tidy.rows,
        vec![vec![
            Value::Utf8("1".into()),
            Value::Utf8("Engineer".into()),
            Value::Utf8("EU".into()),
            Value::Utf8(r#"{"EMP_2023:row:":[2]}"#.into()),
        ]]
    );

    let audit = store
        .query("SELECT function_used FROM \"workflow\".\"create_raw_datasets_reading_config\"")
        .unwrap();
    assert_eq!(
        audit.rows[0][0].to_string(),
        "rename_columns(Job->Title); change_data_type(EmpID=object); \
         create_columns_with_default_value(Region=EU); list_source_to_dict(Source)"
    );
}
