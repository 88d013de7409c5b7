use chrono::NaiveDate;

use tabular_ingest::config::{AggregationRuleConfig, ConsolidationConfig, ConsolidationModeConfig};
use tabular_ingest::temporal::{
    Aggregation, AggregationRegistry, ConsolidationMode, ConsolidationSpec, END_DATE, Reducer,
    START_DATE, consolidate, group_ids, sentinel,
};
use tabular_ingest::types::{DataSet, DataType, Field, Schema, Value};
use tabular_ingest::ConsolidationError;

fn day(y: i32, m: u32, d: u32) -> Value {
    Value::Timestamp(NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
}

fn text(s: &str) -> Value {
    Value::Utf8(s.to_string())
}

/// Job history of two employees, deliberately out of order.
fn job_history() -> DataSet {
    DataSet::new(
        Schema::new(vec![
            Field::new("EmpID", DataType::Int64),
            Field::new("Job", DataType::Utf8),
            Field::new("Date", DataType::Timestamp),
            Field::new("Salary", DataType::Float64),
            Field::new("Source", DataType::Utf8),
        ]),
        vec![
            vec![Value::Int64(2), text("Analyst"), day(2022, 1, 1), Value::Float64(50.0), text("EMP_2022:row:5")],
            vec![Value::Int64(1), text("Engineer"), day(2022, 3, 1), Value::Float64(70.0), text("EMP_2022:row:4")],
            vec![Value::Int64(1), text("Intern"), day(2022, 2, 1), Value::Float64(20.0), text("EMP_2022:row:3")],
            vec![Value::Int64(1), text("Intern"), day(2022, 1, 1), Value::Float64(18.0), text("EMP_2022:row:2")],
        ],
    )
}

fn job_spec() -> ConsolidationSpec {
    ConsolidationSpec::new("EmpID", "Job", ConsolidationMode::effective_date("Date"))
        .rule("Date", Aggregation::Min)
        .rule("Salary", Aggregation::Max)
}

#[test]
fn four_rows_form_three_groups() {
    assert_eq!(group_ids(&job_history(), &job_spec()).unwrap(), vec![1, 1, 2, 3]);

    let out = consolidate(&job_history(), &job_spec()).unwrap();
    assert_eq!(out.row_count(), 3);
    assert_eq!(
        out.schema.field_names().collect::<Vec<_>>(),
        vec!["EmpID", "Job", START_DATE, "Salary", END_DATE]
    );
    assert_eq!(out.rows[0][1], text("Intern"));
    assert_eq!(out.rows[0][3], Value::Float64(20.0));
}

#[test]
fn each_interval_ends_at_the_next_start_of_the_same_entity() {
    let out = consolidate(&job_history(), &job_spec()).unwrap();
    let open = sentinel(DataType::Timestamp);

    assert_eq!(out.rows[0][2], day(2022, 1, 1));
    assert_eq!(out.rows[0][4], day(2022, 3, 1));
    assert_eq!(out.rows[1][2], day(2022, 3, 1));
    assert_eq!(out.rows[1][4], open);
    // A different entity never inherits the previous entity's next start.
    assert_eq!(out.rows[2][0], Value::Int64(2));
    assert_eq!(out.rows[2][4], open);
    assert_eq!(open.to_string(), "9999-12-31 00:00:00");
}

#[test]
fn equal_times_keep_input_order() {
    let data = DataSet::new(
        Schema::new(vec![
            Field::new("EmpID", DataType::Int64),
            Field::new("Job", DataType::Utf8),
            Field::new("Date", DataType::Timestamp),
            Field::new("Note", DataType::Utf8),
        ]),
        vec![
            vec![Value::Int64(1), text("A"), day(2022, 1, 1), text("first")],
            vec![Value::Int64(1), text("A"), day(2022, 1, 1), text("second")],
        ],
    );
    let spec = ConsolidationSpec::new("EmpID", "Job", ConsolidationMode::effective_date("Date"))
        .rule("Note", Aggregation::Last);
    let out = consolidate(&data, &spec).unwrap();
    assert_eq!(out.rows[0][3], text("second"));
}

#[test]
fn configured_explicit_intervals_merge_and_summarize_provenance() {
    let data = DataSet::new(
        Schema::new(vec![
            Field::new("EmpID", DataType::Int64),
            Field::new("Grade", DataType::Utf8),
            Field::new("From", DataType::Timestamp),
            Field::new("To", DataType::Timestamp),
            Field::new("Source", DataType::Utf8),
        ]),
        vec![
            vec![Value::Int64(1), text("G1"), day(2021, 1, 1), day(2021, 6, 30), text("GRD_a:row:2")],
            vec![Value::Int64(1), text("G1"), day(2021, 7, 1), Value::Null, text("GRD_b:row:2")],
            vec![Value::Int64(1), text("G2"), day(2022, 1, 1), day(2022, 12, 31), text("GRD_b:row:3")],
        ],
    );
    let config = ConsolidationConfig {
        entity_key: "EmpID".to_string(),
        category: "Grade".to_string(),
        mode: ConsolidationModeConfig::ExplicitInterval {
            period_start: "From".to_string(),
            period_end: "To".to_string(),
        },
        aggregations: vec![AggregationRuleConfig {
            column: "Source".to_string(),
            rule: "provenance".to_string(),
        }],
    };
    let spec = ConsolidationSpec::from_config(&config, &AggregationRegistry::default()).unwrap();

    let out = consolidate(&data, &spec).unwrap();
    assert_eq!(out.row_count(), 2);
    assert_eq!(
        out.schema.field_names().collect::<Vec<_>>(),
        vec!["EmpID", "Grade", "From", "To", "Source"]
    );
    assert_eq!(out.rows[0][2], day(2021, 1, 1));
    assert_eq!(out.rows[0][3], sentinel(DataType::Timestamp));
    assert_eq!(
        out.rows[0][4],
        text(r#"{"GRD_a:row:":[2],"GRD_b:row:":[2]}"#)
    );
    assert_eq!(out.rows[1][3], day(2022, 12, 31));
}

#[test]
fn registered_reducer_is_usable_by_name() {
    let mut registry = AggregationRegistry::builtin_only();
    registry
        .register(Reducer::new("count", DataType::Int64, |values: &[&Value]| {
            Value::Int64(values.len() as i64)
        }))
        .unwrap();

    let spec = ConsolidationSpec::new("EmpID", "Job", ConsolidationMode::effective_date("Date"))
        .rule("Salary", registry.parse("count").unwrap());
    let out = consolidate(&job_history(), &spec).unwrap();
    assert_eq!(out.schema.fields[3].data_type, DataType::Int64);
    assert_eq!(out.rows[0][3], Value::Int64(2));
}

#[test]
fn bad_configuration_fails_before_any_row() {
    let registry = AggregationRegistry::default();
    assert!(matches!(
        registry.parse("median"),
        Err(ConsolidationError::AggregationConfig { .. })
    ));

    let missing = job_spec().rule("Bonus", Aggregation::Max);
    let err = consolidate(&job_history(), &missing).unwrap_err();
    assert!(err.to_string().contains("Bonus"));

    let empty = DataSet::new(job_history().schema, Vec::new());
    assert!(consolidate(&empty, &missing).is_err());
    assert_eq!(consolidate(&empty, &job_spec()).unwrap().row_count(), 0);
}
