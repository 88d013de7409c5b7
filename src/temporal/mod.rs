//! Temporal consolidation: collapse runs of time-series rows that share an entity and a category
//! into one interval row each.
//!
//! Rows are stably sorted by entity key then time, split at every change point of the
//! `(entity key, category)` pair, and each run is aggregated column by column.
//!
//! ```rust
//! use tabular_ingest::temporal::{Aggregation, ConsolidationMode, ConsolidationSpec, consolidate};
//! use tabular_ingest::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let data = DataSet::new(
//!     Schema::new(vec![
//!         Field::new("emp", DataType::Int64),
//!         Field::new("cat", DataType::Utf8),
//!         Field::new("t", DataType::Int64),
//!     ]),
//!     vec![
//!         vec![Value::Int64(1), Value::Utf8("A".into()), Value::Int64(1)],
//!         vec![Value::Int64(1), Value::Utf8("A".into()), Value::Int64(2)],
//!         vec![Value::Int64(1), Value::Utf8("B".into()), Value::Int64(3)],
//!     ],
//! );
//! let spec = ConsolidationSpec::new("emp", "cat", ConsolidationMode::effective_date("t"))
//!     .rule("t", Aggregation::Min);
//! let out = consolidate(&data, &spec).unwrap();
//! assert_eq!(out.row_count(), 2);
//! assert_eq!(out.rows[0][3], Value::Int64(3)); // EndDate of the first interval
//! ```

pub mod aggregate;

use std::fmt;
use std::ops::Range;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::{ConsolidationConfig, ConsolidationModeConfig};
use crate::error::{ConsolidationError, ConsolidationResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

pub use aggregate::{Aggregation, AggregationRegistry, ReduceFn, Reducer};

/// Name of the time column in effective-date output.
pub const START_DATE: &str = "StartDate";
/// Name of the derived end column in effective-date output.
pub const END_DATE: &str = "EndDate";

/// How interval boundaries are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationMode {
    /// One date per row. Each interval ends where the entity's next interval starts.
    EffectiveDate { time_column: String },
    /// Explicit start and end per row. Each interval spans the earliest start to the latest end.
    ExplicitInterval {
        period_start: String,
        period_end: String,
    },
}

impl ConsolidationMode {
    pub fn effective_date(time_column: impl Into<String>) -> Self {
        ConsolidationMode::EffectiveDate {
            time_column: time_column.into(),
        }
    }

    pub fn explicit_interval(period_start: impl Into<String>, period_end: impl Into<String>) -> Self {
        ConsolidationMode::ExplicitInterval {
            period_start: period_start.into(),
            period_end: period_end.into(),
        }
    }

    /// The column rows are ordered by within an entity.
    pub fn sort_column(&self) -> &str {
        match self {
            ConsolidationMode::EffectiveDate { time_column } => time_column,
            ConsolidationMode::ExplicitInterval { period_start, .. } => period_start,
        }
    }
}

/// One output column and how it is aggregated.
#[derive(Debug, Clone)]
pub struct AggregationRule {
    pub column: String,
    pub aggregation: Aggregation,
}

/// A complete consolidation: grouping columns, boundary mode and per-column rules.
#[derive(Debug, Clone)]
pub struct ConsolidationSpec {
    pub entity_key: String,
    pub category: String,
    pub mode: ConsolidationMode,
    pub rules: Vec<AggregationRule>,
}

impl ConsolidationSpec {
    pub fn new(
        entity_key: impl Into<String>,
        category: impl Into<String>,
        mode: ConsolidationMode,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            category: category.into(),
            mode,
            rules: Vec::new(),
        }
    }

    /// Add a rule for `column`.
    pub fn rule(mut self, column: impl Into<String>, aggregation: Aggregation) -> Self {
        self.rules.push(AggregationRule {
            column: column.into(),
            aggregation,
        });
        self
    }

    /// Build from configuration, resolving rule tags through `registry`.
    pub fn from_config(
        config: &ConsolidationConfig,
        registry: &AggregationRegistry,
    ) -> ConsolidationResult<Self> {
        let mode = match &config.mode {
            ConsolidationModeConfig::EffectiveDate { time_column } => {
                ConsolidationMode::effective_date(time_column)
            }
            ConsolidationModeConfig::ExplicitInterval {
                period_start,
                period_end,
            } => ConsolidationMode::explicit_interval(period_start, period_end),
        };
        let mut spec = Self::new(&config.entity_key, &config.category, mode);
        for rule in &config.aggregations {
            spec = spec.rule(&rule.column, registry.parse(&rule.rule)?);
        }
        Ok(spec)
    }
}

impl fmt::Display for ConsolidationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            ConsolidationMode::EffectiveDate { time_column } => write!(
                f,
                "effective_date(key={}, category={}, time={time_column}",
                self.entity_key, self.category
            )?,
            ConsolidationMode::ExplicitInterval {
                period_start,
                period_end,
            } => write!(
                f,
                "explicit_interval(key={}, category={}, start={period_start}, end={period_end}",
                self.entity_key, self.category
            )?,
        }
        for rule in &self.rules {
            write!(f, ", {}={}", rule.column, rule.aggregation.tag())?;
        }
        f.write_str(")")
    }
}

/// Open end used where an interval has no end: far-future for dates, the maximum for numbers.
/// Types without a natural maximum get null.
pub fn sentinel(dtype: DataType) -> Value {
    match dtype {
        DataType::Timestamp => NaiveDate::from_ymd_opt(9999, 12, 31)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
        DataType::Int64 => Value::Int64(i64::MAX),
        DataType::Float64 => Value::Float64(f64::INFINITY),
        DataType::Utf8 => Value::Utf8("9999-12-31".to_string()),
        DataType::Bool | DataType::Interval | DataType::Uuid => Value::Null,
    }
}

/// Resolved column positions; built before any row is touched.
struct Plan {
    key: usize,
    category: usize,
    sort: usize,
    /// Explicit-interval end column, whose nulls become the sentinel.
    period_end: Option<usize>,
    outputs: Vec<OutputColumn>,
}

struct OutputColumn {
    source: usize,
    name: String,
    dtype: DataType,
    aggregation: Aggregation,
}

fn config_error(message: String) -> ConsolidationError {
    ConsolidationError::AggregationConfig { message }
}

fn resolve(data: &DataSet, column: &str, role: &str) -> ConsolidationResult<usize> {
    data.schema
        .index_of(column)
        .ok_or_else(|| config_error(format!("{role} column '{column}' does not exist")))
}

impl Plan {
    fn build(data: &DataSet, spec: &ConsolidationSpec) -> ConsolidationResult<Self> {
        let key = resolve(data, &spec.entity_key, "entity key")?;
        let category = resolve(data, &spec.category, "category")?;
        let sort = resolve(data, spec.mode.sort_column(), "time")?;
        if key == category || key == sort || category == sort {
            return Err(config_error(
                "entity key, category and time columns must be distinct".to_string(),
            ));
        }

        for (i, rule) in spec.rules.iter().enumerate() {
            resolve(data, &rule.column, "aggregation")?;
            if spec.rules[..i].iter().any(|r| r.column == rule.column) {
                return Err(config_error(format!(
                    "column '{}' has more than one aggregation",
                    rule.column
                )));
            }
        }
        let rule_for = |column: &str| {
            spec.rules
                .iter()
                .find(|r| r.column == column)
                .map(|r| r.aggregation.clone())
        };
        let dtype_of = |idx: usize| data.schema.fields[idx].data_type;

        let mut outputs = Vec::new();
        let mut push = |source: usize, name: &str, aggregation: Aggregation| {
            if outputs.iter().any(|o: &OutputColumn| o.source == source) {
                return;
            }
            outputs.push(OutputColumn {
                source,
                name: name.to_string(),
                dtype: aggregation.output_type(dtype_of(source)),
                aggregation,
            });
        };
        push(key, &spec.entity_key, rule_for(&spec.entity_key).unwrap_or(Aggregation::First));
        push(category, &spec.category, rule_for(&spec.category).unwrap_or(Aggregation::First));

        let period_end = match &spec.mode {
            ConsolidationMode::EffectiveDate { time_column } => {
                push(sort, START_DATE, rule_for(time_column).unwrap_or(Aggregation::First));
                None
            }
            ConsolidationMode::ExplicitInterval {
                period_start,
                period_end,
            } => {
                let end = resolve(data, period_end, "period end")?;
                push(sort, period_start, Aggregation::Min);
                push(end, period_end, Aggregation::Max);
                Some(end)
            }
        };
        for rule in &spec.rules {
            if let Some(source) = data.schema.index_of(&rule.column) {
                push(source, &rule.column, rule.aggregation.clone());
            }
        }

        for (i, out) in outputs.iter().enumerate() {
            let reserved = period_end.is_none() && out.name == END_DATE;
            if reserved || outputs[..i].iter().any(|o| o.name == out.name) {
                return Err(config_error(format!(
                    "output column '{}' would appear twice",
                    out.name
                )));
            }
        }

        Ok(Self {
            key,
            category,
            sort,
            period_end,
            outputs,
        })
    }
}

/// Row order after the stable sort by (entity key, time).
fn sorted_order(data: &DataSet, key: usize, sort: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..data.row_count()).collect();
    order.sort_by(|&a, &b| {
        let (ra, rb) = (&data.rows[a], &data.rows[b]);
        ra[key]
            .total_cmp(&rb[key])
            .then_with(|| ra[sort].total_cmp(&rb[sort]))
    });
    order
}

/// Group id per sorted row: starts at 1 and increments whenever the entity key or the category
/// differs from the previous row.
///
/// Equality is the sort's total order, so two nulls are equal, NaN equals NaN and `1` equals
/// `1.0`.
fn change_points(data: &DataSet, order: &[usize], key: usize, category: usize) -> Vec<usize> {
    let mut ids = Vec::with_capacity(order.len());
    let mut current = 0;
    let mut previous: Option<&[Value]> = None;
    for &idx in order {
        let row = data.rows[idx].as_slice();
        let changed = match previous {
            None => true,
            Some(prev) => !same(&prev[key], &row[key]) || !same(&prev[category], &row[category]),
        };
        if changed {
            current += 1;
        }
        ids.push(current);
        previous = Some(row);
    }
    ids
}

fn same(a: &Value, b: &Value) -> bool {
    a.total_cmp(b).is_eq()
}

/// Group ids of `data` in sorted row order, as assigned by [`consolidate`].
pub fn group_ids(data: &DataSet, spec: &ConsolidationSpec) -> ConsolidationResult<Vec<usize>> {
    let plan = Plan::build(data, spec)?;
    let order = sorted_order(data, plan.key, plan.sort);
    Ok(change_points(data, &order, plan.key, plan.category))
}

/// Split group ids (non-decreasing) into contiguous ranges.
fn group_ranges(ids: &[usize]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=ids.len() {
        if i == ids.len() || ids[i] != ids[start] {
            ranges.push(start..i);
            start = i;
        }
    }
    ranges
}

/// Consolidate `data` into one row per change-point group.
///
/// Output columns are the entity key, the category, the interval column(s) and then every other
/// rule column in rule order. In effective-date mode the time column is renamed [`START_DATE`]
/// and an [`END_DATE`] column is appended; the last interval of an entity ends at the
/// [`sentinel`]. In explicit-interval mode null period ends become the sentinel before grouping.
///
/// Every configuration problem is reported before any row is processed.
pub fn consolidate(data: &DataSet, spec: &ConsolidationSpec) -> ConsolidationResult<DataSet> {
    let plan = Plan::build(data, spec)?;

    let mut owned;
    let data = match plan.period_end {
        Some(end) if data.rows.iter().any(|r| r[end].is_null()) => {
            let open = sentinel(data.schema.fields[end].data_type);
            owned = data.clone();
            for row in &mut owned.rows {
                if row[end].is_null() {
                    row[end] = open.clone();
                }
            }
            &owned
        }
        _ => data,
    };

    let order = sorted_order(data, plan.key, plan.sort);
    let ids = change_points(data, &order, plan.key, plan.category);
    let groups = group_ranges(&ids);
    debug!(rows = data.row_count(), groups = groups.len(), "change points assigned");

    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(groups.len());
    let mut column: Vec<&Value> = Vec::new();
    for group in &groups {
        let members = &order[group.clone()];
        let mut out = Vec::with_capacity(plan.outputs.len() + 1);
        for output in &plan.outputs {
            column.clear();
            column.extend(members.iter().map(|&r| &data.rows[r][output.source]));
            out.push(output.aggregation.apply(&column));
        }
        rows.push(out);
    }

    let mut fields: Vec<Field> = plan
        .outputs
        .iter()
        .map(|o| Field::new(&o.name, o.dtype))
        .collect();

    if plan.period_end.is_none() {
        let start_dtype = plan.outputs[2].dtype;
        let open = sentinel(start_dtype);
        for g in 0..groups.len() {
            let entity = &data.rows[order[groups[g].start]][plan.key];
            let end = groups
                .get(g + 1)
                .filter(|next| same(&data.rows[order[next.start]][plan.key], entity))
                .map(|_| rows[g + 1][2].clone())
                .unwrap_or_else(|| open.clone());
            rows[g].push(end);
        }
        fields.push(Field::new(END_DATE, start_dtype));
    }

    info!(
        rows_in = data.row_count(),
        rows_out = rows.len(),
        consolidation = %spec,
        "consolidated"
    );
    Ok(DataSet::new(Schema::new(fields), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationRuleConfig;

    fn row(emp: i64, cat: &str, t: i64) -> Vec<Value> {
        vec![Value::Int64(emp), Value::Utf8(cat.into()), Value::Int64(t)]
    }

    fn history() -> DataSet {
        DataSet::new(
            Schema::new(vec![
                Field::new("emp", DataType::Int64),
                Field::new("cat", DataType::Utf8),
                Field::new("t", DataType::Int64),
            ]),
            vec![row(2, "A", 1), row(1, "B", 3), row(1, "A", 2), row(1, "A", 1)],
        )
    }

    fn effective() -> ConsolidationSpec {
        ConsolidationSpec::new("emp", "cat", ConsolidationMode::effective_date("t"))
            .rule("t", Aggregation::Min)
    }

    #[test]
    fn change_points_number_groups_from_one() {
        assert_eq!(group_ids(&history(), &effective()).unwrap(), vec![1, 1, 2, 3]);
        let out = consolidate(&history(), &effective()).unwrap();
        assert_eq!(out.row_count(), 3);
    }

    #[test]
    fn effective_date_end_is_next_start_then_sentinel() {
        let out = consolidate(&history(), &effective()).unwrap();
        assert_eq!(
            out.schema.field_names().collect::<Vec<_>>(),
            vec!["emp", "cat", START_DATE, END_DATE]
        );
        assert_eq!(
            out.rows,
            vec![
                vec![Value::Int64(1), Value::Utf8("A".into()), Value::Int64(1), Value::Int64(3)],
                vec![
                    Value::Int64(1),
                    Value::Utf8("B".into()),
                    Value::Int64(3),
                    Value::Int64(i64::MAX)
                ],
                vec![
                    Value::Int64(2),
                    Value::Utf8("A".into()),
                    Value::Int64(1),
                    Value::Int64(i64::MAX)
                ],
            ]
        );
    }

    #[test]
    fn returning_category_starts_a_new_group() {
        let data = DataSet::new(
            history().schema,
            vec![row(1, "A", 1), row(1, "B", 2), row(1, "A", 3)],
        );
        assert_eq!(group_ids(&data, &effective()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn explicit_interval_spans_min_start_to_max_end() {
        let ts = |d: u32| {
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, d)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            )
        };
        let data = DataSet::new(
            Schema::new(vec![
                Field::new("emp", DataType::Int64),
                Field::new("status", DataType::Utf8),
                Field::new("start", DataType::Timestamp),
                Field::new("end", DataType::Timestamp),
                Field::new("Source", DataType::Utf8),
            ]),
            vec![
                vec![Value::Int64(7), Value::Utf8("ft".into()), ts(10), Value::Null, Value::Utf8("f:row:3".into())],
                vec![Value::Int64(7), Value::Utf8("ft".into()), ts(1), ts(9), Value::Utf8("f:row:2".into())],
            ],
        );
        let spec = ConsolidationSpec::new(
            "emp",
            "status",
            ConsolidationMode::explicit_interval("start", "end"),
        )
        .rule("Source", AggregationRegistry::default().parse("provenance").unwrap());

        let out = consolidate(&data, &spec).unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.rows[0][2], ts(1));
        assert_eq!(out.rows[0][3], sentinel(DataType::Timestamp));
        assert_eq!(out.rows[0][4], Value::Utf8(r#"{"f:row:":[2,3]}"#.into()));
    }

    #[test]
    fn configuration_errors_are_raised_up_front() {
        let bad_column = effective().rule("missing", Aggregation::Last);
        assert!(matches!(
            consolidate(&history(), &bad_column),
            Err(ConsolidationError::AggregationConfig { .. })
        ));

        let config = ConsolidationConfig {
            entity_key: "emp".into(),
            category: "cat".into(),
            mode: ConsolidationModeConfig::EffectiveDate {
                time_column: "t".into(),
            },
            aggregations: vec![AggregationRuleConfig {
                column: "t".into(),
                rule: "median".into(),
            }],
        };
        let err = ConsolidationSpec::from_config(&config, &AggregationRegistry::default())
            .unwrap_err();
        assert!(err.to_string().contains("median"));
    }

    #[test]
    fn null_categories_group_together() {
        let data = DataSet::new(
            history().schema,
            vec![
                vec![Value::Int64(1), Value::Null, Value::Int64(1)],
                vec![Value::Int64(1), Value::Null, Value::Int64(2)],
            ],
        );
        assert_eq!(group_ids(&data, &effective()).unwrap(), vec![1, 1]);
    }

    #[test]
    fn grouping_equality_matches_sort_order() {
        let data = DataSet::new(
            Schema::new(vec![
                Field::new("emp", DataType::Float64),
                Field::new("cat", DataType::Float64),
                Field::new("t", DataType::Int64),
            ]),
            vec![
                vec![Value::Int64(1), Value::Float64(f64::NAN), Value::Int64(1)],
                vec![Value::Float64(1.0), Value::Float64(f64::NAN), Value::Int64(2)],
                vec![Value::Float64(1.0), Value::Float64(2.0), Value::Int64(3)],
            ],
        );
        assert_eq!(group_ids(&data, &effective()).unwrap(), vec![1, 1, 2]);

        let out = consolidate(&data, &effective()).unwrap();
        assert_eq!(out.row_count(), 2);
        // `1` and `1.0` are one entity, so the first interval ends where the second starts.
        assert_eq!(out.rows[0][3], Value::Int64(3));
    }

    #[test]
    fn sentinels_follow_dtype() {
        assert_eq!(sentinel(DataType::Float64), Value::Float64(f64::INFINITY));
        assert_eq!(sentinel(DataType::Utf8), Value::Utf8("9999-12-31".into()));
        assert_eq!(
            sentinel(DataType::Timestamp).to_string(),
            "9999-12-31 00:00:00"
        );
        assert_eq!(sentinel(DataType::Bool), Value::Null);
    }
}
