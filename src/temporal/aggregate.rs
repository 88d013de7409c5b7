//! Per-column aggregation rules applied to each consolidation group.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConsolidationError, ConsolidationResult};
use crate::ingestion::summarize_provenance;
use crate::types::{DataType, Value};

/// Signature of a custom group reducer: the group's values in sorted row order.
pub type ReduceFn = dyn Fn(&[&Value]) -> Value + Send + Sync;

/// A named custom reducer.
#[derive(Clone)]
pub struct Reducer {
    name: String,
    output: DataType,
    func: Arc<ReduceFn>,
}

impl Reducer {
    /// `output` is the dtype of the values `func` returns.
    pub fn new(
        name: impl Into<String>,
        output: DataType,
        func: impl Fn(&[&Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            output,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> DataType {
        self.output
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reducer")
            .field("name", &self.name)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// How one column collapses to a single value per group.
#[derive(Debug, Clone)]
pub enum Aggregation {
    /// First non-null value.
    First,
    /// Last non-null value.
    Last,
    /// Smallest non-null value.
    Min,
    /// Largest non-null value.
    Max,
    /// Distinct non-null values in first-seen order, as a JSON array.
    Unique,
    Custom(Reducer),
}

impl Aggregation {
    /// The tag this aggregation is configured with.
    pub fn tag(&self) -> &str {
        match self {
            Aggregation::First => "first",
            Aggregation::Last => "last",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Unique => "unique",
            Aggregation::Custom(r) => r.name(),
        }
    }

    /// Output dtype for an input column of type `input`.
    pub fn output_type(&self, input: DataType) -> DataType {
        match self {
            Aggregation::First | Aggregation::Last | Aggregation::Min | Aggregation::Max => input,
            Aggregation::Unique => DataType::Utf8,
            Aggregation::Custom(r) => r.output(),
        }
    }

    /// Collapse one group's values. A group with only nulls yields null for the built-ins.
    pub fn apply(&self, values: &[&Value]) -> Value {
        let non_null = || values.iter().copied().filter(|v| !v.is_null());
        match self {
            Aggregation::First => non_null().next().cloned().unwrap_or(Value::Null),
            Aggregation::Last => non_null().last().cloned().unwrap_or(Value::Null),
            Aggregation::Min => non_null()
                .min_by(|a, b| a.total_cmp(b))
                .cloned()
                .unwrap_or(Value::Null),
            Aggregation::Max => non_null()
                .max_by(|a, b| a.total_cmp(b))
                .cloned()
                .unwrap_or(Value::Null),
            Aggregation::Unique => {
                let mut seen: Vec<&Value> = Vec::new();
                for v in non_null() {
                    if !seen.contains(&v) {
                        seen.push(v);
                    }
                }
                if seen.is_empty() {
                    return Value::Null;
                }
                let array: Vec<serde_json::Value> = seen.iter().map(|v| v.to_json()).collect();
                Value::Utf8(serde_json::Value::Array(array).to_string())
            }
            Aggregation::Custom(r) => (r.func)(values),
        }
    }
}

/// Resolves aggregation tags, including registered custom reducers.
///
/// The default registry knows the built-in tags plus `provenance`, which folds provenance
/// strings with [`summarize_provenance`].
#[derive(Debug, Clone)]
pub struct AggregationRegistry {
    custom: BTreeMap<String, Reducer>,
}

impl Default for AggregationRegistry {
    fn default() -> Self {
        let mut custom = BTreeMap::new();
        custom.insert(
            "provenance".to_string(),
            Reducer::new("provenance", DataType::Utf8, summarize_provenance),
        );
        Self { custom }
    }
}

impl AggregationRegistry {
    /// A registry with only the built-in tags.
    pub fn builtin_only() -> Self {
        Self {
            custom: BTreeMap::new(),
        }
    }

    /// Register a custom reducer under its name. Built-in tags cannot be shadowed.
    pub fn register(&mut self, reducer: Reducer) -> ConsolidationResult<()> {
        if builtin(reducer.name()).is_some() {
            return Err(ConsolidationError::AggregationConfig {
                message: format!("'{}' is a built-in aggregation", reducer.name()),
            });
        }
        self.custom.insert(reducer.name().to_string(), reducer);
        Ok(())
    }

    pub fn parse(&self, tag: &str) -> ConsolidationResult<Aggregation> {
        let tag = tag.trim();
        if let Some(agg) = builtin(tag) {
            return Ok(agg);
        }
        self.custom
            .get(tag)
            .map(|r| Aggregation::Custom(r.clone()))
            .ok_or_else(|| ConsolidationError::AggregationConfig {
                message: format!("unsupported aggregation '{tag}'"),
            })
    }
}

fn builtin(tag: &str) -> Option<Aggregation> {
    match tag {
        "first" => Some(Aggregation::First),
        "last" => Some(Aggregation::Last),
        "min" => Some(Aggregation::Min),
        "max" => Some(Aggregation::Max),
        "unique" => Some(Aggregation::Unique),
        _ => None,
    }
}
