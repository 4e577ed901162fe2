//! Declarative queries over one table.
//!
//! A [`Query`] mixes structured filters, fulltext and spatial
//! predicates, and an optional vector-similarity stage over the same
//! candidate set. The planner picks index projections and a fusion
//! strategy; the executor runs the pipeline. `explain` shows the plan,
//! `profile` runs it and reports per-step work.

mod columnar;
mod executor;
mod planner;

pub use columnar::{AggregateRow, ColumnBatch};
pub use executor::CancelToken;

pub(crate) use executor::execute;
pub(crate) use planner::{plan, QueryPlan};

use crate::entity::Entity;
use facetdb_codec::Value;
use std::fmt;
use std::ops::Bound;

/// One filter predicate over an entity field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the value. Missing fields compare as null.
    Eq {
        /// Field name.
        field: String,
        /// Value to match.
        value: Value,
    },
    /// Field falls inside the bounds, in canonical value order.
    Range {
        /// Field name.
        field: String,
        /// Lower bound.
        low: Bound<Value>,
        /// Upper bound.
        high: Bound<Value>,
    },
    /// Text field contains every token of the query. Requires a
    /// fulltext index on the field.
    Contains {
        /// Field name.
        field: String,
        /// Token query, matched conjunctively.
        query: String,
    },
    /// Point field lies within `radius_m` meters. Requires a geo index
    /// on the field.
    Within {
        /// Field name holding a `[lat, lon]` array.
        field: String,
        /// Center latitude, degrees.
        lat: f64,
        /// Center longitude, degrees.
        lon: f64,
        /// Radius in meters.
        radius_m: f64,
    },
}

impl Filter {
    pub(crate) fn field(&self) -> &str {
        match self {
            Filter::Eq { field, .. }
            | Filter::Range { field, .. }
            | Filter::Contains { field, .. }
            | Filter::Within { field, .. } => field,
        }
    }
}

/// The similarity stage of a hybrid query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    /// Name of the vector index to search.
    pub index: String,
    /// Query embedding; must match the index dimension.
    pub query: Vec<f32>,
    /// How many nearest results to keep.
    pub k: usize,
}

/// Sort direction for `order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// An aggregate function over the matching rows.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateFn {
    /// Row count.
    Count,
    /// Sum of a numeric field; nulls skipped.
    Sum(String),
    /// Mean of a numeric field; nulls skipped.
    Avg(String),
    /// Minimum of a field, in canonical order.
    Min(String),
    /// Maximum of a field, in canonical order.
    Max(String),
}

/// An aggregation request, optionally grouped.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// The function to evaluate.
    pub func: AggregateFn,
    /// Group rows by this field before aggregating.
    pub group_by: Option<String>,
}

/// A query over one table. Build with the fluent methods, run with
/// [`crate::Engine::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub(crate) table: String,
    pub(crate) filters: Vec<Filter>,
    pub(crate) vector: Option<VectorQuery>,
    pub(crate) projection: Option<Vec<String>>,
    pub(crate) order_by: Option<(String, SortOrder)>,
    pub(crate) offset: usize,
    pub(crate) limit: Option<usize>,
    pub(crate) aggregate: Option<Aggregate>,
    pub(crate) allow_full_scan: bool,
}

impl Query {
    /// Starts a query over `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            vector: None,
            projection: None,
            order_by: None,
            offset: 0,
            limit: None,
            aggregate: None,
            allow_full_scan: false,
        }
    }

    /// Permits equality and range filters on fields without a covering
    /// index. Such filters degrade to a table scan with post-hydration
    /// filtering; without this opt-in, planning them fails with
    /// [`crate::EngineError::IndexNotFound`].
    #[must_use]
    pub fn allow_full_scan(mut self) -> Self {
        self.allow_full_scan = true;
        self
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn filter_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value,
        });
        self
    }

    /// Adds a range filter.
    #[must_use]
    pub fn filter_range(
        mut self,
        field: impl Into<String>,
        low: Bound<Value>,
        high: Bound<Value>,
    ) -> Self {
        self.filters.push(Filter::Range {
            field: field.into(),
            low,
            high,
        });
        self
    }

    /// Adds a fulltext containment filter.
    #[must_use]
    pub fn filter_contains(mut self, field: impl Into<String>, query: impl Into<String>) -> Self {
        self.filters.push(Filter::Contains {
            field: field.into(),
            query: query.into(),
        });
        self
    }

    /// Adds a spatial radius filter.
    #[must_use]
    pub fn filter_within(
        mut self,
        field: impl Into<String>,
        lat: f64,
        lon: f64,
        radius_m: f64,
    ) -> Self {
        self.filters.push(Filter::Within {
            field: field.into(),
            lat,
            lon,
            radius_m,
        });
        self
    }

    /// Adds a vector-similarity stage.
    #[must_use]
    pub fn nearest(mut self, index: impl Into<String>, query: Vec<f32>, k: usize) -> Self {
        self.vector = Some(VectorQuery {
            index: index.into(),
            query,
            k,
        });
        self
    }

    /// Keeps only the named fields in result entities.
    #[must_use]
    pub fn project(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sorts results by a field.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    /// Skips the first `offset` results.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Caps the result count.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Replaces row output with an aggregate.
    #[must_use]
    pub fn aggregate(mut self, func: AggregateFn) -> Self {
        self.aggregate = Some(Aggregate {
            func,
            group_by: None,
        });
        self
    }

    /// Replaces row output with a grouped aggregate.
    #[must_use]
    pub fn aggregate_by(mut self, func: AggregateFn, group_by: impl Into<String>) -> Self {
        self.aggregate = Some(Aggregate {
            func,
            group_by: Some(group_by.into()),
        });
        self
    }
}

/// What a query returns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    /// Matching entities, after ordering, offset, limit, and
    /// projection. Empty for aggregate queries.
    pub entities: Vec<Entity>,
    /// Similarity scores parallel to `entities` (lower is closer);
    /// present only for vector queries.
    pub scores: Option<Vec<f32>>,
    /// Aggregate output, one row per group (a single row ungrouped).
    pub aggregates: Option<Vec<AggregateRow>>,
}

/// The chosen plan in displayable form.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainReport {
    /// Pipeline steps in run order.
    pub steps: Vec<PlanStepReport>,
}

/// One step of an explained plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStepReport {
    /// What the step does, e.g. `index-eq(users_city)`.
    pub description: String,
    /// Probed cardinality estimate, when the planner made one. A
    /// saturated probe reports the probe limit.
    pub estimate: Option<usize>,
}

impl fmt::Display for ExplainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match step.estimate {
                Some(estimate) => write!(f, "{} (est {estimate})", step.description)?,
                None => write!(f, "{}", step.description)?,
            }
        }
        Ok(())
    }
}

/// Wall-clock accounting for one executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTiming {
    /// Step name, matching the explain output.
    pub step: String,
    /// Time spent in the step.
    pub elapsed: std::time::Duration,
    /// Rows (candidates, entities, or groups) the step produced.
    pub rows: usize,
}

/// Output of [`crate::Engine::profile`]: the result plus measurements.
#[derive(Debug, Clone)]
pub struct ProfileReport {
    /// The plan that ran.
    pub plan: ExplainReport,
    /// Per-step timings, in run order.
    pub timings: Vec<StepTiming>,
    /// The query's result.
    pub result: QueryResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_clauses() {
        let query = Query::table("users")
            .filter_eq("city", Value::Text("oslo".into()))
            .filter_range("age", Bound::Included(Value::Int(18)), Bound::Unbounded)
            .order_by("age", SortOrder::Descending)
            .offset(5)
            .limit(10)
            .project(["name", "age"]);
        assert_eq!(query.table, "users");
        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.offset, 5);
        assert_eq!(query.limit, Some(10));
        assert_eq!(
            query.projection,
            Some(vec!["name".to_string(), "age".to_string()])
        );
        assert!(!query.allow_full_scan);
        assert!(Query::table("users").allow_full_scan().allow_full_scan);
    }

    #[test]
    fn explain_report_renders_estimates() {
        let report = ExplainReport {
            steps: vec![
                PlanStepReport {
                    description: "index-eq(users_city)".into(),
                    estimate: Some(12),
                },
                PlanStepReport {
                    description: "hydrate".into(),
                    estimate: None,
                },
            ],
        };
        let text = report.to_string();
        assert!(text.contains("index-eq(users_city) (est 12)"));
        assert!(text.contains("hydrate"));
    }
}
