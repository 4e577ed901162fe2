//! Cost-based query planning.
//!
//! The planner turns each filter into an index candidate source when an
//! index covers it, probes each source for a bounded cardinality
//! estimate, and orders sources cheapest first so intersection shrinks
//! the candidate set as early as possible. An uncovered equality or
//! range filter fails planning with `IndexNotFound` unless the query
//! opted into full scans, in which case it becomes a residual predicate
//! applied after hydration; fulltext and spatial filters have no scan
//! fallback and always require their index.
//!
//! For hybrid queries the fraction of the vector population the
//! candidate set would cover decides the fusion strategy: a selective
//! candidate set becomes an HNSW whitelist (pre-filter), a broad one
//! means searching first and filtering after (post-filter).

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::index::{Estimate, IndexDefinition, IndexKind};
use crate::query::{ExplainReport, Filter, PlanStepReport, Query};
use crate::types::SequenceNumber;
use facetdb_codec::Value;
use std::ops::Bound;
use std::sync::Arc;

/// One way to produce candidate pks.
pub(crate) enum CandidateSource {
    /// Point lookup on an equality, range, or composite index.
    IndexEq {
        def: Arc<IndexDefinition>,
        values: Vec<Value>,
        estimate: Estimate,
    },
    /// Bounded scan on a range index.
    IndexRange {
        def: Arc<IndexDefinition>,
        low: Bound<Value>,
        high: Bound<Value>,
        estimate: Estimate,
    },
    /// Conjunctive token match on a fulltext index.
    Fulltext {
        def: Arc<IndexDefinition>,
        query: String,
        estimate: Estimate,
    },
    /// Radius match on a geo index.
    Geo {
        def: Arc<IndexDefinition>,
        lat: f64,
        lon: f64,
        radius_m: f64,
        estimate: Estimate,
    },
}

impl CandidateSource {
    pub(crate) fn estimate(&self) -> Estimate {
        match self {
            CandidateSource::IndexEq { estimate, .. }
            | CandidateSource::IndexRange { estimate, .. }
            | CandidateSource::Fulltext { estimate, .. }
            | CandidateSource::Geo { estimate, .. } => *estimate,
        }
    }

    fn describe(&self) -> String {
        match self {
            CandidateSource::IndexEq { def, .. } => format!("index-eq({})", def.name),
            CandidateSource::IndexRange { def, .. } => format!("index-range({})", def.name),
            CandidateSource::Fulltext { def, .. } => format!("fulltext({})", def.name),
            CandidateSource::Geo { def, .. } => format!("geo({})", def.name),
        }
    }
}

/// The similarity stage with its fusion decision made.
pub(crate) struct VectorStage {
    pub(crate) index: String,
    pub(crate) query: Vec<f32>,
    pub(crate) k: usize,
    /// True: search with the candidate set as an HNSW whitelist.
    /// False: search wide, filter afterwards, refilling as needed.
    pub(crate) prefilter: bool,
}

/// An executable plan.
pub(crate) struct QueryPlan {
    pub(crate) query: Query,
    /// Candidate sources, cheapest estimate first. Empty means a table
    /// scan (or a pure vector query).
    pub(crate) sources: Vec<CandidateSource>,
    /// Filters applied after hydration.
    pub(crate) residual: Vec<Filter>,
    pub(crate) vector: Option<VectorStage>,
}

impl QueryPlan {
    /// Renders the plan for `explain` and `profile`.
    pub(crate) fn explain(&self) -> ExplainReport {
        let mut steps = Vec::new();
        for source in &self.sources {
            let estimate = source.estimate();
            steps.push(PlanStepReport {
                description: if estimate.saturated {
                    format!("{} (saturated)", source.describe())
                } else {
                    source.describe()
                },
                estimate: Some(estimate.count),
            });
        }
        if self.sources.is_empty() && !pure_vector(self) {
            steps.push(PlanStepReport {
                description: format!("table-scan({})", self.query.table),
                estimate: None,
            });
        }
        if self.sources.len() > 1 {
            steps.push(PlanStepReport {
                description: "intersect".to_string(),
                estimate: None,
            });
        }
        if let Some(stage) = &self.vector {
            steps.push(PlanStepReport {
                description: format!(
                    "vector-{}({}, k={})",
                    if stage.prefilter { "prefilter" } else { "postfilter" },
                    stage.index,
                    stage.k
                ),
                estimate: None,
            });
        }
        steps.push(PlanStepReport {
            description: "hydrate".to_string(),
            estimate: None,
        });
        if !self.residual.is_empty() {
            steps.push(PlanStepReport {
                description: format!("filter(residual={})", self.residual.len()),
                estimate: None,
            });
        }
        if let Some((field, _)) = &self.query.order_by {
            steps.push(PlanStepReport {
                description: format!("order-by({field})"),
                estimate: None,
            });
        }
        if self.query.aggregate.is_some() {
            steps.push(PlanStepReport {
                description: "aggregate".to_string(),
                estimate: None,
            });
        }
        ExplainReport { steps }
    }
}

fn pure_vector(plan: &QueryPlan) -> bool {
    plan.vector.is_some() && plan.sources.is_empty() && plan.residual.is_empty()
}

/// Builds the plan for a query at a snapshot.
pub(crate) fn plan(
    ctx: &EngineContext,
    snapshot: SequenceNumber,
    query: Query,
) -> EngineResult<QueryPlan> {
    let defs = ctx.indexes.for_table(&query.table);
    let probe = ctx.config.probe_limit;
    let mut sources = Vec::new();
    let mut residual = Vec::new();

    for filter in &query.filters {
        match filter {
            Filter::Eq { field, value } => match best_eq_index(&defs, field) {
                Some(def) => {
                    let values = vec![value.clone()];
                    let estimate =
                        ctx.indexes
                            .estimate_eq(&ctx.store, snapshot, &def, &values, probe)?;
                    sources.push(CandidateSource::IndexEq {
                        def,
                        values,
                        estimate,
                    });
                }
                None if query.allow_full_scan => residual.push(filter.clone()),
                None => return Err(unindexed(&query.table, field)),
            },
            Filter::Range { field, low, high } => {
                match find_index(&defs, IndexKind::Range, field) {
                    Some(def) => {
                        let estimate = ctx.indexes.estimate_range(
                            &ctx.store,
                            snapshot,
                            &def,
                            low.as_ref(),
                            high.as_ref(),
                            probe,
                        )?;
                        sources.push(CandidateSource::IndexRange {
                            def,
                            low: low.clone(),
                            high: high.clone(),
                            estimate,
                        });
                    }
                    None if query.allow_full_scan => residual.push(filter.clone()),
                    None => return Err(unindexed(&query.table, field)),
                }
            }
            Filter::Contains { field, query: text } => {
                let def = find_index(&defs, IndexKind::Fulltext, field)
                    .ok_or_else(|| unindexed(&query.table, field))?;
                let estimate = ctx.indexes.estimate_fulltext(
                    &ctx.store,
                    snapshot,
                    &def,
                    text,
                    ctx.config.min_token_len,
                    probe,
                )?;
                sources.push(CandidateSource::Fulltext {
                    def,
                    query: text.clone(),
                    estimate,
                });
            }
            Filter::Within {
                field,
                lat,
                lon,
                radius_m,
            } => {
                let def = find_index(&defs, IndexKind::Geo, field)
                    .ok_or_else(|| unindexed(&query.table, field))?;
                let estimate = ctx
                    .indexes
                    .estimate_geo(&ctx.store, snapshot, &def, *lat, *lon, *radius_m, probe)?;
                sources.push(CandidateSource::Geo {
                    def,
                    lat: *lat,
                    lon: *lon,
                    radius_m: *radius_m,
                    estimate,
                });
            }
        }
    }

    // Cheapest first: intersection starts from the smallest set.
    sources.sort_by_key(|source| {
        let estimate = source.estimate();
        (estimate.saturated, estimate.count)
    });

    let vector = match &query.vector {
        None => None,
        Some(vq) => {
            let population = ctx.vectors.population(&vq.index)?;
            let state = ctx.vectors.get(&vq.index)?;
            if state.config.table != query.table {
                return Err(EngineError::invalid_operation(format!(
                    "vector index {:?} indexes table {:?}, query targets {:?}",
                    vq.index, state.config.table, query.table
                )));
            }
            let prefilter = match sources.first().map(CandidateSource::estimate) {
                Some(estimate) if !estimate.saturated => {
                    (estimate.count as f64)
                        < ctx.config.prefilter_max_fraction * population as f64
                }
                // Saturated probe or no index source: candidates are
                // too broad (or unknown), search first and filter.
                _ => false,
            };
            Some(VectorStage {
                index: vq.index.clone(),
                query: vq.query.clone(),
                k: vq.k,
                prefilter,
            })
        }
    };

    Ok(QueryPlan {
        query,
        sources,
        residual,
        vector,
    })
}

/// No index covers `table.field` and the query did not opt into scans.
fn unindexed(table: &str, field: &str) -> EngineError {
    EngineError::index_not_found(format!("{table}.{field}"))
}

fn find_index(
    defs: &[Arc<IndexDefinition>],
    kind: IndexKind,
    field: &str,
) -> Option<Arc<IndexDefinition>> {
    defs.iter()
        .find(|def| def.kind == kind && def.fields.first().is_some_and(|f| f == field))
        .cloned()
}

/// Picks an index able to answer `field == value`: a dedicated equality
/// index, else a range index (same entry shape), else a composite whose
/// leading field matches.
fn best_eq_index(defs: &[Arc<IndexDefinition>], field: &str) -> Option<Arc<IndexDefinition>> {
    find_index(defs, IndexKind::Equality, field)
        .or_else(|| find_index(defs, IndexKind::Range, field))
        .or_else(|| find_index(defs, IndexKind::Composite, field))
}
