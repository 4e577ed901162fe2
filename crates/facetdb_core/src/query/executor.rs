//! Plan execution.
//!
//! The pipeline: scan candidate sources as parallel tasks and intersect
//! the sorted sets cheapest-first, run the vector stage, hydrate
//! entities (in parallel past the configured threshold), apply residual
//! filters, then order, aggregate, page, and project. Cancellation is checked between
//! steps; a cancelled query fails with an [`EngineError::Execution`]
//! naming the step it stopped at.

use crate::context::EngineContext;
use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};
use crate::index::{haversine_m, intersect_sorted, tokenize};
use crate::keyspace;
use crate::query::planner::{CandidateSource, QueryPlan, VectorStage};
use crate::query::{Filter, QueryResult, SortOrder, StepTiming};
use crate::types::SequenceNumber;
use facetdb_codec::Value;
use rayon::prelude::*;
use std::collections::HashSet;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation flag for a running query. Clone it, hand
/// one to the query call, and flip it from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that never fires unless cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the query fails at its next step boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Collects per-step wall-clock timings when profiling.
struct StepLog<'a> {
    timings: Option<&'a mut Vec<StepTiming>>,
}

impl StepLog<'_> {
    fn record(&mut self, step: &str, started: Instant, rows: usize) {
        if let Some(timings) = self.timings.as_deref_mut() {
            timings.push(StepTiming {
                step: step.to_string(),
                elapsed: started.elapsed(),
                rows,
            });
        }
    }
}

fn check_cancel(cancel: &CancelToken, step: &str) -> EngineResult<()> {
    if cancel.is_cancelled() {
        Err(EngineError::execution(step, "cancelled"))
    } else {
        Ok(())
    }
}

/// Runs a plan at a snapshot.
pub(crate) fn execute(
    ctx: &EngineContext,
    snapshot: SequenceNumber,
    plan: &QueryPlan,
    cancel: &CancelToken,
    timings: Option<&mut Vec<StepTiming>>,
) -> EngineResult<QueryResult> {
    let mut log = StepLog { timings };
    let page = ctx.config.scan_page_size;

    // Candidate pks: every source scanned as its own task on the rayon
    // pool, then the sorted sets intersected cheapest-first. `None`
    // means unconstrained (pure vector query).
    let mut candidates: Option<Vec<String>> = None;
    if !plan.sources.is_empty() {
        check_cancel(cancel, "candidates")?;
        let started = Instant::now();
        let sets: Vec<Vec<String>> = plan
            .sources
            .par_iter()
            .map(|source| evaluate_source(ctx, snapshot, source, page))
            .collect::<EngineResult<_>>()?;
        let mut merged: Option<Vec<String>> = None;
        for pks in sets {
            let next = match merged {
                None => pks,
                Some(existing) => intersect_sorted(&existing, &pks),
            };
            let empty = next.is_empty();
            merged = Some(next);
            if empty {
                break;
            }
        }
        log.record("candidates", started, merged.as_ref().map_or(0, Vec::len));
        candidates = merged;
    }

    if candidates.is_none() && !(plan.vector.is_some() && plan.residual.is_empty()) {
        // No index narrowed the query: fall back to scanning the table.
        check_cancel(cancel, "table-scan")?;
        let started = Instant::now();
        let pks = table_scan(ctx, snapshot, &plan.query.table, page)?;
        log.record("table-scan", started, pks.len());
        candidates = Some(pks);
    }

    // Vector stage: order switches from pk order to distance order.
    let mut scores: Option<Vec<f32>> = None;
    let ordered_pks: Vec<String>;
    match &plan.vector {
        Some(stage) => {
            check_cancel(cancel, "vector-search")?;
            let started = Instant::now();
            let hits = vector_stage(ctx, stage, candidates.as_ref())?;
            log.record("vector-search", started, hits.len());
            ordered_pks = hits.iter().map(|(pk, _)| pk.clone()).collect();
            scores = Some(hits.into_iter().map(|(_, d)| d).collect());
            ctx.stats.vector_search(1);
        }
        None => {
            ordered_pks = candidates.unwrap_or_default();
        }
    }

    // Hydration.
    check_cancel(cancel, "hydrate")?;
    let started = Instant::now();
    let hydrated = hydrate(ctx, snapshot, &plan.query.table, &ordered_pks)?;
    // Drop score slots whose pk vanished between search and hydration.
    if let Some(scores) = scores.as_mut() {
        let mut kept = hydrated.iter().map(|h| h.is_some());
        scores.retain(|_| kept.next().unwrap_or(false));
    }
    let mut entities: Vec<Entity> = hydrated.into_iter().flatten().collect();
    log.record("hydrate", started, entities.len());

    // Residual predicates.
    if !plan.residual.is_empty() {
        check_cancel(cancel, "filter")?;
        let started = Instant::now();
        let min_token_len = ctx.config.min_token_len;
        let mut kept_flags = Vec::with_capacity(entities.len());
        entities.retain(|entity| {
            let keep = plan
                .residual
                .iter()
                .all(|filter| matches_filter(entity, filter, min_token_len));
            kept_flags.push(keep);
            keep
        });
        if let Some(scores) = scores.as_mut() {
            let mut kept = kept_flags.into_iter();
            scores.retain(|_| kept.next().unwrap_or(false));
        }
        log.record("filter", started, entities.len());
    }

    ctx.stats.query_executed(1);

    // Aggregates see every matching row; paging does not apply.
    if let Some(aggregate) = &plan.query.aggregate {
        check_cancel(cancel, "aggregate")?;
        let started = Instant::now();
        let rows = super::columnar::evaluate(aggregate, &entities)?;
        log.record("aggregate", started, rows.len());
        return Ok(QueryResult {
            entities: Vec::new(),
            scores: None,
            aggregates: Some(rows),
        });
    }

    // Ordering: explicit order_by wins over vector distance order.
    if let Some((field, order)) = &plan.query.order_by {
        check_cancel(cancel, "order-by")?;
        let started = Instant::now();
        entities.sort_by(|a, b| {
            let left = a.field(field).unwrap_or(&Value::Null);
            let right = b.field(field).unwrap_or(&Value::Null);
            let by_value = left.cmp_canonical(right);
            let by_value = match order {
                SortOrder::Ascending => by_value,
                SortOrder::Descending => by_value.reverse(),
            };
            by_value.then_with(|| a.pk().cmp(b.pk()))
        });
        // Distance scores no longer line up after a re-sort.
        scores = None;
        log.record("order-by", started, entities.len());
    }

    // Paging.
    let offset = plan.query.offset.min(entities.len());
    let end = plan
        .query
        .limit
        .map_or(entities.len(), |limit| (offset + limit).min(entities.len()));
    entities = entities.drain(offset..end).collect();
    if let Some(scores) = scores.as_mut() {
        let upper = end.min(scores.len());
        let lower = offset.min(upper);
        *scores = scores[lower..upper].to_vec();
    }

    // Projection.
    if let Some(projection) = &plan.query.projection {
        let keep: HashSet<&str> = projection.iter().map(String::as_str).collect();
        for entity in &mut entities {
            let drop: Vec<String> = entity
                .fields()
                .keys()
                .filter(|name| !keep.contains(name.as_str()))
                .cloned()
                .collect();
            for name in drop {
                entity.remove_field(&name);
            }
        }
    }

    Ok(QueryResult {
        entities,
        scores,
        aggregates: None,
    })
}

fn evaluate_source(
    ctx: &EngineContext,
    snapshot: SequenceNumber,
    source: &CandidateSource,
    page: usize,
) -> EngineResult<Vec<String>> {
    let mut pks = match source {
        CandidateSource::IndexEq { def, values, .. } => {
            ctx.indexes
                .lookup_eq(&ctx.store, snapshot, def, values, page)?
        }
        CandidateSource::IndexRange { def, low, high, .. } => ctx.indexes.lookup_range(
            &ctx.store,
            snapshot,
            def,
            low.as_ref(),
            high.as_ref(),
            page,
        )?,
        CandidateSource::Fulltext { def, query, .. } => ctx.indexes.fulltext_search(
            &ctx.store,
            snapshot,
            def,
            query,
            ctx.config.min_token_len,
            page,
        )?,
        CandidateSource::Geo {
            def,
            lat,
            lon,
            radius_m,
            ..
        } => ctx
            .indexes
            .geo_within(&ctx.store, snapshot, def, *lat, *lon, *radius_m, page)?
            .into_iter()
            .map(|(pk, _)| pk)
            .collect(),
    };
    pks.sort_unstable();
    pks.dedup();
    Ok(pks)
}

fn table_scan(
    ctx: &EngineContext,
    snapshot: SequenceNumber,
    table: &str,
    page: usize,
) -> EngineResult<Vec<String>> {
    let prefix = keyspace::table_prefix(table);
    let mut pks = Vec::new();
    let mut cursor: Option<Vec<u8>> = None;
    loop {
        let batch = ctx.store.scan_prefix(&prefix, snapshot, cursor.as_deref(), page);
        for (key, _) in &batch.items {
            pks.push(keyspace::trailing_text_segment(key, prefix.len())?);
        }
        match batch.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(pks)
}

/// Runs the similarity stage against the candidate set.
fn vector_stage(
    ctx: &EngineContext,
    stage: &VectorStage,
    candidates: Option<&Vec<String>>,
) -> EngineResult<Vec<(String, f32)>> {
    if stage.k == 0 {
        return Ok(Vec::new());
    }
    let population = ctx.vectors.population(&stage.index)?;
    let base_ef = ctx.config.hnsw_ef_search;

    if stage.prefilter {
        let Some(candidates) = candidates else {
            return Err(EngineError::execution(
                "vector-search",
                "pre-filter stage without a candidate set",
            ));
        };
        let whitelist: HashSet<String> = candidates.iter().cloned().collect();
        let want = stage.k.min(whitelist.len());
        // Widen the beam until the whitelist yields enough hits or the
        // beam covers the whole population.
        let mut ef = base_ef.max(stage.k);
        loop {
            let hits = ctx
                .vectors
                .search(&stage.index, &stage.query, stage.k, ef, Some(&whitelist))?;
            if hits.len() >= want || ef >= population {
                return Ok(hits);
            }
            ef = ef.saturating_mul(2);
        }
    }

    // Post-filter: search wide, keep candidate hits, refill by doubling
    // the fetch size while short of k.
    let filter: Option<HashSet<&str>> = candidates
        .map(|pks| pks.iter().map(String::as_str).collect());
    let mut fetch = stage.k.saturating_mul(ctx.config.vector_oversample).max(stage.k);
    let mut attempts = 0;
    loop {
        let hits = ctx
            .vectors
            .search(&stage.index, &stage.query, fetch, base_ef.max(fetch), None)?;
        let exhausted = hits.len() < fetch || fetch >= population;
        let mut filtered: Vec<(String, f32)> = match &filter {
            None => hits,
            Some(allow) => hits
                .into_iter()
                .filter(|(pk, _)| allow.contains(pk.as_str()))
                .collect(),
        };
        attempts += 1;
        if filtered.len() >= stage.k
            || exhausted
            || attempts > ctx.config.vector_refill_attempts
        {
            filtered.truncate(stage.k);
            return Ok(filtered);
        }
        fetch = fetch.saturating_mul(2);
    }
}

/// Loads entities for a pk list, preserving order. Parallel past the
/// configured threshold. A pk with no entity at the snapshot yields
/// `None` (slots kept so callers can realign parallel arrays).
fn hydrate(
    ctx: &EngineContext,
    snapshot: SequenceNumber,
    table: &str,
    pks: &[String],
) -> EngineResult<Vec<Option<Entity>>> {
    let one = |pk: &String| -> EngineResult<Option<Entity>> {
        let key = keyspace::entity_key(table, pk);
        match ctx.store.get(&key, snapshot) {
            None => Ok(None),
            Some(blob) => {
                let entity =
                    Entity::from_blob(crate::types::EntityKey::new(table, pk.clone()), &blob)
                        .map_err(|err| {
                            EngineError::execution("hydrate", format!("entity {table}/{pk}: {err}"))
                        })?;
                Ok(Some(entity))
            }
        }
    };
    if pks.len() > ctx.config.parallel_threshold {
        pks.par_iter().map(one).collect()
    } else {
        pks.iter().map(one).collect()
    }
}

/// Whether an entity satisfies one filter, for residual evaluation.
fn matches_filter(entity: &Entity, filter: &Filter, min_token_len: usize) -> bool {
    let field_value = entity.field(filter.field()).unwrap_or(&Value::Null);
    match filter {
        Filter::Eq { value, .. } => field_value.cmp_canonical(value).is_eq(),
        Filter::Range { low, high, .. } => {
            if field_value.is_null() {
                return false;
            }
            let above = match low {
                Bound::Unbounded => true,
                Bound::Included(v) => field_value.cmp_canonical(v).is_ge(),
                Bound::Excluded(v) => field_value.cmp_canonical(v).is_gt(),
            };
            let below = match high {
                Bound::Unbounded => true,
                Bound::Included(v) => field_value.cmp_canonical(v).is_le(),
                Bound::Excluded(v) => field_value.cmp_canonical(v).is_lt(),
            };
            above && below
        }
        Filter::Contains { query, .. } => match field_value.as_text() {
            None => false,
            Some(text) => {
                let have = tokenize(text, min_token_len);
                tokenize(query, min_token_len)
                    .iter()
                    .all(|token| have.contains(token))
            }
        },
        Filter::Within {
            lat, lon, radius_m, ..
        } => match field_value.as_array() {
            Some([p_lat, p_lon]) => match (p_lat.coerce_f64(), p_lon.coerce_f64()) {
                (Some(p_lat), Some(p_lon)) => haversine_m(*lat, *lon, p_lat, p_lon) <= *radius_m,
                _ => false,
            },
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_trips_once() {
        let token = CancelToken::new();
        assert!(check_cancel(&token, "hydrate").is_ok());
        token.cancel();
        let err = check_cancel(&token, "hydrate").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execution { step, .. } if step == "hydrate"
        ));
    }

    #[test]
    fn residual_filters_match_like_indexes() {
        let entity = Entity::new("users", "u1")
            .with_field("age", Value::Int(30))
            .with_field("bio", Value::Text("systems programmer".into()))
            .with_field(
                "loc",
                Value::Array(vec![Value::Float(52.52), Value::Float(13.405)]),
            );

        assert!(matches_filter(
            &entity,
            &Filter::Eq {
                field: "age".into(),
                value: Value::Int(30)
            },
            2
        ));
        assert!(!matches_filter(
            &entity,
            &Filter::Eq {
                field: "missing".into(),
                value: Value::Int(30)
            },
            2
        ));
        assert!(matches_filter(
            &entity,
            &Filter::Range {
                field: "age".into(),
                low: Bound::Included(Value::Int(30)),
                high: Bound::Excluded(Value::Int(40)),
            },
            2
        ));
        assert!(!matches_filter(
            &entity,
            &Filter::Range {
                field: "age".into(),
                low: Bound::Excluded(Value::Int(30)),
                high: Bound::Unbounded,
            },
            2
        ));
        assert!(matches_filter(
            &entity,
            &Filter::Contains {
                field: "bio".into(),
                query: "Programmer Systems".into()
            },
            2
        ));
        assert!(matches_filter(
            &entity,
            &Filter::Within {
                field: "loc".into(),
                lat: 52.5,
                lon: 13.4,
                radius_m: 10_000.0
            },
            2
        ));
        assert!(!matches_filter(
            &entity,
            &Filter::Within {
                field: "loc".into(),
                lat: -33.8,
                lon: 151.2,
                radius_m: 10_000.0
            },
            2
        ));
    }

    #[test]
    fn missing_field_fails_range_but_matches_null_eq() {
        let entity = Entity::new("users", "u1");
        assert!(matches_filter(
            &entity,
            &Filter::Eq {
                field: "nick".into(),
                value: Value::Null,
            },
            2
        ));
        assert!(!matches_filter(
            &entity,
            &Filter::Range {
                field: "age".into(),
                low: Bound::Unbounded,
                high: Bound::Unbounded,
            },
            2
        ));
    }
}
