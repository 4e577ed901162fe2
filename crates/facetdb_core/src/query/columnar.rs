//! Columnar aggregation over hydrated rows.
//!
//! Aggregates run on a gathered column rather than on entities: the
//! field is pulled out of each row once, and the fold walks a flat
//! `Vec<Value>`. Nulls (and missing fields) are skipped by every
//! function except `COUNT`, which counts rows.

use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};
use crate::query::{Aggregate, AggregateFn};
use facetdb_codec::{encode_value, Value};
use std::collections::BTreeMap;

/// One output row of an aggregate query.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    /// The group key, `None` for ungrouped aggregates.
    pub group: Option<Value>,
    /// The aggregate value.
    pub value: Value,
}

/// One field gathered from a batch of rows.
#[derive(Debug, Clone)]
pub struct ColumnBatch {
    values: Vec<Value>,
    rows: usize,
}

impl ColumnBatch {
    /// Pulls `field` out of every entity. Missing fields gather as
    /// nulls so `rows` always equals the input length.
    pub fn gather<'a>(entities: impl IntoIterator<Item = &'a Entity>, field: &str) -> Self {
        let values: Vec<Value> = entities
            .into_iter()
            .map(|entity| entity.field(field).cloned().unwrap_or(Value::Null))
            .collect();
        let rows = values.len();
        Self { values, rows }
    }

    /// A placeholder column for `COUNT`, which needs no field.
    pub fn rows_only(rows: usize) -> Self {
        Self {
            values: Vec::new(),
            rows,
        }
    }

    /// Row count, nulls included.
    pub fn rows(&self) -> usize {
        self.rows
    }

    fn non_null(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().filter(|v| !v.is_null())
    }

    /// Sum of the column. Integer columns stay integral; any float
    /// promotes the result.
    pub fn sum(&self) -> EngineResult<Value> {
        let mut int_sum: i64 = 0;
        let mut float_sum: f64 = 0.0;
        let mut saw_float = false;
        for value in self.non_null() {
            match value {
                Value::Int(i) => {
                    int_sum = int_sum.checked_add(*i).ok_or_else(|| {
                        EngineError::execution("aggregate", "integer overflow in SUM")
                    })?;
                }
                Value::Float(f) => {
                    saw_float = true;
                    float_sum += f;
                }
                other => {
                    return Err(EngineError::execution(
                        "aggregate",
                        format!("SUM over non-numeric value of kind {}", other.kind()),
                    ))
                }
            }
        }
        Ok(if saw_float {
            Value::Float(float_sum + int_sum as f64)
        } else {
            Value::Int(int_sum)
        })
    }

    /// Mean of the column's non-null values, always a float. An
    /// all-null column has no mean.
    pub fn avg(&self) -> EngineResult<Value> {
        let count = self.non_null().count();
        if count == 0 {
            return Ok(Value::Null);
        }
        let total = match self.sum()? {
            Value::Int(i) => i as f64,
            Value::Float(f) => f,
            _ => unreachable!("sum returns a number"),
        };
        Ok(Value::Float(total / count as f64))
    }

    /// Smallest non-null value in canonical order.
    pub fn min(&self) -> Value {
        self.non_null()
            .min_by(|a, b| a.cmp_canonical(b))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Largest non-null value in canonical order.
    pub fn max(&self) -> Value {
        self.non_null()
            .max_by(|a, b| a.cmp_canonical(b))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Evaluates an aggregate over the final row set.
pub(crate) fn evaluate(aggregate: &Aggregate, entities: &[Entity]) -> EngineResult<Vec<AggregateRow>> {
    match &aggregate.group_by {
        None => Ok(vec![AggregateRow {
            group: None,
            value: apply(&aggregate.func, entities)?,
        }]),
        Some(group_field) => {
            // Group keys ordered canonically via their key encoding of
            // the value blob; missing fields group under null.
            let mut groups: BTreeMap<Vec<u8>, (Value, Vec<&Entity>)> = BTreeMap::new();
            for entity in entities {
                let key = entity.field(group_field).cloned().unwrap_or(Value::Null);
                groups
                    .entry(encode_value(&key))
                    .or_insert_with(|| (key, Vec::new()))
                    .1
                    .push(entity);
            }
            let mut rows = Vec::with_capacity(groups.len());
            for (_, (group, members)) in groups {
                let members: Vec<Entity> = members.into_iter().cloned().collect();
                rows.push(AggregateRow {
                    group: Some(group),
                    value: apply(&aggregate.func, &members)?,
                });
            }
            rows.sort_by(|a, b| match (&a.group, &b.group) {
                (Some(x), Some(y)) => x.cmp_canonical(y),
                _ => std::cmp::Ordering::Equal,
            });
            Ok(rows)
        }
    }
}

fn apply(func: &AggregateFn, entities: &[Entity]) -> EngineResult<Value> {
    match func {
        AggregateFn::Count => Ok(Value::Int(entities.len() as i64)),
        AggregateFn::Sum(field) => ColumnBatch::gather(entities, field).sum(),
        AggregateFn::Avg(field) => ColumnBatch::gather(entities, field).avg(),
        AggregateFn::Min(field) => Ok(ColumnBatch::gather(entities, field).min()),
        AggregateFn::Max(field) => Ok(ColumnBatch::gather(entities, field).max()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Vec<Entity> {
        vec![
            Entity::new("users", "u1")
                .with_field("age", Value::Int(30))
                .with_field("city", Value::Text("oslo".into())),
            Entity::new("users", "u2")
                .with_field("age", Value::Int(25))
                .with_field("city", Value::Text("oslo".into())),
            Entity::new("users", "u3")
                .with_field("age", Value::Int(41))
                .with_field("city", Value::Text("rome".into())),
            Entity::new("users", "u4").with_field("city", Value::Text("rome".into())),
        ]
    }

    #[test]
    fn count_includes_null_rows() {
        let rows = evaluate(
            &Aggregate {
                func: AggregateFn::Count,
                group_by: None,
            },
            &people(),
        )
        .unwrap();
        assert_eq!(rows, vec![AggregateRow { group: None, value: Value::Int(4) }]);
    }

    #[test]
    fn sum_and_avg_skip_nulls() {
        let batch = ColumnBatch::gather(&people(), "age");
        assert_eq!(batch.sum().unwrap(), Value::Int(96));
        assert_eq!(batch.avg().unwrap(), Value::Float(32.0));
    }

    #[test]
    fn mixed_numeric_column_promotes_to_float() {
        let entities = vec![
            Entity::new("t", "a").with_field("x", Value::Int(1)),
            Entity::new("t", "b").with_field("x", Value::Float(0.5)),
        ];
        assert_eq!(
            ColumnBatch::gather(&entities, "x").sum().unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn sum_over_text_fails_with_the_step_name() {
        let entities = vec![Entity::new("t", "a").with_field("x", Value::Text("no".into()))];
        let err = ColumnBatch::gather(&entities, "x").sum().unwrap_err();
        assert!(matches!(err, EngineError::Execution { .. }));
    }

    #[test]
    fn min_max_use_canonical_order() {
        let batch = ColumnBatch::gather(&people(), "age");
        assert_eq!(batch.min(), Value::Int(25));
        assert_eq!(batch.max(), Value::Int(41));
        let none: Vec<Entity> = Vec::new();
        assert_eq!(ColumnBatch::gather(&none, "age").min(), Value::Null);
    }

    #[test]
    fn grouped_aggregate_orders_groups() {
        let rows = evaluate(
            &Aggregate {
                func: AggregateFn::Count,
                group_by: Some("city".to_string()),
            },
            &people(),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group, Some(Value::Text("oslo".into())));
        assert_eq!(rows[0].value, Value::Int(2));
        assert_eq!(rows[1].group, Some(Value::Text("rome".into())));
        assert_eq!(rows[1].value, Value::Int(2));
    }

    #[test]
    fn grouped_avg_skips_null_members() {
        let rows = evaluate(
            &Aggregate {
                func: AggregateFn::Avg("age".to_string()),
                group_by: Some("city".to_string()),
            },
            &people(),
        )
        .unwrap();
        assert_eq!(rows[1].group, Some(Value::Text("rome".into())));
        assert_eq!(rows[1].value, Value::Float(41.0));
    }
}
