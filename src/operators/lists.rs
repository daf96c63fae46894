use indexmap::IndexMap;
use itertools::Itertools;

use crate::coercion::to_f64;
use crate::comparison::sort_cmp;
use crate::context::EvalContext;
use crate::engine::Evaluator;
use crate::errors::{EvalError, Result};
use crate::operators::{malformed, Operator};
use crate::rule::{Aggregate, Emit, ReduceOp, Rule, RuleKind, TransformStep};
use crate::value::{Object, Value};

/// Evaluates `rule` to a list; anything else reads as empty.
fn list_of(ev: &mut Evaluator<'_>, rule: &Rule, ctx: &EvalContext<'_>) -> Result<Vec<Value>> {
    Ok(match ev.evaluate(rule, ctx)? {
        Some(Value::List(items)) => items,
        _ => Vec::new(),
    })
}

fn aggregate(op: ReduceOp, nums: &[f64]) -> Value {
    if nums.is_empty() {
        return Value::Null;
    }
    let out = match op {
        ReduceOp::Sum => nums.iter().sum(),
        ReduceOp::Mean => nums.iter().sum::<f64>() / nums.len() as f64,
        ReduceOp::Min => nums.iter().copied().fold(f64::INFINITY, f64::min),
        ReduceOp::Max => nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };
    Value::Float(out)
}

pub struct Join;

impl Operator for Join {
    fn name(&self) -> &str {
        "join"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Join { over, sep } = rule.kind() else {
            return Err(malformed(rule));
        };
        Ok(match ev.evaluate(over, ctx)? {
            Some(Value::List(items)) => Some(Value::String(items.iter().map(Value::to_text).join(sep))),
            _ => None,
        })
    }
}

pub struct Index;

impl Operator for Index {
    fn name(&self) -> &str {
        "index"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Index { of, at } = rule.kind() else {
            return Err(malformed(rule));
        };
        let Some(Value::List(mut items)) = ev.evaluate(of, ctx)? else {
            return Ok(None);
        };
        let len = items.len() as i64;
        let idx = if *at < 0 { len + at } else { *at };
        Ok((0..len).contains(&idx).then(|| items.swap_remove(idx as usize)))
    }
}

pub struct Len;

impl Operator for Len {
    fn name(&self) -> &str {
        "len"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Len(of) = rule.kind() else {
            return Err(malformed(rule));
        };
        let n = match ev.evaluate(of, ctx)? {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::List(items)) => items.len(),
            Some(Value::String(s)) => s.chars().count(),
            Some(Value::Object(map)) => map.len(),
            Some(other) => return Err(EvalError::NotSizable(other.kind().to_string())),
        };
        Ok(Some(Value::Int(n as i64)))
    }
}

pub struct Reduce;

impl Operator for Reduce {
    fn name(&self) -> &str {
        "reduce"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Reduce { over, op, apply } = rule.kind() else {
            return Err(malformed(rule));
        };
        let items = list_of(ev, over, ctx)?;
        let mut nums = Vec::with_capacity(items.len());
        for item in &items {
            let value = match apply {
                Some(apply) => ev.evaluate(apply, &ctx.with_item(item))?,
                None => Some(item.clone()),
            };
            // non-numeric elements do not take part
            nums.extend(value.as_ref().and_then(to_f64));
        }
        Ok(Some(aggregate(*op, &nums)))
    }
}

pub struct GroupReduce;

impl Operator for GroupReduce {
    fn name(&self) -> &str {
        "group_reduce"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::GroupReduce { over, by, value, agg, as_list } = rule.kind() else {
            return Err(malformed(rule));
        };
        let items = list_of(ev, over, ctx)?;
        let mut groups: IndexMap<String, Vec<f64>> = IndexMap::new();
        for item in &items {
            let scope = ctx.with_item(item);
            let key = ev.evaluate(by, &scope)?.filter(|k| !k.is_null());
            let n = ev.evaluate(value, &scope)?.as_ref().and_then(to_f64);
            // elements without a key or a numeric value are skipped
            let (Some(key), Some(n)) = (key, n) else {
                continue;
            };
            groups.entry(key.to_text()).or_default().push(n);
        }
        let result = groups.into_iter().map(|(key, nums)| {
            let value = match agg {
                Aggregate::Count => Value::Int(nums.len() as i64),
                Aggregate::Sum => aggregate(ReduceOp::Sum, &nums),
                Aggregate::Mean => aggregate(ReduceOp::Mean, &nums),
                Aggregate::Min => aggregate(ReduceOp::Min, &nums),
                Aggregate::Max => aggregate(ReduceOp::Max, &nums),
            };
            (key, value)
        });
        Ok(Some(if *as_list {
            Value::List(
                result
                    .map(|(key, value)| {
                        let mut entry = Object::new();
                        entry.insert("key".to_string(), Value::String(key));
                        entry.insert("value".to_string(), value);
                        Value::Object(entry)
                    })
                    .collect(),
            )
        } else {
            Value::Object(result.collect())
        }))
    }
}

/// `map`, `filter`, `flat_map`, `unique` and `sort`, which share their
/// iteration, `limit` and `emit` handling.
pub struct Transform(pub &'static str);

impl Operator for Transform {
    fn name(&self) -> &str {
        self.0
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Transform(t) = rule.kind() else {
            return Err(malformed(rule));
        };
        let items = list_of(ev, &t.over, ctx)?;
        let mut out = match &t.step {
            TransformStep::Map(apply) => {
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    out.push(ev.evaluate(apply, &ctx.with_item(item))?.unwrap_or(Value::Null));
                }
                out
            }
            TransformStep::FlatMap(apply) => {
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    match ev.evaluate(apply, &ctx.with_item(item))? {
                        Some(Value::List(xs)) => out.extend(xs),
                        Some(Value::Null) | None => {}
                        Some(v) => out.push(v),
                    }
                }
                out
            }
            TransformStep::Filter(pred) => {
                let mut keep = Vec::with_capacity(items.len());
                for item in &items {
                    keep.push(pred.evaluate(&ctx.with_item(item), ev)?);
                }
                items.into_iter().zip(keep).filter_map(|(item, k)| k.then_some(item)).collect()
            }
            TransformStep::Unique { key } => {
                let keys = keys_for(ev, key.as_deref(), &items, ctx)?;
                items
                    .into_iter()
                    .zip(keys)
                    .unique_by(|(_, k)| k.to_canonical_string())
                    .map(|(item, _)| item)
                    .collect()
            }
            TransformStep::Sort { key, reverse } => {
                let keys = keys_for(ev, key.as_deref(), &items, ctx)?;
                let mut pairs: Vec<(Value, Value)> = items.into_iter().zip(keys).collect();
                pairs.sort_by(|(_, a), (_, b)| {
                    let ord = sort_cmp(a, b);
                    if *reverse { ord.reverse() } else { ord }
                });
                pairs.into_iter().map(|(item, _)| item).collect()
            }
        };
        if let Some(limit) = t.limit {
            out.truncate(limit);
        }
        Ok(Some(match &t.emit {
            Emit::List => Value::List(out),
            Emit::Json => Value::String(Value::List(out).to_json_string()),
            Emit::Count => Value::Int(out.len() as i64),
            Emit::Join(sep) => Value::String(out.iter().map(Value::to_text).join(sep)),
        }))
    }
}

fn keys_for(
    ev: &mut Evaluator<'_>,
    key: Option<&Rule>,
    items: &[Value],
    ctx: &EvalContext<'_>,
) -> Result<Vec<Value>> {
    let Some(key) = key else {
        return Ok(items.to_vec());
    };
    items
        .iter()
        .map(|item| Ok(ev.evaluate(key, &ctx.with_item(item))?.unwrap_or(Value::Null)))
        .collect()
}
