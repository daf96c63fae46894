use crate::coercion::{to_number, truncate};
use crate::context::EvalContext;
use crate::engine::Evaluator;
use crate::errors::{EvalError, Result};
use crate::operators::{malformed, present, Operator};
use crate::rule::{MathOp, MergeStrategy, Rule, RuleKind};
use crate::value::{Object, Value};

pub struct PathOp;

impl Operator for PathOp {
    fn name(&self) -> &str {
        "path"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, _: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Path(path) = rule.kind() else {
            return Err(malformed(rule));
        };
        Ok(path.resolve(ctx.root()))
    }
}

pub struct RelPathOp;

impl Operator for RelPathOp {
    fn name(&self) -> &str {
        "rel_path"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, _: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::RelPath(path) = rule.kind() else {
            return Err(malformed(rule));
        };
        Ok(path.resolve(ctx.relative_base()))
    }
}

pub struct ConstOp;

impl Operator for ConstOp {
    fn name(&self) -> &str {
        "const"
    }

    fn eval(&self, rule: &Rule, _: &EvalContext<'_>, _: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Const(value) = rule.kind() else {
            return Err(malformed(rule));
        };
        Ok(Some(value.clone()))
    }
}

pub struct Coalesce;

impl Operator for Coalesce {
    fn name(&self) -> &str {
        "coalesce"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Coalesce(options) = rule.kind() else {
            return Err(malformed(rule));
        };
        for option in options {
            if let Some(v) = present(ev, option, ctx)? {
                return Ok(Some(v));
            }
        }
        Ok(Some(Value::Null))
    }
}

pub struct Math;

impl Operator for Math {
    fn name(&self) -> &str {
        "math"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Math { op, operands } = rule.kind() else {
            return Err(malformed(rule));
        };
        let mut acc: Option<Value> = None;
        for operand in operands {
            // any missing operand makes the whole expression null
            let Some(raw) = present(ev, operand, ctx)? else {
                return Ok(Some(Value::Null));
            };
            let n = to_number(&raw).ok_or_else(|| EvalError::CastFailure {
                value: truncate(&raw.to_json_string(), 64),
                target: "number".to_string(),
            })?;
            acc = Some(match acc {
                None => n,
                Some(lhs) => arith(*op, &lhs, &n)?,
            });
        }
        Ok(acc)
    }
}

fn arith(op: MathOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let (a, b) = (lhs.as_f64().unwrap_or(f64::NAN), rhs.as_f64().unwrap_or(f64::NAN));
    if op == MathOp::Div {
        return if b == 0.0 { Err(EvalError::DivisionByZero) } else { Ok(Value::Float(a / b)) };
    }
    if let (Value::Int(x), Value::Int(y)) = (lhs, rhs) {
        let exact = match op {
            MathOp::Add => x.checked_add(*y),
            MathOp::Sub => x.checked_sub(*y),
            MathOp::Mul => x.checked_mul(*y),
            MathOp::Div => None,
        };
        if let Some(n) = exact {
            return Ok(Value::Int(n));
        }
    }
    Ok(Value::Float(match op {
        MathOp::Add => a + b,
        MathOp::Sub => a - b,
        _ => a * b,
    }))
}

pub struct Concat;

impl Operator for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Concat(parts) = rule.kind() else {
            return Err(malformed(rule));
        };
        let mut out = String::new();
        for part in parts {
            if let Some(v) = ev.evaluate(part, ctx)? {
                out.push_str(&v.to_text());
            }
        }
        Ok(Some(Value::String(out)))
    }
}

pub struct If;

impl Operator for If {
    fn name(&self) -> &str {
        "if"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::If { cond, then, otherwise } = rule.kind() else {
            return Err(malformed(rule));
        };
        if cond.evaluate(ctx, ev)? {
            ev.evaluate(then, ctx)
        } else if let Some(otherwise) = otherwise {
            ev.evaluate(otherwise, ctx)
        } else {
            Ok(None)
        }
    }
}

pub struct Lookup;

impl Operator for Lookup {
    fn name(&self) -> &str {
        "lookup"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Lookup { key, table, default } = rule.kind() else {
            return Err(malformed(rule));
        };
        let hit = present(ev, key, ctx)?.and_then(|k| table.get(&k.to_text()).cloned());
        Ok(hit.or_else(|| default.clone()))
    }
}

pub struct Merge;

impl Operator for Merge {
    fn name(&self) -> &str {
        "merge"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Merge { objects, strategy } = rule.kind() else {
            return Err(malformed(rule));
        };
        let mut merged: Option<Object> = None;
        for source in objects {
            let Some(Value::Object(obj)) = ev.evaluate(source, ctx)? else {
                continue;
            };
            let acc = merged.get_or_insert_with(Object::new);
            for (k, v) in obj {
                match strategy {
                    MergeStrategy::Override => {
                        acc.insert(k, v);
                    }
                    MergeStrategy::FirstNonNull => {
                        if acc.get(&k).map_or(true, Value::is_null) {
                            acc.insert(k, v);
                        }
                    }
                }
            }
        }
        Ok(Some(merged.map(Value::Object).unwrap_or(Value::Null)))
    }
}

pub struct UdfCall;

impl Operator for UdfCall {
    fn name(&self) -> &str {
        "udf"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Udf { name, args } = rule.kind() else {
            return Err(malformed(rule));
        };
        let func = ev.udfs().get(name).ok_or_else(|| EvalError::UnknownUdf(name.clone()))?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(ev.evaluate(arg, ctx)?.unwrap_or(Value::Null));
        }
        if !func.arity().contains(&values.len()) {
            return Err(EvalError::Udf {
                name: name.clone(),
                message: format!("takes {:?} arguments, got {}", func.arity(), values.len()),
            });
        }
        func.call(&values).map(Some)
    }
}

pub struct Serialize;

impl Operator for Serialize {
    fn name(&self) -> &str {
        "serialize"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::Serialize(of) = rule.kind() else {
            return Err(malformed(rule));
        };
        let value = ev.evaluate(of, ctx)?.unwrap_or(Value::Null);
        Ok(Some(Value::String(value.to_json_string())))
    }
}
