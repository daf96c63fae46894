use std::cmp::Ordering;

use crate::errors::EvalError;
use crate::value::Value;

/// Equality used by `eq` predicates, path filters and `unique`: ints and
/// floats compare numerically, everything else structurally.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        _ => a == b,
    }
}

/// Ordering for `gt`/`lt`. Both sides must be numeric, both strings, or a
/// number against a numeric string; anything else is incomparable.
pub fn compare_ordered(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    let incomparable = || EvalError::IncomparableTypes {
        left: a.kind().to_string(),
        right: b.kind().to_string(),
    };
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::String(sa), Value::String(sb)) => Ok(sa.cmp(sb)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (da, db) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            da.partial_cmp(&db).ok_or_else(incomparable)
        }
        (Value::Int(_) | Value::Float(_), Value::String(s)) => {
            let db = s.trim().parse::<f64>().map_err(|_| incomparable())?;
            a.as_f64().and_then(|da| da.partial_cmp(&db)).ok_or_else(incomparable)
        }
        (Value::String(s), Value::Int(_) | Value::Float(_)) => {
            let da = s.trim().parse::<f64>().map_err(|_| incomparable())?;
            b.as_f64().and_then(|db| da.partial_cmp(&db)).ok_or_else(incomparable)
        }
        _ => Err(incomparable()),
    }
}

/// Total order used by `sort`: nulls last, then values grouped by kind
/// (numbers, strings, bools, lists, objects) and ordered within a kind.
pub fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Int(_) | Value::Float(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            Value::List(_) => 3,
            Value::Object(_) => 4,
            Value::Null => 5,
        }
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::List(x), Value::List(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| sort_cmp(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Float(x), Value::Float(y)) => float_cmp(*x, *y),
        (Value::Int(i), Value::Float(f)) => int_float_cmp(*i, *f),
        (Value::Float(f), Value::Int(i)) => int_float_cmp(*i, *f).reverse(),
        _ if rank(a) == rank(b) => a.to_json_string().cmp(&b.to_json_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

// `total_cmp`, except that the two zeros are equal.
fn float_cmp(x: f64, y: f64) -> Ordering {
    if x == y {
        Ordering::Equal
    } else {
        x.total_cmp(&y)
    }
}

// Exact comparison of an int against a float, no rounding of the int.
// NaNs sort by sign bit, as in `total_cmp`.
fn int_float_cmp(i: i64, f: f64) -> Ordering {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return if f.is_sign_negative() { Ordering::Greater } else { Ordering::Less };
    }
    if f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => float_cmp(whole, f),
        ord => ord,
    }
}
