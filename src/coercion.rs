//! Casts between value kinds and the tail options (`default`, `cast`,
//! `on_error`) that any rule may carry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EvalError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastKind {
    Str,
    Int,
    Float,
    Bool,
}

/// What to do when a rule (or its cast) fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Null,
    Default,
    #[default]
    Raise,
    Warn,
}

impl FromStr for CastKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str" => Ok(CastKind::Str),
            "int" => Ok(CastKind::Int),
            "float" => Ok(CastKind::Float),
            "bool" => Ok(CastKind::Bool),
            other => Err(format!("unsupported cast '{other}' (expected str, int, float or bool)")),
        }
    }
}

impl fmt::Display for CastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CastKind::Str => "str",
            CastKind::Int => "int",
            CastKind::Float => "float",
            CastKind::Bool => "bool",
        })
    }
}

impl FromStr for OnError {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "null" => Ok(OnError::Null),
            "default" => Ok(OnError::Default),
            "raise" => Ok(OnError::Raise),
            "warn" => Ok(OnError::Warn),
            other => Err(format!("unsupported on_error '{other}' (expected null, default, raise or warn)")),
        }
    }
}

/// Tail options attached to a rule node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tail {
    pub default: Option<Value>,
    pub cast: Option<CastKind>,
    pub on_error: Option<OnError>,
}

impl Tail {
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.cast.is_none() && self.on_error.is_none()
    }
}

/// Converts `value` to `kind`. Null passes through untouched.
pub fn cast(value: Value, kind: CastKind) -> Result<Value, EvalError> {
    let fail = |v: &Value| EvalError::CastFailure {
        value: truncate(&v.to_json_string(), 64),
        target: kind.to_string(),
    };
    match (kind, value) {
        (_, Value::Null) => Ok(Value::Null),
        (CastKind::Str, v) => Ok(Value::String(v.to_text())),

        (CastKind::Int, Value::Int(i)) => Ok(Value::Int(i)),
        (CastKind::Int, Value::Bool(b)) => Ok(Value::Int(b as i64)),
        (CastKind::Int, Value::Float(f)) => float_to_int(f).ok_or_else(|| fail(&Value::Float(f))),
        (CastKind::Int, Value::String(s)) => {
            let t = s.trim();
            t.parse::<i64>()
                .map(Value::Int)
                .ok()
                .or_else(|| t.parse::<f64>().ok().and_then(float_to_int))
                .ok_or_else(|| fail(&Value::String(s.clone())))
        }

        (CastKind::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (CastKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (CastKind::Float, Value::Bool(b)) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        (CastKind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| fail(&Value::String(s.clone()))),

        (CastKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (CastKind::Bool, Value::Int(i)) => Ok(Value::Bool(i != 0)),
        (CastKind::Bool, Value::Float(f)) => Ok(Value::Bool(f != 0.0)),
        (CastKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(fail(&Value::String(s.clone()))),
        },

        (_, other) => Err(fail(&other)),
    }
}

fn float_to_int(f: f64) -> Option<Value> {
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Some(Value::Int(f.trunc() as i64))
    } else {
        None
    }
}

/// Numeric coercion for `math`, `reduce` and timestamps. Numeric strings
/// are parsed, booleans count as 0/1; anything else is not a number.
pub fn to_number(v: &Value) -> Option<Value> {
    match v {
        Value::Int(_) | Value::Float(_) => Some(v.clone()),
        Value::Bool(b) => Some(Value::Int(*b as i64)),
        Value::String(s) => {
            let t = s.trim();
            t.parse::<i64>()
                .map(Value::Int)
                .ok()
                .or_else(|| t.parse::<f64>().ok().map(Value::Float))
        }
        _ => None,
    }
}

pub fn to_f64(v: &Value) -> Option<f64> {
    to_number(v).and_then(|n| n.as_f64())
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn int_cast() {
        assert_eq!(cast(Value::from("42"), CastKind::Int).unwrap(), Value::Int(42));
        assert_eq!(cast(Value::from(" 7.9 "), CastKind::Int).unwrap(), Value::Int(7));
        assert_eq!(cast(Value::Float(-3.7), CastKind::Int).unwrap(), Value::Int(-3));
        assert!(matches!(
            cast(Value::from("abc"), CastKind::Int),
            Err(EvalError::CastFailure { .. })
        ));
    }

    #[test]
    fn bool_cast_is_case_insensitive() {
        assert_eq!(cast(Value::from("TRUE"), CastKind::Bool).unwrap(), Value::Bool(true));
        assert_eq!(cast(Value::from("False"), CastKind::Bool).unwrap(), Value::Bool(false));
        assert!(cast(Value::from("yes"), CastKind::Bool).is_err());
    }

    #[test]
    fn null_is_never_cast() {
        assert_eq!(cast(Value::Null, CastKind::Int).unwrap(), Value::Null);
        assert_eq!(cast(Value::Null, CastKind::Str).unwrap(), Value::Null);
    }

    #[test]
    fn str_cast_stringifies_everything() {
        assert_eq!(cast(Value::Int(5), CastKind::Str).unwrap(), Value::from("5"));
        assert_eq!(
            cast(Value::List(vec![Value::Int(1)]), CastKind::Str).unwrap(),
            Value::from("[1]")
        );
    }
}
