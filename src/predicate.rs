use regex::Regex;

use crate::comparison::{compare_ordered, values_equal};
use crate::context::EvalContext;
use crate::engine::Evaluator;
use crate::errors::{EvalError, Result};
use crate::rule::Rule;
use crate::value::Value;
use std::cmp::Ordering;

/// Boolean conditions used by `if` and `filter`.
#[derive(Debug, Clone)]
pub enum Predicate {
    Exists(Box<Rule>),
    Eq(Box<Rule>, Box<Rule>),
    Gt(Box<Rule>, Box<Rule>),
    Lt(Box<Rule>, Box<Rule>),
    // Pattern is compiled up front when `b` is a literal string.
    Regex(Box<Rule>, Box<Rule>, Option<Regex>),
}

impl Predicate {
    pub fn name(&self) -> &'static str {
        match self {
            Predicate::Exists(_) => "exists",
            Predicate::Eq(..) => "eq",
            Predicate::Gt(..) => "gt",
            Predicate::Lt(..) => "lt",
            Predicate::Regex(..) => "regex",
        }
    }

    pub fn operands(&self) -> Vec<&Rule> {
        match self {
            Predicate::Exists(arg) => vec![arg.as_ref()],
            Predicate::Eq(a, b) | Predicate::Gt(a, b) | Predicate::Lt(a, b) | Predicate::Regex(a, b, _) => {
                vec![a.as_ref(), b.as_ref()]
            }
        }
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<bool> {
        match self {
            Predicate::Exists(arg) => Ok(present(ev.evaluate(arg, ctx)?).is_some()),
            Predicate::Eq(a, b) => {
                let (a, b) = (present(ev.evaluate(a, ctx)?), present(ev.evaluate(b, ctx)?));
                Ok(match (a, b) {
                    (None, None) => true,
                    (Some(a), Some(b)) => values_equal(&a, &b),
                    _ => false,
                })
            }
            Predicate::Gt(a, b) => ordered(ev, ctx, a, b, Ordering::Greater),
            Predicate::Lt(a, b) => ordered(ev, ctx, a, b, Ordering::Less),
            Predicate::Regex(a, b, compiled) => {
                let subject = present(ev.evaluate(a, ctx)?);
                let pattern = present(ev.evaluate(b, ctx)?);
                let (Some(subject), Some(pattern)) = (subject, pattern) else {
                    return Ok(false);
                };
                let text = subject.to_text();
                match compiled {
                    Some(re) => Ok(re.is_match(&text)),
                    None => {
                        let pattern = pattern.to_text();
                        let re = Regex::new(&pattern).map_err(|e| EvalError::InvalidPattern {
                            pattern: pattern.clone(),
                            message: e.to_string(),
                        })?;
                        Ok(re.is_match(&text))
                    }
                }
            }
        }
    }
}

// Absent and null are interchangeable for predicates.
fn present(v: Option<Value>) -> Option<Value> {
    v.filter(|v| !v.is_null())
}

fn ordered(
    ev: &mut Evaluator<'_>,
    ctx: &EvalContext<'_>,
    a: &Rule,
    b: &Rule,
    want: Ordering,
) -> Result<bool> {
    let a = present(ev.evaluate(a, ctx)?);
    let b = present(ev.evaluate(b, ctx)?);
    match (a, b) {
        (Some(a), Some(b)) => Ok(compare_ordered(&a, &b)? == want),
        _ => Ok(false),
    }
}
