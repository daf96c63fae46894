//! Operator dispatch table. Built-ins and third-party operators are plain
//! entries of the same [`OperatorRegistry`]; the evaluator looks every rule
//! up by its operator name, except `ref` which it resolves itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::EvalContext;
use crate::engine::Evaluator;
use crate::errors::{EvalError, Result};
use crate::rule::Rule;
use crate::value::Value;

mod basic;
mod lists;
mod temporal;

/// A rule handler. `rule` is the raw node (typed kind plus payload), `ev`
/// re-enters evaluation for sub-rules and exposes the tail applier.
///
/// `Ok(None)` means absent; the evaluator then applies the node's tail.
pub trait Operator: Send + Sync {
    fn name(&self) -> &str;
    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>>;
}

type HandlerFn = dyn Fn(&Rule, &EvalContext<'_>, &mut Evaluator<'_>) -> Result<Option<Value>> + Send + Sync;

/// Closure-backed operator, see [`OperatorRegistry::register_fn`].
pub struct FnOperator {
    name: String,
    handler: Box<HandlerFn>,
}

impl Operator for FnOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        (self.handler)(rule, ctx, ev)
    }
}

/// Thread-safe operator registry. Cloning is cheap; registering on a clone
/// copies the table first, so snapshots held by converters never change.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    inner: Arc<HashMap<String, Arc<dyn Operator>>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(basic::PathOp);
        reg.register(basic::RelPathOp);
        reg.register(basic::ConstOp);
        reg.register(basic::Coalesce);
        reg.register(basic::Math);
        reg.register(basic::Concat);
        reg.register(basic::If);
        reg.register(basic::Lookup);
        reg.register(basic::Merge);
        reg.register(basic::UdfCall);
        reg.register(basic::Serialize);
        reg.register(lists::Join);
        reg.register(lists::Index);
        reg.register(lists::Len);
        reg.register(lists::Reduce);
        reg.register(lists::GroupReduce);
        for kind in ["map", "filter", "flat_map", "unique", "sort"] {
            reg.register(lists::Transform(kind));
        }
        reg.register(temporal::DateParse);
        reg.register(temporal::DateFormat);
        reg.register(temporal::FromTimestamp);
        reg.register(temporal::ToTimezone);
        reg
    }

    /// Installs `op` under its name. An existing entry is replaced.
    pub fn register<O: Operator + 'static>(&mut self, op: O) {
        let map = Arc::make_mut(&mut self.inner);
        map.insert(op.name().to_string(), Arc::new(op));
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Rule, &EvalContext<'_>, &mut Evaluator<'_>) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.register(FnOperator { name: name.into(), handler: Box::new(handler) });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.inner.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry").field("operators", &self.names()).finish()
    }
}

pub(crate) fn malformed(rule: &Rule) -> EvalError {
    EvalError::MalformedRule { operator: rule.op().to_string() }
}

/// Evaluates `rule` and drops a `null` result to absent.
pub(crate) fn present(ev: &mut Evaluator<'_>, rule: &Rule, ctx: &EvalContext<'_>) -> Result<Option<Value>> {
    Ok(ev.evaluate(rule, ctx)?.filter(|v| !v.is_null()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout;

    impl Operator for Shout {
        fn name(&self) -> &str {
            "concat"
        }

        fn eval(&self, _: &Rule, _: &EvalContext<'_>, _: &mut Evaluator<'_>) -> Result<Option<Value>> {
            Ok(Some(Value::from("!")))
        }
    }

    #[test]
    fn registration_is_last_write_wins_and_copy_on_write() {
        let base = OperatorRegistry::with_builtins();
        let mut custom = base.clone();
        custom.register(Shout);
        assert!(custom.contains("concat"));
        assert_eq!(base.names(), custom.names());
        assert!(!Arc::ptr_eq(&base.inner, &custom.inner));
    }

    #[test]
    fn builtins_cover_the_rule_vocabulary() {
        let reg = OperatorRegistry::with_builtins();
        for name in [
            "path", "rel_path", "const", "coalesce", "math", "concat", "join", "index", "len", "reduce",
            "map", "filter", "flat_map", "unique", "sort", "group_reduce", "date_parse", "date_format",
            "from_timestamp", "to_timezone", "if", "lookup", "merge", "udf", "serialize",
        ] {
            assert!(reg.contains(name), "missing builtin {name}");
        }
        assert!(!reg.contains("ref"));
    }
}
