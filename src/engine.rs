//! Rule evaluation: registry dispatch, `ref` expansion with cycle
//! detection, and the tail pipeline run after every node.

use indexmap::IndexMap;
use tracing::warn;

use crate::coercion::{cast, OnError};
use crate::context::EvalContext;
use crate::errors::{EvalError, Result};
use crate::functions::UdfRegistry;
use crate::metrics::{Metrics, RULE_ERRORS};
use crate::operators::OperatorRegistry;
use crate::rule::{Rule, RuleKind};
use crate::trace::{Diagnostic, TraceEntry, TraceRecorder};
use crate::value::Value;

/// Walks rule trees for one row at a time. Holds only read-only borrows of
/// the mapping and registries plus per-row scratch state.
pub struct Evaluator<'r> {
    definitions: &'r IndexMap<String, Rule>,
    operators: &'r OperatorRegistry,
    udfs: &'r UdfRegistry,
    default_on_error: OnError,
    column: String,
    active_refs: Vec<String>,
    recorder: Option<TraceRecorder>,
    diagnostics: Vec<Diagnostic>,
    metrics: Option<&'r Metrics>,
}

impl<'r> Evaluator<'r> {
    pub fn new(
        definitions: &'r IndexMap<String, Rule>,
        operators: &'r OperatorRegistry,
        udfs: &'r UdfRegistry,
        default_on_error: OnError,
    ) -> Self {
        Self {
            definitions,
            operators,
            udfs,
            default_on_error,
            column: String::new(),
            active_refs: Vec::new(),
            recorder: None,
            diagnostics: Vec::new(),
            metrics: None,
        }
    }

    pub fn with_trace(mut self) -> Self {
        self.recorder = Some(TraceRecorder::default());
        self
    }

    /// Reports every rule error to `metrics`: once where `on_error`
    /// absorbs it, or once when it escapes the column.
    pub fn with_metrics(mut self, metrics: &'r Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn count_rule_error(&self) {
        if let Some(metrics) = self.metrics {
            metrics.increment(RULE_ERRORS, 1);
        }
    }

    pub fn udfs(&self) -> &'r UdfRegistry {
        self.udfs
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Evaluates a column rule; absent becomes `null` in the row.
    pub fn evaluate_column(&mut self, column: &str, rule: &Rule, ctx: &EvalContext<'_>) -> Result<Value> {
        self.column.clear();
        self.column.push_str(column);
        match self.evaluate(rule, ctx) {
            Ok(value) => Ok(value.unwrap_or(Value::Null)),
            Err(err) => {
                self.count_rule_error();
                Err(err)
            }
        }
    }

    /// Evaluates `rule` and runs its tail. `Ok(None)` is absent.
    pub fn evaluate(&mut self, rule: &Rule, ctx: &EvalContext<'_>) -> Result<Option<Value>> {
        let slot = self.recorder.as_mut().map(|rec| rec.enter(rule));
        let outcome = self.dispatch(rule, ctx);
        let result = self.apply_tail(rule, outcome);
        if let (Some(slot), Some(rec)) = (slot, self.recorder.as_mut()) {
            rec.exit(slot, &result);
        }
        result
    }

    fn dispatch(&mut self, rule: &Rule, ctx: &EvalContext<'_>) -> Result<Option<Value>> {
        match rule.kind() {
            RuleKind::Empty => Ok(None),
            RuleKind::Ref(name) => self.expand_ref(name, ctx),
            _ => {
                let op = self
                    .operators
                    .get(rule.op())
                    .ok_or_else(|| EvalError::UnknownOperator(rule.op().to_string()))?;
                op.eval(rule, ctx, self)
            }
        }
    }

    fn expand_ref(&mut self, name: &str, ctx: &EvalContext<'_>) -> Result<Option<Value>> {
        if let Some(start) = self.active_refs.iter().position(|n| n == name) {
            let mut chain = self.active_refs[start..].to_vec();
            chain.push(name.to_string());
            return Err(EvalError::CyclicDefinition(chain));
        }
        let definitions = self.definitions;
        let target = definitions
            .get(name)
            .ok_or_else(|| EvalError::UnknownDefinition(name.to_string()))?;
        self.active_refs.push(name.to_string());
        let out = self.evaluate(target, ctx);
        self.active_refs.pop();
        out
    }

    /// Error interception, then default substitution, then cast. A failed
    /// cast goes back through the same rule's `on_error`.
    pub fn apply_tail(&mut self, rule: &Rule, outcome: Result<Option<Value>>) -> Result<Option<Value>> {
        let tail = rule.tail();
        let value = match outcome {
            Ok(value) => value,
            Err(err) => return self.recover(rule, err),
        };
        let value = match value {
            Some(v) if !v.is_null() => Some(v),
            missing => tail.default.clone().or(missing),
        };
        match (tail.cast, value) {
            (Some(kind), Some(v)) => match cast(v, kind) {
                Ok(v) => Ok(Some(v)),
                Err(err) => self.recover(rule, err),
            },
            (_, value) => Ok(value),
        }
    }

    fn recover(&mut self, rule: &Rule, err: EvalError) -> Result<Option<Value>> {
        if err.is_fatal() {
            return Err(err);
        }
        let mode = rule.tail().on_error.unwrap_or(self.default_on_error);
        if mode != OnError::Raise {
            self.count_rule_error();
        }
        match mode {
            OnError::Raise => Err(err),
            OnError::Null => Ok(Some(Value::Null)),
            OnError::Default => Ok(Some(rule.tail().default.clone().unwrap_or(Value::Null))),
            OnError::Warn => {
                warn!(column = %self.column, rule = rule.position(), error = %err, "rule failed, emitting null");
                self.diagnostics.push(Diagnostic {
                    column: self.column.clone(),
                    rule_path: rule.position().to_string(),
                    message: err.to_string(),
                });
                Ok(Some(Value::Null))
            }
        }
    }

    pub fn take_trace(&mut self) -> Vec<TraceEntry> {
        self.recorder.as_mut().map(TraceRecorder::take).unwrap_or_default()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleParser;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value as Json};

    fn run(rule: Json, record: Json) -> Result<Option<Value>> {
        run_with(rule, record, json!({}))
    }

    fn run_with(rule: Json, record: Json, definitions: Json) -> Result<Option<Value>> {
        let ops = OperatorRegistry::with_builtins();
        let udfs = UdfRegistry::with_builtins();
        let mut parser = RuleParser::new(&ops);
        let defs: IndexMap<String, Rule> = definitions
            .as_object()
            .into_iter()
            .flatten()
            .map(|(name, r)| (name.clone(), parser.rule(r, &format!("$.definitions.{name}"))))
            .collect();
        let rule = parser.rule(&rule, "$.columns.c");
        assert_eq!(parser.errors, Vec::<String>::new());
        let record = Value::from(record);
        let mut ev = Evaluator::new(&defs, &ops, &udfs, OnError::Raise);
        ev.evaluate(&rule, &EvalContext::new(&record))
    }

    #[test]
    fn default_then_cast() {
        let rule = json!({"path": "a.b", "default": 0, "cast": "int"});
        assert_eq!(run(rule.clone(), json!({"a": {"b": "7"}})).unwrap(), Some(Value::Int(7)));
        assert_eq!(run(rule, json!({"a": {}})).unwrap(), Some(Value::Int(0)));
    }

    #[test]
    fn on_error_modes() {
        let div = |mode: &str| json!({"math": ["div", 10, 0], "on_error": mode, "default": -1});
        assert_eq!(run(div("raise"), json!({})), Err(EvalError::DivisionByZero));
        assert_eq!(run(div("null"), json!({})).unwrap(), Some(Value::Null));
        assert_eq!(run(div("default"), json!({})).unwrap(), Some(Value::Int(-1)));
        assert_eq!(run(div("warn"), json!({})).unwrap(), Some(Value::Null));
    }

    #[test]
    fn failed_cast_uses_the_same_policy() {
        let rule = json!({"const": "abc", "cast": "int", "on_error": "default", "default": 0});
        assert_eq!(run(rule, json!({})).unwrap(), Some(Value::Int(0)));
        let raising = json!({"const": "abc", "cast": "int"});
        assert!(matches!(run(raising, json!({})), Err(EvalError::CastFailure { .. })));
    }

    #[test]
    fn refs_expand_and_cycles_are_fatal() {
        let defs = json!({"double": {"math": ["mul", {"path": "n"}, 2]}});
        assert_eq!(
            run_with(json!({"ref": "double"}), json!({"n": 4}), defs).unwrap(),
            Some(Value::Int(8))
        );

        let cyclic = json!({"a": {"ref": "b"}, "b": {"coalesce": [{"ref": "a"}]}});
        let err = run_with(json!({"ref": "a", "on_error": "null"}), json!({}), cyclic).unwrap_err();
        assert_eq!(err, EvalError::CyclicDefinition(vec!["a".into(), "b".into(), "a".into()]));
    }

    #[test]
    fn warn_records_a_diagnostic() {
        let ops = OperatorRegistry::with_builtins();
        let udfs = UdfRegistry::with_builtins();
        let defs = IndexMap::new();
        let rule = RuleParser::new(&ops).rule(&json!({"math": ["div", 1, 0], "on_error": "warn"}), "$.columns.q");
        let record = Value::Null;
        let mut ev = Evaluator::new(&defs, &ops, &udfs, OnError::Raise);
        let out = ev.evaluate_column("q", &rule, &EvalContext::new(&record)).unwrap();
        assert_eq!(out, Value::Null);
        assert_eq!(
            ev.take_diagnostics(),
            vec![Diagnostic {
                column: "q".into(),
                rule_path: "$.columns.q".into(),
                message: EvalError::DivisionByZero.to_string(),
            }]
        );
        assert!(ev.take_diagnostics().is_empty());
    }

    #[test]
    fn rule_errors_are_counted_once() {
        use crate::metrics::ConverterStats;
        use std::sync::Arc;

        let stats = Arc::new(ConverterStats::default());
        let metrics = Metrics::new(stats.clone());
        let ops = OperatorRegistry::with_builtins();
        let udfs = UdfRegistry::with_builtins();
        let defs = IndexMap::new();
        let mut parser = RuleParser::new(&ops);
        let swallowed = parser.rule(
            &json!({"concat": [{"math": ["div", 1, 0], "on_error": "null"}, {"const": "x", "cast": "int", "on_error": "warn"}]}),
            "$.columns.a",
        );
        let nested = parser.rule(&json!({"concat": [{"math": ["div", 1, 0]}], "on_error": "default"}), "$.columns.b");
        let raised = parser.rule(&json!({"concat": [{"math": ["div", 1, 0]}]}), "$.columns.c");
        let clean = parser.rule(&json!({"const": 1}), "$.columns.d");
        assert_eq!(parser.errors, Vec::<String>::new());

        let record = Value::Null;
        let ctx = EvalContext::new(&record);
        let mut ev = Evaluator::new(&defs, &ops, &udfs, OnError::Raise).with_metrics(&metrics);
        assert!(ev.evaluate_column("a", &swallowed, &ctx).is_ok());
        assert!(ev.evaluate_column("b", &nested, &ctx).is_ok());
        assert!(ev.evaluate_column("c", &raised, &ctx).is_err());
        assert!(ev.evaluate_column("d", &clean, &ctx).is_ok());
        assert_eq!(stats.rule_errors(), 4);
    }

    #[test]
    fn inner_errors_reach_the_outer_policy() {
        let rule = json!({"concat": [{"math": ["div", 1, 0]}, "x"], "on_error": "null"});
        assert_eq!(run(rule, json!({})).unwrap(), Some(Value::Null));
    }
}
