use crate::coercion::{to_number, truncate};
use crate::context::EvalContext;
use crate::dates::{self, Instant};
use crate::engine::Evaluator;
use crate::errors::{EvalError, Result};
use crate::operators::{malformed, present, Operator};
use crate::rule::{Rule, RuleKind};
use crate::value::Value;

fn parse_failure(text: &str) -> EvalError {
    EvalError::DateParseFailure { input: truncate(text, 64) }
}

pub struct DateParse;

impl Operator for DateParse {
    fn name(&self) -> &str {
        "date_parse"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::DateParse { text, formats, strict } = rule.kind() else {
            return Err(malformed(rule));
        };
        let Some(text) = present(ev, text, ctx)? else {
            return Ok(None);
        };
        let instant = dates::date_parse(&text.to_text(), formats, *strict)?;
        Ok(Some(Value::String(instant.to_iso())))
    }
}

pub struct DateFormat;

impl Operator for DateFormat {
    fn name(&self) -> &str {
        "date_format"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::DateFormat { parse, fmt, fmt_in } = rule.kind() else {
            return Err(malformed(rule));
        };
        let Some(text) = present(ev, parse, ctx)? else {
            return Ok(None);
        };
        let text = text.to_text();
        let instant = match fmt_in {
            Some(fmt_in) => Instant::parse_with(text.trim(), fmt_in),
            None => Instant::parse_iso(&text),
        }
        .ok_or_else(|| parse_failure(&text))?;
        let formatted = instant.format(fmt).ok_or_else(|| parse_failure(&text))?;
        Ok(Some(Value::String(formatted)))
    }
}

pub struct FromTimestamp;

impl Operator for FromTimestamp {
    fn name(&self) -> &str {
        "from_timestamp"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::FromTimestamp { sec, unit } = rule.kind() else {
            return Err(malformed(rule));
        };
        let Some(raw) = present(ev, sec, ctx)? else {
            return Ok(None);
        };
        let number = to_number(&raw).ok_or_else(|| EvalError::CastFailure {
            value: truncate(&raw.to_json_string(), 64),
            target: "number".to_string(),
        })?;
        dates::from_timestamp(&number, *unit)
            .map(|s| Some(Value::String(s)))
            .ok_or_else(|| parse_failure(&raw.to_text()))
    }
}

pub struct ToTimezone;

impl Operator for ToTimezone {
    fn name(&self) -> &str {
        "to_timezone"
    }

    fn eval(&self, rule: &Rule, ctx: &EvalContext<'_>, ev: &mut Evaluator<'_>) -> Result<Option<Value>> {
        let RuleKind::ToTimezone { dt, from, to } = rule.kind() else {
            return Err(malformed(rule));
        };
        let Some(text) = present(ev, dt, ctx)? else {
            return Ok(None);
        };
        let text = text.to_text();
        let converted = Instant::parse_iso(&text).and_then(|instant| dates::to_timezone(instant, *from, *to));
        converted.map(|s| Some(Value::String(s))).ok_or_else(|| parse_failure(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coercion::OnError;
    use crate::functions::UdfRegistry;
    use crate::operators::OperatorRegistry;
    use crate::rule::RuleParser;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value as Json};

    fn eval(rule: Json, record: Json) -> Result<Value> {
        let ops = OperatorRegistry::with_builtins();
        let udfs = UdfRegistry::new();
        let mut parser = RuleParser::new(&ops);
        let rule = parser.rule(&rule, "$");
        assert!(parser.errors.is_empty(), "{:?}", parser.errors);
        let defs = IndexMap::new();
        let record = Value::from(record);
        let mut ev = Evaluator::new(&defs, &ops, &udfs, OnError::Raise);
        ev.evaluate_column("c", &rule, &EvalContext::new(&record))
    }

    #[test]
    fn parse_then_format() {
        let rule = json!({"date_format": {"parse": {"path": "d"}, "fmt": "%d.%m.%Y"}});
        assert_eq!(eval(rule, json!({"d": "2024-02-29T08:00:00"})).unwrap(), Value::from("29.02.2024"));

        let explicit = json!({"date_format": {"parse": {"path": "d"}, "fmt_in": "%m/%d/%Y", "fmt": "%Y-%m-%d"}});
        assert_eq!(eval(explicit, json!({"d": "12/31/2023"})).unwrap(), Value::from("2023-12-31"));
    }

    #[test]
    fn unparseable_dates_fail_unless_recovered() {
        let rule = json!({"date_parse": {"text": {"path": "d"}, "formats": ["%Y%m%d"], "strict": true}});
        assert!(matches!(
            eval(rule, json!({"d": "yesterday"})),
            Err(EvalError::DateParseFailure { .. })
        ));
        let lenient = json!({"date_parse": {"text": {"path": "d"}}, "on_error": "null"});
        assert_eq!(eval(lenient.clone(), json!({"d": "yesterday"})).unwrap(), Value::Null);
        assert_eq!(eval(lenient, json!({})).unwrap(), Value::Null);
    }

    #[test]
    fn timestamps_and_zones() {
        let ts = json!({"from_timestamp": {"sec": {"path": "t"}, "unit": "ms"}});
        assert_eq!(eval(ts, json!({"t": "1700000000000"})).unwrap(), Value::from("2023-11-14T22:13:20Z"));

        let tz = json!({"to_timezone": {"dt": {"path": "d"}, "to": "America/New_York"}});
        assert_eq!(
            eval(tz, json!({"d": "2024-07-01T12:00:00Z"})).unwrap(),
            Value::from("2024-07-01T08:00:00-04:00")
        );
    }
}
