//! The rule tree. A rule is parsed once from its JSON form into a [`Rule`]
//! node carrying a typed [`RuleKind`], its tail options, its `$`-position in
//! the mapping document and the raw operator payload.

use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value as Json};
use std::fmt::Display;
use std::str::FromStr;

use crate::coercion::{CastKind, OnError, Tail};
use crate::operators::OperatorRegistry;
use crate::path::PathExpr;
use crate::predicate::Predicate;
use crate::value::Value;

/// Keys that modify a rule instead of naming its operator.
pub const TAIL_KEYS: [&str; 3] = ["default", "cast", "on_error"];

#[derive(Debug, Clone)]
pub struct Rule {
    op: String,
    kind: RuleKind,
    tail: Tail,
    position: String,
    payload: Json,
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Only tail keys; evaluates to absent, then `default`.
    Empty,
    Path(PathExpr),
    RelPath(PathExpr),
    Const(Value),
    Coalesce(Vec<Rule>),
    Math { op: MathOp, operands: Vec<Rule> },
    Concat(Vec<Rule>),
    Join { over: Box<Rule>, sep: String },
    Index { of: Box<Rule>, at: i64 },
    Len(Box<Rule>),
    Reduce { over: Box<Rule>, op: ReduceOp, apply: Option<Box<Rule>> },
    Transform(ListTransform),
    GroupReduce { over: Box<Rule>, by: Box<Rule>, value: Box<Rule>, agg: Aggregate, as_list: bool },
    DateParse { text: Box<Rule>, formats: Vec<String>, strict: bool },
    DateFormat { parse: Box<Rule>, fmt: String, fmt_in: Option<String> },
    FromTimestamp { sec: Box<Rule>, unit: TimeUnit },
    ToTimezone { dt: Box<Rule>, from: Option<Tz>, to: Tz },
    If { cond: Predicate, then: Box<Rule>, otherwise: Option<Box<Rule>> },
    Lookup { key: Box<Rule>, table: IndexMap<String, Value>, default: Option<Value> },
    Merge { objects: Vec<Rule>, strategy: MergeStrategy },
    Ref(String),
    Udf { name: String, args: Vec<Rule> },
    Serialize(Box<Rule>),
    /// A registered third-party operator. Array payloads are parsed into
    /// rule arguments; the raw payload stays available on the node.
    Custom { args: Vec<Rule> },
}

#[derive(Debug, Clone)]
pub struct ListTransform {
    pub step: TransformStep,
    pub over: Box<Rule>,
    pub emit: Emit,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum TransformStep {
    Map(Box<Rule>),
    Filter(Predicate),
    FlatMap(Box<Rule>),
    Unique { key: Option<Box<Rule>> },
    Sort { key: Option<Box<Rule>>, reverse: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    List,
    Json,
    Count,
    Join(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Override,
    FirstNonNull,
}

impl FromStr for MathOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(MathOp::Add),
            "sub" => Ok(MathOp::Sub),
            "mul" => Ok(MathOp::Mul),
            "div" => Ok(MathOp::Div),
            other => Err(format!("unknown math operator '{other}' (expected add, sub, mul or div)")),
        }
    }
}

impl FromStr for ReduceOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(ReduceOp::Sum),
            "mean" => Ok(ReduceOp::Mean),
            "min" => Ok(ReduceOp::Min),
            "max" => Ok(ReduceOp::Max),
            other => Err(format!("unknown reduce op '{other}' (expected sum, mean, min or max)")),
        }
    }
}

impl FromStr for Aggregate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Aggregate::Sum),
            "mean" => Ok(Aggregate::Mean),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            "count" => Ok(Aggregate::Count),
            other => Err(format!("unknown aggregate '{other}' (expected sum, mean, min, max or count)")),
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s" => Ok(TimeUnit::Seconds),
            "ms" => Ok(TimeUnit::Millis),
            "us" => Ok(TimeUnit::Micros),
            "ns" => Ok(TimeUnit::Nanos),
            other => Err(format!("unknown unit '{other}' (expected s, ms, us or ns)")),
        }
    }
}

impl TimeUnit {
    pub fn per_second(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Millis => 1e3,
            TimeUnit::Micros => 1e6,
            TimeUnit::Nanos => 1e9,
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "override" => Ok(MergeStrategy::Override),
            "first_non_null" => Ok(MergeStrategy::FirstNonNull),
            other => Err(format!("unknown merge strategy '{other}' (expected override or first_non_null)")),
        }
    }
}

impl Rule {
    /// A literal rule, as produced by any non-object JSON in rule position.
    pub fn constant(value: Value) -> Self {
        Rule::literal(value, "$")
    }

    fn literal(value: Value, position: &str) -> Self {
        Rule {
            op: "const".to_string(),
            payload: value.to_json(),
            kind: RuleKind::Const(value),
            tail: Tail::default(),
            position: position.to_string(),
        }
    }

    /// Operator name the node dispatches on.
    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    pub fn tail(&self) -> &Tail {
        &self.tail
    }

    /// `$`-path of the node in the mapping document.
    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn payload(&self) -> &Json {
        &self.payload
    }

    /// Direct sub-rules, predicate operands included.
    pub fn children(&self) -> Vec<&Rule> {
        fn boxed<'a>(rules: &[&'a Box<Rule>]) -> Vec<&'a Rule> {
            rules.iter().map(|r| &***r).collect()
        }
        match &self.kind {
            RuleKind::Empty
            | RuleKind::Path(_)
            | RuleKind::RelPath(_)
            | RuleKind::Const(_)
            | RuleKind::Ref(_) => Vec::new(),
            RuleKind::Coalesce(rules)
            | RuleKind::Concat(rules)
            | RuleKind::Math { operands: rules, .. }
            | RuleKind::Merge { objects: rules, .. }
            | RuleKind::Udf { args: rules, .. }
            | RuleKind::Custom { args: rules } => rules.iter().collect(),
            RuleKind::Join { over, .. } => boxed(&[over]),
            RuleKind::Index { of, .. } => boxed(&[of]),
            RuleKind::Len(of) | RuleKind::Serialize(of) => boxed(&[of]),
            RuleKind::Reduce { over, apply, .. } => {
                let mut out = boxed(&[over]);
                out.extend(apply.as_deref());
                out
            }
            RuleKind::Transform(t) => {
                let mut out = boxed(&[&t.over]);
                match &t.step {
                    TransformStep::Map(apply) | TransformStep::FlatMap(apply) => out.push(apply),
                    TransformStep::Filter(pred) => out.extend(pred.operands()),
                    TransformStep::Unique { key } | TransformStep::Sort { key, .. } => out.extend(key.as_deref()),
                }
                out
            }
            RuleKind::GroupReduce { over, by, value, .. } => boxed(&[over, by, value]),
            RuleKind::DateParse { text, .. } => boxed(&[text]),
            RuleKind::DateFormat { parse, .. } => boxed(&[parse]),
            RuleKind::FromTimestamp { sec, .. } => boxed(&[sec]),
            RuleKind::ToTimezone { dt, .. } => boxed(&[dt]),
            RuleKind::If { cond, then, otherwise } => {
                let mut out = cond.operands();
                out.push(then);
                out.extend(otherwise.as_deref());
                out
            }
            RuleKind::Lookup { key, .. } => boxed(&[key]),
        }
    }

    /// Visits this node and all descendants, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Rule)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

/// Builds rule trees from JSON, collecting every structural problem with
/// its `$`-path instead of stopping at the first one.
pub(crate) struct RuleParser<'r> {
    operators: &'r OperatorRegistry,
    pub(crate) errors: Vec<String>,
    pub(crate) warnings: Vec<String>,
}

impl<'r> RuleParser<'r> {
    pub(crate) fn new(operators: &'r OperatorRegistry) -> Self {
        Self { operators, errors: Vec::new(), warnings: Vec::new() }
    }

    pub(crate) fn error(&mut self, at: &str, msg: impl Display) {
        self.errors.push(format!("{at}: {msg}"));
    }

    pub(crate) fn warn(&mut self, at: &str, msg: impl Display) {
        self.warnings.push(format!("{at}: {msg}"));
    }

    pub(crate) fn rule(&mut self, json: &Json, at: &str) -> Rule {
        let Json::Object(obj) = json else {
            return Rule::literal(Value::from(json), at);
        };
        let tail = self.tail(obj, at);
        let ops: Vec<&String> = obj.keys().filter(|k| !TAIL_KEYS.contains(&k.as_str())).collect();
        let (op, kind, payload) = match ops.as_slice() {
            [] => {
                self.warn(at, "rule has no operator and evaluates to its default");
                (String::new(), RuleKind::Empty, Json::Null)
            }
            [name] => {
                let payload = &obj[name.as_str()];
                let kind = self.kind(name, payload, &format!("{at}.{name}"));
                (name.to_string(), kind, payload.clone())
            }
            many => {
                let names: Vec<&str> = many.iter().map(|s| s.as_str()).collect();
                self.error(at, format!("rule has several operators: {}", names.join(", ")));
                (String::new(), RuleKind::Empty, Json::Null)
            }
        };
        Rule { op, kind, tail, position: at.to_string(), payload }
    }

    fn tail(&mut self, obj: &Map<String, Json>, at: &str) -> Tail {
        let mut tail = Tail { default: obj.get("default").map(Value::from), ..Tail::default() };
        if let Some(cast) = obj.get("cast") {
            match cast.as_str().map(CastKind::from_str) {
                Some(Ok(kind)) => tail.cast = Some(kind),
                Some(Err(e)) => self.error(&format!("{at}.cast"), e),
                None => self.error(&format!("{at}.cast"), "must be a string"),
            }
        }
        if let Some(mode) = obj.get("on_error") {
            match mode.as_str().map(OnError::from_str) {
                Some(Ok(mode)) => tail.on_error = Some(mode),
                Some(Err(e)) => self.error(&format!("{at}.on_error"), e),
                None => self.error(&format!("{at}.on_error"), "must be a string"),
            }
        }
        tail
    }

    fn kind(&mut self, name: &str, payload: &Json, at: &str) -> RuleKind {
        if name == "ref" {
            return match payload.as_str() {
                Some(target) if !target.is_empty() => RuleKind::Ref(target.to_string()),
                _ => {
                    self.error(at, "must name a definition");
                    RuleKind::Empty
                }
            };
        }
        if !self.operators.contains(name) {
            self.error(at, format!("unknown operator '{name}'"));
            return RuleKind::Empty;
        }
        let kind = match name {
            "path" => self.path(payload, at).map(RuleKind::Path),
            "rel_path" => self.path(payload, at).map(RuleKind::RelPath),
            "const" => Some(RuleKind::Const(Value::from(payload))),
            "coalesce" => self.rule_list(payload, at).map(RuleKind::Coalesce),
            "concat" => self.rule_list(payload, at).map(RuleKind::Concat),
            "math" => self.math(payload, at),
            "len" => Some(RuleKind::Len(Box::new(self.rule(payload, at)))),
            "map" | "filter" | "flat_map" | "unique" | "sort" => self.transform(name, payload, at),
            "join" | "index" | "reduce" | "group_reduce" | "date_parse" | "date_format"
            | "from_timestamp" | "to_timezone" | "if" | "lookup" | "merge" | "udf" | "serialize" => {
                match payload {
                    Json::Object(spec) => self.spec_kind(name, spec, at),
                    _ => {
                        self.error(at, "must be an object");
                        None
                    }
                }
            }
            _ => Some(RuleKind::Custom {
                args: match payload {
                    Json::Array(items) => items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| self.rule(item, &format!("{at}[{i}]")))
                        .collect(),
                    _ => Vec::new(),
                },
            }),
        };
        kind.unwrap_or(RuleKind::Empty)
    }

    fn spec_kind(&mut self, name: &str, m: &Map<String, Json>, at: &str) -> Option<RuleKind> {
        Some(match name {
            "join" => RuleKind::Join { over: self.required(m, "over", at), sep: self.string(m, "sep", at, ",") },
            "index" => RuleKind::Index { of: self.required(m, "of", at), at: self.integer(m, "at", at, 0) },
            "reduce" => RuleKind::Reduce {
                over: self.required(m, "over", at),
                op: self.choice(m, "op", at, ReduceOp::Sum),
                apply: self.optional(m, "apply", at),
            },
            "group_reduce" => RuleKind::GroupReduce {
                over: self.required(m, "over", at),
                by: self.required(m, "by", at),
                value: self.required(m, "value", at),
                agg: self.choice(m, "agg", at, Aggregate::Sum),
                as_list: self.boolean(m, "as_list", at, false),
            },
            "date_parse" => {
                let formats = match m.get("formats") {
                    None | Some(Json::Null) => Vec::new(),
                    Some(Json::Array(items)) => items
                        .iter()
                        .enumerate()
                        .filter_map(|(i, f)| match f.as_str() {
                            Some(f) => self.strftime(f, &format!("{at}.formats[{i}]")),
                            None => {
                                self.error(&format!("{at}.formats[{i}]"), "must be a string");
                                None
                            }
                        })
                        .collect(),
                    Some(_) => {
                        self.error(&format!("{at}.formats"), "must be a list of strings");
                        Vec::new()
                    }
                };
                RuleKind::DateParse {
                    text: self.required(m, "text", at),
                    formats,
                    strict: self.boolean(m, "strict", at, false),
                }
            }
            "date_format" => {
                let fmt = self.string(m, "fmt", at, "%Y-%m-%d %H:%M:%S");
                let fmt = self.strftime(&fmt, &format!("{at}.fmt")).unwrap_or(fmt);
                let fmt_in = self
                    .opt_string(m, "fmt_in", at)
                    .and_then(|f| self.strftime(&f, &format!("{at}.fmt_in")));
                RuleKind::DateFormat { parse: self.required(m, "parse", at), fmt, fmt_in }
            }
            "from_timestamp" => RuleKind::FromTimestamp {
                sec: self.required(m, "sec", at),
                unit: self.choice(m, "unit", at, TimeUnit::Seconds),
            },
            "to_timezone" => {
                let from = self.opt_string(m, "from", at).and_then(|z| self.zone(&z, &format!("{at}.from")));
                let to = match self.opt_string(m, "to", at) {
                    Some(z) => self.zone(&z, &format!("{at}.to")),
                    None => {
                        self.error(&format!("{at}.to"), "'to' is required");
                        None
                    }
                };
                RuleKind::ToTimezone { dt: self.required(m, "dt", at), from, to: to.unwrap_or(Tz::UTC) }
            }
            "if" => {
                let cond = match m.get("cond") {
                    Some(c) => self.predicate(c, &format!("{at}.cond")),
                    None => {
                        self.error(&format!("{at}.cond"), "'cond' is required");
                        None
                    }
                };
                let then = self.required(m, "then", at);
                let otherwise = self.optional(m, "else", at);
                RuleKind::If { cond: cond?, then, otherwise }
            }
            "lookup" => {
                let table = match m.get("table") {
                    Some(Json::Object(t)) => t.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect(),
                    _ => {
                        self.error(&format!("{at}.table"), "must be an object");
                        IndexMap::new()
                    }
                };
                RuleKind::Lookup {
                    key: self.required(m, "key", at),
                    table,
                    default: m.get("default").map(Value::from),
                }
            }
            "merge" => {
                let objects = match m.get("objects") {
                    Some(list) => self.rule_list(list, &format!("{at}.objects")).unwrap_or_default(),
                    None => {
                        self.error(&format!("{at}.objects"), "'objects' is required");
                        Vec::new()
                    }
                };
                RuleKind::Merge { objects, strategy: self.choice(m, "strategy", at, MergeStrategy::Override) }
            }
            "udf" => {
                let name = self.opt_string(m, "name", at).unwrap_or_default();
                if name.is_empty() {
                    self.error(&format!("{at}.name"), "udf name is required");
                }
                let args = match m.get("args") {
                    None | Some(Json::Null) => Vec::new(),
                    Some(Json::Array(items)) if items.is_empty() => Vec::new(),
                    Some(list) => self.rule_list(list, &format!("{at}.args")).unwrap_or_default(),
                };
                RuleKind::Udf { name, args }
            }
            "serialize" => RuleKind::Serialize(self.required(m, "of", at)),
            _ => return None,
        })
    }

    fn transform(&mut self, name: &str, payload: &Json, at: &str) -> Option<RuleKind> {
        let Json::Object(m) = payload else {
            self.error(at, "must be an object");
            return None;
        };
        let over = self.required(m, "over", at);
        let step = match name {
            "map" => TransformStep::Map(self.required(m, "apply", at)),
            "flat_map" => TransformStep::FlatMap(self.required(m, "apply", at)),
            "filter" => match m.get("where") {
                Some(w) => TransformStep::Filter(self.predicate(w, &format!("{at}.where"))?),
                None => {
                    self.error(&format!("{at}.where"), "'where' is required");
                    return None;
                }
            },
            "unique" => TransformStep::Unique { key: self.optional(m, "key", at) },
            _ => TransformStep::Sort {
                key: self.optional(m, "key", at),
                reverse: self.boolean(m, "reverse", at, false),
            },
        };
        let emit_key = if m.contains_key("emit") { "emit" } else { "as" };
        let emit = match self.opt_string(m, emit_key, at).as_deref() {
            None | Some("list") => Emit::List,
            Some("json") => Emit::Json,
            Some("count") => Emit::Count,
            Some("join") => Emit::Join(self.string(m, "sep", at, ",")),
            Some(other) => {
                self.error(
                    &format!("{at}.{emit_key}"),
                    format!("unknown emit mode '{other}' (expected list, json, count or join)"),
                );
                Emit::List
            }
        };
        let limit = match m.get("limit") {
            None | Some(Json::Null) => None,
            Some(v) => match v.as_u64() {
                Some(n) => Some(n as usize),
                None => {
                    self.error(&format!("{at}.limit"), "must be a non-negative integer");
                    None
                }
            },
        };
        Some(RuleKind::Transform(ListTransform { step, over, emit, limit }))
    }

    fn math(&mut self, payload: &Json, at: &str) -> Option<RuleKind> {
        let items = match payload.as_array() {
            Some(items) if items.len() >= 2 => items,
            _ => {
                self.error(at, "expects [op, operand, ...]");
                return None;
            }
        };
        let op = match items[0].as_str().map(MathOp::from_str) {
            Some(Ok(op)) => Some(op),
            Some(Err(e)) => {
                self.error(&format!("{at}[0]"), e);
                None
            }
            None => {
                self.error(&format!("{at}[0]"), "operator must be a string");
                None
            }
        };
        let operands = items[1..]
            .iter()
            .enumerate()
            .map(|(i, item)| self.rule(item, &format!("{at}[{}]", i + 1)))
            .collect();
        Some(RuleKind::Math { op: op?, operands })
    }

    pub(crate) fn predicate(&mut self, json: &Json, at: &str) -> Option<Predicate> {
        let Json::Object(m) = json else {
            self.error(at, "predicate must be an object");
            return None;
        };
        let op = match m.get("op").and_then(Json::as_str) {
            Some(op) => op,
            None => {
                self.error(&format!("{at}.op"), "predicate 'op' is required");
                return None;
            }
        };
        match op {
            "exists" => Some(Predicate::Exists(self.required(m, "arg", at))),
            "eq" => Some(Predicate::Eq(self.required(m, "a", at), self.required(m, "b", at))),
            "gt" => Some(Predicate::Gt(self.required(m, "a", at), self.required(m, "b", at))),
            "lt" => Some(Predicate::Lt(self.required(m, "a", at), self.required(m, "b", at))),
            "regex" => {
                let a = self.required(m, "a", at);
                let b = self.required(m, "b", at);
                let compiled = match m.get("b") {
                    Some(Json::String(pattern)) => match Regex::new(pattern) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            self.error(&format!("{at}.b"), format!("invalid regex: {e}"));
                            None
                        }
                    },
                    _ => None,
                };
                Some(Predicate::Regex(a, b, compiled))
            }
            other => {
                self.error(
                    &format!("{at}.op"),
                    format!("unknown predicate '{other}' (expected exists, eq, gt, lt or regex)"),
                );
                None
            }
        }
    }

    pub(crate) fn path(&mut self, payload: &Json, at: &str) -> Option<PathExpr> {
        match payload.as_str() {
            Some(p) => match PathExpr::parse(p) {
                Ok(path) => Some(path),
                Err(e) => {
                    self.error(at, e);
                    None
                }
            },
            None => {
                self.error(at, "must be a string");
                None
            }
        }
    }

    fn rule_list(&mut self, payload: &Json, at: &str) -> Option<Vec<Rule>> {
        match payload.as_array() {
            Some(items) if !items.is_empty() => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.rule(item, &format!("{at}[{i}]")))
                    .collect(),
            ),
            _ => {
                self.error(at, "must be a non-empty list of rules");
                None
            }
        }
    }

    fn required(&mut self, m: &Map<String, Json>, key: &str, at: &str) -> Box<Rule> {
        let child_at = format!("{at}.{key}");
        match m.get(key) {
            Some(json) => Box::new(self.rule(json, &child_at)),
            None => {
                self.error(&child_at, format!("'{key}' is required"));
                Box::new(Rule::literal(Value::Null, &child_at))
            }
        }
    }

    fn optional(&mut self, m: &Map<String, Json>, key: &str, at: &str) -> Option<Box<Rule>> {
        m.get(key)
            .filter(|v| !v.is_null())
            .map(|json| Box::new(self.rule(json, &format!("{at}.{key}"))))
    }

    fn opt_string(&mut self, m: &Map<String, Json>, key: &str, at: &str) -> Option<String> {
        match m.get(key) {
            None | Some(Json::Null) => None,
            Some(Json::String(s)) => Some(s.clone()),
            Some(_) => {
                self.error(&format!("{at}.{key}"), "must be a string");
                None
            }
        }
    }

    fn string(&mut self, m: &Map<String, Json>, key: &str, at: &str, default: &str) -> String {
        self.opt_string(m, key, at).unwrap_or_else(|| default.to_string())
    }

    fn boolean(&mut self, m: &Map<String, Json>, key: &str, at: &str, default: bool) -> bool {
        match m.get(key) {
            None | Some(Json::Null) => default,
            Some(Json::Bool(b)) => *b,
            Some(_) => {
                self.error(&format!("{at}.{key}"), "must be a boolean");
                default
            }
        }
    }

    fn integer(&mut self, m: &Map<String, Json>, key: &str, at: &str, default: i64) -> i64 {
        match m.get(key) {
            None | Some(Json::Null) => default,
            Some(v) => v.as_i64().unwrap_or_else(|| {
                self.error(&format!("{at}.{key}"), "must be an integer");
                default
            }),
        }
    }

    fn choice<T>(&mut self, m: &Map<String, Json>, key: &str, at: &str, default: T) -> T
    where
        T: FromStr<Err = String>,
    {
        match self.opt_string(m, key, at) {
            None => default,
            Some(s) => s.parse().unwrap_or_else(|e: String| {
                self.error(&format!("{at}.{key}"), e);
                default
            }),
        }
    }

    fn strftime(&mut self, fmt: &str, at: &str) -> Option<String> {
        if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
            self.error(at, format!("invalid date format '{fmt}'"));
            None
        } else {
            Some(fmt.to_string())
        }
    }

    fn zone(&mut self, name: &str, at: &str) -> Option<Tz> {
        match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                self.error(at, format!("unknown time zone '{name}'"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(json: Json) -> (Rule, Vec<String>) {
        let ops = OperatorRegistry::with_builtins();
        let mut parser = RuleParser::new(&ops);
        let rule = parser.rule(&json, "$.columns.x");
        (rule, parser.errors)
    }

    #[test]
    fn literals_become_const() {
        let (rule, errors) = parse(json!([1, 2]));
        assert!(errors.is_empty());
        assert_eq!(rule.op(), "const");
        assert!(matches!(rule.kind(), RuleKind::Const(Value::List(_))));
    }

    #[test]
    fn tail_options_are_split_from_the_operator() {
        let (rule, errors) = parse(json!({"path": "a.b", "default": 0, "cast": "int", "on_error": "warn"}));
        assert!(errors.is_empty());
        assert_eq!(rule.op(), "path");
        assert_eq!(rule.tail().default, Some(Value::Int(0)));
        assert_eq!(rule.tail().cast, Some(CastKind::Int));
        assert_eq!(rule.tail().on_error, Some(OnError::Warn));
    }

    #[test]
    fn errors_carry_document_positions() {
        let (_, errors) = parse(json!({"math": ["pow", {"path": "a["}, {"nope": 1}]}));
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("$.columns.x.math[0]:"));
        assert!(errors[1].starts_with("$.columns.x.math[1].path:"));
        assert!(errors[2].contains("unknown operator 'nope'"));
    }

    #[test]
    fn udf_accepts_an_empty_argument_list() {
        let (rule, errors) = parse(json!({"udf": {"name": "now", "args": []}}));
        assert!(errors.is_empty(), "{errors:?}");
        assert!(matches!(rule.kind(), RuleKind::Udf { args, .. } if args.is_empty()));
        let (_, errors) = parse(json!({"udf": {"name": "now", "args": "x"}}));
        assert_eq!(errors, vec!["$.columns.x.udf.args: must be a non-empty list of rules".to_string()]);
    }

    #[test]
    fn children_cover_predicates() {
        let (rule, errors) = parse(json!({"if": {
            "cond": {"op": "gt", "a": {"path": "x"}, "b": 1},
            "then": "big",
            "else": "small"
        }}));
        assert!(errors.is_empty());
        assert_eq!(rule.children().len(), 4);
        assert_eq!(rule.children()[0].position(), "$.columns.x.if.cond.a");
    }

    #[test]
    fn walk_reaches_boxed_operands() {
        let (rule, errors) = parse(json!({"len": {"group_reduce": {
            "over": {"path": "lines"},
            "by": {"rel_path": "cat"},
            "value": {"math": ["mul", {"rel_path": "qty"}, 2]},
            "agg": "sum"
        }}}));
        assert!(errors.is_empty(), "{errors:?}");
        let mut ops = Vec::new();
        rule.walk(&mut |r| ops.push(r.op().to_string()));
        assert_eq!(ops, ["len", "group_reduce", "path", "rel_path", "math", "rel_path", "const"]);
    }
}
