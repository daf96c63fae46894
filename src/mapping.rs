//! The mapping document: row source, reusable definitions, an optional
//! output schema and the ordered column rules.

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};
use std::str::FromStr;

use crate::errors::MappingError;
use crate::operators::OperatorRegistry;
use crate::path::PathExpr;
use crate::rule::{Rule, RuleKind, RuleParser};
use crate::schema::SchemaContract;

const TOP_LEVEL_KEYS: [&str; 5] = ["columns", "definitions", "schema", "explode", "explode_join"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinHow {
    Inner,
    Left,
    Right,
    Outer,
}

impl FromStr for JoinHow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inner" => Ok(JoinHow::Inner),
            "left" => Ok(JoinHow::Left),
            "right" => Ok(JoinHow::Right),
            "outer" => Ok(JoinHow::Outer),
            other => Err(format!("unknown join '{other}' (expected inner, left, right or outer)")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum RowSource {
    #[default]
    None,
    Explode { path: PathExpr, emit_root_when_empty: bool },
    ExplodeJoin { left: PathExpr, right: PathExpr, how: JoinHow },
}

/// A parsed, immutable mapping.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub row_source: RowSource,
    pub definitions: IndexMap<String, Rule>,
    pub schema: Option<SchemaContract>,
    pub columns: IndexMap<String, Rule>,
}

/// Everything found while parsing, whether or not it produced a mapping.
pub(crate) struct Parsed {
    pub mapping: Option<Mapping>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Mapping {
    pub fn from_json(doc: &Json, operators: &OperatorRegistry) -> Result<Self, MappingError> {
        let parsed = Self::parse(doc, operators);
        match parsed.mapping {
            Some(mapping) if parsed.errors.is_empty() => Ok(mapping),
            _ => Err(MappingError::Structural(parsed.errors)),
        }
    }

    pub fn from_json_str(doc: &str, operators: &OperatorRegistry) -> Result<Self, MappingError> {
        let json: Json = serde_json::from_str(doc)?;
        Self::from_json(&json, operators)
    }

    pub(crate) fn parse(doc: &Json, operators: &OperatorRegistry) -> Parsed {
        let mut p = RuleParser::new(operators);
        let Json::Object(obj) = doc else {
            p.error("$", "mapping must be an object");
            return Parsed { mapping: None, errors: p.errors, warnings: p.warnings };
        };
        for key in obj.keys().filter(|k| !TOP_LEVEL_KEYS.contains(&k.as_str())) {
            p.warn(&format!("$.{key}"), "unknown top-level key is ignored");
        }

        let row_source = row_source(&mut p, obj);
        let definitions = rule_map(&mut p, obj.get("definitions"), "$.definitions", false);
        let columns = rule_map(&mut p, obj.get("columns"), "$.columns", true);
        let schema = obj.get("schema").and_then(|s| SchemaContract::from_json(s, "$.schema", &mut p.errors));

        // every ref must name a definition
        for (section, rules) in [("definitions", &definitions), ("columns", &columns)] {
            for rule in rules.values() {
                rule.walk(&mut |node| {
                    if let RuleKind::Ref(target) = node.kind() {
                        if !definitions.contains_key(target) {
                            p.error(node.position(), format!("unknown definition '{target}' referenced from {section}"));
                        }
                    }
                });
            }
        }

        Parsed {
            mapping: Some(Mapping { row_source, definitions, schema, columns }),
            errors: p.errors,
            warnings: p.warnings,
        }
    }
}

fn row_source(p: &mut RuleParser<'_>, obj: &Map<String, Json>) -> RowSource {
    match (obj.get("explode"), obj.get("explode_join")) {
        (None, None) => RowSource::None,
        (Some(_), Some(_)) => {
            p.error("$", "'explode' and 'explode_join' are mutually exclusive");
            RowSource::None
        }
        (Some(explode), None) => {
            let Json::Object(spec) = explode else {
                p.error("$.explode", "must be an object");
                return RowSource::None;
            };
            let emit_root_when_empty = match spec.get("emit_root_when_empty") {
                None => true,
                Some(Json::Bool(b)) => *b,
                Some(_) => {
                    p.error("$.explode.emit_root_when_empty", "must be a boolean");
                    true
                }
            };
            match required_path(p, spec, "path", "$.explode") {
                Some(path) => RowSource::Explode { path, emit_root_when_empty },
                None => RowSource::None,
            }
        }
        (None, Some(join)) => {
            let Json::Object(spec) = join else {
                p.error("$.explode_join", "must be an object");
                return RowSource::None;
            };
            let how = match spec.get("how") {
                None => Some(JoinHow::Inner),
                Some(Json::String(s)) => s
                    .parse()
                    .map_err(|e: String| p.error("$.explode_join.how", e))
                    .ok(),
                Some(_) => {
                    p.error("$.explode_join.how", "must be a string");
                    None
                }
            };
            let left = required_path(p, spec, "left", "$.explode_join");
            let right = required_path(p, spec, "right", "$.explode_join");
            match (left, right, how) {
                (Some(left), Some(right), Some(how)) => RowSource::ExplodeJoin { left, right, how },
                _ => RowSource::None,
            }
        }
    }
}

fn required_path(p: &mut RuleParser<'_>, spec: &Map<String, Json>, key: &str, at: &str) -> Option<PathExpr> {
    let at = format!("{at}.{key}");
    match spec.get(key) {
        Some(json) => p.path(json, &at),
        None => {
            p.error(&at, format!("'{key}' is required"));
            None
        }
    }
}

fn rule_map(p: &mut RuleParser<'_>, section: Option<&Json>, at: &str, required: bool) -> IndexMap<String, Rule> {
    match section {
        None if required => {
            p.error(at, "is required");
            IndexMap::new()
        }
        None => IndexMap::new(),
        Some(Json::Object(rules)) => {
            if required && rules.is_empty() {
                p.error(at, "must not be empty");
            }
            rules
                .iter()
                .map(|(name, json)| (name.clone(), p.rule(json, &format!("{at}.{name}"))))
                .collect()
        }
        Some(_) => {
            p.error(at, "must be an object");
            IndexMap::new()
        }
    }
}
