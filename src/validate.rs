//! Static checks on a mapping document, and a dry run that exercises a
//! mapping on sample records without failing.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as Json;

use crate::convert::{Engine, RecordTrace, Row};
use crate::mapping::Mapping;
use crate::operators::OperatorRegistry;
use crate::rule::{Rule, RuleKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    /// `"<$-path>: <message>"`, in document order.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Collects every structural problem of `doc`, definition cycles included.
pub fn validate(doc: &Json, operators: &OperatorRegistry) -> ValidationReport {
    let parsed = Mapping::parse(doc, operators);
    let mut errors = parsed.errors;
    if let Some(mapping) = &parsed.mapping {
        errors.extend(definition_cycles(&mapping.definitions));
    }
    ValidationReport { ok: errors.is_empty(), errors, warnings: parsed.warnings }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

fn definition_cycles(definitions: &IndexMap<String, Rule>) -> Vec<String> {
    let edges: IndexMap<&str, Vec<&str>> = definitions
        .iter()
        .map(|(name, rule)| {
            let mut refs = Vec::new();
            rule.walk(&mut |node| {
                if let RuleKind::Ref(target) = node.kind() {
                    refs.push(target.as_str());
                }
            });
            (name.as_str(), refs)
        })
        .collect();

    let mut marks: IndexMap<&str, Mark> = IndexMap::new();
    let mut found = Vec::new();
    for start in edges.keys() {
        let mut stack = Vec::new();
        visit(*start, &edges, &mut marks, &mut stack, &mut found);
    }
    found
}

fn visit<'a>(
    name: &'a str,
    edges: &IndexMap<&'a str, Vec<&'a str>>,
    marks: &mut IndexMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    found: &mut Vec<String>,
) {
    match marks.get(name) {
        Some(Mark::Done) => return,
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|n| *n == name).unwrap_or(0);
            let mut chain: Vec<&str> = stack[start..].to_vec();
            chain.push(name);
            found.push(format!("$.definitions.{}: cyclic definition {}", chain[0], chain.join(" -> ")));
            return;
        }
        None => {}
    }
    marks.insert(name, Mark::Visiting);
    stack.push(name);
    for next in edges.get(name).into_iter().flatten() {
        if edges.contains_key(next) {
            visit(*next, edges, marks, stack, found);
        }
    }
    stack.pop();
    marks.insert(name, Mark::Done);
}

/// Outcome of [`dry_run`]: validation, the rows (or errors) produced for
/// each sample record, and a trace of the first record.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub validation: ValidationReport,
    pub rows: Vec<Row>,
    pub errors: Vec<String>,
    pub trace: Option<RecordTrace>,
}

pub fn dry_run(engine: &Engine, doc: &Json, sample: &[Json]) -> DryRunReport {
    let validation = engine.validate(doc);
    let mut report = DryRunReport { validation, rows: Vec::new(), errors: Vec::new(), trace: None };
    if !report.validation.ok {
        return report;
    }
    let converter = match engine.compile(doc) {
        Ok(c) => c,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        }
    };
    for (i, record) in sample.iter().enumerate() {
        match converter.convert_one(record) {
            Ok(rows) => report.rows.extend(rows),
            Err(e) => report.errors.push(format!("record {i}: {e}")),
        }
    }
    report.trace = sample.first().and_then(|first| converter.trace(first).ok());
    report
}
