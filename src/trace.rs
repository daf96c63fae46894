use serde::Serialize;

use crate::coercion::truncate;
use crate::errors::Result;
use crate::rule::Rule;
use crate::value::Value;

const SUMMARY_LEN: usize = 80;

/// One rule evaluation, in dispatch order (parents before children).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub rule_path: String,
    pub operator: String,
    pub inputs_summary: String,
    pub output_summary: String,
}

/// A failure swallowed by `on_error = "warn"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub column: String,
    pub rule_path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub(crate) struct TraceRecorder {
    entries: Vec<TraceEntry>,
}

impl TraceRecorder {
    /// Reserves the entry for `rule` before its children run.
    pub(crate) fn enter(&mut self, rule: &Rule) -> usize {
        let operator = if rule.op().is_empty() { "<empty>" } else { rule.op() };
        self.entries.push(TraceEntry {
            rule_path: rule.position().to_string(),
            operator: operator.to_string(),
            inputs_summary: truncate(&rule.payload().to_string(), SUMMARY_LEN),
            output_summary: String::new(),
        });
        self.entries.len() - 1
    }

    pub(crate) fn exit(&mut self, slot: usize, outcome: &Result<Option<Value>>) {
        if let Some(entry) = self.entries.get_mut(slot) {
            entry.output_summary = match outcome {
                Ok(Some(v)) => truncate(&v.to_json_string(), SUMMARY_LEN),
                Ok(None) => "<absent>".to_string(),
                Err(e) => format!("error: {e}"),
            };
        }
    }

    pub(crate) fn take(&mut self) -> Vec<TraceEntry> {
        std::mem::take(&mut self.entries)
    }
}
