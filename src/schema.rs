//! Output contract checked after rows are produced. Checks never touch the
//! values; they only report.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

use crate::convert::Row;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Str,
    Int,
    Float,
    Bool,
    Number,
    List,
    Object,
}

impl ColumnType {
    fn admits(self, v: &Value) -> bool {
        matches!(
            (self, v),
            (ColumnType::Str, Value::String(_))
                | (ColumnType::Int, Value::Int(_))
                | (ColumnType::Float, Value::Float(_) | Value::Int(_))
                | (ColumnType::Bool, Value::Bool(_))
                | (ColumnType::Number, Value::Int(_) | Value::Float(_) | Value::Bool(_))
                | (ColumnType::List, Value::List(_))
                | (ColumnType::Object, Value::Object(_))
        )
    }
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    #[serde(rename = "type")]
    pub kind: Option<ColumnType>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub regex: Option<String>,
    #[serde(skip)]
    pattern: Option<Regex>,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaContract {
    pub columns: IndexMap<String, ColumnSpec>,
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    Missing,
    TypeMismatch,
    NullNotAllowed,
    MinViolation,
    MaxViolation,
    RegexViolation,
    Unexpected,
}

/// One failed check for one column, with the number of offending rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaViolation {
    pub column: String,
    pub kind: ViolationKind,
    pub count: usize,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaReport {
    pub ok: bool,
    pub violations: Vec<SchemaViolation>,
}

impl fmt::Display for SchemaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            return f.write_str("ok");
        }
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {:?} x{} ({})", v.column, v.kind, v.count, v.detail)?;
        }
        Ok(())
    }
}

impl SchemaContract {
    /// Reads `{"columns": {...}, "strict": bool}`, pushing `$`-prefixed
    /// findings to `errors`.
    pub(crate) fn from_json(json: &Json, at: &str, errors: &mut Vec<String>) -> Option<Self> {
        let Json::Object(obj) = json else {
            errors.push(format!("{at}: schema must be an object"));
            return None;
        };
        let mut contract = SchemaContract::default();
        match obj.get("strict") {
            None => {}
            Some(Json::Bool(b)) => contract.strict = *b,
            Some(_) => errors.push(format!("{at}.strict: must be a boolean")),
        }
        match obj.get("columns") {
            None => {}
            Some(Json::Object(cols)) => {
                for (name, spec) in cols {
                    let col_at = format!("{at}.columns.{name}");
                    match serde_json::from_value::<ColumnSpec>(spec.clone()) {
                        Ok(mut spec) => {
                            if let Some(pattern) = &spec.regex {
                                match Regex::new(pattern) {
                                    Ok(re) => spec.pattern = Some(re),
                                    Err(e) => errors.push(format!("{col_at}.regex: invalid regex: {e}")),
                                }
                            }
                            contract.columns.insert(name.clone(), spec);
                        }
                        Err(e) => errors.push(format!("{col_at}: {e}")),
                    }
                }
            }
            Some(_) => errors.push(format!("{at}.columns: must be an object")),
        }
        Some(contract)
    }

    pub fn validate_rows<'a, I>(&self, rows: I) -> SchemaReport
    where
        I: IntoIterator<Item = &'a Row>,
    {
        let mut counts: IndexMap<(String, ViolationKind), (usize, String)> = IndexMap::new();
        let mut bump = |column: &str, kind: ViolationKind, detail: String| {
            counts.entry((column.to_string(), kind)).or_insert((0, detail)).0 += 1;
        };
        for row in rows {
            for (name, spec) in &self.columns {
                let Some(value) = row.get(name) else {
                    bump(name, ViolationKind::Missing, "column not produced".to_string());
                    continue;
                };
                if value.is_null() {
                    if !spec.nullable {
                        bump(name, ViolationKind::NullNotAllowed, "null in non-nullable column".to_string());
                    }
                    continue;
                }
                if let Some(kind) = spec.kind {
                    if !kind.admits(value) {
                        bump(name, ViolationKind::TypeMismatch, format!("expected {kind:?}, got {}", value.kind()));
                    }
                }
                let number = match value {
                    Value::Int(_) | Value::Float(_) => value.as_f64(),
                    _ => None,
                };
                if let (Some(n), Some(min)) = (number, spec.min) {
                    if n < min {
                        bump(name, ViolationKind::MinViolation, format!("below {min}"));
                    }
                }
                if let (Some(n), Some(max)) = (number, spec.max) {
                    if n > max {
                        bump(name, ViolationKind::MaxViolation, format!("above {max}"));
                    }
                }
                if let Some(re) = &spec.pattern {
                    if !re.is_match(&value.to_text()) {
                        bump(name, ViolationKind::RegexViolation, format!("does not match {}", re.as_str()));
                    }
                }
            }
            if self.strict {
                for name in row.keys().filter(|k| !self.columns.contains_key(*k)) {
                    bump(name, ViolationKind::Unexpected, "column not declared in schema".to_string());
                }
            }
        }
        let violations: Vec<SchemaViolation> = counts
            .into_iter()
            .map(|((column, kind), (count, detail))| SchemaViolation { column, kind, count, detail })
            .collect();
        SchemaReport { ok: violations.is_empty(), violations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn contract(json: Json) -> SchemaContract {
        let mut errors = Vec::new();
        let c = SchemaContract::from_json(&json, "$.schema", &mut errors).unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        c
    }

    fn row(json: Json) -> Row {
        match Value::from(json) {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn counts_violations_per_column() {
        let c = contract(json!({"columns": {
            "id": {"type": "int", "nullable": false, "min": 1},
            "code": {"type": "str", "regex": "^[A-Z]{2}$"}
        }}));
        let rows = vec![
            row(json!({"id": 0, "code": "AB"})),
            row(json!({"id": null, "code": "abc"})),
            row(json!({"id": "7", "code": null})),
        ];
        let report = c.validate_rows(&rows);
        assert!(!report.ok);
        let kinds: Vec<(&str, ViolationKind, usize)> =
            report.violations.iter().map(|v| (v.column.as_str(), v.kind, v.count)).collect();
        assert_eq!(
            kinds,
            vec![
                ("id", ViolationKind::MinViolation, 1),
                ("id", ViolationKind::NullNotAllowed, 1),
                ("code", ViolationKind::RegexViolation, 1),
                ("id", ViolationKind::TypeMismatch, 1),
            ]
        );
    }

    #[test]
    fn strict_rejects_extra_columns() {
        let c = contract(json!({"columns": {"a": {}}, "strict": true}));
        let report = c.validate_rows(&[row(json!({"a": 1, "b": 2}))]);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::Unexpected);
        let missing = c.validate_rows(&[row(json!({}))]);
        assert_eq!(missing.violations[0].kind, ViolationKind::Missing);
    }

    #[test]
    fn bad_specs_are_structural_errors() {
        let mut errors = Vec::new();
        SchemaContract::from_json(
            &json!({"columns": {"a": {"type": "decimal"}, "b": {"regex": "("}}}),
            "$.schema",
            &mut errors,
        );
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("$.schema.columns.a:"));
        assert!(errors[1].starts_with("$.schema.columns.b.regex:"));
    }
}
