//! Row planning: how many rows a record produces and what each row's
//! rules see as the current item.

use crate::mapping::{JoinHow, RowSource};
use crate::path::PathExpr;
use crate::value::{Object, Value};

/// The item bound for one output row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowBinding {
    /// Single row, no item; `rel_path` falls back to the record.
    Root,
    Element(Value),
    /// `{"left": .., "right": ..}`, a missing side being `null`.
    Joined(Value),
}

impl RowBinding {
    pub fn item(&self) -> Option<&Value> {
        match self {
            RowBinding::Root => None,
            RowBinding::Element(v) | RowBinding::Joined(v) => Some(v),
        }
    }
}

pub fn plan_rows(record: &Value, source: &RowSource) -> Vec<RowBinding> {
    match source {
        RowSource::None => vec![RowBinding::Root],
        RowSource::Explode { path, emit_root_when_empty } => {
            let items = list_at(record, path);
            if items.is_empty() {
                if *emit_root_when_empty { vec![RowBinding::Root] } else { Vec::new() }
            } else {
                items.into_iter().map(RowBinding::Element).collect()
            }
        }
        RowSource::ExplodeJoin { left, right, how } => {
            join_pairs(list_at(record, left), list_at(record, right), *how)
                .into_iter()
                .map(|(l, r)| RowBinding::Joined(joined(l, r)))
                .collect()
        }
    }
}

fn list_at(record: &Value, path: &PathExpr) -> Vec<Value> {
    match path.resolve(record) {
        Some(Value::List(items)) => items,
        _ => Vec::new(),
    }
}

fn joined(left: Option<Value>, right: Option<Value>) -> Value {
    let mut pair = Object::new();
    pair.insert("left".to_string(), left.unwrap_or(Value::Null));
    pair.insert("right".to_string(), right.unwrap_or(Value::Null));
    Value::Object(pair)
}

type Pair = (Option<Value>, Option<Value>);

fn join_pairs(left: Vec<Value>, right: Vec<Value>, how: JoinHow) -> Vec<Pair> {
    let cross = |left: &[Value], right: &[Value]| -> Vec<Pair> {
        left.iter()
            .flat_map(|l| right.iter().map(move |r| (Some(l.clone()), Some(r.clone()))))
            .collect()
    };
    match (how, left.is_empty(), right.is_empty()) {
        (_, false, false) if how != JoinHow::Right => cross(&left, &right),
        // right joins walk the right side first
        (JoinHow::Right, false, false) => right
            .iter()
            .flat_map(|r| left.iter().map(move |l| (Some(l.clone()), Some(r.clone()))))
            .collect(),
        (JoinHow::Inner, _, _) => Vec::new(),
        (JoinHow::Left | JoinHow::Outer, false, true) => left.into_iter().map(|l| (Some(l), None)).collect(),
        (JoinHow::Right | JoinHow::Outer, true, false) => right.into_iter().map(|r| (None, Some(r))).collect(),
        (JoinHow::Outer, true, true) => vec![(None, None)],
        _ => Vec::new(),
    }
}
