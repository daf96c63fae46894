//! Dotted access paths: `user.emails[?type=="work"]?[0].value`, `items[*].price`.
//!
//! A path is a `.`-separated list of segments. Each segment is an optional
//! key followed by selectors: `[n]` (negative counts from the end), `[*]`,
//! `[?field==literal]` and the safe index `?[n]`. Resolution never fails on
//! missing data; it yields `None` (absent) instead, so `?[n]` and `[n]`
//! resolve identically and the safe form only documents intent.

use crate::comparison::values_equal;
use crate::errors::PathSyntaxError;
use crate::parser::{ParseError, Parser};
use crate::value::Value;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    key: String,
    selectors: Vec<Selector>,
}

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    Index(i64),
    Wildcard,
    Filter { field: String, literal: Value },
}

/// Intermediate resolution state; `Spread` is the flattened result of a
/// wildcard or filter and is mapped over by any following segment.
enum Node<'a> {
    Single(&'a Value),
    Spread(Vec<&'a Value>),
}

impl PathExpr {
    pub fn parse(path: &str) -> Result<Self, PathSyntaxError> {
        parse_segments(path)
            .map(|segments| PathExpr { source: path.to_string(), segments })
            .map_err(|e| PathSyntaxError { path: path.to_string(), message: e.message().to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Resolves the path against `value`. `None` means absent, which is
    /// distinct from a present JSON `null`.
    pub fn resolve(&self, value: &Value) -> Option<Value> {
        let mut cur = Node::Single(value);
        for seg in &self.segments {
            cur = step(cur, seg)?;
        }
        Some(match cur {
            Node::Single(v) => v.clone(),
            Node::Spread(items) => Value::List(items.into_iter().cloned().collect()),
        })
    }
}

/// Parses and resolves in one go.
pub fn resolve(value: &Value, path: &str) -> Result<Option<Value>, PathSyntaxError> {
    Ok(PathExpr::parse(path)?.resolve(value))
}

fn step<'a>(cur: Node<'a>, seg: &Segment) -> Option<Node<'a>> {
    let items: Vec<&'a Value> = match cur {
        Node::Spread(items) => items,
        Node::Single(Value::List(items)) if !seg.key.is_empty() => items.iter().collect(),
        Node::Single(v) => return apply_segment(v, seg),
    };

    // A list meets a keyed segment: map over every element and splice
    // list results one level deep. Misses keep their slot as null.
    let mut mapped = Vec::with_capacity(items.len());
    for el in items {
        match apply_segment(el, seg) {
            Some(Node::Spread(xs)) => mapped.extend(xs),
            Some(Node::Single(Value::List(xs))) => mapped.extend(xs.iter()),
            Some(Node::Single(v)) => mapped.push(v),
            None => mapped.push(&NULL),
        }
    }
    Some(Node::Spread(mapped))
}

fn apply_segment<'a>(base: &'a Value, seg: &Segment) -> Option<Node<'a>> {
    let mut cur = if seg.key.is_empty() {
        Node::Single(base)
    } else {
        Node::Single(base.as_object()?.get(&seg.key)?)
    };
    for sel in &seg.selectors {
        cur = apply_selector(cur, sel)?;
    }
    Some(cur)
}

fn apply_selector<'a>(cur: Node<'a>, sel: &Selector) -> Option<Node<'a>> {
    let items: Vec<&'a Value> = match cur {
        Node::Spread(items) => items,
        Node::Single(Value::List(items)) => items.iter().collect(),
        Node::Single(Value::Object(map)) if *sel == Selector::Wildcard => {
            return Some(Node::Spread(map.values().collect()));
        }
        // Indexing a scalar or object is a miss.
        Node::Single(_) => return None,
    };
    match sel {
        Selector::Wildcard => Some(Node::Spread(items)),
        Selector::Index(at) => {
            let len = items.len() as i64;
            let idx = if *at < 0 { len + at } else { *at };
            if (0..len).contains(&idx) {
                Some(Node::Single(items[idx as usize]))
            } else {
                None
            }
        }
        Selector::Filter { field, literal } => Some(Node::Spread(
            items
                .into_iter()
                .filter(|el| el.get(field).is_some_and(|v| values_equal(v, literal)))
                .collect(),
        )),
    }
}

fn parse_segments(input: &str) -> Result<Vec<Segment>, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::InvalidSyntax("path is empty".into()));
    }
    let mut p = Parser::new(input);
    let mut segments = Vec::new();
    loop {
        let key = p
            .take_while(|c, rest| {
                !matches!(c, '.' | '[' | ']') && !c.is_whitespace() && !(c == '?' && rest.starts_with("?["))
            })
            .to_string();
        let selectors = parse_selectors(&mut p)?;
        if key.is_empty() && selectors.is_empty() {
            return Err(ParseError::InvalidSyntax(format!("empty segment at offset {}", p.position())));
        }
        segments.push(Segment { key, selectors });
        if p.eof() {
            break;
        }
        if !p.consume_char('.') {
            return Err(ParseError::InvalidSyntax(format!(
                "unexpected character {:?} at offset {}",
                p.peek_char().unwrap_or(' '),
                p.position()
            )));
        }
    }
    Ok(segments)
}

fn parse_selectors(p: &mut Parser<'_>) -> Result<Vec<Selector>, ParseError> {
    let mut selectors = Vec::new();
    loop {
        let sel = if p.consume_str("?[") {
            let at = p.parse_int()?;
            p.expect(']')?;
            Selector::Index(at)
        } else if p.consume_char('[') {
            if p.consume_char('*') {
                p.expect(']')?;
                Selector::Wildcard
            } else if p.consume_char('?') {
                parse_filter(p)?
            } else {
                let at = p.parse_int()?;
                p.expect(']')?;
                Selector::Index(at)
            }
        } else {
            return Ok(selectors);
        };
        if selectors.last() == Some(&Selector::Wildcard) {
            return Err(ParseError::InvalidSyntax(
                "a wildcard must be the last selector of its segment".into(),
            ));
        }
        selectors.push(sel);
    }
}

// `[?field==literal]`, with the opening `[?` already consumed.
fn parse_filter(p: &mut Parser<'_>) -> Result<Selector, ParseError> {
    p.skip_ws();
    let field = p.take_while(|c, _| !matches!(c, '=' | '!' | '<' | '>' | ']') && !c.is_whitespace());
    if field.is_empty() {
        return Err(ParseError::InvalidSyntax("filter field expected".into()));
    }
    let field = field.to_string();
    p.skip_ws();
    if !p.consume_str("==") {
        return Err(ParseError::InvalidSyntax("filters only support '=='".into()));
    }
    p.skip_ws();
    let literal = match p.peek_char() {
        Some('"') | Some('\'') => Value::String(p.parse_quoted_string()?),
        Some(c) if c == '-' || c.is_ascii_digit() => p.parse_number_literal()?,
        _ => {
            let word = p.capture_until(']')?.trim();
            match word {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                "" => return Err(ParseError::InvalidSyntax("filter literal expected".into())),
                other => Value::String(other.to_string()),
            }
        }
    };
    p.skip_ws();
    p.expect(']')?;
    Ok(Selector::Filter { field, literal })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Value {
        Value::from(json!({
            "user": {
                "name": "Ada",
                "emails": [
                    {"type": "work", "value": "ada@company.com"},
                    {"type": "personal", "value": "ada@example.com"}
                ],
                "nickname": null
            },
            "items": [
                {"sku": "A", "price": 3.5, "qty": 2},
                {"sku": "B", "price": 4, "qty": 0},
                {"sku": "C", "qty": 1}
            ],
            "matrix": [[1, 2], [3]]
        }))
    }

    fn get(path: &str) -> Option<Value> {
        resolve(&sample(), path).unwrap()
    }

    #[test]
    fn keys_and_indices() {
        assert_eq!(get("user.name"), Some(Value::from("Ada")));
        assert_eq!(get("items[1].sku"), Some(Value::from("B")));
        assert_eq!(get("items[-1].sku"), Some(Value::from("C")));
        assert_eq!(get("matrix[0][1]"), Some(Value::Int(2)));
    }

    #[test]
    fn absent_is_not_null() {
        assert_eq!(get("user.nickname"), Some(Value::Null));
        assert_eq!(get("user.missing"), None);
        assert_eq!(get("user.nickname.deeper"), None);
        assert_eq!(get("items[9].sku"), None);
        assert_eq!(get("user.name[0]"), None);
    }

    #[test]
    fn wildcard_maps_trailing_segments() {
        assert_eq!(get("items[*].sku"), Some(Value::from(json!(["A", "B", "C"]))));
        // the third item has no price; its slot stays null
        assert_eq!(get("items[*].price"), Some(Value::from(json!([3.5, 4, null]))));
        assert_eq!(get("matrix[*]"), Some(Value::from(json!([[1, 2], [3]]))));
    }

    #[test]
    fn filter_then_safe_index() {
        assert_eq!(
            get(r#"user.emails[?type=="work"]?[0].value"#),
            Some(Value::from("ada@company.com"))
        );
        assert_eq!(get("user.emails[?type==home]?[0].value"), None);
        assert_eq!(get("items[?qty==0].sku"), Some(Value::from(json!(["B"]))));
    }

    #[test]
    fn safe_and_plain_index_agree() {
        for (safe, plain) in [("items?[1].sku", "items[1].sku"), ("items?[7]", "items[7]"), ("user?[0]", "user[0]")] {
            assert_eq!(get(safe), get(plain), "{safe}");
        }
        assert_eq!(PathExpr::parse("a?[0]").unwrap().segments, PathExpr::parse("a[0]").unwrap().segments);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for bad in ["", "a..b", "a[", "a[x]", "a[*][0]", "a[?b>1]", "a]"] {
            assert!(PathExpr::parse(bad).is_err(), "{bad} should not parse");
        }
    }
}
