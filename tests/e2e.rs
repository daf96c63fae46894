use json_tabular_mapping as jtm;
use jtm::{ConvertError, Engine, EvalError, Value};
use pretty_assertions::assert_eq;
use serde_json::{json, Value as Json};

fn rows(mapping: Json, record: Json) -> Vec<Json> {
    jtm::convert_one(&mapping, &record)
        .unwrap()
        .into_iter()
        .map(|row| serde_json::to_value(row).unwrap())
        .collect()
}

#[test]
fn test_root_only_mapping_yields_one_row() {
    let out = rows(json!({"columns": {"a": {"path": "a"}}}), json!({"b": 1}));
    assert_eq!(out, vec![json!({"a": null})]);
}

#[test]
fn test_coalesce_picks_first_present() {
    let mapping = json!({"columns": {"v": {"coalesce": [{"const": null}, {"const": null}, {"const": 5}]}}});
    assert_eq!(rows(mapping, json!({})), vec![json!({"v": 5})]);
}

#[test]
fn test_division_by_zero_raises_or_recovers() {
    let raising = json!({"columns": {"q": {"math": ["div", {"const": 10}, {"const": 0}]}}});
    let err = jtm::convert_one(&raising, &json!({})).unwrap_err();
    assert!(matches!(
        err,
        jtm::Error::Convert(ConvertError::Column { source: EvalError::DivisionByZero, .. })
    ));

    let recovering = json!({"columns": {"q": {
        "math": ["div", {"const": 10}, {"const": 0}],
        "on_error": "default",
        "default": 0
    }}});
    assert_eq!(rows(recovering, json!({})), vec![json!({"q": 0})]);
}

#[test]
fn test_reduce_mean_and_empty_sum() {
    let mapping = json!({"columns": {
        "mean": {"reduce": {"over": {"const": [1, 2, 3, 4]}, "op": "mean"}},
        "empty": {"reduce": {"over": {"const": []}, "op": "sum"}}
    }});
    assert_eq!(rows(mapping, json!({})), vec![json!({"mean": 2.5, "empty": null})]);
}

#[test]
fn test_cast_int() {
    let mapping = json!({"columns": {"n": {"path": "n", "cast": "int"}}});
    assert_eq!(rows(mapping.clone(), json!({"n": "42"})), vec![json!({"n": 42})]);
    let err = jtm::convert_one(&mapping, &json!({"n": "abc"})).unwrap_err();
    assert!(err.to_string().contains("cannot cast"));

    let tolerant = json!({"columns": {"n": {"path": "n", "cast": "int", "on_error": "null"}}});
    assert_eq!(rows(tolerant, json!({"n": "abc"})), vec![json!({"n": null})]);
}

#[test]
fn test_default_then_cast_scenario() {
    let mapping = json!({"columns": {"x": {"path": "a.b", "default": 0, "cast": "int"}}});
    assert_eq!(rows(mapping.clone(), json!({"a": {"b": "7"}})), vec![json!({"x": 7})]);
    assert_eq!(rows(mapping, json!({"a": {}})), vec![json!({"x": 0})]);
}

#[test]
fn test_outer_join_with_empty_side() {
    let mapping = json!({
        "explode_join": {"left": "items", "right": "tags", "how": "outer"},
        "columns": {"left": {"rel_path": "left"}, "right": {"rel_path": "right"}}
    });
    assert_eq!(
        rows(mapping, json!({"items": ["i1"], "tags": []})),
        vec![json!({"left": "i1", "right": null})]
    );
}

#[test]
fn test_explode_with_root_fields_and_definitions() {
    let mapping = json!({
        "explode": {"path": "order.lines"},
        "definitions": {
            "net": {"math": ["mul", {"rel_path": "qty"}, {"rel_path": "unit_price"}]}
        },
        "columns": {
            "order_id": {"path": "order.id"},
            "customer": {"udf": {"name": "upper", "args": [{"path": "order.customer.name"}]}},
            "sku": {"rel_path": "sku"},
            "net": {"ref": "net"},
            "gross": {"math": ["mul", {"ref": "net"}, 2]},
            "work_email": {"path": "order.customer.emails[?type==\"work\"]?[0].value", "default": "n/a"}
        }
    });
    let record = json!({"order": {
        "id": "o-1",
        "customer": {"name": "ada", "emails": [{"type": "home", "value": "a@home"}]},
        "lines": [
            {"sku": "A", "qty": 2, "unit_price": 5},
            {"sku": "B", "qty": 1, "unit_price": 2.5}
        ]
    }});
    assert_eq!(
        rows(mapping, record),
        vec![
            json!({"order_id": "o-1", "customer": "ADA", "sku": "A", "net": 10, "gross": 20, "work_email": "n/a"}),
            json!({"order_id": "o-1", "customer": "ADA", "sku": "B", "net": 2.5, "gross": 5.0, "work_email": "n/a"}),
        ]
    );
}

#[test]
fn test_explode_empty_without_root_row() {
    let mapping = json!({
        "explode": {"path": "xs", "emit_root_when_empty": false},
        "columns": {"x": {"rel_path": "v"}}
    });
    assert!(rows(mapping.clone(), json!({"xs": []})).is_empty());
    assert!(rows(mapping, json!({})).is_empty());
}

#[test]
fn test_rel_path_outside_explode_reads_record() {
    let mapping = json!({"columns": {"v": {"rel_path": "a.b"}}});
    assert_eq!(rows(mapping, json!({"a": {"b": true}})), vec![json!({"v": true})]);
}

#[test]
fn test_list_transforms_and_dates() {
    let mapping = json!({"columns": {
        "tags": {"unique": {"over": {"path": "events[*].tag"}, "emit": "join", "sep": ";"}},
        "late": {"filter": {
            "over": {"path": "events"},
            "where": {"op": "regex", "a": {"rel_path": "tag"}, "b": "^l"},
            "emit": "count"
        }},
        "first_day": {"date_format": {
            "parse": {"sort": {"over": {"path": "events[*].at"}, "limit": 1, "emit": "join"}},
            "fmt": "%Y-%m-%d"
        }},
        "tokyo": {"to_timezone": {"dt": {"path": "events[0].at"}, "to": "Asia/Tokyo"}},
        "epoch": {"from_timestamp": {"sec": {"path": "ts"}}},
        "raw": {"serialize": {"of": {"path": "events[0]"}}}
    }});
    let record = json!({
        "ts": 0,
        "events": [
            {"tag": "late", "at": "2024-05-02T23:30:00Z"},
            {"tag": "early", "at": "2024-05-01T08:00:00Z"},
            {"tag": "late", "at": "2024-05-03T10:00:00Z"}
        ]
    });
    assert_eq!(
        rows(mapping, record),
        vec![json!({
            "tags": "late;early",
            "late": 2,
            "first_day": "2024-05-01",
            "tokyo": "2024-05-03T08:30:00+09:00",
            "epoch": "1970-01-01T00:00:00Z",
            "raw": "{\"tag\":\"late\",\"at\":\"2024-05-02T23:30:00Z\"}"
        })]
    );
}

#[test]
fn test_convert_many_follows_record_then_explode_order() {
    let converter = Engine::new()
        .compile(&json!({"explode": {"path": "xs"}, "columns": {"id": {"path": "id"}, "x": {"rel_path": "x"}}}))
        .unwrap();
    let records = vec![json!({"id": 1, "xs": [{"x": "a"}, {"x": "b"}]}), json!({"id": 2, "xs": [{"x": "c"}]})];
    let out: Vec<(Value, Value)> = converter
        .convert_many(records)
        .map(|row| {
            let row = row.unwrap();
            (row["id"].clone(), row["x"].clone())
        })
        .collect();
    assert_eq!(
        out,
        vec![
            (Value::Int(1), Value::from("a")),
            (Value::Int(1), Value::from("b")),
            (Value::Int(2), Value::from("c")),
        ]
    );
}
