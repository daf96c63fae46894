use json_tabular_mapping as jtm;
use jtm::{ConvertError, Engine, EvalError, MappingError};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_validation_reports_every_error_with_its_position() {
    let report = jtm::validate(&json!({
        "columns": {
            "a": {"path": "x["},
            "b": {"math": ["pow", 1, 2]},
            "c": {"bogus": 1},
            "d": {"path": "y", "cast": "decimal"},
            "e": {"ref": "missing"}
        }
    }));
    assert!(!report.ok);
    assert_eq!(report.errors.len(), 5);
    assert!(report.errors[0].starts_with("$.columns.a.path:"));
    assert!(report.errors[1].starts_with("$.columns.b.math[0]:"));
    assert!(report.errors[2].starts_with("$.columns.c.bogus:"));
    assert!(report.errors[3].starts_with("$.columns.d.cast:"));
    assert!(report.errors[4].contains("missing"));
}

#[test]
fn test_explode_and_explode_join_are_exclusive() {
    let report = jtm::validate(&json!({
        "explode": {"path": "a"},
        "explode_join": {"left": "a", "right": "b"},
        "columns": {"x": {"const": 1}}
    }));
    assert!(!report.ok);
    assert!(report.errors.iter().any(|e| e.contains("explode")));
}

#[test]
fn test_columns_are_required() {
    assert!(!jtm::validate(&json!({"definitions": {}})).ok);
    assert!(!jtm::validate(&json!({"columns": {}})).ok);
    assert!(!jtm::validate(&json!([1, 2])).ok);
}

#[test]
fn test_cyclic_definitions_are_reported() {
    let report = jtm::validate(&json!({
        "definitions": {"a": {"ref": "b"}, "b": {"ref": "a"}},
        "columns": {"x": {"ref": "a"}}
    }));
    assert_eq!(report.errors, vec!["$.definitions.a: cyclic definition a -> b -> a".to_string()]);
}

#[test]
fn test_cycle_aborts_conversion() {
    let converter = Engine::new()
        .compile(&json!({
            "definitions": {"a": {"ref": "b"}, "b": {"ref": "a"}},
            "columns": {"x": {"ref": "a", "on_error": "null"}}
        }))
        .unwrap();
    let err = converter.convert_one(&json!({})).unwrap_err();
    assert!(matches!(err, ConvertError::Cyclic(EvalError::CyclicDefinition(_))));

    let mut stream = converter.convert_many(vec![json!({}), json!({})]);
    assert!(matches!(stream.next(), Some(Err(ConvertError::Cyclic(_)))));
    assert!(stream.next().is_none());
}

#[test]
fn test_compile_rejects_structural_errors() {
    let err = Engine::new().compile(&json!({"columns": {"x": {"path": 3}}})).unwrap_err();
    match err {
        MappingError::Structural(errors) => assert_eq!(errors, vec!["$.columns.x.path: must be a string".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(Engine::new().compile_str("{not json"), Err(MappingError::Json(_))));
}

#[test]
fn test_unknown_udf_is_a_runtime_error() {
    let mapping = json!({"columns": {"x": {"udf": {"name": "nope", "args": [1]}}}});
    let err = jtm::convert_one(&mapping, &json!({})).unwrap_err();
    assert!(matches!(
        err,
        jtm::Error::Convert(ConvertError::Column { source: EvalError::UnknownUdf(_), .. })
    ));
}

#[test]
fn test_warnings_do_not_block_compilation() {
    let mapping = json!({"columns": {"x": {"default": 3}}, "comment": "ignored"});
    let report = jtm::validate(&mapping);
    assert!(report.ok);
    assert_eq!(report.warnings.len(), 2);
    let rows = jtm::convert_one(&mapping, &json!({})).unwrap();
    assert_eq!(rows[0]["x"], jtm::Value::Int(3));
}

#[test]
fn test_failed_record_does_not_stop_the_stream() {
    let converter = Engine::new()
        .compile(&json!({"columns": {"n": {"path": "n", "cast": "int"}}}))
        .unwrap();
    let results: Vec<_> = converter
        .convert_many(vec![json!({"n": "1"}), json!({"n": "x"}), json!({"n": 3})])
        .collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(&results[1], Err(ConvertError::Column { record: 1, column, .. }) if column == "n"));
    assert_eq!(results[2].as_ref().unwrap()["n"], jtm::Value::Int(3));
}
