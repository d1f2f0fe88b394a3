// Merge Tests
//
// This file contains tests for the two JSON merge flavours: the lenient
// render-time diff merge and the strict code mapping merge.

use fhir_converter_core::code_mapping::CodeMapping;
use fhir_converter_core::merge::merge_diff;
use fhir_converter_core::{ErrorFamily, FhirConverterErrorCode};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{json, Value};

fn merged(base: Value, diffs: &[Value]) -> Value {
    let mut accumulator = base;
    for diff in diffs {
        merge_diff(&mut accumulator, diff, 64).unwrap();
    }
    accumulator
}

#[test]
fn test_disjoint_keys_merge_in_any_order() {
    let a = json!({"a": 1});
    let b = json!({"b": 2});

    let forward = merged(json!({}), &[a.clone(), b.clone()]);
    let backward = merged(json!({}), &[b, a]);
    assert_eq!(forward, json!({"a": 1, "b": 2}));
    assert_eq!(forward, backward);
}

#[test]
fn test_last_write_wins() {
    let result = merged(json!({"a": 1, "b": 1}), &[json!({"a": 2, "c": 3}), json!({"a": 5})]);
    assert_eq!(result, json!({"a": 5, "b": 1, "c": 3}));
}

#[test]
fn test_nested_objects_merge_and_arrays_replace() {
    let result = merged(
        json!({"meta": {"tag": ["x"], "source": "lab"}}),
        &[json!({"meta": {"tag": ["y"], "version": "2"}})],
    );
    assert_eq!(
        result,
        json!({"meta": {"tag": ["y"], "source": "lab", "version": "2"}})
    );
}

#[test]
fn test_null_removes_a_key() {
    let result = merged(json!({"a": 1, "b": 2}), &[json!({"a": null})]);
    assert_eq!(result, json!({"b": 2}));
}

#[rstest]
#[case(json!([1, 2]))]
#[case(json!("text"))]
#[case(json!(42))]
fn test_non_object_diffs_fail(#[case] diff: Value) {
    let mut accumulator = json!({});
    let err = merge_diff(&mut accumulator, &diff, 64).unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::JsonMergingError);
    assert_eq!(err.family(), ErrorFamily::PostProcess);
}

#[test]
fn test_merge_depth_is_bounded() {
    let mut deep = json!({"leaf": 1});
    for _ in 0..10 {
        deep = json!({ "n": deep });
    }
    let mut accumulator = deep.clone();

    let err = merge_diff(&mut accumulator, &deep, 5).unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::StackLevelExceeded);
    assert!(merge_diff(&mut accumulator, &deep, 64).is_ok());
}

#[test]
fn test_code_mapping_append_is_a_union() {
    let mut base = CodeMapping::from_json(
        r#"{"mapping": {"CodeSystem/Gender": {"M": {"code": "male"}}}}"#,
    )
    .unwrap();
    let other = CodeMapping::from_json(
        r#"{"mapping": {
            "CodeSystem/Gender": {"M": {"code": "male", "display": "Male"}},
            "CodeSystem/MaritalStatus": {"S": {"code": "S"}}
        }}"#,
    )
    .unwrap();

    base.append(&other).unwrap();
    assert_eq!(base.lookup("CodeSystem/Gender", "M", "display"), Some("Male"));
    assert_eq!(base.lookup("CodeSystem/MaritalStatus", "S", "code"), Some("S"));
}

#[test]
fn test_code_mapping_conflict_is_an_error() {
    let mut base = CodeMapping::from_json(
        r#"{"mapping": {"CodeSystem/Gender": {"M": {"code": "male"}}}}"#,
    )
    .unwrap();
    let other = CodeMapping::from_json(
        r#"{"mapping": {"CodeSystem/Gender": {"M": {"code": "man"}}}}"#,
    )
    .unwrap();

    let err = base.append(&other).unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidCodeMapping);
    assert_eq!(err.family(), ErrorFamily::TemplateLoad);
}
