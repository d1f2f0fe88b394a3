// Template Provider Tests
//
// This file contains tests for layered template collections: in-memory and
// directory layers, tombstones, code mapping merges and name resolution.

use fhir_converter_core::provider::{candidate_names, parent_path, TemplateEntry};
use fhir_converter_core::{
    ErrorFamily, FhirConverterErrorCode, TemplateCollection, TemplateProvider,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn layer(entries: &[(&str, Option<&str>)]) -> HashMap<String, Option<String>> {
    entries
        .iter()
        .map(|(name, source)| (name.to_string(), source.map(str::to_string)))
        .collect()
}

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_tombstone_hides_lower_layers() {
    let collection = TemplateCollection::from_memory(vec![
        layer(&[("folder/template1", None)]),
        layer(&[("folder/template1", Some("hidden")), ("folder/template2", Some("visible"))]),
    ])
    .unwrap();

    assert!(collection.get_template("folder/template1").is_none());
    assert!(collection.get_template("folder/template2").is_some());
}

#[test]
fn test_higher_layers_win() {
    let collection = TemplateCollection::from_memory(vec![
        layer(&[("Patient", Some("top"))]),
        layer(&[("Patient", Some("bottom"))]),
    ])
    .unwrap();

    let template = collection.get_template("Patient").unwrap();
    let out = fhir_converter_core::template::RenderContext::new(&Default::default())
        .render(&template, HashMap::new())
        .unwrap();
    assert_eq!(out, "top");
}

#[test]
fn test_extension_and_separators_are_normalized() {
    let collection = TemplateCollection::from_memory(vec![layer(&[(
        "Resource\\Patient.liquid",
        Some("{{ x }}"),
    )])])
    .unwrap();

    assert!(collection.get_template("Resource/Patient").is_some());
    assert!(collection.get_template("Resource/Patient.liquid").is_some());
    assert!(collection.get_template("./Resource/Patient").is_some());
}

#[test]
fn test_syntax_errors_fail_at_load() {
    let err = TemplateCollection::from_memory(vec![layer(&[(
        "Broken",
        Some("{% if x %}never closed"),
    )])])
    .unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::TemplateSyntaxError);
    assert_eq!(err.family(), ErrorFamily::TemplateLoad);
}

#[test]
fn test_code_mappings_merge_across_layers() {
    let collection = TemplateCollection::from_memory(vec![
        layer(&[(
            "CodeSystem/CodeSystem",
            Some(r#"{"mapping": {"CodeSystem/Gender": {"M": {"code": "male"}}}}"#),
        )]),
        layer(&[(
            "CodeSystem/CodeSystem",
            Some(r#"{"mapping": {"CodeSystem/Gender": {"M": {"code": "male"}, "F": {"code": "female"}}}}"#),
        )]),
    ])
    .unwrap();

    let mapping = collection
        .get_code_mapping("CodeSystem/CodeSystem")
        .unwrap()
        .unwrap();
    assert_eq!(mapping.lookup("CodeSystem/Gender", "M", "code"), Some("male"));
    assert_eq!(mapping.lookup("CodeSystem/Gender", "F", "code"), Some("female"));
}

#[test]
fn test_conflicting_code_mappings_fail() {
    let collection = TemplateCollection::from_memory(vec![
        layer(&[(
            "CodeSystem/CodeSystem",
            Some(r#"{"mapping": {"CodeSystem/Gender": {"M": {"code": "male"}}}}"#),
        )]),
        layer(&[(
            "CodeSystem/CodeSystem",
            Some(r#"{"mapping": {"CodeSystem/Gender": {"M": {"code": "man"}}}}"#),
        )]),
    ])
    .unwrap();

    let err = collection.get_code_mapping("CodeSystem/CodeSystem").unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidCodeMapping);
}

#[test]
fn test_invalid_code_mapping_document() {
    let err = TemplateCollection::from_memory(vec![layer(&[(
        "ValueSet/ValueSet",
        Some(r#"{"mapping": ["not", "a", "table"]}"#),
    )])])
    .unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidCodeMapping);
}

#[test]
fn test_directory_layer_classifies_files() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "ADT_A01.liquid", "{}");
    write(dir.path(), "Resource/Patient.liquid", "{\"resourceType\": \"Patient\"}");
    write(dir.path(), "Schemas/Patient.schema.json", "{\"type\": \"object\"}");
    write(
        dir.path(),
        "CodeSystem/CodeSystem.json",
        r#"{"mapping": {"CodeSystem/Gender": {"F": {"code": "female"}}}}"#,
    );
    write(dir.path(), "metadata.json", "{\"version\": \"1\"}");
    write(dir.path(), "notes.txt", "not a template");

    let collection = TemplateCollection::from_directory(dir.path()).unwrap();
    assert_eq!(collection.layers()[0].len(), 4);

    assert!(collection.get_template("ADT_A01").is_some());
    assert!(collection.get_template("Resource/Patient").is_some());
    assert!(collection.get_schema("Schemas/Patient.schema.json").is_some());
    assert!(collection.get_template("metadata").is_none());
    assert!(matches!(
        collection.lookup("CodeSystem/CodeSystem"),
        Some(TemplateEntry::CodeMapping(_))
    ));
}

#[test]
fn test_fixture_directory_loads() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/templates");
    let collection = TemplateCollection::from_directory(&root).unwrap();

    for name in ["ADT_A01", "ID/Patient", "Resource/Patient"] {
        assert!(collection.get_template(name).is_some(), "missing {}", name);
    }
    assert!(collection.get_schema("Schema/Patient.schema.json").is_some());
    assert!(collection
        .get_code_mapping("CodeSystem/CodeSystem")
        .unwrap()
        .is_some());
}

#[test]
fn test_directory_layers_are_cached() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "Root.liquid", "first");

    let first = TemplateCollection::from_directory(dir.path()).unwrap();
    write(dir.path(), "Later.liquid", "added after the first load");
    let second = TemplateCollection::from_directory(dir.path()).unwrap();

    assert!(std::sync::Arc::ptr_eq(&first.layers()[0], &second.layers()[0]));
    assert!(second.get_template("Later").is_none());
}

#[test]
fn test_overrides_stack_on_a_directory() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "Root.liquid", "from disk");
    write(dir.path(), "Helper.liquid", "helper");

    let collection = TemplateCollection::with_overrides(
        vec![layer(&[("Root", Some("override")), ("Helper", None)])],
        dir.path(),
    )
    .unwrap();

    assert_eq!(collection.layers().len(), 2);
    assert!(collection.get_template("Root").is_some());
    assert!(collection.get_template("Helper").is_none());
}

#[test]
fn test_missing_folder() {
    let err = TemplateCollection::from_directory("/definitely/not/a/template/folder").unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::TemplateFolderNotFound);
    assert_eq!(err.family(), ErrorFamily::TemplateLoad);
}

#[rstest]
#[case("Hl7v2/ADT_A01", "Hl7v2")]
#[case("ADT_A01", "")]
#[case("Hl7v2\\Sub/ORU_R01", "Hl7v2/Sub")]
fn test_parent_path(#[case] name: &str, #[case] expected: &str) {
    assert_eq!(parent_path(name), expected);
}

#[rstest]
#[case("Hl7v2", "Resource/Patient", vec!["Hl7v2/Resource/Patient", "Resource/Patient"])]
#[case("Hl7v2", "Hl7v2/Resource/Patient", vec!["Hl7v2/Resource/Patient"])]
#[case("", "Resource/Patient", vec!["Resource/Patient"])]
fn test_candidate_names(#[case] parent: &str, #[case] name: &str, #[case] expected: Vec<&str>) {
    assert_eq!(candidate_names(parent, name), expected);
}

#[test]
fn test_references_resolve_next_to_the_root_first() {
    let collection = TemplateCollection::from_memory(vec![layer(&[
        ("Sub/Root", Some("{% include 'Helper' %}|{% include 'Shared' %}")),
        ("Sub/Helper", Some("local")),
        ("Helper", Some("global")),
        ("Shared", Some("shared")),
    ])])
    .unwrap();

    let template = collection.get_template("Sub/Root").unwrap();
    let settings = Default::default();
    let out = fhir_converter_core::template::RenderContext::new(&settings)
        .with_provider(&collection)
        .with_root_template("Sub/Root")
        .render(&template, HashMap::new())
        .unwrap();
    assert_eq!(out, "local|shared");
}
