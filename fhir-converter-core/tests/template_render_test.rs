// Template Render Tests
//
// This file contains tests for template composition (include, evaluate,
// validate, mergeDiff), render limits and the render visitor hooks.

use fhir_converter_core::template::{Node, RenderContext};
use fhir_converter_core::{
    render_template, ErrorFamily, FhirConverterError, FhirConverterErrorCode, ProcessorSettings, RenderVisitor,
    Result, TemplateCollection, TemplateProvider, Value,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::cell::Cell;
use std::collections::HashMap;

const PATIENT_SCHEMA: &str = r#"{
    "type": "object",
    "required": ["resourceType"],
    "properties": {"resourceType": {"const": "Patient"}}
}"#;

fn collection(entries: &[(&str, &str)]) -> TemplateCollection {
    TemplateCollection::from_memory(vec![entries
        .iter()
        .map(|(name, source)| (name.to_string(), Some(source.to_string())))
        .collect()])
    .unwrap()
}

fn render_with(
    collection: &TemplateCollection,
    root: &str,
    settings: &ProcessorSettings,
    globals: HashMap<String, Value>,
) -> Result<String> {
    let template = collection.get_template(root).unwrap();
    RenderContext::new(settings)
        .with_provider(collection)
        .with_root_template(root)
        .render(&template, globals)
}

fn render(collection: &TemplateCollection, root: &str) -> Result<String> {
    render_with(collection, root, &ProcessorSettings::default(), HashMap::new())
}

#[test]
fn test_evaluate_binds_output_and_isolates_assignments() {
    let templates = collection(&[
        (
            "Root",
            "{% assign x = 'root' %}{% evaluate out using 'Child' arg: 'A' %}{{ x }}|{{ out }}|{{ arg }}",
        ),
        ("Child", "{% assign x = 'child' %}{{ arg }}{{ x }}"),
    ]);
    assert_eq!(render(&templates, "Root").unwrap(), "root|Achild|");
}

#[test]
fn test_include_writes_inline_and_sees_caller_variables() {
    let templates = collection(&[
        ("Root", "{% assign who = 'caller' %}<{% include 'Greeting' name: 'Ann' %}>"),
        ("Greeting", "{{ name }} from {{ who }}"),
    ]);
    assert_eq!(render(&templates, "Root").unwrap(), "<Ann from caller>");
}

#[test]
fn test_template_names_can_be_computed() {
    let templates = collection(&[
        (
            "Root",
            "{% assign name = 'Resource/' | append: 'Patient' %}{% include name %}",
        ),
        ("Resource/Patient", "patient"),
    ]);
    assert_eq!(render(&templates, "Root").unwrap(), "patient");
}

#[test]
fn test_missing_reference() {
    let templates = collection(&[("Root", "{% include 'Nowhere' %}")]);
    let err = render(&templates, "Root").unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::ReferencedTemplateNotFound);
    assert_eq!(err.family(), ErrorFamily::Render);
}

#[test]
fn test_self_include_exceeds_the_stack() {
    let templates = collection(&[("Self", "x{% include 'Self' %}")]);
    let err = render(&templates, "Self").unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::StackLevelExceeded);
}

#[test]
fn test_mutual_evaluation_exceeds_the_stack() {
    let templates = collection(&[
        ("A", "{% evaluate b using 'B' %}"),
        ("B", "{% evaluate a using 'A' %}"),
    ]);
    let settings = ProcessorSettings {
        max_recursion_depth: 8,
        ..ProcessorSettings::default()
    };
    let err = render_with(&templates, "A", &settings, HashMap::new()).unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::StackLevelExceeded);
}

#[test]
fn test_bounded_recursion_renders() {
    let templates = collection(&[(
        "Countdown",
        "{{ n }}{% if n > 0 %}{% assign next = n | minus: 1 %}{% include 'Countdown' n: next %}{% endif %}",
    )]);
    let globals = HashMap::from([("n".to_string(), Value::Integer(5))]);
    let out = render_with(&templates, "Countdown", &ProcessorSettings::default(), globals).unwrap();
    assert_eq!(out, "543210");
}

#[test]
fn test_validate_keeps_matching_content_only() {
    let templates = collection(&[
        (
            "Root",
            "{% validate 'Schema/Patient.schema.json' %}{\"resourceType\":\"Patient\"}{% endvalidate %}|\
             {% validate 'Schema/Patient.schema.json' %}{\"resourceType\":\"Observation\"}{% endvalidate %}|\
             {% validate 'Schema/Patient.schema.json' %}not json{% endvalidate %}",
        ),
        ("Schema/Patient.schema.json", PATIENT_SCHEMA),
    ]);

    let template = templates.get_template("Root").unwrap();
    let settings = ProcessorSettings::default();
    let mut context = RenderContext::new(&settings).with_provider(&templates);
    let out = context.render(&template, HashMap::new()).unwrap();

    assert_eq!(out, "{\"resourceType\":\"Patient\"}||");
    assert_eq!(context.validated_schemas(), ["Schema/Patient.schema.json"]);
}

#[test]
fn test_validate_with_missing_schema() {
    let templates = collection(&[("Root", "{% validate 'Schema/None.json' %}{}{% endvalidate %}")]);
    let err = render(&templates, "Root").unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::TemplateNotFound);
}

#[test]
fn test_validate_with_broken_schema() {
    let templates = collection(&[
        ("Root", "{% validate 'Schema/Broken.json' %}{}{% endvalidate %}"),
        ("Schema/Broken.json", r#"{"type": 12}"#),
    ]);
    let err = render(&templates, "Root").unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidJsonSchema);
}

#[test]
fn test_merge_diff_accumulates() {
    let templates = collection(&[(
        "Root",
        "{% assign acc = '{\"a\":1,\"b\":1}' %}\
         {% capture acc %}{% mergeDiff acc %}{\"a\":2,\"c\":3}{% endmergeDiff %}{% endcapture %}\
         {% mergeDiff acc %}{\"d\":null,\"b\":null}{% endmergeDiff %}",
    )]);
    let out = render(&templates, "Root").unwrap();
    let merged: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(merged, serde_json::json!({"a": 2, "c": 3}));
}

#[test]
fn test_merge_diff_rejects_non_objects() {
    let templates = collection(&[("Root", "{% mergeDiff acc %}[1, 2]{% endmergeDiff %}")]);
    let err = render(&templates, "Root").unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::JsonMergingError);

    let templates = collection(&[("Root", "{% mergeDiff acc %}{oops{% endmergeDiff %}")]);
    let err = render(&templates, "Root").unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::JsonParsingError);
}

#[test]
fn test_merge_depth_setting_bounds_merge_diff() {
    let templates = collection(&[(
        "Root",
        "{% assign acc = '{\"n\":{\"n\":{\"n\":1}}}' %}\
         {% mergeDiff acc %}{\"n\":{\"n\":{\"n\":2}}}{% endmergeDiff %}",
    )]);
    let shallow = ProcessorSettings {
        max_merge_depth: 1,
        ..ProcessorSettings::default()
    };
    let err = render_with(&templates, "Root", &shallow, HashMap::new()).unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::StackLevelExceeded);

    let out = render_with(&templates, "Root", &ProcessorSettings::default(), HashMap::new()).unwrap();
    let merged: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(merged, serde_json::json!({"n": {"n": {"n": 2}}}));
}

#[test]
fn test_timeout() {
    let templates = collection(&[(
        "Slow",
        "{% for i in (1..100000) %}{% for j in (1..100000) %}{{ j }}{% endfor %}{% endfor %}",
    )]);
    let settings = ProcessorSettings {
        timeout_ms: 10,
        ..ProcessorSettings::default()
    };
    let err = render_with(&templates, "Slow", &settings, HashMap::new()).unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::TimeoutError);
}

#[rstest]
#[case(false, Ok("[]"))]
#[case(true, Err(FhirConverterErrorCode::PropertyNotFound))]
fn test_strict_variables(
    #[case] strict: bool,
    #[case] expected: std::result::Result<&str, FhirConverterErrorCode>,
) {
    let templates = collection(&[("Root", "[{{ undefined_thing }}]")]);
    let settings = ProcessorSettings {
        strict_variables: strict,
        ..ProcessorSettings::default()
    };
    let result = render_with(&templates, "Root", &settings, HashMap::new());
    assert_eq!(result.as_deref().map_err(FhirConverterError::code), expected);
}

#[rstest]
#[case("{{ 'x' | no_such_filter }}", FhirConverterErrorCode::TemplateRenderingError)]
#[case("{{ 4 | divided_by: 0 }}", FhirConverterErrorCode::InvalidFilterArgument)]
#[case("{{ 'abc' | generate_id_input: '' }}", FhirConverterErrorCode::InvalidIdGenerationInput)]
#[case("{{ 'abc' | generate_id_input: 'Patient', true }}", FhirConverterErrorCode::InvalidIdGenerationInput)]
fn test_filter_failures_keep_their_codes(#[case] source: &str, #[case] expected: FhirConverterErrorCode) {
    let templates = collection(&[("Root", source)]);
    let err = render(&templates, "Root").unwrap_err();
    assert_eq!(err.code(), expected);
}

#[rstest]
#[case("{{ msg.a | divided_by: -1 }}")]
#[case("{{ msg.a | modulo: -1 }}")]
#[case("{{ msg.a | minus: 1 }}")]
fn test_integer_overflow_fails_cleanly(#[case] source: &str) {
    let err = render_template(source, serde_json::json!({ "a": i64::MIN })).unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidFilterArgument);
}

#[test]
fn test_control_flow() {
    let templates = collection(&[(
        "Root",
        "{% for i in (1..6) %}{% if i == 2 %}{% continue %}{% endif %}{% if i > 4 %}{% break %}{% endif %}{{ i }}{% endfor %}\
         |{% case 'b' %}{% when 'a' %}A{% when 'b', 'c' %}BC{% else %}?{% endcase %}\
         |{% unless false %}yes{% endunless %}\
         |{% for x in empty_list %}never{% else %}none{% endfor %}",
    )]);
    assert_eq!(render(&templates, "Root").unwrap(), "134|BC|yes|none");
}

#[derive(Default)]
struct CountingVisitor {
    before: Cell<usize>,
    after: Cell<usize>,
    failures: Cell<usize>,
}

impl RenderVisitor for CountingVisitor {
    fn before_node(&self, _node: &Node, _depth: usize) {
        self.before.set(self.before.get() + 1);
    }

    fn after_node(&self, _node: &Node, _depth: usize, result: std::result::Result<(), &FhirConverterError>) {
        self.after.set(self.after.get() + 1);
        if result.is_err() {
            self.failures.set(self.failures.get() + 1);
        }
    }
}

#[test]
fn test_visitor_sees_every_node() {
    let templates = collection(&[
        ("Root", "a{{ 1 }}{% include 'Child' %}"),
        ("Child", "b{{ 2 }}"),
    ]);
    let template = templates.get_template("Root").unwrap();
    let settings = ProcessorSettings::default();
    let visitor = CountingVisitor::default();

    let out = RenderContext::new(&settings)
        .with_provider(&templates)
        .with_visitor(&visitor)
        .render(&template, HashMap::new())
        .unwrap();

    assert_eq!(out, "a1b2");
    assert_eq!(visitor.before.get(), 5);
    assert_eq!(visitor.after.get(), 5);
    assert_eq!(visitor.failures.get(), 0);
}

#[test]
fn test_visitor_sees_failures() {
    let templates = collection(&[("Root", "{% include 'Missing' %}")]);
    let template = templates.get_template("Root").unwrap();
    let settings = ProcessorSettings::default();
    let visitor = CountingVisitor::default();

    let result = RenderContext::new(&settings)
        .with_provider(&templates)
        .with_visitor(&visitor)
        .render(&template, HashMap::new());

    assert!(result.is_err());
    assert_eq!(visitor.failures.get(), 1);
}
