// C-CDA Tests
//
// This file contains tests for the XML data parser, the section lookup filters
// and the C-CDA processor.

use fhir_converter_core::filters::section::sections;
use fhir_converter_core::parsers::{CcdaDataParser, DataParser};
use fhir_converter_core::{
    CcdaProcessor, FhirConverterErrorCode, Processor, ProcessorSettings, TemplateCollection,
    TraceInfo, Value,
};
use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

const CCD_TEMPLATE: &str = r#"{
    "resourceType": "Bundle",
    "type": "batch",
    "entry": [
        {
            "resource": {
                "resourceType": "Composition",
                "id": "{{ msg.ClinicalDocument.id.extension }}",
                "title": "{{ msg.ClinicalDocument.title }}",
                "date": "{{ msg.ClinicalDocument.effectiveTime.value | format_as_date_time: 'utc' }}"
            }
        },
        {% assign patient = msg.ClinicalDocument.recordTarget.patientRole.patient -%}
        {
            "resource": {
                "resourceType": "Patient",
                "id": "{{ msg.ClinicalDocument.recordTarget.patientRole.id.extension }}",
                "name": [{ "family": "{{ patient.name.family }}", "given": ["{{ patient.name.given }}"] }],
                "gender": "{{ patient.administrativeGenderCode.code | get_property: 'ValueSet/Gender' }}",
                "birthDate": "{{ patient.birthTime.value | add_hyphens_date }}",
                "deceasedBoolean": "{{ patient.deceasedInd.value }}"
            }
        }
    ]
}"#;

const VALUE_SET: &str = r#"{"mapping": {"ValueSet/Gender": {
    "F": {"code": "female"},
    "M": {"code": "male"}
}}}"#;

#[fixture]
fn document() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/ccda/ccd_sample.xml");
    fs::read_to_string(path).unwrap()
}

fn render(source: &str, msg: Value) -> String {
    let template = fhir_converter_core::Template::parse("test", source).unwrap();
    let settings = ProcessorSettings::default();
    fhir_converter_core::template::RenderContext::new(&settings)
        .render(&template, HashMap::from([("msg".to_string(), msg)]))
        .unwrap()
}

#[rstest]
fn test_document_folds_into_objects(document: String) {
    let msg = CcdaDataParser::new().parse(&document).unwrap();
    let root = msg.get_property("ClinicalDocument");

    assert_eq!(root.get_property("title").as_str(), Some("Continuity of Care Document"));
    assert_eq!(root.get_property("templateId").get_property("size").as_i64(), Some(2));
    assert_eq!(
        root.get_property("id").get_property("extension").as_str(),
        Some("TT988")
    );
    assert_eq!(sections(&msg).len(), 3);
}

#[rstest]
fn test_first_sections_by_title(document: String) {
    let msg = CcdaDataParser::new().parse(&document).unwrap();
    let out = render(
        "{% assign s = msg | get_first_ccda_sections: 'Allergies|Medications|Vital Signs' %}\
         {{ s.Allergies.text }}/{{ s.Medications.title }}/{{ s.Vital_Signs.title }}",
        msg,
    );
    assert_eq!(out, "No known allergies/Medications/");
}

#[rstest]
fn test_section_lists_by_title(document: String) {
    let msg = CcdaDataParser::new().parse(&document).unwrap();
    let out = render(
        "{% assign s = msg | get_ccda_section_lists: 'medications' %}\
         {% for section in s.medications %}{{ section.title }};{% endfor %}",
        msg,
    );
    assert_eq!(out, "Medications;Medications Administered;");
}

#[rstest]
fn test_sections_by_template_id(document: String) {
    let msg = CcdaDataParser::new().parse(&document).unwrap();
    let out = render(
        "{% assign first = msg | get_first_ccda_sections_by_template_id: '2.16.840.1.113883.10.20.22.2.1.1' %}\
         {% assign all = msg | get_ccda_section_lists_by_template_id: '2.16.840.1.113883.10.20.22.2.1.1' %}\
         {{ first['2_16_840_1_113883_10_20_22_2_1_1'].title }}|{{ all['2_16_840_1_113883_10_20_22_2_1_1'].size }}",
        msg,
    );
    assert_eq!(out, "Medications|2");
}

#[rstest]
fn test_repeated_entries_become_arrays(document: String) {
    let msg = CcdaDataParser::new().parse(&document).unwrap();
    let out = render(
        "{% assign s = msg | get_first_ccda_sections: 'Medications' %}\
         {% for entry in s.Medications.entry %}{{ entry.substanceAdministration.id.root | truncate: 8, '' }} {% endfor %}",
        msg,
    );
    assert_eq!(out, "cdbd33f0 cdbd5b05 ");
}

#[rstest]
fn test_ccda_processor_end_to_end(document: String) {
    let collection = TemplateCollection::from_memory(vec![HashMap::from([
        ("CCD".to_string(), Some(CCD_TEMPLATE.to_string())),
        ("ValueSet/ValueSet".to_string(), Some(VALUE_SET.to_string())),
    ])])
    .unwrap();

    let mut trace = TraceInfo::default();
    let output = CcdaProcessor::new(ProcessorSettings::default())
        .convert(&document, "CCD", Some(&collection), Some(&mut trace))
        .unwrap();
    let bundle: serde_json::Value = serde_json::from_str(&output).unwrap();

    assert_eq!(
        bundle["entry"][0]["resource"],
        json!({
            "resourceType": "Composition",
            "id": "TT988",
            "title": "Continuity of Care Document",
            "date": "2013-06-07T00:00:00Z"
        })
    );
    assert_eq!(
        bundle["entry"][1]["resource"],
        json!({
            "resourceType": "Patient",
            "id": "998991",
            "name": [{"family": "Jones", "given": ["Isabella"]}],
            "gender": "female",
            "birthDate": "1975-05-01"
        })
    );
    assert_eq!(trace.unused_segments, None);
    assert!(trace.validated_schemas.is_empty());
}

#[rstest]
#[case("", FhirConverterErrorCode::NullOrWhiteSpaceInput)]
#[case("<ClinicalDocument><open></ClinicalDocument>", FhirConverterErrorCode::InputParsingError)]
fn test_invalid_documents(#[case] input: &str, #[case] expected: FhirConverterErrorCode) {
    let err = CcdaDataParser::new().parse(input).unwrap_err();
    assert_eq!(err.code(), expected);
}
