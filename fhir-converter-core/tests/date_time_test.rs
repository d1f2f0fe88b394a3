// Date/Time Tests
//
// This file contains tests for partial date/time handling, both through the
// `PartialDateTime` API and through the date filters used in templates.

use fhir_converter_core::date_time::{DateTimePrecision, PartialDateTime, TimeZoneHandling};
use fhir_converter_core::{render_template, FhirConverterErrorCode};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

fn render(source: &str) -> String {
    render_template(source, json!({})).unwrap()
}

#[rstest]
#[case("2001", "2001")]
#[case("200101", "2001-01")]
#[case("19241010", "1924-10-10")]
#[case("19850101000000", "1985-01-01")]
#[case("20050110045504-0500", "2005-01-10")]
fn test_add_hyphens_date_keeps_precision(#[case] input: &str, #[case] expected: &str) {
    let out = render(&format!("{{{{ '{}' | add_hyphens_date }}}}", input));
    assert_eq!(out, expected);
}

#[rstest]
#[case("2005", "2005")]
#[case("2005011004", "2005-01-10T04")]
#[case("200501100455", "2005-01-10T04:55")]
#[case("20050110045504", "2005-01-10T04:55:04")]
#[case("20050110045504.12", "2005-01-10T04:55:04.12")]
#[case("20050110045504+0130", "2005-01-10T04:55:04+01:30")]
fn test_format_as_date_time_preserves_source(#[case] input: &str, #[case] expected: &str) {
    let out = render(&format!("{{{{ '{}' | format_as_date_time }}}}", input));
    assert_eq!(out, expected);
}

#[test]
fn test_utc_conversion_is_idempotent() {
    let once = render("{{ '20110103143428-0800' | format_as_date_time: 'utc' }}");
    assert_eq!(once, "2011-01-03T22:34:28Z");

    let twice = render(&format!("{{{{ '{}' | format_as_date_time: 'utc' }}}}", once));
    assert_eq!(twice, once);
}

#[test]
fn test_date_precision_never_carries_a_zone() {
    let out = render("{{ '20110103' | format_as_date_time: 'utc' }}");
    assert_eq!(out, "2011-01-03");
}

#[rstest]
#[case("2011-01-03T22:34:28Z", "utc", "20110103223428+0000")]
#[case("2011-01-03T14:34:28-08:00", "preserve", "20110103143428-0800")]
#[case("2011-01", "preserve", "201101")]
fn test_format_as_hl7v2_date_time(#[case] input: &str, #[case] handling: &str, #[case] expected: &str) {
    let out = render(&format!(
        "{{{{ '{}' | format_as_hl7v2_date_time: '{}' }}}}",
        input, handling
    ));
    assert_eq!(out, expected);
}

#[test]
fn test_add_seconds_promotes_precision() {
    let day = PartialDateTime::parse_fhir("2020-03-01").unwrap();
    let shifted = day.add_seconds(90.0).unwrap();
    assert_eq!(shifted.precision, DateTimePrecision::Second);
    assert_eq!(shifted.to_fhir_string(TimeZoneHandling::Preserve), "2020-03-01T00:01:30");

    let fractional = shifted.add_seconds(0.25).unwrap();
    assert_eq!(fractional.precision, DateTimePrecision::Milliseconds);
    assert_eq!(
        fractional.to_fhir_string(TimeZoneHandling::Preserve),
        "2020-03-01T00:01:30.250"
    );

    let out = render("{{ '2020-03-01T23:59:59+02:00' | add_seconds: 2 }}");
    assert_eq!(out, "2020-03-02T00:00:01+02:00");
}

#[rstest]
#[case(-1e300)]
#[case(1e300)]
#[case(9.3e15)]
#[case(f64::NAN)]
#[case(f64::INFINITY)]
fn test_add_seconds_out_of_range(#[case] seconds: f64) {
    let day = PartialDateTime::parse_fhir("2001-01-01").unwrap();
    let err = day.add_seconds(seconds).unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidFilterArgument);
}

#[test]
fn test_add_seconds_filter_rejects_huge_offsets() {
    let err = render_template("{{ '2001-01-01' | add_seconds: msg.s }}", json!({"s": "-1e300"}))
        .unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidFilterArgument);
}

#[test]
fn test_both_notations_parse_to_the_same_instant() {
    let hl7 = PartialDateTime::parse_hl7v2("20110103143428-0800").unwrap();
    let fhir = PartialDateTime::parse_fhir("2011-01-03T14:34:28-08:00").unwrap();
    assert_eq!(hl7.date_time, fhir.date_time);
    assert_eq!(hl7.precision, fhir.precision);
    assert!(hl7.has_time_zone);
}

#[rstest]
#[case("2011010")]
#[case("20111301")]
#[case("20110230")]
#[case("not a date")]
fn test_invalid_values_fail_to_render(#[case] input: &str) {
    let err = render_template(
        &format!("{{{{ '{}' | format_as_date_time }}}}", input),
        json!({}),
    )
    .unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidDateTimeFormat);
}

#[test]
fn test_unknown_time_zone_handling() {
    let err = render_template("{{ '20110103143428' | format_as_date_time: 'mars' }}", json!({}))
        .unwrap_err();
    assert_eq!(err.code(), FhirConverterErrorCode::InvalidTimeZoneHandling);
}

#[test]
fn test_blank_input_renders_nothing() {
    let out = render_template(
        "[{{ msg.missing | format_as_date_time }}][{{ '' | add_hyphens_date }}]",
        json!({}),
    )
    .unwrap();
    assert_eq!(out, "[][]");
}
