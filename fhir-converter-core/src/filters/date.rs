// Date Filters
//
// Conversions between HL7v2 and FHIR timestamp notations with precision kept
// intact. Blank input produces an empty value rather than an error.

use super::{arg, arg_string, invalid_argument, FilterContext, FilterRegistry};
use crate::date_time::{PartialDateTime, TimeZoneHandling};
use crate::errors::Result;
use crate::model::Value;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, Utc};

const DEFAULT_NOW_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn register(registry: &mut FilterRegistry) {
    registry.register("add_hyphens_date", add_hyphens_date);
    registry.register("format_as_date_time", format_as_date_time);
    registry.register("format_as_hl7v2_date_time", format_as_hl7v2_date_time);
    registry.register("add_seconds", add_seconds);
    registry.register("now", now);
    registry.register("date", date);
}

fn time_zone_handling(args: &[Value], index: usize) -> Result<TimeZoneHandling> {
    arg_string(args, index, "preserve").parse()
}

/// `20040629` -> `2004-06-29`; time components are dropped
fn add_hyphens_date(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    if input.is_blank() {
        return Ok(Value::Nil);
    }
    let handling = time_zone_handling(args, 0)?;
    let value = PartialDateTime::parse_hl7v2(&input.to_output_string())?;
    Ok(Value::String(value.convert_to_date().to_fhir_string(handling)))
}

/// HL7v2 (or FHIR) timestamp -> FHIR dateTime
fn format_as_date_time(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    if input.is_blank() {
        return Ok(Value::Nil);
    }
    let handling = time_zone_handling(args, 0)?;
    let value = PartialDateTime::parse(&input.to_output_string())?;
    Ok(Value::String(value.to_fhir_string(handling)))
}

/// FHIR (or HL7v2) timestamp -> HL7v2 timestamp
fn format_as_hl7v2_date_time(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    if input.is_blank() {
        return Ok(Value::Nil);
    }
    let handling = time_zone_handling(args, 0)?;
    let text = input.to_output_string();
    let value = PartialDateTime::parse_fhir(&text).or_else(|_| PartialDateTime::parse_hl7v2(&text))?;
    Ok(Value::String(value.to_hl7v2_string(handling)))
}

fn add_seconds(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    if input.is_blank() {
        return Ok(Value::Nil);
    }
    let seconds = arg(args, 0)
        .as_f64()
        .ok_or_else(|| invalid_argument("add_seconds", "seconds must be numeric"))?;
    let handling = time_zone_handling(args, 1)?;
    let text = input.to_output_string();
    let value = PartialDateTime::parse_fhir(&text).or_else(|_| PartialDateTime::parse_hl7v2(&text))?;
    Ok(Value::String(value.add_seconds(seconds)?.to_fhir_string(handling)))
}

/// Current UTC time, ISO formatted unless a strftime format is given
fn now(_: &FilterContext, _input: &Value, args: &[Value]) -> Result<Value> {
    let format = arg_string(args, 0, DEFAULT_NOW_FORMAT);
    format_with("now", &Utc::now().fixed_offset(), &format)
}

/// strftime formatting of a timestamp or of `now`/`today`
fn date(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    if input.is_blank() {
        return Ok(Value::Nil);
    }
    let format = arg_string(args, 0, "%Y-%m-%d");
    let text = input.to_output_string();
    let moment = match text.trim() {
        "now" | "today" => {
            let local = Local::now();
            local.with_timezone(local.offset())
        }
        other => PartialDateTime::parse(other)?.date_time,
    };
    format_with("date", &moment, &format)
}

fn format_with(filter: &str, moment: &DateTime<FixedOffset>, format: &str) -> Result<Value> {
    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(invalid_argument(filter, format!("invalid date format '{}'", format)));
    }
    Ok(Value::String(
        moment.format_with_items(items.into_iter()).to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FhirConverterErrorCode;

    fn call(filter: crate::filters::FilterFn, input: &str, args: &[Value]) -> Result<Value> {
        filter(&FilterContext::default(), &Value::from(input), args)
    }

    #[test]
    fn add_hyphens_date_keeps_precision() {
        for (input, expected) in [
            ("2001", "2001"),
            ("200101", "2001-01"),
            ("19241010", "1924-10-10"),
            ("19850101000000", "1985-01-01"),
        ] {
            assert_eq!(call(add_hyphens_date, input, &[]).unwrap().as_str(), Some(expected));
        }
    }

    #[test]
    fn format_as_date_time_in_utc() {
        let out = call(format_as_date_time, "20110103143428-0800", &[Value::from("utc")]).unwrap();
        assert_eq!(out.as_str(), Some("2011-01-03T22:34:28Z"));
        let again = call(format_as_date_time, out.as_str().unwrap(), &[Value::from("utc")]).unwrap();
        assert_eq!(again.as_str(), Some("2011-01-03T22:34:28Z"));
    }

    #[test]
    fn bad_inputs_fail_with_typed_codes() {
        let err = call(format_as_date_time, "2011010", &[]).unwrap_err();
        assert_eq!(err.code(), FhirConverterErrorCode::InvalidDateTimeFormat);
        let err = call(format_as_date_time, "20110103", &[Value::from("mars")]).unwrap_err();
        assert_eq!(err.code(), FhirConverterErrorCode::InvalidTimeZoneHandling);
        assert!(call(add_hyphens_date, "  ", &[]).unwrap().is_nil());
    }

    #[test]
    fn strftime_formatting() {
        let out = call(date, "2004-06-29", &[Value::from("%d/%m/%Y")]).unwrap();
        assert_eq!(out.as_str(), Some("29/06/2004"));
        assert!(call(now, "", &[Value::from("%Q")]).is_err());
    }
}
