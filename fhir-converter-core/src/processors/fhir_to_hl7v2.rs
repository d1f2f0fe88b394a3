// FHIR to HL7v2 Processor
//
// The root template renders a JSON object whose `messageDefinition` array
// lists segments in output order:
//
//     {"messageDefinition": [{"MSH": {"2": "^~\\&", "3": "APP"}}, {"PID": {"3": "123"}}]}
//
// Each segment becomes one line. Unaddressed positions below the highest
// addressed one are left empty, and every line ends with the field separator.

use super::{check_arguments, render_root, CancellationToken, DataType, Processor};
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::parsers::{DataParser, JsonDataParser};
use crate::provider::TemplateProvider;
use crate::settings::ProcessorSettings;
use crate::trace::TraceInfo;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const MESSAGE_DEFINITION_KEY: &str = "messageDefinition";

const FIELD_SEPARATOR: char = '|';

/// Segments whose field 1 is the field separator itself
const HEADER_SEGMENTS: [&str; 3] = ["MSH", "BHS", "FHS"];

/// Highest field position a segment may address
pub const MAX_FIELD_POSITION: usize = 999;

#[derive(Debug, Default, Clone)]
pub struct FhirToHl7v2Processor {
    settings: ProcessorSettings,
}

impl FhirToHl7v2Processor {
    pub fn new(settings: ProcessorSettings) -> Self {
        Self { settings }
    }
}

impl Processor for FhirToHl7v2Processor {
    fn data_type(&self) -> DataType {
        DataType::Fhir
    }

    fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    fn convert_with_cancellation(
        &self,
        data: &str,
        root_template: &str,
        provider: Option<&dyn TemplateProvider>,
        cancellation: &CancellationToken,
        trace: Option<&mut TraceInfo>,
    ) -> Result<String> {
        let provider = check_arguments(root_template, provider, cancellation)?;
        log::debug!("Converting FHIR resource to HL7v2 with root template '{}'", root_template);

        let parsed = JsonDataParser::new().parse(data)?;
        let rendered = render_root(
            &self.settings,
            DataType::Fhir,
            provider,
            root_template,
            parsed,
            HashMap::new(),
        )?;

        let document: Value = serde_json::from_str(&rendered.text).map_err(|e| {
            FhirConverterError::post_process(
                FhirConverterErrorCode::JsonParsingError,
                format!("Rendered message definition is not valid JSON: {}", e),
            )
        })?;
        let message = assemble_message(&document)?;

        if let Some(trace) = trace {
            *trace = TraceInfo::from_schemas(rendered.validated_schemas);
        }
        Ok(message)
    }
}

fn definition_error(message: impl Into<String>) -> FhirConverterError {
    FhirConverterError::post_process(FhirConverterErrorCode::InvalidMessageDefinition, message)
}

/// Builds the HL7v2 text from a rendered `{"messageDefinition": [...]}`
pub fn assemble_message(document: &Value) -> Result<String> {
    let definition = document
        .get(MESSAGE_DEFINITION_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| definition_error("Rendered output has no 'messageDefinition' array"))?;

    let mut message = String::new();
    for entry in definition {
        let segments = entry
            .as_object()
            .ok_or_else(|| definition_error("Message definition entries must be objects"))?;
        for (name, fields) in segments {
            let fields = fields.as_object().ok_or_else(|| {
                definition_error(format!("Fields of segment '{}' must be an object", name))
            })?;
            message.push_str(&assemble_segment(name, fields)?);
            message.push('\n');
        }
    }
    Ok(message)
}

/// One segment line, ending with the field separator
pub fn assemble_segment(name: &str, fields: &Map<String, Value>) -> Result<String> {
    if name.len() != 3 {
        return Err(definition_error(format!("Invalid segment name '{}'", name)));
    }

    // Header segments: field 1 is the separator, so position n lands in slot n - 1
    let shift = usize::from(HEADER_SEGMENTS.contains(&name));

    let mut slots: Vec<String> = Vec::new();
    for (position, value) in fields {
        let position: usize = position
            .trim()
            .parse()
            .map_err(|_| definition_error(format!("Invalid field position '{}' in {}", position, name)))?;
        if position > MAX_FIELD_POSITION {
            return Err(definition_error(format!(
                "Field position {} in {} exceeds {}",
                position, name, MAX_FIELD_POSITION
            )));
        }
        if position <= shift {
            continue;
        }
        let slot = position - shift;
        if slots.len() < slot {
            slots.resize(slot, String::new());
        }
        slots[slot - 1] = field_text(name, value)?;
    }

    let mut line = String::from(name);
    for slot in &slots {
        line.push(FIELD_SEPARATOR);
        line.push_str(slot);
    }
    line.push(FIELD_SEPARATOR);
    Ok(line)
}

fn field_text(segment: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(definition_error(format!(
            "Unsupported field value {} in segment {}",
            other, segment
        ))),
    }
}
