// JSON Data Parser
//
// Used for generic JSON input and for FHIR resources.

use super::DataParser;
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::model::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDataParser;

impl JsonDataParser {
    pub fn new() -> Self {
        Self
    }
}

impl DataParser for JsonDataParser {
    fn parse(&self, input: &str) -> Result<Value> {
        if input.trim().is_empty() {
            return Err(FhirConverterError::data_parse(
                FhirConverterErrorCode::NullOrWhiteSpaceInput,
                "Input JSON is null, empty or whitespace",
            ));
        }

        let json: serde_json::Value = serde_json::from_str(input).map_err(|e| {
            FhirConverterError::data_parse(
                FhirConverterErrorCode::InputParsingError,
                format!("Invalid JSON input: {}", e),
            )
        })?;

        Ok(Value::from_json(json))
    }
}
