// Conversion Trace Info
//
// Diagnostics collected after a render: HL7v2 components that no template
// ever read, and JSON schemas exercised by `validate` blocks.

use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::hl7v2::{Hl7v2Data, Hl7v2Field};
use serde::Serialize;

/// Segment types whose fields 1 and 2 are the separator declaration
const HEADER_SEGMENTS: [&str; 3] = ["MSH", "BHS", "FHS"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceInfo {
    /// `None` when the input was not HL7v2
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unused_segments: Option<Vec<UnusedSegment>>,
    pub validated_schemas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedSegment {
    #[serde(rename = "type")]
    pub segment_type: String,
    /// Zero-based line of the segment in the message
    pub line: usize,
    pub components: Vec<UnusedComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedComponent {
    pub field: usize,
    /// 1-based component position
    pub component: usize,
    pub value: String,
}

impl TraceInfo {
    /// Unused-component report for a rendered HL7v2 message
    pub fn from_hl7v2(data: &Hl7v2Data, validated_schemas: Vec<String>) -> Self {
        Self {
            unused_segments: Some(unused_segments(data)),
            validated_schemas,
        }
    }

    /// Trace with schema usage only
    pub fn from_schemas(validated_schemas: Vec<String>) -> Self {
        Self {
            unused_segments: None,
            validated_schemas,
        }
    }

    /// Serialized form handed to hosts
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            FhirConverterError::post_process(
                FhirConverterErrorCode::TraceInfoError,
                format!("Cannot serialize trace info: {}", e),
            )
        })
    }
}

/// Every non-empty component that was never read, grouped by segment
pub fn unused_segments(data: &Hl7v2Data) -> Vec<UnusedSegment> {
    data.data
        .iter()
        .filter_map(|segment| {
            let segment_type = segment.segment_type();
            let first_field = if HEADER_SEGMENTS.contains(&segment_type) { 3 } else { 1 };
            let components: Vec<UnusedComponent> = segment
                .fields
                .iter()
                .enumerate()
                .skip(first_field)
                .flat_map(|(position, field)| unused_components(position, field))
                .collect();
            (!components.is_empty()).then(|| UnusedSegment {
                segment_type: segment_type.to_string(),
                line: segment.index,
                components,
            })
        })
        .collect()
}

fn unused_components(position: usize, field: &Hl7v2Field) -> Vec<UnusedComponent> {
    // Repetition 0 shares its components with the field itself
    let repetitions: Vec<&Hl7v2Field> = if field.repeats.is_empty() {
        vec![field]
    } else {
        field.repeats.iter().map(|repeat| repeat.as_ref()).collect()
    };

    repetitions
        .into_iter()
        .flat_map(|repetition| repetition.components.iter().enumerate())
        .filter(|(_, component)| !component.value.is_empty() && !component.is_accessed())
        .map(|(index, component)| UnusedComponent {
            field: position,
            component: index + 1,
            value: component.value.clone(),
        })
        .collect()
}
