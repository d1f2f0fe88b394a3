// HL7v2 Data Parser
//
// Splits a pipe-delimited message into segments, fields, repetitions,
// components and sub-components, decoding escape sequences on the way.

use super::DataParser;
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::hl7v2::{EncodingCharacters, Hl7v2Component, Hl7v2Data, Hl7v2Field, Hl7v2Segment};
use crate::model::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Segment types whose second field is the encoding-character declaration
const HEADER_SEGMENTS: [&str; 3] = ["MSH", "BHS", "FHS"];

/// Parser for HL7v2 messages
#[derive(Debug, Default, Clone, Copy)]
pub struct Hl7v2DataParser;

impl Hl7v2DataParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses a message into an `Hl7v2Data` arena
    pub fn parse_message(&self, message: &str) -> Result<Hl7v2Data> {
        if message.trim().is_empty() {
            return Err(FhirConverterError::data_parse(
                FhirConverterErrorCode::NullOrWhiteSpaceInput,
                "Input HL7v2 message is null, empty or whitespace",
            ));
        }

        let lines: Vec<&str> = message
            .split(['\r', '\n'])
            .filter(|line| !line.trim().is_empty())
            .collect();

        let encoding = read_encoding_characters(lines[0])?;

        let mut meta = Vec::with_capacity(lines.len());
        let mut data = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            let segment = parse_segment(index, line, &encoding)?;
            meta.push(segment.segment_type().to_string());
            data.push(Arc::new(segment));
        }

        log::debug!("Parsed HL7v2 message with {} segments", data.len());

        Ok(Hl7v2Data {
            meta,
            data,
            value: message.to_string(),
            encoding_characters: encoding,
        })
    }
}

impl DataParser for Hl7v2DataParser {
    fn parse(&self, input: &str) -> Result<Value> {
        Ok(Value::Hl7Data(Arc::new(self.parse_message(input)?)))
    }
}

/// Reads the field separator (4th character) and the four encoding characters
/// that follow it from the header segment
fn read_encoding_characters(header: &str) -> Result<EncodingCharacters> {
    let chars: Vec<char> = header.chars().collect();
    let missing = || {
        FhirConverterError::data_parse(
            FhirConverterErrorCode::MissingHl7v2Separators,
            format!("HL7v2 separators are missing from header segment '{}'", header),
        )
    };

    let field = *chars.get(3).ok_or_else(missing)?;
    let encoding: Vec<char> = chars
        .iter()
        .skip(4)
        .take_while(|c| **c != field)
        .take(4)
        .copied()
        .collect();
    if encoding.len() < 4 {
        return Err(missing());
    }

    let separators = [field, encoding[0], encoding[1], encoding[2], encoding[3]];
    if separators
        .iter()
        .any(|c| c.is_alphanumeric() || c.is_whitespace())
    {
        return Err(missing());
    }

    let distinct: HashSet<char> = separators.iter().copied().collect();
    if distinct.len() != separators.len() {
        return Err(FhirConverterError::data_parse(
            FhirConverterErrorCode::DuplicateHl7v2Separators,
            format!(
                "HL7v2 separators must be distinct, found '{}'",
                separators.iter().collect::<String>()
            ),
        ));
    }

    Ok(EncodingCharacters {
        field,
        component: encoding[0],
        repetition: encoding[1],
        escape: encoding[2],
        sub_component: encoding[3],
    })
}

fn parse_segment(index: usize, line: &str, encoding: &EncodingCharacters) -> Result<Hl7v2Segment> {
    let parts: Vec<&str> = line.split(encoding.field).collect();
    let segment_type = parts[0];

    let mut fields = Vec::with_capacity(parts.len() + 1);
    fields.push(Arc::new(literal_field(segment_type)));

    if HEADER_SEGMENTS.contains(&segment_type) {
        // The field separator itself is field 1, the encoding characters field 2
        fields.push(Arc::new(literal_field(&encoding.field.to_string())));
        if let Some(declared) = parts.get(1) {
            fields.push(Arc::new(literal_field(declared)));
        }
        for part in parts.iter().skip(2) {
            fields.push(Arc::new(parse_field(part, encoding)?));
        }
    } else {
        for part in parts.iter().skip(1) {
            fields.push(Arc::new(parse_field(part, encoding)?));
        }
    }

    Ok(Hl7v2Segment {
        index,
        value: line.to_string(),
        fields,
    })
}

/// A field taken verbatim, without splitting or unescaping
fn literal_field(text: &str) -> Hl7v2Field {
    Hl7v2Field {
        value: text.to_string(),
        repeats: Vec::new(),
        components: vec![Arc::new(Hl7v2Component::new(
            text.to_string(),
            vec![text.to_string()],
        ))],
    }
}

fn parse_field(text: &str, encoding: &EncodingCharacters) -> Result<Hl7v2Field> {
    let repeats = text
        .split(encoding.repetition)
        .map(|repeat| parse_repeat(repeat, encoding).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    let components = repeats
        .first()
        .map(|first| first.components.clone())
        .unwrap_or_default();

    Ok(Hl7v2Field {
        value: unescape(text, encoding)?,
        repeats,
        components,
    })
}

fn parse_repeat(text: &str, encoding: &EncodingCharacters) -> Result<Hl7v2Field> {
    let components = text
        .split(encoding.component)
        .map(|component| {
            let sub_components = component
                .split(encoding.sub_component)
                .map(|sub| unescape(sub, encoding))
                .collect::<Result<Vec<_>>>()?;
            Ok(Arc::new(Hl7v2Component::new(
                unescape(component, encoding)?,
                sub_components,
            )))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Hl7v2Field {
        value: unescape(text, encoding)?,
        repeats: Vec::new(),
        components,
    })
}

/// Decodes HL7v2 escape sequences (`\F\`, `\S\`, `\T\`, `\R\`, `\E\`,
/// `\Xhh..\`, `\.br\`). Unknown sequences are kept verbatim; an unterminated
/// sequence is an error.
pub fn unescape(text: &str, encoding: &EncodingCharacters) -> Result<String> {
    if !text.contains(encoding.escape) {
        return Ok(text.to_string());
    }

    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != encoding.escape {
            result.push(c);
            continue;
        }

        let mut sequence = String::new();
        let mut terminated = false;
        for next in chars.by_ref() {
            if next == encoding.escape {
                terminated = true;
                break;
            }
            sequence.push(next);
        }
        if !terminated {
            return Err(FhirConverterError::data_parse(
                FhirConverterErrorCode::InvalidHl7v2EscapeCharacter,
                format!("Unterminated escape sequence in '{}'", text),
            ));
        }

        match sequence.as_str() {
            "F" => result.push(encoding.field),
            "S" => result.push(encoding.component),
            "T" => result.push(encoding.sub_component),
            "R" => result.push(encoding.repetition),
            "E" => result.push(encoding.escape),
            ".br" => result.push('\n'),
            hex if hex.starts_with('X') => result.push_str(&decode_hex(&hex[1..], text)?),
            other => {
                result.push(encoding.escape);
                result.push_str(other);
                result.push(encoding.escape);
            }
        }
    }

    Ok(result)
}

fn decode_hex(hex: &str, text: &str) -> Result<String> {
    let invalid = || {
        FhirConverterError::data_parse(
            FhirConverterErrorCode::InvalidHl7v2EscapeCharacter,
            format!("Invalid hexadecimal escape sequence in '{}'", text),
        )
    };
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid()))
        .collect::<Result<Vec<u8>>>()?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Re-encodes separator characters so a value can be written into a field
pub fn escape(text: &str, encoding: &EncodingCharacters) -> String {
    let mut result = String::with_capacity(text.len());
    for c in text.chars() {
        let code = if c == encoding.escape {
            Some('E')
        } else if c == encoding.field {
            Some('F')
        } else if c == encoding.component {
            Some('S')
        } else if c == encoding.sub_component {
            Some('T')
        } else if c == encoding.repetition {
            Some('R')
        } else {
            None
        };
        match code {
            Some(code) => {
                result.push(encoding.escape);
                result.push(code);
                result.push(encoding.escape);
            }
            None => result.push(c),
        }
    }
    result
}
