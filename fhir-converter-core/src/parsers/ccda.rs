// C-CDA / XML Data Parser
//
// Folds an XML document into nested objects keyed by local element name.
// Attributes become string properties, element text goes under `_`, and a
// repeated child element becomes an array.

use super::DataParser;
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::model::{ObjectMap, Value};
use roxmltree::{Document, Node};
use std::sync::Arc;

/// Key holding element text when the element also has attributes or children
pub const TEXT_KEY: &str = "_";

/// Parser for C-CDA documents and other XML input
#[derive(Debug, Default, Clone, Copy)]
pub struct CcdaDataParser;

impl CcdaDataParser {
    pub fn new() -> Self {
        Self
    }
}

impl DataParser for CcdaDataParser {
    fn parse(&self, input: &str) -> Result<Value> {
        if input.trim().is_empty() {
            return Err(FhirConverterError::data_parse(
                FhirConverterErrorCode::NullOrWhiteSpaceInput,
                "Input XML document is null, empty or whitespace",
            ));
        }

        let doc = Document::parse(input).map_err(|e| {
            FhirConverterError::data_parse(
                FhirConverterErrorCode::InputParsingError,
                format!("Invalid XML input: {}", e),
            )
        })?;

        let root = doc.root_element();
        let mut map = ObjectMap::new();
        map.insert(root.tag_name().name().to_string(), element_to_value(&root));
        Ok(Value::object(map))
    }
}

fn element_to_value(node: &Node) -> Value {
    let mut map = ObjectMap::new();

    for attribute in node.attributes() {
        map.insert(
            attribute.name().to_string(),
            Value::String(attribute.value().to_string()),
        );
    }

    let mut has_children = false;
    for child in node.children().filter(Node::is_element) {
        has_children = true;
        insert_child(&mut map, child.tag_name().name(), element_to_value(&child));
    }

    let text: String = node
        .children()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect();
    let text = text.trim();

    if !has_children && map.is_empty() {
        // Text-only leaf: a bare scalar, or nothing at all for an empty element
        return if text.is_empty() {
            Value::Nil
        } else {
            Value::String(text.to_string())
        };
    }

    if !text.is_empty() {
        map.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
    }
    Value::object(map)
}

/// Inserts a child, turning the property into an array once a name repeats
fn insert_child(map: &mut ObjectMap, name: &str, value: Value) {
    match map.get_mut(name) {
        None => {
            map.insert(name.to_string(), value);
        }
        // Arrays only arise from repetition, so an existing array is the run so far
        Some(Value::Array(items)) => Arc::make_mut(items).push(value),
        Some(existing) => {
            let first = std::mem::take(existing);
            *existing = Value::array(vec![first, value]);
        }
    }
}
