// JSON Post-Processor
//
// Turns rendered template text into the final document: strict JSON parse,
// removal of empty values, and merging of Bundle entries that describe the
// same resource.

use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use serde_json::{Map, Value};

/// Parses, cleans and pretty-prints rendered output
pub fn process(rendered: &str) -> Result<String> {
    let document = parse(rendered)?;
    serde_json::to_string_pretty(&document).map_err(|e| {
        FhirConverterError::post_process(
            FhirConverterErrorCode::JsonParsingError,
            format!("Cannot serialize converted document: {}", e),
        )
    })
}

/// `process` without the final serialization
pub fn parse(rendered: &str) -> Result<Value> {
    let document: Value = serde_json::from_str(rendered).map_err(|e| {
        FhirConverterError::post_process(
            FhirConverterErrorCode::JsonParsingError,
            format!("Rendered output is not valid JSON: {}", e),
        )
    })?;

    let mut document = prune(document).unwrap_or_else(|| Value::Object(Map::new()));
    merge_bundle_entries(&mut document);
    Ok(document)
}

/// Drops `null`, `""`, `{}` and `[]` values, bottom-up. `None` means the
/// value itself is empty.
pub fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().filter_map(prune).collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, value)| prune(value).map(|value| (key, value)))
                .collect();
            (!map.is_empty()).then_some(Value::Object(map))
        }
        other => Some(other),
    }
}

/// Merges entries of a top-level Bundle whose resources share
/// `resourceType` and `id` into the first such entry
pub fn merge_bundle_entries(document: &mut Value) {
    if document.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return;
    }
    let Some(Value::Array(entries)) = document.get_mut("entry") else {
        return;
    };

    let mut merged: Vec<Value> = Vec::with_capacity(entries.len());
    let mut keys: Vec<Option<(String, String)>> = Vec::with_capacity(entries.len());
    for entry in entries.drain(..) {
        let key = resource_key(&entry);
        match key.as_ref().and_then(|k| keys.iter().position(|seen| seen.as_ref() == Some(k))) {
            Some(index) => merge_values(&mut merged[index], entry),
            None => {
                keys.push(key);
                merged.push(entry);
            }
        }
    }
    log::trace!("Bundle has {} entries after merge", merged.len());
    *entries = merged;
}

fn resource_key(entry: &Value) -> Option<(String, String)> {
    let resource = entry.get("resource")?;
    Some((
        resource.get("resourceType")?.as_str()?.to_string(),
        resource.get("id")?.as_str()?.to_string(),
    ))
}

/// Objects merge recursively, arrays union without duplicates, other values
/// are replaced
fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) => {
            for item in source {
                if !target.contains(&item) {
                    target.push(item);
                }
            }
        }
        (target, source) => *target = source,
    }
}
