// JSON Diff Merge
//
// Render-time merge used by `mergeDiff`: objects merge key by key, scalars and
// arrays are replaced outright, and a `null` in the diff removes the key.
// Conflicting values are resolved last-write-wins.

use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use serde_json::{Map, Value};

/// Merges `diff` into `accumulator`. Both must be JSON objects.
pub fn merge_diff(accumulator: &mut Value, diff: &Value, max_depth: usize) -> Result<()> {
    let Value::Object(diff) = diff else {
        return Err(merge_error(format!(
            "Diff must be a JSON object, found {}",
            json_type(diff)
        )));
    };
    let Value::Object(target) = accumulator else {
        return Err(merge_error(format!(
            "Merge target must be a JSON object, found {}",
            json_type(accumulator)
        )));
    };
    merge_objects(target, diff, 1, max_depth)
}

fn merge_objects(
    target: &mut Map<String, Value>,
    diff: &Map<String, Value>,
    depth: usize,
    max_depth: usize,
) -> Result<()> {
    if depth > max_depth {
        return Err(FhirConverterError::render(
            FhirConverterErrorCode::StackLevelExceeded,
            format!("Merge depth exceeds the limit of {}", max_depth),
        ));
    }

    for (key, value) in diff {
        if value.is_null() {
            target.remove(key);
            continue;
        }
        if let (Some(Value::Object(existing)), Value::Object(nested)) = (target.get_mut(key), value) {
            merge_objects(existing, nested, depth + 1, max_depth)?;
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
    Ok(())
}

fn merge_error(message: String) -> FhirConverterError {
    FhirConverterError::post_process(FhirConverterErrorCode::JsonMergingError, message)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_merge_and_null_removes() {
        let mut acc = json!({"a": {"x": 1, "y": 2}, "b": [1], "c": true});
        merge_diff(&mut acc, &json!({"a": {"y": 3}, "b": [2, 3], "c": null}), 8).unwrap();
        assert_eq!(acc, json!({"a": {"x": 1, "y": 3}, "b": [2, 3]}));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut acc = json!({"a": {"b": {"c": 1}}});
        let err = merge_diff(&mut acc, &json!({"a": {"b": {"c": 2}}}), 2).unwrap_err();
        assert_eq!(err.code(), FhirConverterErrorCode::StackLevelExceeded);
    }
}
