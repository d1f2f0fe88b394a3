// HL7v2 Segment Filters
//
// Navigation over a parsed message: picking segments by type, finding the
// children that follow a parent segment, finding the parent that precedes a
// child, and cutting the message into groups at boundary segments. Segments
// are always compared by their position in the message, never by text.

use super::{arg, arg_string, invalid_argument, FilterContext, FilterRegistry};
use crate::errors::Result;
use crate::hl7v2::{Hl7v2Data, Hl7v2Segment};
use crate::model::{ObjectMap, Value};
use std::sync::Arc;

pub fn register(registry: &mut FilterRegistry) {
    registry.register("get_first_segments", get_first_segments);
    registry.register("get_segment_lists", get_segment_lists);
    registry.register("get_related_segment_list", get_related_segment_list);
    registry.register("get_parent_segment", get_parent_segment);
    registry.register("has_segments", has_segments);
    registry.register("split_data_by_segments", split_data_by_segments);
}

fn hl7_data<'a>(filter: &str, value: &'a Value) -> Result<Option<&'a Arc<Hl7v2Data>>> {
    match value {
        Value::Hl7Data(data) => Ok(Some(data)),
        Value::Nil => Ok(None),
        other => Err(invalid_argument(
            filter,
            format!("expected HL7v2 data, found {}", other.type_name()),
        )),
    }
}

fn segment_ids(names: &str) -> Vec<&str> {
    names.split('|')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect()
}

/// First segment of each requested type
pub fn first_segments(data: &Hl7v2Data, ids: &str) -> ObjectMap {
    let mut result = ObjectMap::new();
    for id in segment_ids(ids) {
        if let Some(pos) = data.meta.iter().position(|m| m == id) {
            result.insert(id.to_string(), Value::Segment(Arc::clone(&data.data[pos])));
        }
    }
    result
}

/// Every segment of each requested type, in message order
pub fn segment_lists(data: &Hl7v2Data, ids: &str) -> ObjectMap {
    let mut result = ObjectMap::new();
    for id in segment_ids(ids) {
        let segments: Vec<Value> = data
            .meta
            .iter()
            .zip(&data.data)
            .filter(|(meta, _)| *meta == id)
            .map(|(_, segment)| Value::Segment(Arc::clone(segment)))
            .collect();
        if !segments.is_empty() {
            result.insert(id.to_string(), Value::array(segments));
        }
    }
    result
}

/// The run of `child` segments immediately after `parent`
pub fn related_segments(data: &Hl7v2Data, parent: &Hl7v2Segment, child: &str) -> Vec<Arc<Hl7v2Segment>> {
    let Some(start) = data.position_of(parent) else {
        return Vec::new();
    };
    data.data[start + 1..]
        .iter()
        .take_while(|segment| segment.segment_type() == child)
        .cloned()
        .collect()
}

/// Nearest `parent` segment at or before the `child_index`-th `child` segment
pub fn parent_segment(
    data: &Hl7v2Data,
    child: &str,
    child_index: usize,
    parent: &str,
) -> Option<Arc<Hl7v2Segment>> {
    let child_pos = data
        .meta
        .iter()
        .enumerate()
        .filter(|(_, meta)| *meta == child)
        .nth(child_index)
        .map(|(pos, _)| pos)?;
    data.data[..=child_pos]
        .iter()
        .rev()
        .find(|segment| segment.segment_type() == parent)
        .cloned()
}

/// Cuts `data` into groups that start at each boundary segment.
///
/// A group runs up to the next boundary or the end of the message. When the
/// end marker falls before the end of a group, that group is cut at the
/// marker and no further groups are produced: an end marker that precedes the
/// second boundary therefore yields exactly one group.
pub fn split_by_segments(
    data: &Hl7v2Data,
    boundaries: &[Arc<Hl7v2Segment>],
    end: Option<&Hl7v2Segment>,
) -> Vec<Hl7v2Data> {
    let mut positions: Vec<usize> = boundaries
        .iter()
        .filter_map(|segment| data.position_of(segment))
        .collect();
    positions.sort_unstable();
    positions.dedup();

    let end_pos = end.and_then(|segment| data.position_of(segment));
    let mut groups = Vec::with_capacity(positions.len());

    for (i, &start) in positions.iter().enumerate() {
        let stop = positions.get(i + 1).copied().unwrap_or(data.len());
        match end_pos {
            Some(end_pos) if end_pos < stop => {
                let cut = if end_pos > start { end_pos } else { stop };
                groups.push(data.slice(start, cut));
                break;
            }
            _ => groups.push(data.slice(start, stop)),
        }
    }
    groups
}

fn get_first_segments(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let Some(data) = hl7_data("get_first_segments", input)? else {
        return Ok(Value::object(ObjectMap::new()));
    };
    Ok(Value::object(first_segments(data, &arg_string(args, 0, ""))))
}

fn get_segment_lists(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let Some(data) = hl7_data("get_segment_lists", input)? else {
        return Ok(Value::object(ObjectMap::new()));
    };
    Ok(Value::object(segment_lists(data, &arg_string(args, 0, ""))))
}

fn get_related_segment_list(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let child = arg_string(args, 1, "");
    let mut result = ObjectMap::new();
    let (Some(data), Value::Segment(parent)) = (hl7_data("get_related_segment_list", input)?, arg(args, 0)) else {
        return Ok(Value::object(result));
    };

    let related = related_segments(data, parent, &child);
    if !related.is_empty() {
        result.insert(child, Value::array(related.into_iter().map(Value::Segment).collect()));
    }
    Ok(Value::object(result))
}

fn get_parent_segment(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let child = arg_string(args, 0, "");
    let index = arg(args, 1).as_i64().ok_or_else(|| {
        invalid_argument("get_parent_segment", "child index must be an integer")
    })?;
    let parent = arg_string(args, 2, "");

    let mut result = ObjectMap::new();
    let Some(data) = hl7_data("get_parent_segment", input)? else {
        return Ok(Value::object(result));
    };
    if index >= 0 {
        if let Some(segment) = parent_segment(data, &child, index as usize, &parent) {
            result.insert(parent, Value::Segment(segment));
        }
    }
    Ok(Value::object(result))
}

fn has_segments(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let Some(data) = hl7_data("has_segments", input)? else {
        return Ok(Value::Bool(false));
    };
    let ids = arg_string(args, 0, "");
    let ids = segment_ids(&ids);
    Ok(Value::Bool(
        !ids.is_empty() && ids.iter().all(|id| data.meta.iter().any(|m| m.as_str() == *id)),
    ))
}

fn split_data_by_segments(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let Some(data) = hl7_data("split_data_by_segments", input)? else {
        return Ok(Value::array(Vec::new()));
    };

    // Boundaries: segment handles, or a `|` list of segment types
    let boundaries: Vec<Arc<Hl7v2Segment>> = match arg(args, 0) {
        Value::String(ids) => {
            let ids = segment_ids(ids);
            data.data
                .iter()
                .filter(|segment| ids.contains(&segment.segment_type()))
                .cloned()
                .collect()
        }
        other => other
            .to_sequence()
            .into_iter()
            .filter_map(|value| match value {
                Value::Segment(segment) => Some(segment),
                _ => None,
            })
            .collect(),
    };

    let end = match arg(args, 1) {
        Value::Segment(segment) => Some(segment.as_ref()),
        _ => None,
    };

    Ok(Value::array(
        split_by_segments(data, &boundaries, end)
            .into_iter()
            .map(|group| Value::Hl7Data(Arc::new(group)))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::Hl7v2DataParser;

    fn message() -> Hl7v2Data {
        Hl7v2DataParser
            .parse_message("MSH|^~\\&|A\rPID|1\rOBR|1\rOBX|1\rOBX|2\rOBR|2\rOBX|3\rNTE|1")
            .unwrap()
    }

    #[test]
    fn related_segments_stop_at_other_types() {
        let data = message();
        let related = related_segments(&data, &data.data[2], "OBX");
        assert_eq!(related.len(), 2);
        assert!(related_segments(&data, &data.data[1], "OBX").is_empty());
    }

    #[test]
    fn parent_segment_scans_backwards() {
        let data = message();
        let parent = parent_segment(&data, "OBX", 2, "OBR").unwrap();
        assert_eq!(parent.index, 5);
        assert!(parent_segment(&data, "OBX", 9, "OBR").is_none());
    }

    #[test]
    fn end_marker_before_second_boundary_yields_one_group() {
        let data = message();
        let boundaries = vec![Arc::clone(&data.data[2]), Arc::clone(&data.data[5])];
        let groups = split_by_segments(&data, &boundaries, Some(data.data[4].as_ref()));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].meta, vec!["OBR", "OBX"]);

        let groups = split_by_segments(&data, &boundaries, None);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].meta, vec!["OBR", "OBX", "NTE"]);
    }
}
