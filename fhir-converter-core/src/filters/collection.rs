// Collection Filters
//
// Every filter here accepts one-or-many input: nil is an empty list and a
// single value is a one-item list.

use super::{arg, arg_string, FilterContext, FilterRegistry};
use crate::errors::Result;
use crate::model::Value;
use std::cmp::Ordering;

pub fn register(registry: &mut FilterRegistry) {
    registry.register("first", first);
    registry.register("last", last);
    registry.register("join", join);
    registry.register("reverse", reverse);
    registry.register("sort", sort);
    registry.register("uniq", uniq);
    registry.register("map", map);
    registry.register("where", where_filter);
    registry.register("concat", concat);
    registry.register("to_array", to_array);
    registry.register("compact", compact);
    registry.register("default", default);
}

/// Ordering used by `sort`: numbers numerically, everything else by text
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Nil, Value::Nil) => Ordering::Equal,
        (Value::Nil, _) => Ordering::Greater,
        (_, Value::Nil) => Ordering::Less,
        (a, b) if a.is_number() && b.is_number() => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => a.to_output_string().cmp(&b.to_output_string()),
    }
}

fn first(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(input.to_sequence().into_iter().next().unwrap_or_default())
}

fn last(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(input.to_sequence().pop().unwrap_or_default())
}

fn join(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let separator = arg_string(args, 0, " ");
    let parts: Vec<String> = input
        .to_sequence()
        .iter()
        .map(Value::to_output_string)
        .collect();
    Ok(Value::String(parts.join(&separator)))
}

fn reverse(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    let mut items = input.to_sequence();
    items.reverse();
    Ok(Value::array(items))
}

/// Sorts by value, or by a property of each item when one is named
fn sort(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let mut items = input.to_sequence();
    match arg(args, 0) {
        Value::Nil => items.sort_by(compare),
        key => {
            let key = key.to_output_string();
            items.sort_by(|a, b| compare(&a.get_property(&key), &b.get_property(&key)));
        }
    }
    Ok(Value::array(items))
}

fn uniq(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    let mut unique: Vec<Value> = Vec::new();
    for item in input.to_sequence() {
        if !unique.iter().any(|seen| seen.loose_eq(&item)) {
            unique.push(item);
        }
    }
    Ok(Value::array(unique))
}

fn map(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let key = arg_string(args, 0, "");
    Ok(Value::array(
        input
            .to_sequence()
            .iter()
            .map(|item| item.get_property(&key))
            .collect(),
    ))
}

/// Items whose property is truthy, or equal to the given value
fn where_filter(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let key = arg_string(args, 0, "");
    let expected = args.get(1);
    Ok(Value::array(
        input
            .to_sequence()
            .into_iter()
            .filter(|item| {
                let property = item.get_property(&key);
                match expected {
                    Some(expected) => property.loose_eq(expected),
                    None => property.is_truthy(),
                }
            })
            .collect(),
    ))
}

fn concat(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let mut items = input.to_sequence();
    items.extend(arg(args, 0).to_sequence());
    Ok(Value::array(items))
}

fn to_array(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::array(input.to_sequence()))
}

fn compact(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::array(
        input
            .to_sequence()
            .into_iter()
            .filter(|item| !item.is_nil())
            .collect(),
    ))
}

/// The argument when the input is nil, false or empty
fn default(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    if !input.is_truthy() || input.is_empty() {
        Ok(arg(args, 0).clone())
    } else {
        Ok(input.clone())
    }
}
