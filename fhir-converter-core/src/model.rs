// Template Value Model
//
// This module defines the values templates operate on: JSON-like scalars and
// containers for parsed JSON/XML input, plus handles into the HL7v2 arena.

use crate::hl7v2::{Hl7v2Component, Hl7v2Data, Hl7v2Field, Hl7v2Segment};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Map type used for objects in the value tree; keeps insertion order
pub type ObjectMap = IndexMap<String, Value>;

/// Template value types
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Nil,

    Bool(bool),

    Integer(i64),

    Decimal(f64),

    /// A number from JSON input kept in its literal form (`1.50`, values
    /// beyond `i64`)
    Number(serde_json::Number),

    String(String),

    Array(Arc<Vec<Value>>),

    Object(Arc<ObjectMap>),

    /// A whole HL7v2 message or a slice of one
    Hl7Data(Arc<Hl7v2Data>),

    Segment(Arc<Hl7v2Segment>),

    Field(Arc<Hl7v2Field>),

    Component(Arc<Hl7v2Component>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }

    pub fn object(map: ObjectMap) -> Self {
        Value::Object(Arc::new(map))
    }

    /// Converts a parsed JSON tree into template values
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) if i.to_string() == n.to_string() => Value::Integer(i),
                _ => Value::Number(n),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts back to JSON. HL7v2 handles serialize as their text.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Hl7Data(_) | Value::Segment(_) | Value::Field(_) | Value::Component(_) => {
                serde_json::Value::String(self.to_output_string())
            }
        }
    }

    /// Liquid truthiness: only `nil` and `false` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Matches the `empty` literal
    pub fn is_empty(&self) -> bool {
        match self {
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            Value::Hl7Data(data) => data.is_empty(),
            _ => false,
        }
    }

    /// Matches the `blank` literal
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Nil | Value::Bool(false) => true,
            Value::String(s) => s.trim().is_empty(),
            other => other.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer, decimal or literal number
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Decimal(_) | Value::Number(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => n.as_i64(),
            Value::Decimal(d) if d.fract() == 0.0 => Some(*d as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Canonical one-or-many coercion: nil is empty, arrays are themselves,
    /// anything else is a single-item sequence.
    pub fn to_sequence(&self) -> Vec<Value> {
        match self {
            Value::Nil => Vec::new(),
            Value::Array(items) => items.as_ref().clone(),
            other => vec![other.clone()],
        }
    }

    /// Text emitted when the value is written to template output. Reading an
    /// HL7v2 node marks it as used for trace reporting.
    pub fn to_output_string(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(items) => items.iter().map(Value::to_output_string).collect(),
            Value::Object(_) => self.to_json().to_string(),
            Value::Hl7Data(data) => data.value.clone(),
            Value::Segment(segment) => {
                segment.mark_accessed();
                segment.value.clone()
            }
            Value::Field(field) => {
                field.mark_accessed();
                field.value.clone()
            }
            Value::Component(component) => {
                component.mark_accessed();
                component.value.clone()
            }
        }
    }

    /// Named property access (`a.b`). Missing properties are `Nil`.
    pub fn get_property(&self, name: &str) -> Value {
        match self {
            Value::Object(map) => match map.get(name) {
                Some(v) => v.clone(),
                None if name == "size" => Value::Integer(map.len() as i64),
                None => Value::Nil,
            },
            Value::Array(items) => match name {
                "size" => Value::Integer(items.len() as i64),
                "first" => items.first().cloned().unwrap_or_default(),
                "last" => items.last().cloned().unwrap_or_default(),
                _ => name
                    .parse::<i64>()
                    .map(|i| self.get_index(&Value::Integer(i)))
                    .unwrap_or_default(),
            },
            Value::String(s) if name == "size" => Value::Integer(s.chars().count() as i64),
            Value::Hl7Data(data) => match name {
                "Meta" => Value::array(data.meta.iter().cloned().map(Value::String).collect()),
                "Data" => Value::array(data.data.iter().cloned().map(Value::Segment).collect()),
                "Value" => Value::String(data.value.clone()),
                "size" => Value::Integer(data.len() as i64),
                _ => Value::Nil,
            },
            Value::Segment(segment) => match name {
                "Value" => {
                    segment.mark_accessed();
                    Value::String(segment.value.clone())
                }
                "Fields" => {
                    Value::array(segment.fields.iter().cloned().map(Value::Field).collect())
                }
                _ => Self::numeric(name)
                    .map(|i| self.get_index(&Value::Integer(i)))
                    .unwrap_or_default(),
            },
            Value::Field(field) => match name {
                "Value" => {
                    field.mark_accessed();
                    Value::String(field.value.clone())
                }
                "Repeats" => {
                    Value::array(field.repeats.iter().cloned().map(Value::Field).collect())
                }
                "Components" => Value::array(
                    field
                        .components
                        .iter()
                        .cloned()
                        .map(Value::Component)
                        .collect(),
                ),
                _ => Self::numeric(name)
                    .map(|i| self.get_index(&Value::Integer(i)))
                    .unwrap_or_default(),
            },
            Value::Component(component) => match name {
                "Value" => {
                    component.mark_accessed();
                    Value::String(component.value.clone())
                }
                "Subcomponents" => Value::array(
                    component
                        .sub_components
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
                _ => Self::numeric(name)
                    .map(|i| self.get_index(&Value::Integer(i)))
                    .unwrap_or_default(),
            },
            _ => Value::Nil,
        }
    }

    /// Bracket access (`a[0]`, `a["key"]`). Out-of-range yields `Nil`.
    pub fn get_index(&self, index: &Value) -> Value {
        if let Value::String(key) = index {
            return match self {
                Value::Object(_) => self.get_property(key),
                _ => Self::numeric(key)
                    .map(|i| self.get_index(&Value::Integer(i)))
                    .unwrap_or_else(|| self.get_property(key)),
            };
        }

        let Some(i) = index.as_i64() else {
            return Value::Nil;
        };

        match self {
            Value::Array(items) => {
                let len = items.len() as i64;
                let idx = if i < 0 { len + i } else { i };
                if idx < 0 || idx >= len {
                    Value::Nil
                } else {
                    items[idx as usize].clone()
                }
            }
            Value::Hl7Data(data) if i >= 0 => data
                .data
                .get(i as usize)
                .cloned()
                .map(Value::Segment)
                .unwrap_or_default(),
            Value::Segment(segment) if i >= 0 => segment
                .field(i as usize)
                .cloned()
                .map(Value::Field)
                .unwrap_or_default(),
            Value::Field(field) if i >= 0 => field
                .component(i as usize)
                .cloned()
                .map(Value::Component)
                .unwrap_or_default(),
            Value::Component(component) if i >= 0 => component
                .sub_component(i as usize)
                .map(|s| Value::String(s.to_string()))
                .unwrap_or_default(),
            _ => Value::Nil,
        }
    }

    fn numeric(name: &str) -> Option<i64> {
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            name.parse().ok()
        } else {
            None
        }
    }

    /// Liquid equality. Numbers compare across integer/decimal, HL7v2
    /// segments compare by identity, other handles by text.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                    _ => false,
                }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.loose_eq(w)))
            }
            (Value::Segment(a), Value::Segment(b)) => a.is_same(b),
            (Value::Field(_) | Value::Component(_), _) | (_, Value::Field(_) | Value::Component(_)) => {
                self.to_output_string() == other.to_output_string()
            }
            _ => false,
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) | Value::Number(_) => "decimal",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Hl7Data(_) => "hl7v2 data",
            Value::Segment(_) => "segment",
            Value::Field(_) => "field",
            Value::Component(_) => "component",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_output_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}
