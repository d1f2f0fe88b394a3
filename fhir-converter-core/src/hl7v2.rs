// HL7v2 Data Model
//
// Parsed HL7v2 messages are held as an arena of segments. Every segment keeps
// the index it had in the original message so that navigation filters can
// compare segments by identity rather than by value.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Separator characters declared by the message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncodingCharacters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub sub_component: char,
}

impl Default for EncodingCharacters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            sub_component: '&',
        }
    }
}

impl EncodingCharacters {
    /// The four characters that follow the field separator in MSH-2
    pub fn encoding_field(&self) -> String {
        [self.component, self.repetition, self.escape, self.sub_component]
            .iter()
            .collect()
    }
}

/// Leaf of the HL7v2 tree: one component with its sub-components
#[derive(Debug)]
pub struct Hl7v2Component {
    pub value: String,
    pub sub_components: Vec<String>,
    accessed: AtomicBool,
}

impl Hl7v2Component {
    pub fn new(value: String, sub_components: Vec<String>) -> Self {
        Self {
            value,
            sub_components,
            accessed: AtomicBool::new(false),
        }
    }

    /// 1-based sub-component access; out-of-range yields `None`
    pub fn sub_component(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.sub_components.get(index - 1).map(String::as_str)
    }

    pub fn mark_accessed(&self) {
        self.accessed.store(true, Ordering::Relaxed);
    }

    pub fn is_accessed(&self) -> bool {
        self.accessed.load(Ordering::Relaxed)
    }
}

/// A field, possibly repeated. Components belong to the first repetition and
/// are shared with `repeats[0]`.
#[derive(Debug)]
pub struct Hl7v2Field {
    pub value: String,
    pub repeats: Vec<Arc<Hl7v2Field>>,
    pub components: Vec<Arc<Hl7v2Component>>,
}

impl Hl7v2Field {
    /// 1-based component access; out-of-range yields `None`
    pub fn component(&self, index: usize) -> Option<&Arc<Hl7v2Component>> {
        if index == 0 {
            return None;
        }
        self.components.get(index - 1)
    }

    /// Marks every component of every repetition as read
    pub fn mark_accessed(&self) {
        for component in &self.components {
            component.mark_accessed();
        }
        for repeat in &self.repeats {
            for component in &repeat.components {
                component.mark_accessed();
            }
        }
    }
}

/// One segment. `fields[0]` holds the segment type so that field `n` sits at
/// index `n`, matching HL7v2 numbering.
#[derive(Debug)]
pub struct Hl7v2Segment {
    pub index: usize,
    pub value: String,
    pub fields: Vec<Arc<Hl7v2Field>>,
}

impl Hl7v2Segment {
    /// Segment type name, e.g. `PID`
    pub fn segment_type(&self) -> &str {
        self.fields
            .first()
            .map(|f| f.value.as_str())
            .unwrap_or_default()
    }

    /// Field access by HL7v2 position; out-of-range yields `None`
    pub fn field(&self, index: usize) -> Option<&Arc<Hl7v2Field>> {
        self.fields.get(index)
    }

    pub fn mark_accessed(&self) {
        for field in self.fields.iter().skip(1) {
            field.mark_accessed();
        }
    }

    /// Identity comparison: same position in the same message
    pub fn is_same(&self, other: &Hl7v2Segment) -> bool {
        self.index == other.index
    }
}

/// A whole message or a slice of one. `meta[i]` is the type of `data[i]`.
#[derive(Debug, Clone)]
pub struct Hl7v2Data {
    pub meta: Vec<String>,
    pub data: Vec<Arc<Hl7v2Segment>>,
    pub value: String,
    pub encoding_characters: EncodingCharacters,
}

impl Hl7v2Data {
    /// Builds a slice over the given segments, keeping their arena indices
    pub fn from_segments(
        segments: Vec<Arc<Hl7v2Segment>>,
        encoding_characters: EncodingCharacters,
    ) -> Self {
        let meta = segments
            .iter()
            .map(|s| s.segment_type().to_string())
            .collect();
        let value = segments
            .iter()
            .map(|s| s.value.as_str())
            .collect::<Vec<_>>()
            .join("\r");
        Self {
            meta,
            data: segments,
            value,
            encoding_characters,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Position of a segment in this slice, compared by identity
    pub fn position_of(&self, segment: &Hl7v2Segment) -> Option<usize> {
        self.data.iter().position(|s| s.is_same(segment))
    }

    /// Sub-slice `[start, end)` as a new `Hl7v2Data`
    pub fn slice(&self, start: usize, end: usize) -> Hl7v2Data {
        let end = end.min(self.data.len());
        let start = start.min(end);
        Hl7v2Data::from_segments(self.data[start..end].to_vec(), self.encoding_characters)
    }
}
