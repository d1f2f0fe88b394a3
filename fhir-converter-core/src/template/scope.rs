// Render Scope
//
// Variables live in a stack of frames. A template frame is opened for the root
// render and for every include/evaluate; loop frames hold `for` variables.
// Lookups walk the whole stack so nested templates see their callers'
// bindings, while assignments land in the innermost template frame and so
// never leak back to the caller.

use crate::model::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Template,
    Loop,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    variables: HashMap<String, Value>,
}

/// Environment chain for one render call
#[derive(Debug)]
pub struct Scope {
    frames: Vec<Frame>,
}

impl Scope {
    /// Creates a scope with a root template frame holding `globals`
    pub fn new(globals: HashMap<String, Value>) -> Self {
        Self {
            frames: vec![Frame {
                kind: FrameKind::Template,
                variables: globals,
            }],
        }
    }

    pub fn push(&mut self, kind: FrameKind, variables: HashMap<String, Value>) {
        self.frames.push(Frame { kind, variables });
    }

    /// Drops the innermost frame; the root frame is never popped
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost binding of `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.variables.get(name))
    }

    /// Binds `name` in the innermost template frame
    pub fn assign(&mut self, name: &str, value: Value) {
        if let Some(frame) = self
            .frames
            .iter_mut()
            .rev()
            .find(|frame| frame.kind == FrameKind::Template)
        {
            frame.variables.insert(name.to_string(), value);
        }
    }

    /// Binds `name` in the innermost frame of any kind
    pub fn set_local(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.variables.insert(name.to_string(), value);
        }
    }
}
