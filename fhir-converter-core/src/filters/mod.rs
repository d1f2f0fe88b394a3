// Template Filters
//
// Filters are plain functions looked up by name. Every filter receives the
// piped input, its positional arguments and a `FilterContext` carrying
// per-conversion data such as the code mapping table.

pub mod collection;
pub mod date;
pub mod general;
pub mod math;
pub mod section;
pub mod segment;
pub mod string;

use crate::code_mapping::CodeMapping;
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::model::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Per-conversion data visible to filters
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterContext<'a> {
    pub code_mapping: Option<&'a CodeMapping>,
}

/// Signature shared by every filter
pub type FilterFn = fn(&FilterContext, &Value, &[Value]) -> Result<Value>;

/// Name to function table
#[derive(Default, Clone)]
pub struct FilterRegistry {
    filters: HashMap<&'static str, FilterFn>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&&str> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

static STANDARD_FILTERS: Lazy<FilterRegistry> = Lazy::new(|| {
    let mut registry = FilterRegistry::new();
    collection::register(&mut registry);
    date::register(&mut registry);
    general::register(&mut registry);
    math::register(&mut registry);
    section::register(&mut registry);
    segment::register(&mut registry);
    string::register(&mut registry);
    registry
});

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in filter table
    pub fn standard() -> &'static FilterRegistry {
        &STANDARD_FILTERS
    }

    pub fn register(&mut self, name: &'static str, filter: FilterFn) {
        self.filters.insert(name, filter);
    }

    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.filters.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Argument `index`, `Nil` when absent
pub(crate) fn arg(args: &[Value], index: usize) -> &Value {
    const NIL: &Value = &Value::Nil;
    args.get(index).unwrap_or(NIL)
}

/// Argument `index` as text, `default` when absent or nil
pub(crate) fn arg_string(args: &[Value], index: usize, default: &str) -> String {
    match args.get(index) {
        None | Some(Value::Nil) => default.to_string(),
        Some(value) => value.to_output_string(),
    }
}

pub(crate) fn invalid_argument(filter: &str, message: impl AsRef<str>) -> FhirConverterError {
    FhirConverterError::render(
        FhirConverterErrorCode::InvalidFilterArgument,
        format!("{}: {}", filter, message.as_ref()),
    )
}
