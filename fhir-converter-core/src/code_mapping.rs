// Code Mapping
//
// Three-level lookup table `mapping -> code -> property -> value` loaded from
// the `CodeSystem/CodeSystem` or `ValueSet/ValueSet` template. Unlike the
// render-time `mergeDiff`, combining two tables is strict: the same key path
// with different values is an error.

use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row used when a code has no entry of its own
pub const DEFAULT_CODE: &str = "__default__";

pub type CodeTable = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMapping {
    #[serde(default)]
    pub mapping: BTreeMap<String, CodeTable>,
}

impl CodeMapping {
    /// Parses the `{"mapping": {...}}` document
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            FhirConverterError::template_load(
                FhirConverterErrorCode::InvalidCodeMapping,
                format!("Invalid code mapping: {}", e),
            )
        })
    }

    /// Looks up `property` of `code` in `mapping`, falling back to the
    /// `__default__` row
    pub fn lookup(&self, mapping: &str, code: &str, property: &str) -> Option<&str> {
        let table = self.mapping.get(mapping)?;
        table
            .get(code)
            .and_then(|row| row.get(property))
            .or_else(|| table.get(DEFAULT_CODE).and_then(|row| row.get(property)))
            .map(String::as_str)
    }

    /// Merges `other` into `self`. Identical entries are fine; the same key
    /// path with a different value fails with `InvalidCodeMapping`.
    pub fn append(&mut self, other: &CodeMapping) -> Result<()> {
        for (mapping_name, table) in &other.mapping {
            let target = self.mapping.entry(mapping_name.clone()).or_default();
            for (code, row) in table {
                let target_row = target.entry(code.clone()).or_default();
                for (property, value) in row {
                    match target_row.get(property) {
                        Some(existing) if existing != value => {
                            return Err(FhirConverterError::template_load(
                                FhirConverterErrorCode::InvalidCodeMapping,
                                format!(
                                    "Conflicting code mapping for {}.{}.{}: '{}' vs '{}'",
                                    mapping_name, code, property, existing, value
                                ),
                            ));
                        }
                        Some(_) => {}
                        None => {
                            target_row.insert(property.clone(), value.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
