// Processor Settings
//
// Tunables for one processor instance. Hosts usually embed these in their own
// JSON configuration, so every field has a default and the struct
// deserializes from a partial document.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessorSettings {
    /// Render budget per conversion in milliseconds; 0 disables the timeout
    pub timeout_ms: u64,
    /// Nesting bound for `include` and `evaluate`
    pub max_recursion_depth: usize,
    /// Nesting bound for `mergeDiff` blocks
    pub max_merge_depth: usize,
    /// Keep unused-segment bookkeeping even when no trace sink is given
    pub enable_trace: bool,
    /// Fail on undefined variables instead of rendering them empty
    pub strict_variables: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            max_recursion_depth: 64,
            max_merge_depth: 64,
            enable_trace: false,
            strict_variables: false,
        }
    }
}

impl ProcessorSettings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}
