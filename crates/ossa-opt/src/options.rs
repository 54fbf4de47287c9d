//! Pass configuration

use serde::{Deserialize, Serialize};

/// Options for the mandatory inlining pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MandatoryInlineOptions {
    /// Keep every function, even dead must-inline ones, so the module can
    /// be serialized again as-is
    pub preserve_for_serialization: bool,
    /// Merge trivial branch chains left behind by splicing
    pub merge_blocks: bool,
    /// Verify each processed body before moving on
    pub verify: bool,
}

impl Default for MandatoryInlineOptions {
    fn default() -> Self {
        Self {
            preserve_for_serialization: false,
            merge_blocks: true,
            verify: cfg!(debug_assertions),
        }
    }
}
