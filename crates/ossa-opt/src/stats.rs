//! Statistics about mandatory inlining

use serde::Serialize;

/// Counters for one or more runs of the pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InlineStats {
    /// Call sites replaced by the callee body
    pub inlined_call_sites: usize,
    /// Indirect calls rewritten to direct calls
    pub devirtualized_call_sites: usize,
    /// Circular inlining errors reported
    pub cycles_reported: usize,
    /// Must-inline functions removed after the run
    pub dead_functions_erased: usize,
}

impl InlineStats {
    /// Add the counters of `other`
    pub fn accumulate(&mut self, other: &InlineStats) {
        self.inlined_call_sites += other.inlined_call_sites;
        self.devirtualized_call_sites += other.devirtualized_call_sites;
        self.cycles_reported += other.cycles_reported;
        self.dead_functions_erased += other.dead_functions_erased;
    }
}
