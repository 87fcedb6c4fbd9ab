//! Tunables for the cooperative spins and the cycle search.

use corvid_storage::DEFAULT_SPIN_YIELD_THRESHOLD;

/// Coordinator tunables.
///
/// The defaults match the reference behavior: 10 000 spin iterations before a
/// ticket, lock or commit-barrier wait starts yielding the thread, and a
/// generous node-visit cap on the cycle search (exhausting the cap is treated
/// as a cycle, which can only over-abort, never admit an unserializable
/// schedule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcConfig {
    /// Spin iterations on a busy suspension point before yielding.
    pub spin_yield_threshold: u32,
    /// Maximum nodes visited per cycle search in the serialization graph.
    pub cycle_search_limit: usize,
}

impl Default for CcConfig {
    fn default() -> Self {
        Self {
            spin_yield_threshold: DEFAULT_SPIN_YIELD_THRESHOLD,
            cycle_search_limit: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CcConfig;

    #[test]
    fn defaults_match_the_reference_bounds() {
        let config = CcConfig::default();
        assert_eq!(config.spin_yield_threshold, 10_000);
        assert!(config.cycle_search_limit >= 1024);
    }
}
