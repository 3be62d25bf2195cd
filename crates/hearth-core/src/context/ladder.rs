//! Adaptive context-window ladder
//!
//! The working context size starts at the smallest tier and steps up one
//! tier whenever a turn's prompt uses more than 60% of it. It never shrinks
//! within a process and never passes the configured ceiling.

use tracing::info;

/// Context window sizes, ascending
pub const TIERS: [u32; 4] = [4096, 8192, 16384, 32768];

/// Fraction of the current tier a prompt may use before growing
pub const GROWTH_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLadder {
    current: u32,
    ceiling: u32,
}

impl ContextLadder {
    /// Start at the smallest tier
    ///
    /// A ceiling of zero, or one below the smallest tier, falls back to the
    /// largest tier.
    pub fn new(ceiling: u32) -> Self {
        let ceiling = if ceiling < TIERS[0] {
            TIERS[TIERS.len() - 1]
        } else {
            ceiling
        };
        Self {
            current: TIERS[0],
            ceiling,
        }
    }

    /// Context size to request for the next turn
    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Feed one completed turn's prompt size
    ///
    /// Returns the new tier when the ladder grew.
    pub fn observe(&mut self, prompt_tokens: u32) -> Option<u32> {
        if f64::from(prompt_tokens) <= f64::from(self.current) * GROWTH_THRESHOLD {
            return None;
        }

        let next = TIERS
            .iter()
            .copied()
            .find(|&tier| tier > self.current && tier <= self.ceiling)?;

        info!(from = self.current, to = next, prompt_tokens, "Growing context window");
        self.current = next;
        Some(next)
    }
}

impl Default for ContextLadder {
    fn default() -> Self {
        Self::new(TIERS[TIERS.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_smallest_tier() {
        assert_eq!(ContextLadder::new(32768).current(), 4096);
    }

    #[test]
    fn test_invalid_ceiling_clamps_to_largest_tier() {
        assert_eq!(ContextLadder::new(0).ceiling(), 32768);
        assert_eq!(ContextLadder::new(1000).ceiling(), 32768);
    }

    #[test]
    fn test_grows_one_tier_past_threshold() {
        let mut ladder = ContextLadder::new(32768);
        assert_eq!(ladder.observe(3000), Some(8192));
        assert_eq!(ladder.current(), 8192);

        assert_eq!(ladder.observe(3000), None);
        assert_eq!(ladder.current(), 8192);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut ladder = ContextLadder::new(32768);
        // 0.6 * 4096 = 2457.6
        assert_eq!(ladder.observe(2457), None);
        assert_eq!(ladder.observe(2458), Some(8192));
    }

    #[test]
    fn test_never_exceeds_ceiling() {
        let mut ladder = ContextLadder::new(8192);
        assert_eq!(ladder.observe(4000), Some(8192));
        assert_eq!(ladder.observe(100_000), None);
        assert_eq!(ladder.current(), 8192);
    }

    #[test]
    fn test_ceiling_between_tiers() {
        let mut ladder = ContextLadder::new(20000);
        ladder.observe(4000);
        ladder.observe(8000);
        assert_eq!(ladder.current(), 16384);
        assert_eq!(ladder.observe(20000), None);
    }

    #[test]
    fn test_monotonic_over_any_sequence() {
        let mut ladder = ContextLadder::default();
        let mut last = ladder.current();
        for tokens in [10, 5000, 0, 200, 9000, 1, 30000, 30000, 4, 50000] {
            ladder.observe(tokens);
            assert!(ladder.current() >= last);
            assert!(ladder.current() <= ladder.ceiling());
            last = ladder.current();
        }
        assert_eq!(ladder.current(), 32768);
    }
}
