//! Simulation configuration
//!
//! Fixed limits shared by both execution contexts. All values are clamped
//! to sane minima at construction; the per-kind storage tables are
//! pre-sized from these limits and never resize afterwards.

use serde::{Deserialize, Serialize};

/// Configuration for the rollback simulation core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Retained history window in frames
    pub history_frames: usize,
    /// Cap on the wire `future-delta`, bounding replay cost and message size
    pub max_future_inputs: u8,
    /// Maximum registered kinds; pre-sizes both data store collections
    pub max_kinds: usize,
    /// Per-controller buffered-input ring capacity in frames
    pub input_ring_frames: usize,
}

impl SimConfig {
    /// Create a configuration, clamping every limit to its minimum
    pub fn new(
        history_frames: usize,
        max_future_inputs: u8,
        max_kinds: usize,
        input_ring_frames: usize,
    ) -> Self {
        Self {
            history_frames: history_frames.max(2),
            max_future_inputs: max_future_inputs.max(1),
            max_kinds: max_kinds.max(1),
            input_ring_frames: input_ring_frames.max(1),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            history_frames: 64,
            max_future_inputs: 16,
            max_kinds: 32,
            input_ring_frames: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.history_frames, 64);
        assert_eq!(config.max_future_inputs, 16);
        assert_eq!(config.max_kinds, 32);
        assert_eq!(config.input_ring_frames, 128);
    }

    #[test]
    fn test_clamped_minima() {
        let config = SimConfig::new(0, 0, 0, 0);
        assert_eq!(config.history_frames, 2);
        assert_eq!(config.max_future_inputs, 1);
        assert_eq!(config.max_kinds, 1);
        assert_eq!(config.input_ring_frames, 1);
    }
}
