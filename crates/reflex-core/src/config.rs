use serde::{Deserialize, Serialize};

/// Every knob the brain recognizes, resolved once at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrainConfig {
    /// Separator for outbound command payloads (`led<1`).
    pub separator_in: char,
    /// Separator between a sensor source and its payload (`cpu>42`).
    pub separator_out: char,
    /// Overall memory budget; the cycle buffer holds `mem_size / 8` raw
    /// readings and each per-source history half of that.
    pub mem_size: usize,
    /// Reflection loop interval.
    pub tick_ms: u64,
    /// Percent chance per tick that the policy queries a device for
    /// capability metadata.
    pub reflect_chance: u32,
    /// Percent chance per tick that the policy dispatches an exploratory
    /// command.
    pub experiment_chance: u32,
    /// How far back surprise attribution may look for a causing action.
    pub attribution_window_ms: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        BrainConfig {
            separator_in: '<',
            separator_out: '>',
            mem_size: 256,
            tick_ms: 500,
            reflect_chance: 10,
            experiment_chance: 5,
            attribution_window_ms: 60_000,
        }
    }
}

impl BrainConfig {
    pub fn buffer_size(&self) -> usize {
        (self.mem_size / 8).max(2)
    }

    pub fn history_size(&self) -> usize {
        (self.buffer_size() / 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sizes_derive_from_mem_size() {
        let config = BrainConfig::default();
        assert_eq!(config.buffer_size(), 32);
        assert_eq!(config.history_size(), 16);

        let small = BrainConfig {
            mem_size: 64,
            ..BrainConfig::default()
        };
        assert_eq!(small.buffer_size(), 8);
        assert_eq!(small.history_size(), 4);
    }
}
