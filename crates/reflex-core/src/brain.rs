use std::sync::Arc;

use rand::rngs::SmallRng;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::config::BrainConfig;
use crate::conditioning::Conditioning;
use crate::cycle::{CycleUpdate, SensorCycle};
use crate::memory::{Memory, MemorySnapshot, MemoryStats};
use crate::pattern::Pattern;
use crate::reflection::{DeviceProfile, Directive, ReflectionPolicy};
use crate::util::timestamp_ms;

/// What one reading produced: the cycle update, the fingerprint when the
/// reading was surprising, the reaction to dispatch, and whether a memory
/// snapshot should be persisted.
#[derive(Debug, Clone)]
pub struct ReadingOutcome {
    pub update: CycleUpdate,
    pub input: Option<String>,
    pub reaction: Option<String>,
    pub persist: bool,
}

/// The single owner of all learning state. Wrap it in
/// `Arc<tokio::sync::Mutex<Brain>>` and every reading, action and reflection
/// tick is serialized through one lock, which is the whole concurrency
/// contract: no two surprises are ever evaluated against memory at once.
#[derive(Debug)]
pub struct Brain {
    config: BrainConfig,
    pub cycle: SensorCycle,
    pub memory: Memory,
    conditioning: Conditioning,
    reflection: ReflectionPolicy,
}

impl Brain {
    pub fn new(config: BrainConfig) -> Self {
        let cycle = SensorCycle::from_config(&config);
        let conditioning = Conditioning::new(config.attribution_window_ms);
        let reflection = ReflectionPolicy::new(&config);
        Brain {
            cycle,
            memory: Memory::new(),
            conditioning,
            reflection,
            config,
        }
    }

    /// Deterministic construction for tests.
    pub fn with_rngs(config: BrainConfig, conditioning: SmallRng, reflection: SmallRng) -> Self {
        let cycle = SensorCycle::from_config(&config);
        let conditioning = Conditioning::with_rng(config.attribution_window_ms, conditioning);
        let reflection = ReflectionPolicy::with_rng(&config, reflection);
        Brain {
            cycle,
            memory: Memory::new(),
            conditioning,
            reflection,
            config,
        }
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    /// Feeds one raw reading through the cycle engine and, when it
    /// surprises, through conditioning. Returns `None` for malformed input.
    pub fn handle_reading(&mut self, raw: &str, now_ms: u64) -> Option<ReadingOutcome> {
        let update = self.cycle.update(raw)?;
        if !update.surprise() {
            return Some(ReadingOutcome {
                update,
                input: None,
                reaction: None,
                persist: false,
            });
        }
        let fingerprint = Pattern::generate(update.history.iter().cloned());
        let input = format!(
            "{}{}{}",
            update.source,
            self.config.separator_out,
            fingerprint.vector_code()
        );
        let outcome = self
            .conditioning
            .surprise(&mut self.memory, &input, &update, now_ms);
        if let Some(ref action) = outcome.reaction {
            self.memory.stamp_action(action, now_ms);
        }
        Some(ReadingOutcome {
            update,
            input: Some(input),
            reaction: outcome.reaction,
            persist: !outcome.expected,
        })
    }

    /// Ledger stamp for any action dispatched outside the reading path
    /// (experiments stamp through `reflect_tick`, operator commands through
    /// here).
    pub fn observe_action(&mut self, cmd: &str, now_ms: u64) {
        self.memory.stamp_action(cmd, now_ms);
    }

    pub fn reflect_tick(&mut self, devices: &[DeviceProfile], now_ms: u64) -> Vec<Directive> {
        let directives = self.reflection.tick(&mut self.memory, devices, now_ms);
        for directive in &directives {
            if let Directive::Dispatch { action } = directive {
                self.memory.stamp_action(action, now_ms);
            }
        }
        directives
    }

    pub fn memory_snapshot(&self) -> MemorySnapshot {
        self.memory.snapshot()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }
}

/// Drives reflection at a fixed interval. A single task owns the loop, so a
/// tick can never overlap its predecessor, and the brain lock serializes it
/// against reading ingestion.
pub async fn run_loop<D, F, M>(
    brain: Arc<Mutex<Brain>>,
    tick_ms: u64,
    devices: D,
    on_directive: F,
    on_metrics: M,
) where
    D: Fn() -> Vec<DeviceProfile> + Send + Sync + 'static,
    F: Fn(&Directive) + Send + Sync + 'static,
    M: Fn(&MemoryStats) + Send + Sync + 'static,
{
    let tick_ms = tick_ms.max(50);
    let mut elapsed_since_metrics = 0u64;
    loop {
        sleep(Duration::from_millis(tick_ms)).await;
        let profiles = devices();
        let now_ms = timestamp_ms();
        let (directives, stats) = {
            let mut guard = brain.lock().await;
            let directives = guard.reflect_tick(&profiles, now_ms);
            (directives, guard.memory_stats())
        };
        for directive in &directives {
            on_directive(directive);
        }
        elapsed_since_metrics += tick_ms;
        if elapsed_since_metrics >= 2_000 {
            elapsed_since_metrics = 0;
            on_metrics(&stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn test_brain() -> Brain {
        Brain::with_rngs(
            BrainConfig::default(),
            SmallRng::seed_from_u64(11),
            SmallRng::seed_from_u64(12),
        )
    }

    #[test]
    fn quiet_readings_produce_no_learning_traffic() {
        let mut brain = test_brain();
        for (at, raw) in ["a>1", "b>2", "a>1", "b>2", "a>1"].iter().enumerate() {
            let outcome = brain.handle_reading(raw, at as u64 * 100).expect("reading");
            assert!(!outcome.update.surprise());
            assert!(outcome.input.is_none());
            assert!(!outcome.persist);
        }
        assert!(brain.memory.history.surprises.is_empty());
    }

    #[test]
    fn surprising_reading_is_fingerprinted_and_logged() {
        let mut brain = test_brain();
        for raw in ["a>1", "b>2", "a>1", "b>2"] {
            brain.handle_reading(raw, 1_000).expect("reading");
        }
        let outcome = brain.handle_reading("a>9", 2_000).expect("reading");
        assert!(outcome.update.surprise());
        let input = outcome.input.expect("fingerprint");
        assert!(input.starts_with("a>"), "fingerprint keyed by source");
        assert!(outcome.persist, "unexplained surprise persists memory");
        assert_eq!(brain.memory.history.surprises.len(), 1);
        assert_eq!(brain.memory.history.surprises[0].input, input);
    }

    #[test]
    fn learned_reaction_is_dispatched_and_stamped() {
        let mut brain = test_brain();
        for raw in ["a>1", "b>2", "a>1", "b>2"] {
            brain.handle_reading(raw, 1_000).expect("reading");
        }
        // teach the brain what fingerprint this flip produces, and a reaction
        let probe = {
            let mut shadow = test_brain();
            for raw in ["a>1", "b>2", "a>1", "b>2"] {
                shadow.handle_reading(raw, 1_000).expect("reading");
            }
            shadow
                .handle_reading("a>9", 1_500)
                .expect("reading")
                .input
                .expect("fingerprint")
        };
        brain.memory.reactions.strengthen(&probe, "hx.led<1", 2.0);

        let outcome = brain.handle_reading("a>9", 500_000).expect("reading");
        assert_eq!(outcome.reaction.as_deref(), Some("hx.led<1"));
        assert_eq!(brain.memory.actions["hx.led<1"], 500_000);
        assert_eq!(brain.memory.history.reactions.len(), 1);
    }

    #[test]
    fn malformed_reading_is_a_no_op() {
        let mut brain = test_brain();
        assert!(brain.handle_reading("garbage", 1_000).is_none());
        assert!(brain.memory.history.surprises.is_empty());
    }

    #[test]
    fn reflect_tick_stamps_experiment_dispatches() {
        let mut brain = Brain::with_rngs(
            BrainConfig {
                reflect_chance: 0,
                experiment_chance: 100,
                ..BrainConfig::default()
            },
            SmallRng::seed_from_u64(11),
            SmallRng::seed_from_u64(12),
        );
        brain.memory.reactions.output("hx.led<1");
        let mut profile = DeviceProfile::new("hx");
        profile.actions.insert("led".into(), vec!["1".into()]);

        let directives = brain.reflect_tick(&[profile], 9_000);
        assert_eq!(
            directives,
            vec![Directive::Dispatch {
                action: "hx.led<1".into()
            }]
        );
        assert_eq!(brain.memory.actions["hx.led<1"], 9_000);
    }
}
