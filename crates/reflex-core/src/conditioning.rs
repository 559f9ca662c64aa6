use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::cycle::CycleUpdate;
use crate::memory::{Memory, ReactionRecord, SurpriseRecord};
use crate::util::skewed_random;

/// What a surprise evaluation decided: whether a recent own action explains
/// it, and the reaction to dispatch when it does not.
#[derive(Debug, Clone, PartialEq)]
pub struct SurpriseOutcome {
    pub expected: bool,
    pub reaction: Option<String>,
}

/// Turns unexplained surprises into learned reactions.
///
/// On every surprise it first asks whether a recently issued action explains
/// the change (strengthening that consequence when it does), and otherwise
/// consults the reactions grid for something to try.
#[derive(Debug)]
pub struct Conditioning {
    attribution_window_ms: u64,
    rng: SmallRng,
}

impl Conditioning {
    pub fn new(attribution_window_ms: u64) -> Self {
        Conditioning::with_rng(attribution_window_ms, SmallRng::from_entropy())
    }

    pub fn with_rng(attribution_window_ms: u64, rng: SmallRng) -> Self {
        Conditioning {
            attribution_window_ms: attribution_window_ms.max(1),
            rng,
        }
    }

    pub fn surprise(
        &mut self,
        memory: &mut Memory,
        input: &str,
        update: &CycleUpdate,
        now_ms: u64,
    ) -> SurpriseOutcome {
        let expected = self.is_expected(memory, input, now_ms);
        memory.history.surprises.push(SurpriseRecord {
            at_ms: now_ms,
            source: update.source.clone(),
            input: input.to_string(),
            history: update.history.join(","),
            expected,
        });
        if expected {
            return SurpriseOutcome {
                expected,
                reaction: None,
            };
        }

        // every action ever issued is a candidate reaction
        for cmd in memory.known_actions() {
            memory.reactions.output(&cmd);
        }
        let reaction = memory.reactions.predict(input);
        if let Some(ref output) = reaction {
            memory.history.reactions.push(ReactionRecord {
                at_ms: now_ms,
                input: input.to_string(),
                output: output.clone(),
            });
        }
        SurpriseOutcome { expected, reaction }
    }

    /// Did one of our own recent actions cause this input? The lookback
    /// cutoff is randomized left-biased, so attribution usually considers
    /// the last few seconds and occasionally the whole window. Matching
    /// consequences are reinforced in proportion to how recent the action
    /// was.
    fn is_expected(&mut self, memory: &mut Memory, input: &str, now_ms: u64) -> bool {
        if input.is_empty() {
            return false;
        }
        let lookback = skewed_random(&mut self.rng, self.attribution_window_ms);
        let cutoff = now_ms.saturating_sub(lookback);
        memory.consequences.output(input);
        let mut expected = false;
        for (cmd, issued_at) in memory.recent_actions(cutoff) {
            memory.consequences.input(&cmd);
            if memory.consequences.predict(&cmd).as_deref() == Some(input) {
                expected = true;
                let weight = (issued_at - cutoff) as f32 / self.attribution_window_ms as f32;
                memory.consequences.strengthen(&cmd, input, weight);
            }
        }
        expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::SensorCycle;

    fn surprising_update(cycle: &mut SensorCycle) -> CycleUpdate {
        for raw in ["a>1", "b>2", "a>1", "b>2"] {
            cycle.update(raw).expect("well-formed");
        }
        let update = cycle.update("a>9").expect("well-formed");
        assert!(update.surprise());
        update
    }

    #[test]
    fn unexplained_surprise_without_reactions_logs_and_stays_quiet() {
        let mut memory = Memory::new();
        let mut conditioning = Conditioning::with_rng(60_000, SmallRng::seed_from_u64(3));
        let mut cycle = SensorCycle::new(256, '>');
        let update = surprising_update(&mut cycle);

        let outcome = conditioning.surprise(&mut memory, "a>8", &update, 10_000);
        assert!(!outcome.expected);
        assert_eq!(outcome.reaction, None);
        assert_eq!(memory.history.surprises.len(), 1);
        assert_eq!(memory.history.surprises[0].source, "a");
        assert_eq!(memory.history.surprises[0].history, "9,1,1");
        assert!(memory.history.reactions.is_empty());
    }

    #[test]
    fn known_actions_become_reaction_candidates() {
        let mut memory = Memory::new();
        let mut conditioning = Conditioning::with_rng(60_000, SmallRng::seed_from_u64(3));
        let mut cycle = SensorCycle::new(256, '>');
        let update = surprising_update(&mut cycle);

        memory.stamp_action("hx.led<1", 1_000);
        memory.stamp_action("hx.buz<0", 2_000);
        // a previously learned association makes the prediction fire
        memory.reactions.strengthen("a>8", "hx.led<1", 2.0);

        let outcome = conditioning.surprise(&mut memory, "a>8", &update, 500_000);
        assert!(!outcome.expected);
        assert_eq!(outcome.reaction.as_deref(), Some("hx.led<1"));
        assert_eq!(memory.reactions.outputs().len(), 2);
        assert_eq!(memory.history.reactions.len(), 1);
        assert_eq!(memory.history.reactions[0].input, "a>8");
    }

    #[test]
    fn recent_matching_action_explains_the_surprise() {
        let mut memory = Memory::new();
        let mut conditioning = Conditioning::with_rng(60_000, SmallRng::seed_from_u64(3));
        let mut cycle = SensorCycle::new(256, '>');
        let update = surprising_update(&mut cycle);

        // the consequence of this command is already known, and the command
        // fired in the same instant the surprise arrives, so it is inside
        // every possible attribution window
        memory.consequences.strengthen("hx.led<1", "a>8", 1.0);
        let now_ms = 100_000;
        memory.stamp_action("hx.led<1", now_ms + 1);

        let before = memory.consequences.weight("hx.led<1", "a>8");
        let outcome = conditioning.surprise(&mut memory, "a>8", &update, now_ms);
        assert!(outcome.expected);
        assert_eq!(outcome.reaction, None);
        assert!(memory.history.surprises[0].expected);
        assert!(
            memory.consequences.weight("hx.led<1", "a>8") > before,
            "matching consequence must be reinforced"
        );
    }

    #[test]
    fn stale_actions_do_not_explain_anything() {
        let mut memory = Memory::new();
        let mut conditioning = Conditioning::with_rng(60_000, SmallRng::seed_from_u64(3));
        let mut cycle = SensorCycle::new(256, '>');
        let update = surprising_update(&mut cycle);

        memory.consequences.strengthen("hx.led<1", "a>8", 1.0);
        // issued far outside any possible attribution window
        memory.stamp_action("hx.led<1", 1_000);

        let outcome = conditioning.surprise(&mut memory, "a>8", &update, 10_000_000);
        assert!(!outcome.expected);
    }
}
