use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BrainConfig;

/// Deviation above this marks a payload surprising.
pub const SURPRISE_THRESHOLD: f64 = 0.33;

/// Snapshot produced by each reading fed into the engine.
///
/// The two surprise causes are carried separately: `payload_surprise` fires
/// when the payload deviates past the threshold from its own history,
/// `cycle_surprise` when the reporting order broke. The merged flag is their
/// OR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleUpdate {
    pub data: String,
    pub source: String,
    pub payload: String,
    /// `"{source}{sep}{payload}"` that the established rotation predicted,
    /// absent while no rotation exists yet.
    pub expected: Option<String>,
    /// Post-update history of this source, most recent first.
    pub history: Vec<String>,
    pub deviation: f64,
    pub payload_surprise: bool,
    pub cycle_surprise: bool,
}

impl CycleUpdate {
    pub fn surprise(&self) -> bool {
        self.payload_surprise || self.cycle_surprise
    }
}

/// Tracks the rotation of reporting sources and scores every reading for
/// deviation against that source's rolling history.
#[derive(Debug, Clone)]
pub struct SensorCycle {
    buffer: VecDeque<String>,
    order: Vec<String>,
    history: HashMap<String, Vec<String>>,
    order_seen: bool,
    last_update: Option<CycleUpdate>,
    separator: char,
    buffer_size: usize,
    history_size: usize,
}

impl SensorCycle {
    pub fn new(mem_size: usize, separator: char) -> Self {
        let buffer_size = (mem_size / 8).max(2);
        SensorCycle {
            buffer: VecDeque::new(),
            order: Vec::new(),
            history: HashMap::new(),
            order_seen: false,
            last_update: None,
            separator,
            buffer_size,
            history_size: (buffer_size / 2).max(1),
        }
    }

    pub fn from_config(config: &BrainConfig) -> Self {
        SensorCycle::new(config.mem_size, config.separator_out)
    }

    pub fn last_update(&self) -> Option<&CycleUpdate> {
        self.last_update.as_ref()
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn buffer(&self) -> impl Iterator<Item = &String> {
        self.buffer.iter()
    }

    pub fn history_of(&self, source: &str) -> &[String] {
        self.history.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Scores one raw reading and folds it into the rotation, history and
    /// audit buffer. Malformed readings are logged and change nothing; the
    /// previous update survives.
    pub fn update(&mut self, raw: &str) -> Option<CycleUpdate> {
        let mut parts = raw.split(self.separator);
        let (source, payload) = match (parts.next(), parts.next(), parts.next()) {
            (Some(source), Some(payload), None) => (source.to_string(), payload.to_string()),
            _ => {
                debug!(separator = %self.separator, data = raw, "cycle.malformed_reading");
                return None;
            }
        };

        // deviation against this source's own past, before anything mutates
        let history = self.history.entry(source.clone()).or_default();
        let mut expected_payload = history.first().cloned();
        let mut deviation = 1.0;
        let mut payload_surprise = false;
        if expected_payload.as_deref() == Some(payload.as_str()) {
            deviation = 0.0;
        } else if !history.is_empty() {
            deviation = compare(&payload, history);
            if deviation > SURPRISE_THRESHOLD {
                payload_surprise = true;
            }
        }

        // rotation check: only once the order has been established
        let expected_source = if self.order_seen {
            self.order.first().cloned()
        } else {
            None
        };
        let mut cycle_surprise = false;
        if let Some(head) = expected_source.as_deref() {
            if head != source {
                cycle_surprise = true;
                expected_payload = self
                    .history
                    .get(head)
                    .and_then(|past| past.first().cloned());
            }
        }

        // prune the order back to just after this source's last appearance
        if let Some(position) = self.order.iter().position(|s| s == &source) {
            self.order.drain(..=position);
            self.order_seen = true;
        }
        self.order.push(source.clone());

        if let Some(history) = self.history.get_mut(&source) {
            history.insert(0, payload.clone());
            history.truncate(self.history_size);
        }

        self.buffer.push_back(raw.to_string());
        while self.buffer.len() > self.buffer_size {
            self.buffer.pop_front();
        }

        let expected = expected_source.as_ref().map(|head| {
            format!(
                "{}{}{}",
                head,
                self.separator,
                expected_payload.clone().unwrap_or_default()
            )
        });
        let update = CycleUpdate {
            data: raw.to_string(),
            history: self.history.get(&source).cloned().unwrap_or_default(),
            source,
            payload,
            expected,
            deviation,
            payload_surprise,
            cycle_surprise,
        };
        self.last_update = Some(update.clone());
        Some(update)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.order.clear();
        self.history.clear();
        self.order_seen = false;
        self.last_update = None;
    }
}

/// Fuzzy per-character deviation of `actual` against a most-recent-first
/// history, normalized to `[0, 1]`.
///
/// Every history entry is scored over `len_max` positions; a position counts
/// as a mismatch unless both strings have it and the chars agree. Missing
/// positions therefore always mismatch, which penalizes length changes.
pub fn compare(actual: &str, history: &[String]) -> f64 {
    if actual.is_empty() || history.is_empty() {
        return 1.0;
    }
    let actual: Vec<char> = actual.chars().collect();
    let past: Vec<Vec<char>> = history.iter().map(|h| h.chars().collect()).collect();
    let len_max = past
        .iter()
        .map(Vec::len)
        .chain([actual.len()])
        .max()
        .unwrap_or(1);
    let step = 1.0 / (len_max as f64 * past.len() as f64);
    let mut deviation = 0.0;
    for entry in &past {
        for position in 0..len_max {
            let matches = match (actual.get(position), entry.get(position)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            if !matches {
                deviation += step;
            }
        }
    }
    deviation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn compare_scores_single_strings() {
        assert_close(compare("a", &history(&["a"])), 0.0);
        assert_close(compare("a", &history(&["b"])), 1.0);
        assert_close(compare("aa", &history(&["ab"])), 0.5);
        assert_close(compare("aaa", &history(&["abc"])), 2.0 / 3.0);
        assert_close(compare("abc", &history(&["abd"])), 1.0 / 3.0);
        assert_close(compare("abc", &history(&["ab"])), 1.0 / 3.0);
        assert_close(compare("abc", &history(&["abcd"])), 1.0 / 4.0);
        assert_close(compare("abc", &history(&["abcde"])), 2.0 / 5.0);
        assert_close(compare("ab", &history(&["abcde"])), 3.0 / 5.0);
        assert_close(compare("abc", &history(&["abcdef"])), 1.0 / 2.0);
        assert_close(compare("abc", &history(&["xazxp"])), 1.0);
        assert_close(compare("", &history(&["abc"])), 1.0);
    }

    #[test]
    fn compare_scores_whole_histories() {
        assert_close(compare("a", &history(&["a", "a"])), 0.0);
        assert_close(compare("a", &history(&["b", "b"])), 1.0);
        assert_close(compare("a", &history(&["b", "a"])), 0.5);
        assert_close(compare("a", &history(&["b", "a", "b"])), 2.0 / 3.0);
        assert_close(compare("a", &history(&["b", "b", "a", "b"])), 3.0 / 4.0);
        assert_close(compare("ab", &history(&["aa", "aa", "aa"])), 0.5);
        assert_close(compare("ab", &history(&["aa", "ab", "aa"])), 2.0 / 6.0);
        assert_close(compare("aaa", &history(&["abc", "aba", "aaa", ""])), 0.5);
        assert_close(
            compare("aaa", &history(&["abc", "aba", "aa", "vsad"])),
            10.0 / 16.0,
        );
        assert_close(compare("aaa", &history(&["xzr", "xAg", "", "xif"])), 1.0);
    }

    #[test]
    fn update_establishes_the_rotation() {
        let mut cycle = SensorCycle::new(256, '>');

        let first = cycle.update("one>1").expect("well-formed");
        assert_eq!(first.source, "one");
        assert_eq!(first.payload, "1");
        assert_eq!(first.expected, None);
        assert_close(first.deviation, 1.0);
        assert!(!first.surprise(), "first contact is not a surprise");
        assert_eq!(cycle.order(), ["one"]);
        assert_eq!(cycle.history_of("one"), ["1"]);

        cycle.update("two>2").expect("well-formed");
        cycle.update("three>3").expect("well-formed");
        assert_eq!(cycle.order(), ["one", "two", "three"]);

        // the 4th reading closes the loop: order prunes, repeat scores zero
        let repeat = cycle.update("one>1").expect("well-formed");
        assert_eq!(cycle.order(), ["two", "three", "one"]);
        assert_close(repeat.deviation, 0.0);
        assert!(!repeat.surprise());
        assert_eq!(repeat.expected, None, "order was not established on entry");
        assert_eq!(cycle.history_of("one"), ["1", "1"]);

        // once established, matching the head reports what was expected
        let next = cycle.update("two>2").expect("well-formed");
        assert_eq!(next.expected.as_deref(), Some("two>2"));
        assert!(!next.surprise());
    }

    #[test]
    fn update_flags_payload_changes_and_intermittent_sources() {
        let mut cycle = SensorCycle::new(256, '>');
        for raw in ["one>1", "two>2", "three>3", "one>1", "two>2"] {
            cycle.update(raw).expect("well-formed");
        }

        // payload flip on the expected source
        let flipped = cycle.update("three>XX").expect("well-formed");
        assert_eq!(flipped.expected.as_deref(), Some("three>3"));
        assert_close(flipped.deviation, 1.0);
        assert!(flipped.payload_surprise);
        assert!(!flipped.cycle_surprise);
        assert_eq!(cycle.history_of("three"), ["XX", "3"]);

        // an unseen source interrupts the rotation
        let intruder = cycle.update("four>4").expect("well-formed");
        assert_eq!(intruder.expected.as_deref(), Some("one>1"));
        assert_close(intruder.deviation, 1.0);
        assert!(!intruder.payload_surprise, "no history to deviate from");
        assert!(intruder.cycle_surprise);
        assert_eq!(cycle.order(), ["one", "two", "three", "four"]);

        cycle.update("one>1").expect("well-formed");
        cycle.update("two>2").expect("well-formed");

        // recovering source: payload back to normal but half the history disagrees
        let recovered = cycle.update("three>3").expect("well-formed");
        assert_eq!(recovered.expected.as_deref(), Some("three>XX"));
        assert_close(recovered.deviation, 0.75);
        assert!(recovered.payload_surprise);

        // skipping "four" breaks the rotation even though the payload matches
        let skipped = cycle.update("one>1").expect("well-formed");
        assert_eq!(skipped.expected.as_deref(), Some("four>4"));
        assert_close(skipped.deviation, 0.0);
        assert!(!skipped.payload_surprise);
        assert!(skipped.cycle_surprise);
        assert_eq!(cycle.order(), ["two", "three", "one"]);
    }

    #[test]
    fn malformed_readings_change_nothing() {
        let mut cycle = SensorCycle::new(256, '>');
        cycle.update("one>1").expect("well-formed");
        let before = cycle.last_update().cloned();

        assert!(cycle.update("garbage").is_none());
        assert!(cycle.update("a>b>c").is_none());
        assert_eq!(cycle.last_update().cloned(), before);
        assert_eq!(cycle.order(), ["one"]);
        assert_eq!(cycle.buffer().count(), 1);
    }

    #[test]
    fn buffer_and_history_stay_bounded() {
        let mut cycle = SensorCycle::new(64, '>'); // buffer 8, history 4
        for round in 0..10 {
            cycle.update(&format!("s>{round}")).expect("well-formed");
        }
        assert_eq!(cycle.buffer().count(), 8);
        assert_eq!(cycle.history_of("s").len(), 4);
        assert_eq!(cycle.history_of("s")[0], "9");
    }

    #[test]
    fn clear_resets_everything() {
        let mut cycle = SensorCycle::new(256, '>');
        cycle.update("one>1").expect("well-formed");
        cycle.clear();
        assert!(cycle.last_update().is_none());
        assert!(cycle.order().is_empty());
        assert_eq!(cycle.buffer().count(), 0);
        assert!(cycle.history_of("one").is_empty());
    }

    #[test]
    fn digital_flip_in_a_repetitive_cycle_is_the_only_surprise() {
        let mut cycle = SensorCycle::new(256, '>');
        let rounds: Vec<Vec<&str>> = (0..12)
            .map(|round| {
                let b = if (3..11).contains(&round) { "b>1" } else { "b>0" };
                vec!["C>0", "D>0", "X>1", b, "R>1"]
            })
            .collect();

        let mut surprises = Vec::new();
        for round in &rounds {
            for raw in round {
                let update = cycle.update(raw).expect("well-formed");
                if update.surprise() {
                    surprises.push(update);
                }
            }
        }

        assert_eq!(surprises.len(), 2, "exactly the flip and the revert");
        assert_eq!(surprises[0].data, "b>1");
        assert_eq!(surprises[0].expected.as_deref(), Some("b>0"));
        assert_close(surprises[0].deviation, 1.0);
        assert_eq!(surprises[1].data, "b>0");
        assert_eq!(surprises[1].expected.as_deref(), Some("b>1"));
        // history holds eight 1s and three 0s at the revert
        assert_close(surprises[1].deviation, 8.0 / 11.0);
    }
}
