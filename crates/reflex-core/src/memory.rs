use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::grid::{Grid, GridSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurpriseRecord {
    pub at_ms: u64,
    pub source: String,
    pub input: String,
    pub history: String,
    pub expected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReactionRecord {
    pub at_ms: u64,
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    pub at_ms: u64,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryHistory {
    pub surprises: Vec<SurpriseRecord>,
    pub reactions: Vec<ReactionRecord>,
    pub experiments: Vec<ExperimentRecord>,
}

/// The aggregate the whole learning loop mutates: the action recency ledger,
/// both association grids, and the append-only history logs.
///
/// Owned exclusively by the brain actor; everything else sees
/// [`MemorySnapshot`] projections.
#[derive(Debug, Clone)]
pub struct Memory {
    /// Action string -> last-issued epoch ms. Entries are overwritten, never
    /// deleted; unbounded growth is an accepted limitation.
    pub actions: HashMap<String, u64>,
    /// Fingerprint -> action, adaptive: the learned reactions.
    pub reactions: Grid,
    /// Action -> fingerprint, accumulating: the observed consequences.
    pub consequences: Grid,
    pub history: MemoryHistory,
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            actions: HashMap::new(),
            reactions: Grid::new(true),
            consequences: Grid::new(false),
            history: MemoryHistory::default(),
        }
    }

    pub fn stamp_action(&mut self, cmd: &str, now_ms: u64) {
        self.actions.insert(cmd.to_string(), now_ms);
    }

    /// Ledger entries issued strictly after `cutoff_ms`, oldest first.
    pub fn recent_actions(&self, cutoff_ms: u64) -> Vec<(String, u64)> {
        let mut recent: Vec<(String, u64)> = self
            .actions
            .iter()
            .filter(|(_, &at)| at > cutoff_ms)
            .map(|(cmd, &at)| (cmd.clone(), at))
            .collect();
        recent.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        recent
    }

    /// Every ledger action, oldest first, for bulk output registration.
    pub fn known_actions(&self) -> Vec<String> {
        let mut known: Vec<(&String, u64)> =
            self.actions.iter().map(|(cmd, &at)| (cmd, at)).collect();
        known.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        known.into_iter().map(|(cmd, _)| cmd.clone()).collect()
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            actions: self
                .actions
                .iter()
                .map(|(cmd, &at)| (cmd.clone(), at))
                .collect(),
            reactions: self.reactions.snapshot(),
            consequences: self.consequences.snapshot(),
            history: self.history.clone(),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            known_actions: self.actions.len(),
            reaction_outputs: self.reactions.outputs().len(),
            consequence_inputs: self.consequences.inputs().len(),
            surprises: self.history.surprises.len(),
            reactions: self.history.reactions.len(),
            experiments: self.history.experiments.len(),
        }
    }
}

/// Read-only projection handed to dashboards and the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemorySnapshot {
    pub actions: BTreeMap<String, u64>,
    pub reactions: GridSnapshot,
    pub consequences: GridSnapshot,
    pub history: MemoryHistory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryStats {
    pub known_actions: usize,
    pub reaction_outputs: usize,
    pub consequence_inputs: usize,
    pub surprises: usize,
    pub reactions: usize,
    pub experiments: usize,
}
