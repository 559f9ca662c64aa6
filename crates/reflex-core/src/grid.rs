use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Sibling edges of a strengthened input decay by this factor in adaptive
/// mode, so one dominant association per input emerges over time.
pub const ADAPTIVE_DECAY: f32 = 0.9;

/// Weighted bipartite lookup between an input key-space and an output
/// key-space.
///
/// Weights default to zero and never go negative. Registration order is
/// preserved on both sides; prediction ties break toward the
/// earliest-registered key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    adaptive: bool,
    outputs: Vec<String>,
    inputs: Vec<String>,
    weights: HashMap<String, Vec<f32>>,
}

impl Default for Grid {
    fn default() -> Self {
        Grid::new(true)
    }
}

impl Grid {
    pub fn new(adaptive: bool) -> Self {
        Grid {
            adaptive,
            outputs: Vec::new(),
            inputs: Vec::new(),
            weights: HashMap::new(),
        }
    }

    pub fn adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Idempotently registers `key` on the input side with zero weight
    /// against every known output.
    pub fn input(&mut self, key: &str) {
        if !self.weights.contains_key(key) {
            self.inputs.push(key.to_string());
            self.weights
                .insert(key.to_string(), vec![0.0; self.outputs.len()]);
        }
    }

    /// Idempotently registers `key` on the output side with zero weight
    /// against every known input.
    pub fn output(&mut self, key: &str) {
        if !self.outputs.iter().any(|existing| existing == key) {
            self.outputs.push(key.to_string());
            for row in self.weights.values_mut() {
                row.push(0.0);
            }
        }
    }

    pub fn weight(&self, input: &str, output: &str) -> f32 {
        let Some(col) = self.outputs.iter().position(|o| o == output) else {
            return 0.0;
        };
        self.weights
            .get(input)
            .and_then(|row| row.get(col))
            .copied()
            .unwrap_or(0.0)
    }

    /// Adds `weight` to the edge, auto-registering both keys. In adaptive
    /// mode the input's other edges decay, sharpening the winner; otherwise
    /// weights only accumulate.
    pub fn strengthen(&mut self, input: &str, output: &str, weight: f32) {
        self.input(input);
        self.output(output);
        let Some(col) = self.outputs.iter().position(|o| o == output) else {
            return;
        };
        let Some(row) = self.weights.get_mut(input) else {
            return;
        };
        row[col] += weight.max(0.0);
        if self.adaptive {
            for (index, other) in row.iter_mut().enumerate() {
                if index != col {
                    *other *= ADAPTIVE_DECAY;
                }
            }
        }
    }

    /// Best edge from either side: a known input predicts its
    /// heaviest output, a key known only as an output predicts its heaviest
    /// input. Unknown keys and all-zero rows predict nothing.
    pub fn predict(&self, key: &str) -> Option<String> {
        if let Some(row) = self.weights.get(key) {
            return best_index(row).map(|index| self.outputs[index].clone());
        }
        if let Some(col) = self.outputs.iter().position(|o| o == key) {
            let mut best: Option<(usize, f32)> = None;
            for (index, input) in self.inputs.iter().enumerate() {
                let weight = self
                    .weights
                    .get(input)
                    .and_then(|row| row.get(col))
                    .copied()
                    .unwrap_or(0.0);
                if weight > 0.0 && best.map_or(true, |(_, max)| weight > max) {
                    best = Some((index, weight));
                }
            }
            return best.map(|(index, _)| self.inputs[index].clone());
        }
        None
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            outputs: self.outputs.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|input| {
                    let row = self.weights.get(input).cloned().unwrap_or_default();
                    (input.clone(), row)
                })
                .collect(),
        }
    }
}

fn best_index(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &weight) in row.iter().enumerate() {
        if weight > 0.0 && best.map_or(true, |(_, max)| weight > max) {
            best = Some((index, weight));
        }
    }
    best.map(|(index, _)| index)
}

/// Plain projection of a grid, keyed the way it is persisted and inspected:
/// every input row lists its weights in `outputs` order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GridSnapshot {
    pub outputs: Vec<String>,
    pub inputs: BTreeMap<String, Vec<f32>>,
}
