use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::BrainConfig;
use crate::memory::{ExperimentRecord, Memory};

/// Read-only view of one attached device: its id, the capability ledger
/// discovered through the help protocol (action key -> known command
/// payloads), and the sensor sources it has been seen reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceProfile {
    pub id: String,
    pub actions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub sensors: Vec<String>,
}

impl DeviceProfile {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceProfile {
            id: id.into(),
            actions: BTreeMap::new(),
            sensors: Vec::new(),
        }
    }
}

/// Typed message the policy emits instead of writing to devices itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Directive {
    /// Help-protocol probe to write to one device.
    Query { device: String, payload: String },
    /// Actuator command of the form `{device}.{key}{sep_in}{payload}`.
    Dispatch { action: String },
}

/// The background exploration loop: periodically queries devices for
/// capability metadata and occasionally fires an exploratory command to see
/// what it does.
#[derive(Debug)]
pub struct ReflectionPolicy {
    separator_in: char,
    reflect_chance: u32,
    experiment_chance: u32,
    rng: SmallRng,
}

impl ReflectionPolicy {
    pub fn new(config: &BrainConfig) -> Self {
        ReflectionPolicy::with_rng(config, SmallRng::from_entropy())
    }

    pub fn with_rng(config: &BrainConfig, rng: SmallRng) -> Self {
        ReflectionPolicy {
            separator_in: config.separator_in,
            reflect_chance: config.reflect_chance.min(100),
            experiment_chance: config.experiment_chance.min(100),
            rng,
        }
    }

    /// One reflection round: `reflect` then `fulfill`.
    pub fn tick(
        &mut self,
        memory: &mut Memory,
        devices: &[DeviceProfile],
        now_ms: u64,
    ) -> Vec<Directive> {
        let mut directives = Vec::new();
        if let Some(query) = self.reflect(memory, devices) {
            directives.push(query);
        }
        if let Some(dispatch) = self.fulfill(memory, devices, now_ms) {
            directives.push(dispatch);
        }
        directives
    }

    /// Capability discovery. Knowing zero possible reactions is urgent, so
    /// an empty output set always queries; otherwise it happens on a
    /// `reflect_chance` percent roll.
    fn reflect(&mut self, memory: &Memory, devices: &[DeviceProfile]) -> Option<Directive> {
        let roll = self.rng.gen_range(0..100);
        if roll >= self.reflect_chance && !memory.reactions.outputs().is_empty() {
            return None;
        }
        self.query_actions(devices)
    }

    fn query_actions(&mut self, devices: &[DeviceProfile]) -> Option<Directive> {
        if devices.is_empty() {
            return None;
        }
        let device = &devices[self.rng.gen_range(0..devices.len())];
        let keys: Vec<&String> = device.actions.keys().collect();
        let payload = if keys.is_empty() {
            // nothing known yet, ask for the top-level listing
            "?".to_string()
        } else {
            let key = keys[self.rng.gen_range(0..keys.len())];
            format!("?{}{}", self.separator_in, key)
        };
        Some(Directive::Query {
            device: device.id.clone(),
            payload,
        })
    }

    /// Curiosity. On an `experiment_chance` percent roll, replay one of a
    /// random device's known commands to find out what it changes. The
    /// command is registered as a consequences key; its consequence is
    /// discovered later when surprise attribution matches it.
    fn fulfill(
        &mut self,
        memory: &mut Memory,
        devices: &[DeviceProfile],
        now_ms: u64,
    ) -> Option<Directive> {
        let roll = self.rng.gen_range(0..100);
        if roll >= self.experiment_chance {
            return None;
        }
        self.experiment(memory, devices, now_ms)
    }

    fn experiment(
        &mut self,
        memory: &mut Memory,
        devices: &[DeviceProfile],
        now_ms: u64,
    ) -> Option<Directive> {
        if devices.is_empty() {
            return None;
        }
        let device = &devices[self.rng.gen_range(0..devices.len())];
        let command = random_command(&mut self.rng, device, self.separator_in)?;
        let action = format!("{}.{}", device.id, command);
        memory.consequences.input(&action);
        memory.history.experiments.push(ExperimentRecord {
            at_ms: now_ms,
            output: action.clone(),
        });
        Some(Directive::Dispatch { action })
    }
}

fn random_command(rng: &mut impl Rng, device: &DeviceProfile, separator_in: char) -> Option<String> {
    let keys: Vec<&String> = device.actions.keys().collect();
    if keys.is_empty() {
        return None;
    }
    let key = keys[rng.gen_range(0..keys.len())];
    let commands = &device.actions[key.as_str()];
    if commands.is_empty() {
        return None;
    }
    let payload = &commands[rng.gen_range(0..commands.len())];
    Some(format!("{}{}{}", key, separator_in, payload))
}
