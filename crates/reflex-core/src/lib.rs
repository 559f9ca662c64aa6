pub mod brain;
pub mod conditioning;
pub mod config;
pub mod cycle;
pub mod grid;
pub mod memory;
pub mod pattern;
pub mod reflection;
pub mod util;

pub use brain::{run_loop, Brain, ReadingOutcome};
pub use conditioning::{Conditioning, SurpriseOutcome};
pub use config::BrainConfig;
pub use cycle::{compare, CycleUpdate, SensorCycle, SURPRISE_THRESHOLD};
pub use grid::{Grid, GridSnapshot, ADAPTIVE_DECAY};
pub use memory::{
    ExperimentRecord, Memory, MemoryHistory, MemorySnapshot, MemoryStats, ReactionRecord,
    SurpriseRecord,
};
pub use pattern::Pattern;
pub use reflection::{DeviceProfile, Directive, ReflectionPolicy};
pub use util::{skewed_random, timestamp_ms};
